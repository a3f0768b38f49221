use crate::cli::actions::Action;
use anyhow::Result;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        redis_url: matches
            .get_one::<String>("redis-url")
            .map(String::to_string)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --redis-url"))?,
        session_timeout_seconds: matches
            .get_one::<u64>("session-timeout")
            .copied()
            .unwrap_or(1800),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() {
        let matches = commands::new().get_matches_from(vec![
            "sentra",
            "--port",
            "9090",
            "--redis-url",
            "redis://cache:6379/1",
            "--session-timeout",
            "600",
        ]);

        let Action::Server {
            port,
            redis_url,
            session_timeout_seconds,
        } = handler(&matches).unwrap();
        assert_eq!(port, 9090);
        assert_eq!(redis_url, "redis://cache:6379/1");
        assert_eq!(session_timeout_seconds, 600);
    }
}
