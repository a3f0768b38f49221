use anyhow::{Result, anyhow};
use url::Url;

use crate::api;
use crate::cli::actions::Action;
use crate::security::SecurityConfig;
use crate::store::StoreConfig;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            redis_url,
            session_timeout_seconds,
        } => {
            let parsed = Url::parse(&redis_url)?;
            if parsed.scheme() != "redis" && parsed.scheme() != "rediss" {
                return Err(anyhow!(
                    "unsupported state store scheme: {}",
                    parsed.scheme()
                ));
            }

            let store_config = StoreConfig::new(redis_url);
            let security_config =
                SecurityConfig::new().with_session_timeout_seconds(session_timeout_seconds);

            api::new(port, store_config, security_config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_redis_urls() {
        let action = Action::Server {
            port: 8080,
            redis_url: "postgres://localhost/db".to_string(),
            session_timeout_seconds: 1800,
        };
        let err = handle(action).await.unwrap_err();
        assert!(err.to_string().contains("unsupported state store scheme"));
    }
}
