pub mod server;

/// Actions the CLI can dispatch to.
#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        redis_url: String,
        session_timeout_seconds: u64,
    },
}
