//! Mail dispatch seam for the email step-up challenge.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a short-lived challenge code to the given address.
    async fn send_challenge(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

/// Logs the dispatch instead of sending; used until a real provider is wired.
#[derive(Clone, Debug)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_challenge(&self, email: &str, _code: &str) -> anyhow::Result<()> {
        // The code itself stays out of the logs.
        info!(email, "dispatching step-up challenge email");
        Ok(())
    }
}
