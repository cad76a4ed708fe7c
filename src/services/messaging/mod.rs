pub mod telegram;

use async_trait::async_trait;

use crate::models::Reply;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Renders and delivers one reply. Errors are left to the caller to log.
    async fn send_message(&self, reply: &Reply) -> anyhow::Result<()>;
}
