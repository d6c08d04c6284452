pub mod line;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Outbound side of a messaging platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Channel name (e.g., "line").
    fn name(&self) -> &str;

    /// Reply to an inbound event identified by its reply token.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError>;

    /// Download the binary content (image bytes) of an inbound message.
    async fn fetch_content(&self, message_id: &str) -> Result<Vec<u8>, ChannelError>;
}
