use async_trait::async_trait;

/// The minimal surface the in-flight registry needs from a chat backend to
/// clean up placeholders it can no longer resolve normally. Implemented by
/// the Discord adapter; kept here so this crate stays backend-agnostic.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<(), String>;
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), String>;
}
