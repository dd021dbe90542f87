//! The channel-agnostic seam between the message pipeline and a concrete
//! chat backend. Implemented by the Discord adapter; kept here so this
//! crate never depends on a specific wire protocol.

use async_trait::async_trait;
use discoclaw_runtime::ImageInput;

/// A message as it arrives from the chat service, already past whatever
/// backend-specific mention-stripping or thread-routing the adapter does.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub message_id: String,
    pub thread_parent_id: Option<String>,
    pub user_id: String,
    /// True when the sender is a bot on the trusted-bot allowlist rather
    /// than a regular allowlisted user.
    pub from_trusted_bot: bool,
    pub text: String,
    pub images: Vec<ImageInput>,
    /// Text-file attachments, already decoded, paired with their filename.
    pub attachment_texts: Vec<(String, String)>,
    /// Notes about attachments that couldn't be inlined (unsupported type,
    /// over budget, download failure).
    pub attachment_notes: Vec<String>,
}

/// The chat-service operations the pipeline needs, independent of wire
/// protocol. One instance is shared across all channels; implementations
/// must be safe to call concurrently for different channels.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// Post a new placeholder message and return its id.
    async fn post_placeholder(&self, channel_id: &str, body: &str) -> Result<String, String>;

    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<(), String>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), String>;

    /// Rendered reply-chain and pinned messages for the channel, most
    /// relevant first, already formatted as prompt-ready text.
    async fn reply_chain_and_pins(&self, channel_id: &str, message_id: &str) -> Result<String, String>;

    /// The last bytes of channel history up to `byte_budget`, already
    /// rendered as prompt-ready text (most recent last).
    async fn channel_history(&self, channel_id: &str, byte_budget: usize) -> Result<String, String>;

    /// Called once a turn reaches a terminal state for `message_id` (edited
    /// with final text, deleted, or edited with an error). Adapters that
    /// track per-message UI state (e.g. ack reactions) hook in here; the
    /// default is a no-op.
    async fn turn_complete(&self, _channel_id: &str, _message_id: &str, _ok: bool) {}
}

#[async_trait]
impl<T: ChatAdapter + ?Sized> ChatAdapter for std::sync::Arc<T> {
    async fn post_placeholder(&self, channel_id: &str, body: &str) -> Result<String, String> {
        (**self).post_placeholder(channel_id, body).await
    }
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Result<(), String> {
        (**self).edit_message(channel_id, message_id, text).await
    }
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), String> {
        (**self).delete_message(channel_id, message_id).await
    }
    async fn reply_chain_and_pins(&self, channel_id: &str, message_id: &str) -> Result<String, String> {
        (**self).reply_chain_and_pins(channel_id, message_id).await
    }
    async fn channel_history(&self, channel_id: &str, byte_budget: usize) -> Result<String, String> {
        (**self).channel_history(channel_id, byte_budget).await
    }
    async fn turn_complete(&self, channel_id: &str, message_id: &str, ok: bool) {
        (**self).turn_complete(channel_id, message_id, ok).await
    }
}
