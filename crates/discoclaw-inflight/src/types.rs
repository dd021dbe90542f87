use serde::{Deserialize, Serialize};

/// A placeholder reply currently awaiting a runtime invocation's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightReply {
    pub channel_id: String,
    pub message_id: String,
    pub created_at_ms: i64,
    pub last_edit_at_ms: i64,
    pub session_key: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct InFlightFile {
    pub(crate) entries: Vec<InFlightReply>,
}
