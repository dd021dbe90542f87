use chrono::{DateTime, Utc};
use discoclaw_core::config::RuntimeId;
use serde::{Deserialize, Serialize};

/// A persisted mapping from a stable session key to an adapter-native session id.
///
/// Keys are opaque strings in the canonical `<purpose>:<model>:<scope>` shape,
/// built by callers (runtime adapters don't need to parse them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: String,
    pub runtime_id: RuntimeId,
    pub native_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct SessionFile {
    pub(crate) sessions: Vec<SessionRecord>,
}
