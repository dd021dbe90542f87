use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which of the three per-user memory files an item lives in. Each tier
/// shares the same item shape; they differ only in retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTier {
    /// Most recent N conversation turns, capped by count alone.
    Rolling,
    /// Turns and inferred facts, capped by count and age.
    ShortTerm,
    /// Explicitly learned or promoted facts; kept until forgotten.
    Durable,
}

impl MemoryTier {
    pub fn dirname(self) -> &'static str {
        match self {
            MemoryTier::Rolling => "rolling",
            MemoryTier::ShortTerm => "shortterm",
            MemoryTier::Durable => "durable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Turn,
    Fact,
    Preference,
    Instruction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Archived,
}

/// Where a memory item came from, for traceability back to the chat surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemorySource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub channel_id: Option<String>,
    pub message_id: Option<String>,
    pub guild_id: Option<String>,
    pub channel_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub kind: MemoryKind,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: MemoryStatus,
    pub source: MemorySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(kind: MemoryKind, text: impl Into<String>, source: MemorySource) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            text: text.into(),
            tags: Vec::new(),
            status: MemoryStatus::Active,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// On-disk shape of a single tier file: `memory/<tier>/<user>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFile {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<MemoryItem>,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self {
            version: 1,
            updated_at: Utc::now(),
            items: Vec::new(),
        }
    }
}
