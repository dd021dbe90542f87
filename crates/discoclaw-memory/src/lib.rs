//! Per-user, tiered memory storage: rolling (recent turns), short-term
//! (bounded by size and age), and durable (long-lived facts). Each tier is
//! a JSON file under `memory/<tier>/<user>.json`, atomically rewritten.

pub mod error;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use manager::MemoryManager;
pub use types::{MemoryFile, MemoryItem, MemoryKind, MemorySource, MemoryStatus, MemoryTier};
