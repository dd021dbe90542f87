use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::types::{MemoryFile, MemoryItem, MemoryTier};

/// Rolling tier keeps at most this many most-recent items per user.
const ROLLING_MAX_ITEMS: usize = 40;
/// Short-term tier keeps at most this many items, and drops anything older.
const SHORTTERM_MAX_ITEMS: usize = 200;
const SHORTTERM_MAX_AGE_DAYS: i64 = 7;

/// Per-user, per-tier JSON file store for durable/short-term/rolling memory.
///
/// Each `(tier, user)` pair is its own file under `<root>/<tier>/<user>.json`,
/// atomically rewritten on every mutation. A missing or corrupt file reads
/// back as an empty store rather than failing startup.
pub struct MemoryManager {
    root: PathBuf,
    /// Serializes writes to the same user+tier file; a single mutex is
    /// coarse but memory mutations are infrequent relative to message volume.
    write_lock: Mutex<()>,
}

impl MemoryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, tier: MemoryTier, user_id: &str) -> PathBuf {
        self.root.join(tier.dirname()).join(format!("{user_id}.json"))
    }

    #[instrument(skip(self), fields(%user_id, tier = tier.dirname()))]
    pub fn load(&self, tier: MemoryTier, user_id: &str) -> MemoryFile {
        let path = self.path_for(tier, user_id);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt memory file, starting empty");
                MemoryFile::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read memory file, starting empty");
                MemoryFile::default()
            }
        }
    }

    /// Append an item, then apply the tier's retention policy and persist.
    #[instrument(skip(self, item), fields(%user_id, tier = tier.dirname()))]
    pub fn append(&self, tier: MemoryTier, user_id: &str, item: MemoryItem) -> Result<()> {
        let _guard = self.write_lock.lock().expect("memory write lock poisoned");
        let mut file = self.load(tier, user_id);
        file.items.push(item);
        apply_retention(tier, &mut file.items);
        file.updated_at = Utc::now();
        self.persist(tier, user_id, &file)
    }

    /// Remove a single item by id, if present.
    #[instrument(skip(self), fields(%user_id, tier = tier.dirname(), id))]
    pub fn forget(&self, tier: MemoryTier, user_id: &str, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("memory write lock poisoned");
        let mut file = self.load(tier, user_id);
        let before = file.items.len();
        file.items.retain(|i| i.id != id);
        if file.items.len() == before {
            return Err(crate::error::MemoryError::NotFound { id: id.to_string() });
        }
        file.updated_at = Utc::now();
        self.persist(tier, user_id, &file)
    }

    pub fn list(&self, tier: MemoryTier, user_id: &str) -> Vec<MemoryItem> {
        self.load(tier, user_id).items
    }

    /// Render a tier's items into a prompt-ready block, most recent first,
    /// truncated to `max_chars` at an item boundary.
    pub fn render(&self, tier: MemoryTier, user_id: &str, max_chars: usize) -> String {
        let items = self.load(tier, user_id).items;
        let mut out = String::new();
        for item in items.iter().rev() {
            let line = format!("- {}\n", item.text);
            if out.len() + line.len() > max_chars {
                break;
            }
            out.push_str(&line);
        }
        out
    }

    fn persist(&self, tier: MemoryTier, user_id: &str, file: &MemoryFile) -> Result<()> {
        let path = self.path_for(tier, user_id);
        let content = serde_json::to_string_pretty(file)?;
        atomic_write(&path, &content)?;
        debug!(path = %path.display(), items = file.items.len(), "persisted memory tier");
        Ok(())
    }
}

fn apply_retention(tier: MemoryTier, items: &mut Vec<MemoryItem>) {
    items.sort_by_key(|i| i.created_at);
    match tier {
        MemoryTier::Rolling => {
            if items.len() > ROLLING_MAX_ITEMS {
                let drop = items.len() - ROLLING_MAX_ITEMS;
                items.drain(0..drop);
            }
        }
        MemoryTier::ShortTerm => {
            let cutoff = Utc::now() - Duration::days(SHORTTERM_MAX_AGE_DAYS);
            items.retain(|i| i.created_at >= cutoff);
            if items.len() > SHORTTERM_MAX_ITEMS {
                let drop = items.len() - SHORTTERM_MAX_ITEMS;
                items.drain(0..drop);
            }
        }
        MemoryTier::Durable => {}
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| crate::error::MemoryError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryKind, MemorySource};

    fn item(text: &str) -> MemoryItem {
        MemoryItem::new(MemoryKind::Fact, text, MemorySource::default())
    }

    #[test]
    fn append_then_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        mgr.append(MemoryTier::Durable, "u1", item("likes tea")).unwrap();
        let items = mgr.list(MemoryTier::Durable, "u1");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "likes tea");
    }

    #[test]
    fn rolling_tier_caps_at_max_items() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        for i in 0..(ROLLING_MAX_ITEMS + 10) {
            mgr.append(MemoryTier::Rolling, "u1", item(&format!("turn {i}"))).unwrap();
        }
        let items = mgr.list(MemoryTier::Rolling, "u1");
        assert_eq!(items.len(), ROLLING_MAX_ITEMS);
        assert_eq!(items.last().unwrap().text, format!("turn {}", ROLLING_MAX_ITEMS + 9));
    }

    #[test]
    fn durable_tier_never_expires_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        for i in 0..(SHORTTERM_MAX_ITEMS + 50) {
            mgr.append(MemoryTier::Durable, "u1", item(&format!("fact {i}"))).unwrap();
        }
        assert_eq!(mgr.list(MemoryTier::Durable, "u1").len(), SHORTTERM_MAX_ITEMS + 50);
    }

    #[test]
    fn forget_removes_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        mgr.append(MemoryTier::Durable, "u1", item("x")).unwrap();
        let id = mgr.list(MemoryTier::Durable, "u1")[0].id.clone();
        mgr.forget(MemoryTier::Durable, "u1", &id).unwrap();
        assert!(mgr.list(MemoryTier::Durable, "u1").is_empty());
    }

    #[test]
    fn forget_missing_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        assert!(mgr.forget(MemoryTier::Durable, "u1", "nope").is_err());
    }

    #[test]
    fn render_truncates_at_item_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        mgr.append(MemoryTier::Durable, "u1", item("short")).unwrap();
        mgr.append(MemoryTier::Durable, "u1", item("another fact that is a bit longer")).unwrap();
        let rendered = mgr.render(MemoryTier::Durable, "u1", 20);
        assert!(rendered.len() <= 20 + 1);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("durable")).unwrap();
        std::fs::write(dir.path().join("durable/u1.json"), "{garbage").unwrap();
        let mgr = MemoryManager::new(dir.path());
        assert!(mgr.list(MemoryTier::Durable, "u1").is_empty());
    }

    #[test]
    fn separate_users_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(dir.path());
        mgr.append(MemoryTier::Durable, "alice", item("alice fact")).unwrap();
        mgr.append(MemoryTier::Durable, "bob", item("bob fact")).unwrap();
        assert_eq!(mgr.list(MemoryTier::Durable, "alice").len(), 1);
        assert_eq!(mgr.list(MemoryTier::Durable, "bob").len(), 1);
    }
}
