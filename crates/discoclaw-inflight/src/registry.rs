use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, instrument, warn};

use crate::chat_service::ChatService;
use crate::error::Result;
use crate::types::{InFlightFile, InFlightReply};

const INTERRUPTED_MARKER: &str = "_(interrupted — the bot restarted before this finished)_";

/// Tracks placeholder replies awaiting a runtime invocation, keyed by message id.
///
/// Mirrored to a JSON file on every mutation; a missing or corrupt file is
/// treated as empty rather than refusing to start.
pub struct InFlightRegistry {
    path: PathBuf,
    state: Mutex<HashMap<String, InFlightReply>>,
}

impl InFlightRegistry {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<InFlightFile>(&content) {
                Ok(file) => file
                    .entries
                    .into_iter()
                    .map(|e| (e.message_id.clone(), e))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt in-flight file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read in-flight file, starting empty");
                HashMap::new()
            }
        };

        Self {
            path,
            state: Mutex::new(map),
        }
    }

    #[instrument(skip(self), fields(channel_id, message_id, purpose))]
    pub fn register(&self, channel_id: &str, message_id: &str, purpose: &str, session_key: &str) -> Result<()> {
        let now = now_ms();
        let mut state = self.state.lock().expect("inflight lock poisoned");
        state.insert(
            message_id.to_string(),
            InFlightReply {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                created_at_ms: now,
                last_edit_at_ms: now,
                session_key: session_key.to_string(),
                purpose: purpose.to_string(),
            },
        );
        self.persist_locked(&state)
    }

    pub fn note_edit(&self, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("inflight lock poisoned");
        if let Some(entry) = state.get_mut(message_id) {
            entry.last_edit_at_ms = now_ms();
            self.persist_locked(&state)
        } else {
            Ok(())
        }
    }

    pub fn resolve(&self, message_id: &str) -> Result<()> {
        let mut state = self.state.lock().expect("inflight lock poisoned");
        state.remove(message_id);
        self.persist_locked(&state)
    }

    pub fn count(&self) -> usize {
        self.state.lock().expect("inflight lock poisoned").len()
    }

    pub fn has_for_channel(&self, channel_id: &str) -> bool {
        self.state
            .lock()
            .expect("inflight lock poisoned")
            .values()
            .any(|e| e.channel_id == channel_id)
    }

    /// Message ids of every placeholder currently in flight for `channel_id`.
    pub fn message_ids_for_channel(&self, channel_id: &str) -> Vec<String> {
        self.state
            .lock()
            .expect("inflight lock poisoned")
            .values()
            .filter(|e| e.channel_id == channel_id)
            .map(|e| e.message_id.clone())
            .collect()
    }

    /// Best-effort edit of every remaining placeholder with an interrupted
    /// marker, bounded by `timeout`, then clear the registry regardless of
    /// how many edits succeeded. Returns the number of entries cleared.
    #[instrument(skip(self, chat))]
    pub async fn drain(&self, timeout: std::time::Duration, chat: &dyn ChatService) -> usize {
        let entries: Vec<InFlightReply> = {
            let state = self.state.lock().expect("inflight lock poisoned");
            state.values().cloned().collect()
        };

        let _ = tokio::time::timeout(timeout, async {
            for entry in &entries {
                if let Err(e) = chat
                    .edit_message(&entry.channel_id, &entry.message_id, INTERRUPTED_MARKER)
                    .await
                {
                    warn!(message_id = %entry.message_id, error = %e, "failed to edit in-flight placeholder during drain");
                }
            }
        })
        .await;

        let mut state = self.state.lock().expect("inflight lock poisoned");
        let count = state.len();
        state.clear();
        if let Err(e) = self.persist_locked(&state) {
            warn!(error = %e, "failed to persist registry after drain");
        }
        debug!(count, "drained in-flight registry");
        count
    }

    /// Run once at cold start: for each entry surviving an unclean shutdown,
    /// try to edit it with the interrupted marker, falling back to deleting
    /// it if the edit fails, then clear the registry.
    #[instrument(skip(self, chat))]
    pub async fn cleanup_orphans(&self, chat: &dyn ChatService) {
        let entries: Vec<InFlightReply> = {
            let state = self.state.lock().expect("inflight lock poisoned");
            state.values().cloned().collect()
        };

        for entry in &entries {
            if chat
                .edit_message(&entry.channel_id, &entry.message_id, INTERRUPTED_MARKER)
                .await
                .is_err()
            {
                if let Err(e) = chat.delete_message(&entry.channel_id, &entry.message_id).await {
                    warn!(message_id = %entry.message_id, error = %e, "failed to clean up orphaned placeholder");
                }
            }
        }

        let mut state = self.state.lock().expect("inflight lock poisoned");
        state.clear();
        if let Err(e) = self.persist_locked(&state) {
            warn!(error = %e, "failed to persist registry after orphan cleanup");
        }
    }

    fn persist_locked(&self, state: &HashMap<String, InFlightReply>) -> Result<()> {
        let file = InFlightFile {
            entries: state.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        atomic_write(&self.path, &content)
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| crate::error::InFlightError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeChat {
        fail_edits: bool,
    }

    #[async_trait::async_trait]
    impl ChatService for FakeChat {
        async fn edit_message(&self, _channel_id: &str, _message_id: &str, _text: &str) -> Result<(), String> {
            if self.fail_edits {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
        async fn delete_message(&self, _channel_id: &str, _message_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn register_then_resolve_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let reg = InFlightRegistry::load(dir.path().join("inflight.json"));
        reg.register("c1", "m1", "chat-reply", "c1:fast:u1").unwrap();
        assert_eq!(reg.count(), 1);
        assert!(reg.has_for_channel("c1"));
        reg.resolve("m1").unwrap();
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflight.json");
        let reg = InFlightRegistry::load(&path);
        reg.register("c1", "m1", "chat-reply", "c1:fast:u1").unwrap();
        drop(reg);

        let reloaded = InFlightRegistry::load(&path);
        assert_eq!(reloaded.count(), 1);
        assert!(reloaded.has_for_channel("c1"));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflight.json");
        std::fs::write(&path, "{not json").unwrap();
        let reg = InFlightRegistry::load(&path);
        assert_eq!(reg.count(), 0);
    }

    #[tokio::test]
    async fn drain_clears_registry_even_if_edits_fail() {
        let dir = tempfile::tempdir().unwrap();
        let reg = InFlightRegistry::load(dir.path().join("inflight.json"));
        reg.register("c1", "m1", "chat-reply", "c1:fast:u1").unwrap();
        reg.register("c1", "m2", "chat-reply", "c1:fast:u2").unwrap();

        let chat = FakeChat { fail_edits: true };
        let drained = reg.drain(std::time::Duration::from_secs(1), &chat).await;
        assert_eq!(drained, 2);
        assert_eq!(reg.count(), 0);
    }

    #[tokio::test]
    async fn cleanup_orphans_clears_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inflight.json");
        {
            let reg = InFlightRegistry::load(&path);
            reg.register("c1", "m1", "chat-reply", "c1:fast:u1").unwrap();
        }

        let reg = InFlightRegistry::load(&path);
        assert_eq!(reg.count(), 1);
        let chat = FakeChat { fail_edits: false };
        reg.cleanup_orphans(&chat).await;
        assert_eq!(reg.count(), 0);
    }
}
