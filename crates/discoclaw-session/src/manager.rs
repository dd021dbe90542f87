use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use discoclaw_core::config::RuntimeId;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SessionError};
use crate::types::{SessionFile, SessionRecord};

/// Maps stable session keys to adapter-native session ids.
///
/// Single JSON file, atomically rewritten on every mutation (write to a temp
/// file in the same directory, then rename over the target). The in-memory
/// map is guarded by a `Mutex` so writers are serialized; readers racing a
/// writer simply see the state before or after the mutation, never a partial
/// write.
pub struct SessionManager {
    path: PathBuf,
    state: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    /// Load sessions from `path`. A missing or corrupt file is treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<SessionFile>(&content) {
                Ok(file) => file
                    .sessions
                    .into_iter()
                    .map(|s| (s.key.clone(), s))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt sessions file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read sessions file, starting empty");
                HashMap::new()
            }
        };

        Self {
            path,
            state: Mutex::new(map),
        }
    }

    #[instrument(skip(self), fields(key))]
    pub fn lookup(&self, key: &str) -> Option<SessionRecord> {
        self.state.lock().expect("session lock poisoned").get(key).cloned()
    }

    /// Record or refresh the native id for `key`. Creates the record on first
    /// use; subsequent calls bump `last_used_at` and may update `native_id` if
    /// the adapter reissued one.
    #[instrument(skip(self), fields(key, %runtime_id))]
    pub fn store(&self, key: &str, runtime_id: RuntimeId, native_id: String) -> Result<SessionRecord> {
        let now = chrono::Utc::now();
        let mut state = self.state.lock().expect("session lock poisoned");

        let record = state
            .entry(key.to_string())
            .and_modify(|r| {
                r.native_id = native_id.clone();
                r.last_used_at = now;
            })
            .or_insert_with(|| SessionRecord {
                key: key.to_string(),
                runtime_id,
                native_id: native_id.clone(),
                created_at: now,
                last_used_at: now,
            })
            .clone();

        self.persist_locked(&state)?;
        debug!(key, native_id = %record.native_id, "session stored");
        Ok(record)
    }

    #[instrument(skip(self), fields(key))]
    pub fn touch(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().expect("session lock poisoned");
        match state.get_mut(key) {
            Some(r) => {
                r.last_used_at = chrono::Utc::now();
                self.persist_locked(&state)
            }
            None => Err(SessionError::NotFound { key: key.to_string() }),
        }
    }

    #[instrument(skip(self), fields(key))]
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().expect("session lock poisoned");
        if state.remove(key).is_none() {
            return Err(SessionError::NotFound { key: key.to_string() });
        }
        self.persist_locked(&state)
    }

    pub fn count(&self) -> usize {
        self.state.lock().expect("session lock poisoned").len()
    }

    fn persist_locked(&self, state: &HashMap<String, SessionRecord>) -> Result<()> {
        let file = SessionFile {
            sessions: state.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        atomic_write(&self.path, &content)
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
    tmp.persist(path).map_err(|e| SessionError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_lookup_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let mgr = SessionManager::load(&path);

        mgr.store("forge-plan-017:capable:drafter", RuntimeId::Claude, "native-1".into())
            .unwrap();
        let record = mgr.lookup("forge-plan-017:capable:drafter").unwrap();
        assert_eq!(record.native_id, "native-1");

        let reloaded = SessionManager::load(&path);
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.lookup("forge-plan-017:capable:drafter").unwrap().native_id, "native-1");
    }

    #[test]
    fn distinct_keys_stay_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::load(dir.path().join("sessions.json"));
        mgr.store("a:fast:x", RuntimeId::Claude, "n1".into()).unwrap();
        mgr.store("b:fast:x", RuntimeId::Claude, "n2".into()).unwrap();
        assert_eq!(mgr.lookup("a:fast:x").unwrap().native_id, "n1");
        assert_eq!(mgr.lookup("b:fast:x").unwrap().native_id, "n2");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::load(dir.path().join("nope.json"));
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn corrupt_file_loads_empty_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json").unwrap();
        let mgr = SessionManager::load(&path);
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn remove_missing_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::load(dir.path().join("sessions.json"));
        assert!(mgr.remove("nope").is_err());
    }

    #[test]
    fn touch_updates_last_used_at() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = SessionManager::load(dir.path().join("sessions.json"));
        mgr.store("k:fast:x", RuntimeId::Claude, "n".into()).unwrap();
        let before = mgr.lookup("k:fast:x").unwrap().last_used_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.touch("k:fast:x").unwrap();
        let after = mgr.lookup("k:fast:x").unwrap().last_used_at;
        assert!(after >= before);
    }
}
