use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// Maps a tasks-forum tag name to the label applied to tasks filed under it,
/// so the sync path can turn forum tags into `Task::labels` entries without
/// hardcoding the mapping. Persisted at `tasks/tag-map.json`; a missing or
/// corrupt file reads back empty rather than failing startup.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TagMap {
    #[serde(flatten)]
    entries: HashMap<String, String>,
}

impl TagMap {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt task tag-map, starting empty");
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read task tag-map, starting empty");
                Self::default()
            }
        }
    }

    pub fn label_for_tag(&self, tag_name: &str) -> Option<&str> {
        self.entries.get(tag_name).map(String::as_str)
    }

    pub fn set(&mut self, tag_name: impl Into<String>, label: impl Into<String>) {
        self.entries.insert(tag_name.into(), label.into());
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, &content)
    }
}

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.persist(path).map_err(|e| crate::error::TaskError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag-map.json");
        let mut map = TagMap::default();
        map.set("bug", "bug");
        map.set("feature-request", "feature");
        map.save(&path).unwrap();

        let loaded = TagMap::load(&path);
        assert_eq!(loaded.label_for_tag("bug"), Some("bug"));
        assert_eq!(loaded.label_for_tag("feature-request"), Some("feature"));
        assert_eq!(loaded.label_for_tag("nope"), None);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = TagMap::load(dir.path().join("absent.json"));
        assert_eq!(map.label_for_tag("anything"), None);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tag-map.json");
        std::fs::write(&path, "{not json").unwrap();
        let map = TagMap::load(&path);
        assert_eq!(map.label_for_tag("anything"), None);
    }
}
