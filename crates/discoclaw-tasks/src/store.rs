use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::{Result, TaskError};
use crate::types::{Task, TaskStatus};

const DEFAULT_PREFIX: &str = "ws-";

struct Index {
    tasks: HashMap<String, Task>,
    next_seq: u64,
}

/// Append-only JSONL task store backed by `tasks/tasks.jsonl`.
///
/// Every mutation appends a full copy of the task to the log rather than
/// rewriting the file; the in-memory index is rebuilt by replaying the log
/// from the start on load, with later lines for an id overriding earlier
/// ones. A malformed line is skipped, not fatal.
pub struct TaskStore {
    path: PathBuf,
    prefix: String,
    index: Mutex<Index>,
}

impl TaskStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::load_with_prefix(path, DEFAULT_PREFIX)
    }

    #[instrument(skip(path), fields(prefix))]
    pub fn load_with_prefix(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let path = path.into();
        let prefix = prefix.into();
        let tasks = replay(&path);
        let next_seq = tasks
            .values()
            .filter_map(|t| t.id.strip_prefix(prefix.as_str()))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(1);
        debug!(count = tasks.len(), next_seq, "loaded task store");
        Self {
            path,
            prefix,
            index: Mutex::new(Index { tasks, next_seq }),
        }
    }

    #[instrument(skip(self, title, description))]
    pub fn create(
        &self,
        title: impl Into<String>,
        description: Option<String>,
        labels: Vec<String>,
        thread_id: Option<String>,
    ) -> Result<Task> {
        let mut index = self.index.lock().expect("task index lock poisoned");
        let id = format!("{}{}", self.prefix, index.next_seq);
        index.next_seq += 1;
        let mut task = Task::new(id, title);
        task.description = description;
        task.labels = labels;
        task.external_refs.thread_id = thread_id;
        self.append_locked(&mut index, task.clone())?;
        Ok(task)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.index.lock().expect("task index lock poisoned").tasks.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Task> {
        let index = self.index.lock().expect("task index lock poisoned");
        let mut tasks: Vec<Task> = index.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    #[instrument(skip(self))]
    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<Task> {
        let mut index = self.index.lock().expect("task index lock poisoned");
        let mut task = index
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;
        task.status = status;
        task.updated_at = Utc::now();
        self.append_locked(&mut index, task.clone())?;
        Ok(task)
    }

    #[instrument(skip(self, title, description))]
    pub fn update(
        &self,
        id: &str,
        title: Option<String>,
        description: Option<String>,
        labels: Option<Vec<String>>,
    ) -> Result<Task> {
        let mut index = self.index.lock().expect("task index lock poisoned");
        let mut task = index
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;
        if let Some(title) = title {
            task.title = title;
        }
        if description.is_some() {
            task.description = description;
        }
        if let Some(labels) = labels {
            task.labels = labels;
        }
        task.updated_at = Utc::now();
        self.append_locked(&mut index, task.clone())?;
        Ok(task)
    }

    fn append_locked(&self, index: &mut Index, task: Task) -> Result<()> {
        let line = serde_json::to_string(&task)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        index.tasks.insert(task.id.clone(), task);
        Ok(())
    }
}

/// Dedup by exact-case-insensitive title among non-closed tasks. Used by the
/// plan subsystem to decide whether to reuse an existing task rather than
/// create a duplicate.
pub fn find_open_by_title<'a>(tasks: &'a [Task], title: &str) -> Option<&'a Task> {
    tasks
        .iter()
        .find(|t| t.status != TaskStatus::Closed && t.title.eq_ignore_ascii_case(title))
}

fn replay(path: &Path) -> HashMap<String, Task> {
    let mut tasks = HashMap::new();
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return tasks,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to open task log, starting empty");
            return tasks;
        }
    };
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(path = %path.display(), lineno, error = %e, "unreadable task log line, skipping");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Task>(&line) {
            Ok(task) => {
                tasks.insert(task.id.clone(), task);
            }
            Err(e) => {
                warn!(path = %path.display(), lineno, error = %e, "corrupt task log line, skipping");
            }
        }
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let store = TaskStore::load(&path);
        let t1 = store.create("fix the thing", None, vec![], None).unwrap();
        assert_eq!(t1.id, "ws-1");
        let t2 = store.create("fix another thing", None, vec![], None).unwrap();
        assert_eq!(t2.id, "ws-2");

        let reloaded = TaskStore::load(&path);
        assert_eq!(reloaded.list().len(), 2);
        assert_eq!(reloaded.get("ws-1").unwrap().title, "fix the thing");
    }

    #[test]
    fn counter_resumes_past_highest_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        {
            let store = TaskStore::load(&path);
            store.create("a", None, vec![], None).unwrap();
            store.create("b", None, vec![], None).unwrap();
        }
        let store = TaskStore::load(&path);
        let t3 = store.create("c", None, vec![], None).unwrap();
        assert_eq!(t3.id, "ws-3");
    }

    #[test]
    fn update_appends_new_line_and_overrides_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let store = TaskStore::load(&path);
        let t = store.create("title", None, vec![], None).unwrap();
        store.set_status(&t.id, TaskStatus::InProgress).unwrap();
        store.set_status(&t.id, TaskStatus::Closed).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);

        let reloaded = TaskStore::load(&path);
        assert_eq!(reloaded.get(&t.id).unwrap().status, TaskStatus::Closed);
    }

    #[test]
    fn set_status_missing_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::load(dir.path().join("tasks.jsonl"));
        assert!(store.set_status("ws-404", TaskStatus::Closed).is_err());
    }

    #[test]
    fn corrupt_line_is_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        let store = TaskStore::load(&path);
        store.create("good one", None, vec![], None).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{not valid json").unwrap();
        }
        let reloaded = TaskStore::load(&path);
        assert_eq!(reloaded.list().len(), 1);
    }

    #[test]
    fn find_open_by_title_ignores_closed_and_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::load(dir.path().join("tasks.jsonl"));
        let t1 = store.create("Ship The Thing", None, vec![], None).unwrap();
        let t2 = store.create("other", None, vec![], None).unwrap();
        store.set_status(&t2.id, TaskStatus::Closed).unwrap();

        let tasks = store.list();
        assert!(find_open_by_title(&tasks, "ship the thing").is_some());
        assert_eq!(find_open_by_title(&tasks, "ship the thing").unwrap().id, t1.id);
        assert!(find_open_by_title(&tasks, "other").is_none());
    }

    #[test]
    fn custom_prefix_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::load_with_prefix(dir.path().join("tasks.jsonl"), "bead-");
        let t = store.create("x", None, vec![], None).unwrap();
        assert_eq!(t.id, "bead-1");
    }
}
