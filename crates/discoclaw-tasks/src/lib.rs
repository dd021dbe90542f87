//! Append-only task tracker backed by `tasks/tasks.jsonl`. Every mutation is
//! a new line carrying the task's full latest state; the in-memory index is
//! rebuilt by replaying the log on load, last line per id wins.

pub mod error;
pub mod store;
pub mod tag_map;
pub mod types;

pub use error::TaskError;
pub use store::{find_open_by_title, TaskStore};
pub use tag_map::TagMap;
pub use types::{ExternalRefs, Task, TaskStatus};
