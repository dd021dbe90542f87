//! The cron scheduler (spec.md §4.8): each job's source of truth is a forum
//! thread on the chat service, mirrored into an in-memory registry. A
//! one-second tick loop hands due jobs to an executor that acquires a
//! per-job file lock, invokes the runtime with a restricted action-flag
//! set, records run statistics, and releases the lock. A debounced sync
//! coordinator keeps the registry in step with forum edits and the
//! tag-map JSON.

pub mod engine;
pub mod error;
pub mod locks;
pub mod registry;
pub mod schedule;
pub mod source;
pub mod stats;
pub mod subsystem;
pub mod sync;
pub mod types;

pub use engine::{CronSink, SchedulerEngine, SchedulerHandle};
pub use error::{CronError, Result};
pub use registry::CronRegistry;
pub use source::{CronForumSource, RawJobThread, TagMap};
pub use stats::RunStatsStore;
pub use subsystem::{CronForumWriter, CronHandler};
pub use sync::SyncCoordinator;
pub use types::{CronJob, JobRunStats, RunRecord, RunResult, Schedule};
