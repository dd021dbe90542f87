//! The per-message pipeline (spec.md §4.3): placeholder → context assembly
//! → runtime stream → streaming edits → action parse/execute → optional
//! follow-up invoke, serialized per (guild, channel) on a FIFO queue.
//!
//! `discoclaw-pipeline` owns the stages that are channel-agnostic; the
//! chat-service-specific parts (posting/editing a real message) are
//! injected through the `ChatAdapter` trait in `context`, implemented by
//! `discoclaw-discord`.

pub mod assembly;
pub mod context;
pub mod defer;
pub mod error;
pub mod handler;
pub mod queue;
pub mod subsystems;
pub mod throttle;

pub use assembly::{ChannelContext, ContextAssembler, PersonaFiles};
pub use context::{ChatAdapter, IncomingMessage};
pub use defer::{DeferHandler, DeferScheduler};
pub use error::{PipelineError, Result};
pub use handler::{MessagePipeline, PipelineDeps};
pub use queue::ChannelQueues;
pub use subsystems::Subsystems;
pub use throttle::EditThrottle;
