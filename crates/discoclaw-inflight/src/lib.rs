//! Tracks placeholder replies awaiting a runtime invocation's result so a
//! cold start or a timed drain can clean them up instead of leaving a
//! "thinking…" message stuck forever.

pub mod chat_service;
pub mod error;
pub mod registry;
pub mod types;

pub use chat_service::ChatService;
pub use error::InFlightError;
pub use registry::InFlightRegistry;
pub use types::InFlightReply;
