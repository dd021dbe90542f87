//! Runtime abstraction over the LM backends Discoclaw can delegate a turn to:
//! a common event protocol, a per-backend concurrency limiter, and the
//! concrete CLI/HTTP adapters.

pub mod adapter;
pub mod claude_cli;
pub mod codex_cli;
pub mod error;
pub mod event;
pub mod gemini_cli;
pub mod limiter;
pub mod openai_compat;
pub mod registry;

pub use adapter::{Capability, EventStream, RuntimeAdapter};
pub use claude_cli::ClaudeCliAdapter;
pub use codex_cli::CodexCliAdapter;
pub use error::{Result, RuntimeError};
pub use event::{session_key, EngineEvent, ImageInput, InvokeParams, LogStream, ModelTier};
pub use gemini_cli::GeminiCliAdapter;
pub use limiter::ConcurrencyLimiter;
pub use openai_compat::OpenAiCompatAdapter;
pub use registry::{RuntimeRegistry, RuntimeRegistryBuilder};
