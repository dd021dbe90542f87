//! The `RuntimeAdapter` contract.
//!
//! A runtime adapter exposes `invoke(params) -> lazy sequence of EngineEvent`:
//! finite, not restartable. Producing the sequence may block for the full
//! invocation duration. The adapter owns its own transport (subprocess or
//! HTTP) and maps backend events to the common protocol.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::event::{EngineEvent, InvokeParams};

/// Capabilities a runtime adapter may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    StreamingText,
    ToolCalls,
    Images,
    Sessions,
}

pub type EventStream = Pin<Box<dyn Stream<Item = EngineEvent> + Send>>;

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Identifier from the closed set {claude, openai, openrouter, codex, gemini}.
    fn id(&self) -> discoclaw_core::config::RuntimeId;

    fn capabilities(&self) -> HashSet<Capability>;

    /// Resolve a model tier alias (`fast`/`capable`) to a concrete backend model id.
    /// Non-tier strings pass through unchanged.
    fn resolve_model(&self, model: &str) -> String;

    /// Produce a lazy, finite, single-consumer, in-order event stream.
    /// The final event is always `Done`, `Error`, or a terminating `TextFinal`.
    async fn invoke(&self, params: InvokeParams) -> EventStream;
}
