//! `EngineEvent` — the tagged union yielded by a `RuntimeAdapter::invoke` stream.
//!
//! Ordering: deltas and tool events may interleave in arrival order; the final
//! event must be one of `Done`, `Error`, or a terminating `TextFinal`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Closed set of event variants; decoders must reject unknown variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TextDelta { text: String },
    TextFinal { text: String },
    LogLine { stream: LogStream, line: String },
    ToolStart { name: String, input: String },
    ToolEnd { name: String, output: Option<String> },
    ImageData { media_type: String, data: String },
    Error { message: String },
    Done,
}

impl EngineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Done | EngineEvent::Error { .. })
    }
}

/// A single image attachment passed into an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    pub media_type: String,
    pub data: String,
}

/// Model tier aliases resolved per-adapter to a concrete model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Capable,
}

impl ModelTier {
    pub fn parse(model: &str) -> Option<Self> {
        match model {
            "fast" => Some(ModelTier::Fast),
            "capable" => Some(ModelTier::Capable),
            _ => None,
        }
    }
}

/// Parameters for a single `invoke` call.
#[derive(Debug, Clone)]
pub struct InvokeParams {
    pub prompt: String,
    pub model: String,
    pub cwd: std::path::PathBuf,
    pub add_dirs: Vec<std::path::PathBuf>,
    pub tools: Vec<String>,
    pub timeout: std::time::Duration,
    pub session_key: String,
    pub images: Vec<ImageInput>,
    /// When true, a `ToolStart` matching a destructive pattern aborts the stream.
    pub tool_call_gate: bool,
}

impl InvokeParams {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            cwd: std::env::temp_dir(),
            add_dirs: Vec::new(),
            tools: Vec::new(),
            timeout: std::time::Duration::from_millis(
                discoclaw_core::constants::DEFAULT_RUNTIME_TIMEOUT_MS,
            ),
            session_key: session_key.into(),
            images: Vec::new(),
            tool_call_gate: false,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<std::path::PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_add_dirs(mut self, dirs: Vec<std::path::PathBuf>) -> Self {
        self.add_dirs = dirs;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tool_call_gate(mut self, gate: bool) -> Self {
        self.tool_call_gate = gate;
        self
    }

    pub fn with_images(mut self, images: Vec<ImageInput>) -> Self {
        self.images = images;
        self
    }
}

/// Build a session key in the canonical `<purpose>:<model>:<scope>` format.
pub fn session_key(purpose: &str, model: &str, scope: &str) -> String {
    format!("{purpose}:{model}:{scope}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_format() {
        assert_eq!(
            session_key("forge-plan-017", "capable", "drafter"),
            "forge-plan-017:capable:drafter"
        );
    }

    #[test]
    fn terminal_variants() {
        assert!(EngineEvent::Done.is_terminal());
        assert!(EngineEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(!EngineEvent::TextDelta { text: "x".into() }.is_terminal());
    }

    #[test]
    fn unknown_variant_rejected() {
        let raw = serde_json::json!({"type": "mystery"});
        let parsed: Result<EngineEvent, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }
}
