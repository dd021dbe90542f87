//! Thin adapter for the Codex CLI. Codex has no streaming NDJSON mode of its
//! own; we run it to completion and replay its stdout as a single delta
//! followed by `TextFinal`, matching the fallback style the CLI-backed
//! adapters use when a backend can't stream.

use std::collections::HashSet;

use async_stream::stream;
use async_trait::async_trait;
use discoclaw_core::config::RuntimeId;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::adapter::{Capability, EventStream, RuntimeAdapter};
use crate::event::{EngineEvent, InvokeParams, ModelTier};

pub struct CodexCliAdapter {
    command: String,
    fast_model: String,
    capable_model: String,
}

impl CodexCliAdapter {
    pub fn new(command: impl Into<String>, fast_model: impl Into<String>, capable_model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fast_model: fast_model.into(),
            capable_model: capable_model.into(),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for CodexCliAdapter {
    fn id(&self) -> RuntimeId {
        RuntimeId::Codex
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ToolCalls])
    }

    fn resolve_model(&self, model: &str) -> String {
        match ModelTier::parse(model) {
            Some(ModelTier::Fast) => self.fast_model.clone(),
            Some(ModelTier::Capable) => self.capable_model.clone(),
            None => model.to_string(),
        }
    }

    async fn invoke(&self, params: InvokeParams) -> EventStream {
        let command = self.command.clone();
        Box::pin(stream! {
            let mut cmd = tokio::process::Command::new(&command);
            cmd.arg("exec")
                .arg("--model")
                .arg(&params.model)
                .arg("--skip-git-repo-check")
                .current_dir(&params.cwd)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped());

            if params.tool_call_gate {
                cmd.arg("--sandbox").arg("workspace-write");
            } else {
                cmd.arg("--sandbox").arg("danger-full-access");
            }

            debug!(command = %command, model = %params.model, "spawning codex CLI");

            let mut child = match cmd.spawn() {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    yield EngineEvent::Error { message: format!("codex CLI not found at '{command}'") };
                    yield EngineEvent::Done;
                    return;
                }
                Err(e) => {
                    yield EngineEvent::Error { message: format!("failed to spawn codex CLI: {e}") };
                    yield EngineEvent::Done;
                    return;
                }
            };

            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(params.prompt.as_bytes()).await;
            }

            let output = match tokio::time::timeout(params.timeout, child.wait_with_output()).await {
                Ok(Ok(o)) => o,
                Ok(Err(e)) => {
                    yield EngineEvent::Error { message: format!("codex CLI process error: {e}") };
                    yield EngineEvent::Done;
                    return;
                }
                Err(_) => {
                    yield EngineEvent::Error { message: "codex CLI invocation timed out".into() };
                    yield EngineEvent::Done;
                    return;
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                yield EngineEvent::Error { message: format!("codex CLI exited with {}: {stderr}", output.status) };
                yield EngineEvent::Done;
                return;
            }

            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            yield EngineEvent::TextDelta { text: text.clone() };
            yield EngineEvent::TextFinal { text };
            yield EngineEvent::Done;
        })
    }
}
