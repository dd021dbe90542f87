//! Adapter for the Claude Code CLI (`claude -p --output-format stream-json`).
//!
//! Claude Code handles its own tool execution internally (Bash, Read, Write,
//! Grep, ...); we only need to translate its NDJSON event stream into
//! `EngineEvent`s and honor the tool-call gate when the caller asks for one.

use std::collections::HashSet;
use std::path::PathBuf;

use async_stream::stream;
use async_trait::async_trait;
use discoclaw_core::config::RuntimeId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::adapter::{Capability, EventStream, RuntimeAdapter};
use crate::event::{EngineEvent, InvokeParams, LogStream, ModelTier};

pub struct ClaudeCliAdapter {
    command: String,
    fast_model: String,
    capable_model: String,
}

impl ClaudeCliAdapter {
    pub fn new(command: impl Into<String>, fast_model: impl Into<String>, capable_model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fast_model: fast_model.into(),
            capable_model: capable_model.into(),
        }
    }

}

fn write_system_prompt(params: &InvokeParams) -> std::io::Result<tempfile::NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix("discoclaw-sys-")
        .suffix(".txt")
        .tempfile()?;
    std::fs::write(file.path(), params.prompt.as_bytes())?;
    Ok(file)
}

#[async_trait]
impl RuntimeAdapter for ClaudeCliAdapter {
    fn id(&self) -> RuntimeId {
        RuntimeId::Claude
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ToolCalls, Capability::Sessions, Capability::Images])
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
            let sys_file = match write_system_prompt(&params) {
                Ok(f) => f,
                Err(e) => {
                    yield EngineEvent::Error { message: format!("failed to write system prompt: {e}") };
                    return;
                }
            };

            let mut cmd = tokio::process::Command::new(&command);
            cmd.arg("-p")
                .arg("--output-format")
                .arg("stream-json")
                .arg("--verbose")
                .arg("--model")
                .arg(&params.model)
                .arg("--system-prompt-file")
                .arg(sys_file.path())
                .current_dir(&params.cwd)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped());

            for dir in &params.add_dirs {
                cmd.arg("--add-dir").arg(dir);
            }

            if !params.tools.is_empty() {
                if params.tools.len() == 1 && params.tools[0] == "*" {
                    cmd.arg("--dangerously-skip-permissions");
                } else {
                    for tool in &params.tools {
                        cmd.arg("--allowedTools").arg(tool);
                    }
                }
            }

            let images_file = if !params.images.is_empty() {
                write_images_manifest(&params.images).ok()
            } else {
                None
            };
            if let Some(ref f) = images_file {
                cmd.arg("--image-manifest").arg(f.path());
            }

            debug!(command = %command, model = %params.model, session_key = %params.session_key, "spawning claude CLI");

            let mut child = match cmd.spawn() {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    yield EngineEvent::Error { message: format!("claude CLI not found at '{command}'") };
                    return;
                }
                Err(e) => {
                    yield EngineEvent::Error { message: format!("failed to spawn claude CLI: {e}") };
                    return;
                }
            };

            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(params.prompt.as_bytes()).await {
                    yield EngineEvent::Error { message: format!("failed to write prompt: {e}") };
                    return;
                }
            }

            let stdout = match child.stdout.take() {
                Some(s) => s,
                None => {
                    yield EngineEvent::Error { message: "claude CLI stdout not captured".into() };
                    return;
                }
            };
            let stderr = child.stderr.take();

            let mut lines = BufReader::new(stdout).lines();
            let mut gated = false;
            // One deadline for the whole invocation, not re-armed per line — a
            // chatty CLI that keeps emitting lines must still time out.
            let deadline = tokio::time::Instant::now() + params.timeout;

            loop {
                let line = match tokio::time::timeout_at(deadline, lines.next_line()).await {
                    Ok(Ok(Some(l))) => l,
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        yield EngineEvent::Error { message: format!("error reading claude CLI stdout: {e}") };
                        break;
                    }
                    Err(_) => {
                        let _ = child.start_kill();
                        yield EngineEvent::Error { message: "claude CLI invocation timed out".into() };
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match parse_stream_line(&line) {
                    Some(event) => {
                        if params.tool_call_gate {
                            if let EngineEvent::ToolStart { ref name, ref input } = event {
                                if discoclaw_terminal_gate_blocks(name, input) {
                                    gated = true;
                                    yield EngineEvent::Error { message: format!("blocked destructive tool call: {name}") };
                                    let _ = child.start_kill();
                                    break;
                                }
                            }
                        }
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    None => {
                        warn!(line = %line, "unrecognized claude CLI stream line, skipping");
                    }
                }
            }

            if let Some(mut err) = stderr {
                use tokio::io::AsyncReadExt;
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf).await;
                for errline in buf.lines().filter(|l| !l.trim().is_empty()) {
                    yield EngineEvent::LogLine { stream: LogStream::Stderr, line: errline.to_string() };
                }
            }

            if !gated {
                let status = child.wait().await;
                if let Ok(status) = status {
                    if !status.success() {
                        yield EngineEvent::Error { message: format!("claude CLI exited with status {status}") };
                    }
                }
            }
            yield EngineEvent::Done;
        })
    }
}

/// Translate one NDJSON line from the CLI's event stream into an `EngineEvent`.
/// Unrecognized shapes return `None` so the caller can log and continue rather
/// than abort the whole invocation over one malformed line.
fn parse_stream_line(line: &str) -> Option<EngineEvent> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let kind = value.get("type")?.as_str()?;

    match kind {
        "text_delta" => Some(EngineEvent::TextDelta {
            text: value.get("text")?.as_str()?.to_string(),
        }),
        "text_final" | "result" => Some(EngineEvent::TextFinal {
            text: value
                .get("text")
                .or_else(|| value.get("result"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        }),
        "tool_start" => Some(EngineEvent::ToolStart {
            name: value.get("name")?.as_str()?.to_string(),
            input: value
                .get("input")
                .map(|v| v.to_string())
                .unwrap_or_default(),
        }),
        "tool_end" => Some(EngineEvent::ToolEnd {
            name: value.get("name")?.as_str()?.to_string(),
            output: value.get("output").and_then(|v| v.as_str()).map(String::from),
        }),
        "log" | "log_line" => Some(EngineEvent::LogLine {
            stream: if value.get("stream").and_then(|v| v.as_str()) == Some("stderr") {
                LogStream::Stderr
            } else {
                LogStream::Stdout
            },
            line: value.get("line").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        }),
        "image" | "image_data" => Some(EngineEvent::ImageData {
            media_type: value
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("image/png")
                .to_string(),
            data: value.get("data")?.as_str()?.to_string(),
        }),
        "error" => Some(EngineEvent::Error {
            message: value
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown claude CLI error")
                .to_string(),
        }),
        "system" | "init" => None,
        _ => None,
    }
}

fn write_images_manifest(images: &[crate::event::ImageInput]) -> std::io::Result<tempfile::NamedTempFile> {
    use base64::Engine;
    use std::io::Write as _;

    let file = tempfile::Builder::new()
        .prefix("discoclaw-img-")
        .suffix(".json")
        .tempfile()?;

    let mut paths = Vec::new();
    for img in images {
        let ext = match img.media_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&img.data)
            .unwrap_or_default();
        let path: PathBuf = std::env::temp_dir().join(format!("discoclaw-att-{}.{ext}", uuid::Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        paths.push(path.to_string_lossy().to_string());
    }

    let mut f = file.reopen()?;
    f.write_all(serde_json::to_string(&paths)?.as_bytes())?;
    Ok(file)
}

/// Destructive tool-call gate: only `Bash` calls go through the command
/// safety checker, and only when their JSON input carries a `command` field.
fn discoclaw_terminal_gate_blocks(name: &str, input: &str) -> bool {
    if name != "Bash" {
        return false;
    }
    let command = serde_json::from_str::<serde_json::Value>(input)
        .ok()
        .and_then(|v| v.get("command").and_then(|c| c.as_str()).map(str::to_string));
    match command {
        Some(cmd) => discoclaw_terminal::safety::check_command(&cmd).is_err(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_delta() {
        let line = r#"{"type":"text_delta","text":"hi"}"#;
        match parse_stream_line(line) {
            Some(EngineEvent::TextDelta { text }) => assert_eq!(text, "hi"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_tool_start_and_end() {
        let start = r#"{"type":"tool_start","name":"Bash","input":"{\"command\":\"ls\"}"}"#;
        assert!(matches!(parse_stream_line(start), Some(EngineEvent::ToolStart { .. })));
        let end = r#"{"type":"tool_end","name":"Bash","output":"ok"}"#;
        assert!(matches!(parse_stream_line(end), Some(EngineEvent::ToolEnd { .. })));
    }

    #[test]
    fn unrecognized_type_returns_none() {
        assert!(parse_stream_line(r#"{"type":"mystery"}"#).is_none());
    }

    #[test]
    fn malformed_json_returns_none() {
        assert!(parse_stream_line("not json").is_none());
    }

    #[test]
    fn resolves_model_tiers() {
        let adapter = ClaudeCliAdapter::new("claude", "haiku-fast", "opus-capable");
        assert_eq!(adapter.resolve_model("fast"), "haiku-fast");
        assert_eq!(adapter.resolve_model("capable"), "opus-capable");
        assert_eq!(adapter.resolve_model("explicit-model-id"), "explicit-model-id");
    }
}
