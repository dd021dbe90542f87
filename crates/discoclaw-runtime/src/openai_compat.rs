//! HTTP adapter for OpenAI and OpenAI-compatible chat-completions backends
//! (used for both the `openai` and `openrouter` runtime ids).

use std::collections::HashSet;

use async_stream::stream;
use async_trait::async_trait;
use discoclaw_core::config::RuntimeId;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::{Capability, EventStream, RuntimeAdapter};
use crate::event::{EngineEvent, InvokeParams, ModelTier};

pub struct OpenAiCompatAdapter {
    runtime_id: RuntimeId,
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    fast_model: String,
    capable_model: String,
}

impl OpenAiCompatAdapter {
    pub fn new(
        runtime_id: RuntimeId,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        chat_path: impl Into<String>,
        fast_model: impl Into<String>,
        capable_model: impl Into<String>,
    ) -> Self {
        Self {
            runtime_id,
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            chat_path: chat_path.into(),
            fast_model: fast_model.into(),
            capable_model: capable_model.into(),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for OpenAiCompatAdapter {
    fn id(&self) -> RuntimeId {
        self.runtime_id
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::StreamingText])
    }

    fn resolve_model(&self, model: &str) -> String {
        match ModelTier::parse(model) {
            Some(ModelTier::Fast) => self.fast_model.clone(),
            Some(ModelTier::Capable) => self.capable_model.clone(),
            None => model.to_string(),
        }
    }

    async fn invoke(&self, params: InvokeParams) -> EventStream {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let body = serde_json::json!({
            "model": params.model,
            "messages": [{ "role": "user", "content": params.prompt }],
            "stream": true,
        });

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .timeout(params.timeout);

        debug!(url = %url, model = %params.model, session_key = %params.session_key, "sending streaming request");

        Box::pin(stream! {
            let resp = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    yield EngineEvent::Error { message: format!("request failed: {e}") };
                    yield EngineEvent::Done;
                    return;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                yield EngineEvent::Error { message: format!("http {status}: {text}") };
                yield EngineEvent::Done;
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut line_buf = String::new();
            let mut full_text = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield EngineEvent::Error { message: format!("stream read error: {e}") };
                        break;
                    }
                };
                let text = match std::str::from_utf8(&chunk) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                line_buf.push_str(text);

                while let Some(pos) = line_buf.find('\n') {
                    let line = line_buf[..pos].trim().to_string();
                    line_buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        yield EngineEvent::TextFinal { text: full_text.clone() };
                        yield EngineEvent::Done;
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            for choice in &parsed.choices {
                                if let Some(content) = &choice.delta.content {
                                    if !content.is_empty() {
                                        full_text.push_str(content);
                                        yield EngineEvent::TextDelta { text: content.clone() };
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, data = %data, "unparseable SSE chunk, skipping");
                        }
                    }
                }
            }

            yield EngineEvent::TextFinal { text: full_text };
            yield EngineEvent::Done;
        })
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_model_tiers() {
        let adapter = OpenAiCompatAdapter::new(
            RuntimeId::Openai,
            "key",
            "https://api.openai.com",
            "/v1/chat/completions",
            "gpt-4o-mini",
            "gpt-4o",
        );
        assert_eq!(adapter.resolve_model("fast"), "gpt-4o-mini");
        assert_eq!(adapter.resolve_model("capable"), "gpt-4o");
        assert_eq!(adapter.resolve_model("gpt-4-turbo"), "gpt-4-turbo");
    }

    #[test]
    fn parses_stream_chunk() {
        let raw = r#"{"choices":[{"delta":{"content":"hi"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("hi"));
    }
}
