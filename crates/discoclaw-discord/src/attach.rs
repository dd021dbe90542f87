//! Attachment ingestion (spec.md §4.5 "attachment transcripts"): classifies
//! Discord attachments and turns them into the pipeline's `IncomingMessage`
//! fields — images as `ImageInput`, text files inlined under a budget,
//! everything else surfaced as a note.

use base64::Engine;
use discoclaw_runtime::ImageInput;
use serenity::model::channel::Attachment;
use tracing::warn;

use crate::voice::{self, TranscriptionBackend};

/// Attachment classification by MIME type.
pub enum AttachmentKind {
    Image,
    Text,
    Voice,
    Audio,
    Other,
}

/// Classify a Discord attachment by its content type and filename.
pub fn classify(attachment: &Attachment) -> AttachmentKind {
    let ct = attachment.content_type.as_deref().unwrap_or("");
    if ct.starts_with("image/") {
        AttachmentKind::Image
    } else if ct.starts_with("text/") || is_text_extension(&attachment.filename) {
        AttachmentKind::Text
    } else if ct == "audio/ogg" && attachment.filename.ends_with(".ogg") {
        // Discord voice messages are OGG files.
        AttachmentKind::Voice
    } else if ct.starts_with("audio/") {
        AttachmentKind::Audio
    } else {
        AttachmentKind::Other
    }
}

/// Result of ingesting a message's attachments: image params ready for
/// `InvokeParams::images`, inlined text transcripts, and notes for anything
/// that couldn't be inlined.
#[derive(Default)]
pub struct Ingested {
    pub images: Vec<ImageInput>,
    pub texts: Vec<(String, String)>,
    pub notes: Vec<String>,
}

/// Convert Discord attachments into the pipeline's attachment fields,
/// transcribing voice messages when a backend is configured.
pub async fn ingest(attachments: &[Attachment], max_bytes: u64, voice_transcription: &str) -> Ingested {
    let mut out = Ingested::default();
    let backend = TranscriptionBackend::from_config(voice_transcription);

    for att in attachments {
        if u64::from(att.size) > max_bytes {
            out.notes.push(format!(
                "[Attachment '{}' skipped: {} bytes exceeds limit]",
                att.filename, att.size
            ));
            continue;
        }

        match classify(att) {
            AttachmentKind::Image => match download_bytes(&att.url).await {
                Ok(bytes) => {
                    let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    let media_type = att.content_type.clone().unwrap_or_else(|| "image/png".to_string());
                    out.images.push(ImageInput { media_type, data });
                }
                Err(e) => {
                    warn!(filename = %att.filename, error = %e, "failed to download image");
                    out.notes.push(format!("[Image '{}' download failed: {}]", att.filename, e));
                }
            },
            AttachmentKind::Text => match download_text(&att.url).await {
                Ok(text) => out.texts.push((att.filename.clone(), text)),
                Err(e) => {
                    warn!(filename = %att.filename, error = %e, "failed to download text attachment");
                    out.notes.push(format!("[File '{}' download failed: {}]", att.filename, e));
                }
            },
            AttachmentKind::Voice => match transcribe_voice(att, &backend).await {
                Some(text) => out.texts.push((att.filename.clone(), text)),
                None => out.notes.push(format!(
                    "[Voice message: '{}' ({} bytes) — no transcription backend configured]",
                    att.filename, att.size
                )),
            },
            AttachmentKind::Audio => {
                out.notes.push(format!("[Audio attachment: '{}' ({} bytes)]", att.filename, att.size));
            }
            AttachmentKind::Other => {
                let ct = att.content_type.as_deref().unwrap_or("unknown");
                out.notes
                    .push(format!("[Attachment: '{}' ({}, {} bytes)]", att.filename, ct, att.size));
            }
        }
    }

    out
}

async fn transcribe_voice(att: &Attachment, backend: &TranscriptionBackend) -> Option<String> {
    if matches!(backend, TranscriptionBackend::None) {
        return None;
    }
    let bytes = match download_bytes(&att.url).await {
        Ok(b) => b,
        Err(e) => {
            warn!(filename = %att.filename, error = %e, "voice download failed");
            return None;
        }
    };
    match voice::transcribe(backend, &bytes).await {
        Ok(text) => Some(format!("[Voice transcription]: {text}")),
        Err(e) => {
            warn!(filename = %att.filename, error = %e, "voice transcription failed");
            None
        }
    }
}

fn is_text_extension(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    matches!(
        lower.rsplit('.').next(),
        Some(
            "txt" | "md" | "rs" | "py" | "js" | "ts" | "json" | "toml" | "yaml" | "yml" | "xml"
                | "html" | "css" | "csv" | "log" | "sh" | "bash" | "cfg" | "ini" | "conf" | "go"
                | "java" | "c" | "cpp" | "h" | "hpp" | "rb" | "sql" | "env"
        )
    )
}

pub(crate) async fn download_bytes(url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let resp = reqwest::get(url).await?;
    resp.bytes().await.map(|b| b.to_vec())
}

async fn download_text(url: &str) -> Result<String, reqwest::Error> {
    reqwest::get(url).await?.text().await
}
