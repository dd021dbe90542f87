//! The chat service is the source of truth for cron jobs: each job is a
//! forum thread whose starter message carries the schedule and prompt
//! (spec.md §4.8). The chat service client itself is out of scope (spec.md
//! §1); this crate only needs a narrow read/write seam over it, implemented
//! by the Discord adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::CronJob;

/// A forum thread as the cron scheduler sees it, before schedule parsing.
#[derive(Debug, Clone)]
pub struct RawJobThread {
    pub thread_id: String,
    pub name: String,
    pub tags: Vec<String>,
    /// The starter message body: first line is the schedule, the rest is prompt.
    pub body: String,
    pub enabled: bool,
}

/// The minimal surface the cron scheduler needs from the chat service.
#[async_trait]
pub trait CronForumSource: Send + Sync {
    /// List every job thread currently in the cron forum.
    async fn list_job_threads(&self) -> Result<Vec<RawJobThread>, String>;
}

/// Maps a forum thread's tags to categories (spec.md §3 "tags carry
/// categories mapped via `tag-map`"), persisted as JSON and watched for
/// external edits so the sync coordinator can debounce a reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagMap {
    pub tag_to_category: std::collections::HashMap<String, String>,
}

impl TagMap {
    pub fn load(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn category_for(&self, tag: &str) -> Option<&str> {
        self.tag_to_category.get(tag).map(String::as_str)
    }
}

/// Split a thread's starter message body into (schedule line, prompt).
pub fn split_body(body: &str) -> (&str, &str) {
    match body.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest.trim()),
        None => (body.trim(), ""),
    }
}

/// Parse a raw thread into a [`CronJob`], keeping its prior run timestamps
/// if one was supplied (used by the sync coordinator to avoid resetting
/// `next_run_at` on every reconciliation).
pub fn parse_job(raw: &RawJobThread, previous: Option<&CronJob>) -> crate::error::Result<CronJob> {
    let (schedule_line, prompt) = split_body(&raw.body);
    let schedule = crate::schedule::parse(schedule_line)?;

    Ok(CronJob {
        id: raw.thread_id.clone(),
        name: raw.name.clone(),
        schedule,
        tags: raw.tags.clone(),
        last_run_at: previous.and_then(|p| p.last_run_at),
        next_run_at: previous.and_then(|p| p.next_run_at),
        enabled: raw.enabled,
        prompt: prompt.to_string(),
    })
}
