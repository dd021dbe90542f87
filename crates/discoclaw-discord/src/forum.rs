//! Cron's source of truth (spec.md §4.8): each job is a forum thread in a
//! single configured forum channel. The thread's starter message holds the
//! schedule line followed by the prompt body; thread tags map to
//! categories via `discoclaw_cron::TagMap`.
//!
//! No teacher or pack example wires a chat backend into a scheduler this
//! way — this module is authored directly against serenity's forum-channel
//! API rather than adapted from a precedent (see DESIGN.md).

use std::sync::Arc;

use discoclaw_cron::source::{CronForumSource, RawJobThread};
use discoclaw_cron::subsystem::CronForumWriter;
use serenity::builder::{CreateForumPost, CreateMessage, EditMessage, EditThread};
use serenity::http::Http;
use serenity::model::id::ChannelId;
use tracing::warn;

/// Lists and mutates forum-thread cron jobs against one forum channel.
pub struct CronForumChannel {
    http: Arc<Http>,
    forum_channel_id: ChannelId,
}

impl CronForumChannel {
    pub fn new(http: Arc<Http>, forum_channel_id: ChannelId) -> Self {
        Self { http, forum_channel_id }
    }

    fn tag_names(&self, available: &[serenity::model::channel::ForumTag], applied: &[serenity::model::id::ForumTagId]) -> Vec<String> {
        applied
            .iter()
            .filter_map(|id| available.iter().find(|t| &t.id == id).map(|t| t.name.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl CronForumSource for CronForumChannel {
    async fn list_job_threads(&self) -> Result<Vec<RawJobThread>, String> {
        let forum = self
            .http
            .get_channel(self.forum_channel_id)
            .await
            .map_err(|e| e.to_string())?;
        let Some(forum_channel) = forum.guild() else {
            return Err("cron forum channel is not a guild channel".to_string());
        };
        let available_tags = forum_channel.available_tags.clone();
        let Some(guild_id) = forum_channel.guild_id.into() else {
            return Err("cron forum channel has no guild".to_string());
        };

        let active = guild_id.get_active_threads(&self.http).await.map_err(|e| e.to_string())?;
        let mut threads: Vec<_> = active
            .threads
            .into_iter()
            .filter(|t| t.parent_id == Some(self.forum_channel_id))
            .collect();

        if let Ok(archived) = self
            .forum_channel_id
            .get_archived_public_threads(&self.http, None, None)
            .await
        {
            threads.extend(archived.threads);
        }

        let mut out = Vec::with_capacity(threads.len());
        for thread in threads {
            let body = match self.http.get_message(thread.id, thread.id.get().into()).await {
                Ok(msg) => msg.content.clone(),
                Err(e) => {
                    warn!(thread_id = %thread.id, error = %e, "failed to fetch cron thread starter message");
                    continue;
                }
            };
            let applied = thread
                .thread_metadata
                .map(|_| thread.applied_tags.clone())
                .unwrap_or_default();
            out.push(RawJobThread {
                thread_id: thread.id.to_string(),
                name: thread.name.clone(),
                tags: self.tag_names(&available_tags, &applied),
                body,
                enabled: !thread.thread_metadata.is_some_and(|m| m.archived),
            });
        }

        Ok(out)
    }
}

#[async_trait::async_trait]
impl CronForumWriter for CronForumChannel {
    async fn create_job_thread(&self, name: &str, schedule: &str, prompt: &str) -> Result<String, String> {
        let body = format!("{schedule}\n{prompt}");
        let post = CreateForumPost::new(name, CreateMessage::new().content(body));
        let thread = self
            .forum_channel_id
            .create_forum_post(&self.http, post)
            .await
            .map_err(|e| e.to_string())?;
        Ok(thread.id.to_string())
    }

    async fn update_job_thread(&self, id: &str, schedule: Option<&str>, prompt: Option<&str>) -> Result<(), String> {
        let thread_id: u64 = id.parse().map_err(|_| format!("invalid thread id: {id}"))?;
        let thread_id = ChannelId::new(thread_id);

        if schedule.is_some() || prompt.is_some() {
            let starter = self
                .http
                .get_message(thread_id, thread_id.get().into())
                .await
                .map_err(|e| e.to_string())?;
            let (old_schedule, old_prompt) = discoclaw_cron::source::split_body(&starter.content);
            let new_schedule = schedule.unwrap_or(old_schedule);
            let new_prompt = prompt.unwrap_or(old_prompt);
            let body = format!("{new_schedule}\n{new_prompt}");
            self.http
                .edit_message(thread_id, thread_id.get().into(), &EditMessage::new().content(body), Vec::new())
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn delete_job_thread(&self, id: &str) -> Result<(), String> {
        let thread_id: u64 = id.parse().map_err(|_| format!("invalid thread id: {id}"))?;
        let thread_id = ChannelId::new(thread_id);
        let edit = EditThread::new().archived(true).locked(true);
        thread_id
            .edit_thread(&self.http, edit)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

// `CronSink::post_job_result` is served by `DiscordChatAdapter`, which already
// parses a job's thread id and posts through the same chunked-send path —
// no separate implementation needed here.

#[cfg(test)]
mod tests {
    #[test]
    fn module_builds() {}
}
