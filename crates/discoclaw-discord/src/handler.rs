//! Serenity event handler — translates gateway events into
//! `discoclaw_pipeline::IncomingMessage`s and hands them to the shared
//! `MessagePipeline`. All placeholder posting, ack reactions, streaming
//! edits and memory side-effects live in the pipeline and
//! `DiscordChatAdapter`; this handler's only job is gating and translation.

use std::sync::{Arc, OnceLock};

use serenity::all::ActivityData;
use serenity::async_trait;
use serenity::builder::CreateThread;
use serenity::model::application::Interaction;
use serenity::model::channel::{ChannelType, Message};
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Context, EventHandler};
use tracing::{info, warn};

use discoclaw_core::config::DiscordConfig;
use discoclaw_pipeline::{IncomingMessage, MessagePipeline};

use crate::commands::SlashDeps;

/// Serenity event handler wired to the shared message pipeline.
pub struct DiscordHandler {
    pub pipeline: Arc<MessagePipeline>,
    pub slash: SlashDeps,
    pub config: DiscordConfig,
    pub bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();

        let status = parse_online_status(&self.config.status);
        let activity = build_activity(&self.config);
        ctx.set_presence(activity, status);

        info!(name = %ready.user.name, "Discord bot connected");

        if self.config.slash_commands {
            crate::commands::register_commands(&ctx, None).await;
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot && !self.trusted_bot(&msg) {
            return;
        }

        let is_guild = msg.guild_id.is_some();

        if is_guild && self.config.require_mention {
            let Some(bot_id) = self.bot_id.get() else {
                return;
            };
            if !msg.mentions_user_id(*bot_id) {
                return;
            }
        }

        if !is_guild && !self.config.dm_allowed {
            return;
        }

        let content = strip_mention(&msg.content).trim().to_string();
        if content.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let (thread_parent_id, target_channel) =
            resolve_thread(&ctx, &msg, self.config.auto_thread).await;

        let ingested = crate::attach::ingest(
            &msg.attachments,
            self.config.max_attachment_bytes,
            &self.config.voice_transcription,
        )
        .await;

        let incoming = IncomingMessage {
            guild_id: msg.guild_id.map(|g| g.to_string()),
            channel_id: target_channel.to_string(),
            message_id: msg.id.to_string(),
            thread_parent_id,
            user_id: msg.author.id.to_string(),
            from_trusted_bot: msg.author.bot,
            text: content,
            images: ingested.images,
            attachment_texts: ingested.texts,
            attachment_notes: ingested.notes,
        };

        self.pipeline.handle_message(incoming);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if !self.config.slash_commands {
            return;
        }
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(&self.slash, &ctx, &command).await;
        }
    }
}

impl DiscordHandler {
    fn trusted_bot(&self, msg: &Message) -> bool {
        self.config
            .trusted_bot_allowlist
            .iter()
            .any(|id| id == &msg.author.id.to_string())
    }
}

/// Remove an @mention prefix (e.g. `<@123456789>`) from a message.
fn strip_mention(s: &str) -> &str {
    let trimmed = s.trim_start();
    if trimmed.starts_with("<@") {
        if let Some(end) = trimmed.find('>') {
            return trimmed[end + 1..].trim_start();
        }
    }
    trimmed
}

/// Resolve the thread-parent id for channel-context purposes, creating an
/// auto-thread from the message when configured and the message arrived in
/// a plain guild channel.
async fn resolve_thread(
    ctx: &Context,
    msg: &Message,
    auto_thread: bool,
) -> (Option<String>, serenity::model::id::ChannelId) {
    let existing_parent = msg
        .guild_id
        .and_then(|gid| ctx.cache.guild(gid))
        .and_then(|guild| guild.channels.get(&msg.channel_id).cloned())
        .and_then(|ch| match ch.kind {
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => {
                ch.parent_id
            }
            _ => None,
        });

    if let Some(parent) = existing_parent {
        return (Some(parent.to_string()), msg.channel_id);
    }

    if auto_thread && msg.guild_id.is_some() {
        let thread_name: String = msg.content.chars().take(50).collect();
        let thread_name = if thread_name.trim().is_empty() {
            "Conversation".to_string()
        } else {
            thread_name
        };

        match msg
            .channel_id
            .create_thread_from_message(
                &ctx.http,
                msg.id,
                CreateThread::new(thread_name).kind(ChannelType::PublicThread),
            )
            .await
        {
            Ok(thread) => return (Some(msg.channel_id.to_string()), thread.id),
            Err(e) => {
                warn!(error = %e, "failed to create auto-thread, falling back to channel");
            }
        }
    }

    (None, msg.channel_id)
}

/// Parse a config status string into serenity's `OnlineStatus`.
fn parse_online_status(s: &str) -> OnlineStatus {
    match s.to_lowercase().as_str() {
        "idle" => OnlineStatus::Idle,
        "dnd" | "do_not_disturb" => OnlineStatus::DoNotDisturb,
        "invisible" => OnlineStatus::Invisible,
        _ => OnlineStatus::Online,
    }
}

/// Build an `ActivityData` from the Discord config.
fn build_activity(config: &DiscordConfig) -> Option<ActivityData> {
    let name = config.activity_name.as_deref()?;
    let kind = config.activity_type.as_deref().unwrap_or("playing");
    Some(match kind.to_lowercase().as_str() {
        "listening" => ActivityData::listening(name),
        "watching" => ActivityData::watching(name),
        "competing" => ActivityData::competing(name),
        "custom" => ActivityData::custom(name),
        _ => ActivityData::playing(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_mention_removes_prefix() {
        assert_eq!(strip_mention("<@123456789> hello"), "hello");
        assert_eq!(strip_mention("no mention here"), "no mention here");
    }

    #[test]
    fn parse_status_defaults_to_online() {
        assert!(matches!(parse_online_status("bogus"), OnlineStatus::Online));
        assert!(matches!(parse_online_status("idle"), OnlineStatus::Idle));
    }
}
