//! Discord slash commands — `/ask`, `/clear`, `/model`, `/memory`, `/cancel`.
//!
//! Registration happens in `ready()` when `config.slash_commands` is true.
//! Interactions are dispatched from `interaction_create` in the event handler.

use std::sync::Arc;

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::id::GuildId;
use serenity::prelude::Context;
use tracing::{info, warn};

use discoclaw_core::config::RuntimeId;
use discoclaw_memory::{MemoryManager, MemoryTier};
use discoclaw_pipeline::{IncomingMessage, MessagePipeline};
use discoclaw_runtime::RuntimeRegistry;
use discoclaw_session::SessionManager;

/// Everything `/ask`, `/clear`, `/model`, `/memory`, and `/cancel` need, bundled once at
/// startup and shared across all interactions.
#[derive(Clone)]
pub struct SlashDeps {
    pub pipeline: Arc<MessagePipeline>,
    pub runtime: Arc<RuntimeRegistry>,
    pub sessions: Arc<SessionManager>,
    pub memory: Arc<MemoryManager>,
    pub default_runtime: RuntimeId,
    pub default_model: String,
    pub use_runtime_sessions: bool,
}

/// Register global slash commands. Call from `ready()`.
pub async fn register_commands(ctx: &Context, guild_id: Option<GuildId>) {
    let commands = vec![
        CreateCommand::new("ask")
            .description("Send a message to the AI assistant")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "message", "Your message")
                    .required(true),
            ),
        CreateCommand::new("clear").description("Clear your conversation history"),
        CreateCommand::new("model")
            .description("Show or switch the AI model tier")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "tier", "fast or capable")
                    .required(true)
                    .add_string_choice("fast", "fast")
                    .add_string_choice("capable", "capable"),
            )
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "model", "Concrete model id")
                    .required(true),
            ),
        CreateCommand::new("memory").description("Show your stored user memories"),
        CreateCommand::new("cancel").description("Stop the in-flight reply in this channel"),
    ];

    match guild_id {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => match serenity::model::application::Command::set_global_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
            Err(e) => warn!(error = %e, "failed to register global slash commands"),
        },
    }
}

/// Dispatch a received application command interaction.
pub async fn handle_interaction(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) {
    let result = match command.data.name.as_str() {
        "ask" => handle_ask(deps, ctx, command).await,
        "clear" => handle_clear(deps, ctx, command).await,
        "model" => handle_model(deps, ctx, command).await,
        "memory" => handle_memory(deps, ctx, command).await,
        "cancel" => handle_cancel(deps, ctx, command).await,
        other => {
            warn!(command = other, "unknown slash command");
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, command = %command.data.name, "slash command handling failed");
    }
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

async fn defer(ctx: &Context, command: &CommandInteraction, ephemeral: bool) -> serenity::Result<()> {
    let response = CreateInteractionResponseMessage::new().ephemeral(ephemeral);
    command
        .create_response(&ctx.http, CreateInteractionResponse::Defer(response))
        .await
}

async fn edit_response(ctx: &Context, command: &CommandInteraction, text: &str) -> serenity::Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(text))
        .await
        .map(|_| ())
}

async fn handle_ask(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    defer(ctx, command, false).await?;

    let Some(text) = string_option(command, "message") else {
        return edit_response(ctx, command, "The `message` option is required.").await;
    };

    let incoming = IncomingMessage {
        guild_id: command.guild_id.map(|g| g.to_string()),
        channel_id: command.channel_id.to_string(),
        message_id: command.id.to_string(),
        thread_parent_id: None,
        user_id: command.user.id.to_string(),
        from_trusted_bot: false,
        text: text.to_string(),
        images: Vec::new(),
        attachment_texts: Vec::new(),
        attachment_notes: Vec::new(),
    };

    deps.pipeline.handle_message(incoming);
    edit_response(ctx, command, "On it — reply coming to this channel.").await
}

async fn handle_clear(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    defer(ctx, command, true).await?;

    if !deps.use_runtime_sessions {
        return edit_response(
            ctx,
            command,
            "This deployment keys sessions per message; there's nothing to clear.",
        )
        .await;
    }

    let key = discoclaw_runtime::session_key(
        "chat",
        &deps.default_model,
        &format!("{}:{}", command.channel_id, command.user.id),
    );

    match deps.sessions.remove(&key) {
        Ok(()) => edit_response(ctx, command, "Conversation history cleared for this channel.").await,
        Err(_) => edit_response(ctx, command, "No active conversation to clear here.").await,
    }
}

async fn handle_model(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    defer(ctx, command, true).await?;

    let (Some(tier), Some(model)) = (string_option(command, "tier"), string_option(command, "model")) else {
        return edit_response(ctx, command, "Both `tier` and `model` are required.").await;
    };

    deps.runtime.set_tier_override(deps.default_runtime, tier, model.to_string());
    edit_response(ctx, command, &format!("`{tier}` tier now resolves to `{model}`.")).await
}

async fn handle_memory(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    defer(ctx, command, true).await?;

    let user_id = command.user.id.to_string();
    let rendered = deps.memory.render(MemoryTier::Durable, &user_id, 1500);

    if rendered.trim().is_empty() {
        edit_response(ctx, command, "No stored memories yet.").await
    } else {
        edit_response(ctx, command, &format!("**Your stored memories:**\n{rendered}")).await
    }
}

async fn handle_cancel(deps: &SlashDeps, ctx: &Context, command: &CommandInteraction) -> serenity::Result<()> {
    defer(ctx, command, true).await?;

    deps.pipeline.cancel_channel(&command.channel_id.to_string()).await;
    edit_response(ctx, command, "Cancelled the in-flight reply in this channel, if there was one.").await
}

#[cfg(test)]
mod tests {
    // Slash-command handlers are exercised through interaction fixtures in
    // integration tests; unit coverage here is limited to pure helpers,
    // none of which remain free of a `CommandInteraction` dependency.
}
