//! The closed catalog of action types and the category each belongs to.
//!
//! An action is executable only if its category's flag is enabled in the
//! current invocation context (`discoclaw_core::config::ActionsConfig`);
//! otherwise its type is recorded as "unavailable" and the action is dropped
//! (§4.4).

use std::fmt;

/// Categories gated by `ActionsConfig`'s per-category flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    Channels,
    Messaging,
    Guild,
    Moderation,
    Polls,
    Tasks,
    Crons,
    BotProfile,
    Forge,
    Plan,
    Memory,
    Imagegen,
    Voice,
    Config,
    Defer,
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionCategory::Channels => "channels",
            ActionCategory::Messaging => "messaging",
            ActionCategory::Guild => "guild",
            ActionCategory::Moderation => "moderation",
            ActionCategory::Polls => "polls",
            ActionCategory::Tasks => "tasks",
            ActionCategory::Crons => "crons",
            ActionCategory::BotProfile => "bot_profile",
            ActionCategory::Forge => "forge",
            ActionCategory::Plan => "plan",
            ActionCategory::Memory => "memory",
            ActionCategory::Imagegen => "imagegen",
            ActionCategory::Voice => "voice",
            ActionCategory::Config => "config",
            ActionCategory::Defer => "defer",
        };
        write!(f, "{s}")
    }
}

impl ActionCategory {
    /// Whether this category's flag is enabled in `cfg`.
    pub fn enabled_in(self, cfg: &discoclaw_core::config::ActionsConfig) -> bool {
        match self {
            ActionCategory::Channels => cfg.channels,
            ActionCategory::Messaging => cfg.messaging,
            ActionCategory::Guild => cfg.guild,
            ActionCategory::Moderation => cfg.moderation,
            ActionCategory::Polls => cfg.polls,
            ActionCategory::Tasks => cfg.tasks,
            ActionCategory::Crons => cfg.crons,
            ActionCategory::BotProfile => cfg.bot_profile,
            ActionCategory::Forge => cfg.forge,
            ActionCategory::Plan => cfg.plan,
            ActionCategory::Memory => cfg.memory,
            ActionCategory::Imagegen => cfg.imagegen,
            ActionCategory::Voice => cfg.voice,
            ActionCategory::Config => cfg.config,
            ActionCategory::Defer => cfg.defer,
        }
    }
}

/// The closed set of recognized action `type` discriminator strings, mapped
/// to the category that gates them.
///
/// This is a flat table rather than a `#[serde(tag = "type")]` enum: action
/// payloads are heterogeneous free-form JSON objects and individual handlers
/// pull the fields they need straight out of the decoded `serde_json::Value`
/// (mirrors the teacher's match-by-name command dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionType {
    pub name: &'static str,
    pub category: ActionCategory,
    /// Whether a successful result carries data the model should see echoed
    /// back in a follow-up prompt (§4.3 step 7, §4.4 "follow-up trigger").
    pub followup_eligible: bool,
}

macro_rules! action_types {
    ($($name:literal => $category:ident $(, followup: $followup:literal)?;)*) => {
        pub const ACTION_TYPES: &[ActionType] = &[
            $(
                ActionType {
                    name: $name,
                    category: ActionCategory::$category,
                    followup_eligible: action_types!(@followup $($followup)?),
                },
            )*
        ];
    };
    (@followup) => { false };
    (@followup $v:literal) => { $v };
}

action_types! {
    "createChannel" => Channels;
    "createThread" => Channels;
    "archiveThread" => Channels;
    "sendMessage" => Messaging;
    "editMessage" => Messaging;
    "deleteMessage" => Messaging;
    "addReaction" => Messaging;
    "createPoll" => Polls;
    "pollResults" => Polls, followup: true;
    "kickUser" => Moderation;
    "banUser" => Moderation;
    "timeoutUser" => Moderation;
    "setGuildName" => Guild;
    "setGuildIcon" => Guild;
    "setBotAvatar" => BotProfile;
    "setBotStatus" => BotProfile;
    "taskCreate" => Tasks;
    "taskUpdate" => Tasks;
    "taskClose" => Tasks;
    "taskList" => Tasks, followup: true;
    "taskGet" => Tasks, followup: true;
    "cronCreate" => Crons;
    "cronUpdate" => Crons;
    "cronDelete" => Crons;
    "cronList" => Crons, followup: true;
    "forgeRun" => Forge;
    "forgeResume" => Forge;
    "forgeCancel" => Forge;
    "planPhasesRun" => Plan;
    "planPhasesStatus" => Plan, followup: true;
    "planPhasesRegenerate" => Plan;
    "memoryRemember" => Memory;
    "memoryForget" => Memory;
    "memoryRecall" => Memory, followup: true;
    "imagegen" => Imagegen;
    "voiceSpeak" => Voice;
    "configSet" => Config;
    "configGet" => Config, followup: true;
    "defer" => Defer;
}

/// Look up the catalog entry for a wire-format action type name.
pub fn lookup(name: &str) -> Option<&'static ActionType> {
    ACTION_TYPES.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_resolve() {
        assert_eq!(lookup("sendMessage").unwrap().category, ActionCategory::Messaging);
        assert_eq!(lookup("forgeRun").unwrap().category, ActionCategory::Forge);
        assert!(lookup("forgeRun").unwrap().followup_eligible == false);
        assert!(lookup("taskList").unwrap().followup_eligible);
    }

    #[test]
    fn unknown_type_is_none() {
        assert!(lookup("doSomethingUnheardOf").is_none());
    }

    #[test]
    fn category_flag_gating() {
        let mut cfg = discoclaw_core::config::ActionsConfig::default();
        cfg.moderation = false;
        assert!(!ActionCategory::Moderation.enabled_in(&cfg));
        cfg.moderation = true;
        assert!(ActionCategory::Moderation.enabled_in(&cfg));
    }
}
