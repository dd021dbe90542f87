//! The message handler pipeline (spec §4.3): gate, placeholder, context
//! assembly, runtime invocation, streaming edits, action parse/execute,
//! follow-up loop, trivial-response suppression, resolve.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use discoclaw_actions::context::{ActionContext, ConfirmationMode};
use discoclaw_actions::executor::render_results;
use discoclaw_actions::{execute_actions, parse_actions};
use discoclaw_core::allowlist::Allowlist;
use discoclaw_core::config::{ActionsConfig, ContextConfig, DiscordConfig, RuntimeConfig};
use discoclaw_core::constants::TRIVIAL_SENTINELS;
use discoclaw_core::error::DiscoclawError;
use discoclaw_inflight::InFlightRegistry;
use discoclaw_memory::{MemoryItem, MemoryKind, MemorySource, MemoryTier};
use discoclaw_memory::MemoryManager;
use discoclaw_runtime::{EngineEvent, InvokeParams, LogStream, RuntimeRegistry};
use futures_util::StreamExt;
use tracing::{info, warn};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::assembly::{ChannelContext, ContextAssembler, PersonaFiles};
use crate::context::{ChatAdapter, IncomingMessage};
use crate::queue::ChannelQueues;
use crate::subsystems::Subsystems;

const PLACEHOLDER_BODY: &str = "_thinking…_";
const CANCELLED_MARKER: &str = "_(cancelled)_";
const CHANNEL_CONTEXT_MAX_LINES: usize = 200;

/// Everything the pipeline needs that isn't passed per-message.
pub struct PipelineDeps {
    pub runtime: Arc<RuntimeRegistry>,
    pub runtime_config: RuntimeConfig,
    pub discord_config: DiscordConfig,
    pub actions_config: ActionsConfig,
    pub context_config: ContextConfig,
    pub inflight: Arc<InFlightRegistry>,
    pub memory: Arc<MemoryManager>,
    pub persona: Arc<PersonaFiles>,
    pub channel_context: Arc<ChannelContext>,
    pub chat: Arc<dyn ChatAdapter>,
    pub subsystems: Subsystems,
}

pub struct MessagePipeline {
    deps: PipelineDeps,
    queues: ChannelQueues,
    user_allowlist: Allowlist,
    trusted_bot_allowlist: Allowlist,
    restrict_channel_ids: Option<HashSet<String>>,
    /// The cancellation token for whichever turn is currently running on a
    /// channel. Channels are serialized by `ChannelQueues`, so at most one
    /// entry per channel is live at a time.
    cancellations: Arc<DashMap<String, CancellationToken>>,
}

impl MessagePipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let user_allowlist = Allowlist::new(deps.discord_config.user_allowlist.clone());
        let trusted_bot_allowlist = Allowlist::new(deps.discord_config.trusted_bot_allowlist.clone());
        let restrict_channel_ids = if deps.discord_config.restrict_channel_ids.is_empty() {
            None
        } else {
            Some(deps.discord_config.restrict_channel_ids.iter().cloned().collect())
        };
        Self {
            deps,
            queues: ChannelQueues::new(),
            user_allowlist,
            trusted_bot_allowlist,
            restrict_channel_ids,
            cancellations: Arc::new(DashMap::new()),
        }
    }

    /// Stage 1 — drop messages from senders or channels that aren't allowed.
    fn gate(&self, msg: &IncomingMessage) -> bool {
        if let Some(ids) = &self.restrict_channel_ids {
            if !ids.contains(&msg.channel_id) {
                return false;
            }
        }
        if msg.from_trusted_bot {
            self.trusted_bot_allowlist.is_allowlisted(&msg.user_id)
        } else {
            self.user_allowlist.is_allowlisted(&msg.user_id)
        }
    }

    /// Enqueue `msg` onto its channel's FIFO queue. Returns immediately;
    /// processing happens on the channel's worker task.
    pub fn handle_message(self: &Arc<Self>, msg: IncomingMessage) {
        if !self.gate(&msg) {
            return;
        }
        let pipeline = Arc::clone(self);
        self.queues.submit(&msg.channel_id, async move {
            pipeline.process(msg).await;
        });
    }

    async fn process(&self, msg: IncomingMessage) {
        let placeholder_id = match self.deps.chat.post_placeholder(&msg.channel_id, PLACEHOLDER_BODY).await {
            Ok(id) => id,
            Err(e) => {
                warn!(channel_id = %msg.channel_id, error = %e, "failed to post placeholder");
                return;
            }
        };

        let session_key = self.session_key_for(&msg);
        if let Err(e) = self.deps.inflight.register(&msg.channel_id, &placeholder_id, "chat-reply", &session_key) {
            warn!(error = %e, "failed to register in-flight placeholder");
        }

        let token = CancellationToken::new();
        self.cancellations.insert(msg.channel_id.clone(), token.clone());

        let outcome = self.run_turn(&msg, &placeholder_id, &session_key, &token).await;
        self.cancellations.remove(&msg.channel_id);

        if token.is_cancelled() {
            let _ = self.deps.chat.edit_message(&msg.channel_id, &placeholder_id, CANCELLED_MARKER).await;
            self.deps.chat.turn_complete(&msg.channel_id, &placeholder_id, false).await;
            let _ = self.deps.inflight.resolve(&placeholder_id);
            return;
        }

        self.finish(&msg, &placeholder_id, outcome).await;

        let _ = self.deps.inflight.resolve(&placeholder_id);
    }

    fn session_key_for(&self, msg: &IncomingMessage) -> String {
        let model = &self.deps.runtime_config.model;
        if self.deps.runtime_config.use_runtime_sessions {
            discoclaw_runtime::session_key("chat", model, &format!("{}:{}", msg.channel_id, msg.user_id))
        } else {
            discoclaw_runtime::session_key("chat", model, &format!("{}:{}:{}", msg.channel_id, msg.user_id, msg.message_id))
        }
    }

    /// Stages 3-7: context assembly, invocation, streaming edits, action
    /// parse/execute, and the follow-up loop. Returns the final rendered
    /// text, whether any action executed, and whether any image was produced.
    async fn run_turn(
        &self,
        msg: &IncomingMessage,
        placeholder_id: &str,
        session_key: &str,
        token: &CancellationToken,
    ) -> TurnOutcome {
        let reply_chain = self
            .deps
            .chat
            .reply_chain_and_pins(&msg.channel_id, &msg.message_id)
            .await
            .unwrap_or_default();
        let history = self
            .deps
            .chat
            .channel_history(&msg.channel_id, self.deps.context_config.message_history_budget)
            .await
            .unwrap_or_default();

        let assembler = ContextAssembler {
            persona: &self.deps.persona,
            channel_context: &self.deps.channel_context,
            memory: &self.deps.memory,
            config: &self.deps.context_config,
        };
        let mut prompt = match assembler.assemble(msg, &reply_chain, &history) {
            Ok(p) => p,
            Err(e) => return TurnOutcome::error(format!("context assembly failed: {e}")),
        };

        let mut depth = 0u32;
        let mut final_text = String::new();
        let mut any_action_executed = false;
        let mut any_image = false;

        loop {
            let params = InvokeParams::new(prompt.clone(), self.deps.runtime_config.model.clone(), session_key.to_string())
                .with_timeout(Duration::from_millis(self.deps.runtime_config.timeout_ms))
                .with_tool_call_gate(true)
                .with_images(msg.images.clone());

            let stream_result = self
                .stream_invocation(params, &msg.channel_id, placeholder_id, &mut any_image, token)
                .await;
            let text = match stream_result {
                Ok(text) => text,
                Err(StreamOutcome::Cancelled) => return TurnOutcome::Delete,
                Err(StreamOutcome::Error(message)) => {
                    return TurnOutcome::error(DiscoclawError::friendly_runtime_message(&message))
                }
            };

            let parsed = parse_actions(&text);
            let ctx = ActionContext {
                guild_id: msg.guild_id.clone(),
                channel_id: msg.channel_id.clone(),
                message_id: msg.message_id.clone(),
                thread_parent_id: msg.thread_parent_id.clone(),
                confirmation_mode: ConfirmationMode::Automated,
                user_id: msg.user_id.clone(),
            };
            let subsystems = self.deps.subsystems.as_contexts();
            let executed = execute_actions(&parsed.actions, &ctx, &subsystems, &self.deps.actions_config).await;
            any_action_executed = any_action_executed || !executed.is_empty();

            let is_lone_send_message = parsed.actions.len() == 1
                && parsed.actions[0].action_type == "sendMessage"
                && parsed.is_clean_text_empty();

            let results = render_results(&executed);
            final_text = if results.is_empty() {
                parsed.clean_text.clone()
            } else if parsed.clean_text.trim().is_empty() {
                results
            } else {
                format!("{}\n\n{results}", parsed.clean_text)
            };

            if is_lone_send_message {
                return TurnOutcome::delete();
            }

            let eligible = discoclaw_actions::executor::has_followup_eligible(&executed);
            if !eligible || depth >= self.deps.actions_config.action_followup_depth {
                break;
            }
            let Some(followup_prompt) = discoclaw_actions::executor::render_followup_prompt(&executed) else {
                break;
            };
            depth += 1;
            prompt = followup_prompt;
        }

        TurnOutcome::text(final_text, any_action_executed, any_image)
    }

    /// Stage 5 — accumulate deltas, edit under a throttle, always flush the
    /// final text.
    async fn stream_invocation(
        &self,
        params: InvokeParams,
        channel_id: &str,
        placeholder_id: &str,
        any_image: &mut bool,
        token: &CancellationToken,
    ) -> Result<String, StreamOutcome> {
        let mut stream = self
            .deps
            .runtime
            .invoke(self.deps.runtime.primary(), params)
            .await
            .map_err(|e| StreamOutcome::Error(e.to_string()))?;

        let interval = Duration::from_millis(self.deps.discord_config.edit_throttle_ms);
        let mut throttle = crate::throttle::EditThrottle::new(interval);
        let mut text = String::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StreamOutcome::Cancelled),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };

            match event {
                EngineEvent::TextDelta { text: t } => {
                    text.push_str(&t);
                    let now = Instant::now();
                    if throttle.should_edit(now) {
                        let _ = self.deps.chat.edit_message(channel_id, placeholder_id, &text).await;
                        let _ = self.deps.inflight.note_edit(placeholder_id);
                        throttle.mark_edited(now);
                    }
                }
                EngineEvent::TextFinal { text: t } => text = t,
                EngineEvent::LogLine { stream: s, line } => {
                    let marker = match s {
                        LogStream::Stdout => "›",
                        LogStream::Stderr => "⚠",
                    };
                    info!(line = %line, "runtime log line ({marker})");
                }
                EngineEvent::ToolStart { .. } | EngineEvent::ToolEnd { .. } => {}
                EngineEvent::ImageData { .. } => {
                    *any_image = true;
                }
                EngineEvent::Error { message } => return Err(StreamOutcome::Error(message)),
                EngineEvent::Done => break,
            }
        }

        Ok(text)
    }

    /// Stages 6, 8, 9 finalization: edit or delete the placeholder, and
    /// append memory side-effects on a successful reply.
    async fn finish(&self, msg: &IncomingMessage, placeholder_id: &str, outcome: TurnOutcome) {
        let ok = !matches!(outcome, TurnOutcome::Error(_));
        match outcome {
            TurnOutcome::Delete => {
                let _ = self.deps.chat.delete_message(&msg.channel_id, placeholder_id).await;
            }
            TurnOutcome::Error(message) => {
                let _ = self.deps.chat.edit_message(&msg.channel_id, placeholder_id, &message).await;
            }
            TurnOutcome::Text { text, action_executed, image_produced } => {
                let trimmed = text.trim();
                let is_trivial = !action_executed
                    && !image_produced
                    && (trimmed.is_empty() || TRIVIAL_SENTINELS.contains(&trimmed));

                if is_trivial {
                    let _ = self.deps.chat.delete_message(&msg.channel_id, placeholder_id).await;
                } else {
                    let _ = self.deps.chat.edit_message(&msg.channel_id, placeholder_id, &text).await;
                    self.record_memory(msg, &text);
                    self.record_channel_context(msg, &text);
                }
            }
        }
        self.deps.chat.turn_complete(&msg.channel_id, placeholder_id, ok).await;
    }

    fn record_memory(&self, msg: &IncomingMessage, reply: &str) {
        let source = MemorySource {
            source_type: "discord".to_string(),
            channel_id: Some(msg.channel_id.clone()),
            message_id: Some(msg.message_id.clone()),
            guild_id: msg.guild_id.clone(),
            channel_name: None,
        };
        if self.deps.context_config.shortterm_inject_max_chars > 0 {
            let item = MemoryItem::new(MemoryKind::Turn, format!("{}\n{}", msg.text, reply), source.clone());
            if let Err(e) = self.deps.memory.append(MemoryTier::ShortTerm, &msg.user_id, item) {
                warn!(error = %e, "failed to append short-term memory turn");
            }
        }
        let item = MemoryItem::new(MemoryKind::Turn, format!("{}\n{}", msg.text, reply), source);
        if let Err(e) = self.deps.memory.append(MemoryTier::Rolling, &msg.user_id, item) {
            warn!(error = %e, "failed to append rolling memory turn");
        }
    }

    fn record_channel_context(&self, msg: &IncomingMessage, reply: &str) {
        let summary = reply.lines().next().unwrap_or("").chars().take(200).collect::<String>();
        if summary.trim().is_empty() {
            return;
        }
        if let Err(e) = self.deps.channel_context.append(&msg.channel_id, &summary, CHANNEL_CONTEXT_MAX_LINES) {
            warn!(error = %e, "failed to update channel context file");
        }
    }

    /// Cancel the in-flight invocation for `channel_id`, if any: fires its
    /// cancellation token so `stream_invocation` stops consuming the runtime
    /// stream, then edits any remaining placeholders with a cancellation
    /// marker. `process` notices the fired token and skips `finish`, so a
    /// reply that was mid-stream when cancelled never overwrites the marker.
    pub async fn cancel_channel(&self, channel_id: &str) {
        if let Some((_, token)) = self.cancellations.remove(channel_id) {
            token.cancel();
        }
        for message_id in self.deps.inflight.message_ids_for_channel(channel_id) {
            let _ = self.deps.chat.edit_message(channel_id, &message_id, CANCELLED_MARKER).await;
            let _ = self.deps.inflight.resolve(&message_id);
        }
    }
}

enum TurnOutcome {
    Text { text: String, action_executed: bool, image_produced: bool },
    Delete,
    Error(String),
}

enum StreamOutcome {
    Cancelled,
    Error(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use discoclaw_core::config::RuntimeId;
    use discoclaw_inflight::InFlightRegistry;
    use discoclaw_runtime::{Capability, EventStream, RuntimeAdapter};
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    /// An adapter that emits one delta, then sleeps far longer than any test
    /// timeout before completing — standing in for a runtime invocation that
    /// never gets interrupted unless something actually cancels it.
    struct SlowAdapter;

    #[async_trait]
    impl RuntimeAdapter for SlowAdapter {
        fn id(&self) -> RuntimeId {
            RuntimeId::Claude
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::new()
        }
        fn resolve_model(&self, model: &str) -> String {
            model.to_string()
        }
        async fn invoke(&self, _params: InvokeParams) -> EventStream {
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx.send(EngineEvent::TextDelta { text: "partial".to_string() }).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
                let _ = tx.send(EngineEvent::Done).await;
            });
            Box::pin(ReceiverStream::new(rx))
        }
    }

    #[derive(Default)]
    struct FakeChat {
        next_id: Mutex<u64>,
        edits: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatAdapter for FakeChat {
        async fn post_placeholder(&self, _channel_id: &str, _body: &str) -> Result<String, String> {
            let mut n = self.next_id.lock().unwrap();
            *n += 1;
            Ok(format!("msg-{n}"))
        }
        async fn edit_message(&self, _channel_id: &str, message_id: &str, text: &str) -> Result<(), String> {
            self.edits.lock().unwrap().push((message_id.to_string(), text.to_string()));
            Ok(())
        }
        async fn delete_message(&self, _channel_id: &str, _message_id: &str) -> Result<(), String> {
            Ok(())
        }
        async fn reply_chain_and_pins(&self, _channel_id: &str, _message_id: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn channel_history(&self, _channel_id: &str, _byte_budget: usize) -> Result<String, String> {
            Ok(String::new())
        }
    }

    fn make_pipeline(workspace: &std::path::Path, chat: Arc<FakeChat>) -> Arc<MessagePipeline> {
        std::fs::create_dir_all(workspace.join("context")).unwrap();

        let runtime = Arc::new(RuntimeRegistry::builder().register(Arc::new(SlowAdapter), 0).build(RuntimeId::Claude));

        let deps = PipelineDeps {
            runtime,
            runtime_config: RuntimeConfig {
                timeout_ms: 60_000,
                ..RuntimeConfig::default()
            },
            discord_config: DiscordConfig {
                user_allowlist: vec!["user-1".to_string()],
                ..DiscordConfig::default()
            },
            actions_config: ActionsConfig::default(),
            context_config: ContextConfig::default(),
            inflight: Arc::new(InFlightRegistry::load(workspace.join("inflight.json"))),
            memory: Arc::new(MemoryManager::new(workspace.join("memory"))),
            persona: Arc::new(PersonaFiles::new(workspace)),
            channel_context: Arc::new(ChannelContext::new(workspace)),
            chat,
            subsystems: Subsystems::default(),
        };
        Arc::new(MessagePipeline::new(deps))
    }

    fn incoming(channel_id: &str) -> IncomingMessage {
        IncomingMessage {
            guild_id: None,
            channel_id: channel_id.to_string(),
            message_id: "msg-in".to_string(),
            thread_parent_id: None,
            user_id: "user-1".to_string(),
            from_trusted_bot: false,
            text: "hello".to_string(),
            images: Vec::new(),
            attachment_texts: Vec::new(),
            attachment_notes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn cancel_channel_stops_a_running_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(FakeChat::default());
        let pipeline = make_pipeline(dir.path(), Arc::clone(&chat));

        pipeline.handle_message(incoming("chan-1"));
        // Give the worker time to post the placeholder and start streaming.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pipeline.cancellations.contains_key("chan-1"));

        let started = Instant::now();
        pipeline.cancel_channel("chan-1").await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(started.elapsed() < Duration::from_secs(5), "cancel_channel must not wait for the invocation");
        assert!(!pipeline.cancellations.contains_key("chan-1"));
        let edits = chat.edits.lock().unwrap();
        assert!(edits.iter().any(|(_, text)| text == CANCELLED_MARKER));
    }

    #[tokio::test]
    async fn cancel_channel_without_an_active_turn_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(FakeChat::default());
        let pipeline = make_pipeline(dir.path(), chat);

        pipeline.cancel_channel("never-started").await;
    }
}

impl TurnOutcome {
    fn text(text: String, action_executed: bool, image_produced: bool) -> Self {
        TurnOutcome::Text { text, action_executed, image_produced }
    }
    fn delete() -> Self {
        TurnOutcome::Delete
    }
    fn error(message: String) -> Self {
        TurnOutcome::Error(message)
    }
}
