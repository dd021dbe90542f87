use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Top-level config (discoclaw.toml + DISCOCLAW_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoclawConfig {
    #[serde(default)]
    pub data: DataConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub forge: ForgeConfig,
    #[serde(default)]
    pub plan: PlanConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub defer: DeferConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl Default for DiscoclawConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            runtime: RuntimeConfig::default(),
            discord: DiscordConfig::default(),
            actions: ActionsConfig::default(),
            forge: ForgeConfig::default(),
            plan: PlanConfig::default(),
            cron: CronConfig::default(),
            defer: DeferConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl DiscoclawConfig {
    /// Load config from a TOML file with `DISCOCLAW_*` env var overrides.
    ///
    /// Checks, in order: an explicit path argument, then `~/.discoclaw/discoclaw.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DiscoclawConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DISCOCLAW_").split("_"))
            .extract()
            .map_err(|e| crate::error::DiscoclawError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.discoclaw/discoclaw.toml", home)
}

/// Filesystem data root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub root: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

fn default_data_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.discoclaw", home)
}

impl DataConfig {
    pub fn root_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.root)
    }

    /// `<data>/workspace` — persona files, `plans/`, `.plan-template.md`,
    /// optional `PERMISSIONS.json` (spec.md §6).
    pub fn workspace_root(&self) -> std::path::PathBuf {
        self.root_path().join("workspace")
    }

    pub fn plans_dir(&self) -> std::path::PathBuf {
        self.workspace_root().join("plans")
    }

    pub fn channel_context_dir(&self) -> std::path::PathBuf {
        self.root_path().join(crate::constants::CHANNEL_CONTEXT_DIR)
    }

    pub fn memory_root(&self) -> std::path::PathBuf {
        self.root_path().join("memory")
    }

    pub fn tasks_dir(&self) -> std::path::PathBuf {
        self.root_path().join("tasks")
    }

    pub fn cron_dir(&self) -> std::path::PathBuf {
        self.root_path().join("cron")
    }

    pub fn sessions_file(&self) -> std::path::PathBuf {
        self.root_path().join("sessions.json")
    }

    pub fn inflight_file(&self) -> std::path::PathBuf {
        self.root_path().join("inflight.json")
    }

    pub fn pid_lock_dir(&self) -> std::path::PathBuf {
        self.root_path().join("discoclaw.pid.lock")
    }

    pub fn boot_marker(&self) -> std::path::PathBuf {
        self.root_path().join(".boot-marker")
    }

    pub fn shutdown_context_file(&self) -> std::path::PathBuf {
        self.root_path().join("shutdown-context.json")
    }

    pub fn system_scaffold_file(&self) -> std::path::PathBuf {
        self.root_path().join("system-scaffold.json")
    }
}

/// Which closed-set backend a `RuntimeAdapter` wraps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeId {
    Claude,
    Openai,
    Openrouter,
    Codex,
    Gemini,
}

impl std::fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeId::Claude => "claude",
            RuntimeId::Openai => "openai",
            RuntimeId::Openrouter => "openrouter",
            RuntimeId::Codex => "codex",
            RuntimeId::Gemini => "gemini",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RuntimeId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "claude" => Ok(RuntimeId::Claude),
            "openai" => Ok(RuntimeId::Openai),
            "openrouter" => Ok(RuntimeId::Openrouter),
            "codex" => Ok(RuntimeId::Codex),
            "gemini" => Ok(RuntimeId::Gemini),
            other => Err(format!("unknown runtime id: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// `PRIMARY_RUNTIME` — selects the default adapter.
    #[serde(default = "default_primary_runtime")]
    pub primary_runtime: RuntimeId,
    /// `RUNTIME_MODEL` — a model id or tier alias (`fast`, `capable`).
    #[serde(default = "default_runtime_model")]
    pub model: String,
    /// `RUNTIME_TIMEOUT_MS`, default 1_800_000.
    #[serde(default = "default_runtime_timeout_ms")]
    pub timeout_ms: u64,
    /// `MAX_CONCURRENT_INVOCATIONS` — 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_invocations: usize,
    /// Whether session keys are derived per-user-per-channel at all.
    #[serde(default = "bool_true")]
    pub use_runtime_sessions: bool,
    /// Which of the closed set of adapters to actually construct at startup;
    /// unlisted ids are simply not registered (no credential to check).
    #[serde(default = "default_enabled_runtimes")]
    pub enabled_runtimes: Vec<RuntimeId>,
    /// Per-backend credentials/commands — the credential *health check* is
    /// out of scope (spec.md §1); these fields are just the values it and
    /// the adapters themselves would read.
    #[serde(default)]
    pub claude: ClaudeCredentials,
    #[serde(default = "default_codex_credentials")]
    pub codex: CliCredentials,
    #[serde(default = "default_gemini_credentials")]
    pub gemini: CliCredentials,
    #[serde(default)]
    pub openai: HttpCredentials,
    #[serde(default)]
    pub openrouter: HttpCredentials,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            primary_runtime: default_primary_runtime(),
            model: default_runtime_model(),
            timeout_ms: default_runtime_timeout_ms(),
            max_concurrent_invocations: 0,
            use_runtime_sessions: true,
            enabled_runtimes: default_enabled_runtimes(),
            claude: ClaudeCredentials::default(),
            codex: default_codex_credentials(),
            gemini: default_gemini_credentials(),
            openai: HttpCredentials::default(),
            openrouter: HttpCredentials::default(),
        }
    }
}

fn default_primary_runtime() -> RuntimeId {
    RuntimeId::Claude
}
fn default_runtime_model() -> String {
    "capable".to_string()
}
fn default_runtime_timeout_ms() -> u64 {
    DEFAULT_RUNTIME_TIMEOUT_MS
}
fn default_enabled_runtimes() -> Vec<RuntimeId> {
    vec![RuntimeId::Claude]
}

/// `claude` adapter: subprocess command plus the model ids `fast`/`capable`
/// resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeCredentials {
    #[serde(default = "default_claude_command")]
    pub command: String,
    #[serde(default = "default_claude_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_claude_capable_model")]
    pub capable_model: String,
}

impl Default for ClaudeCredentials {
    fn default() -> Self {
        Self {
            command: default_claude_command(),
            fast_model: default_claude_fast_model(),
            capable_model: default_claude_capable_model(),
        }
    }
}

fn default_claude_command() -> String {
    "claude".to_string()
}
fn default_claude_fast_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_claude_capable_model() -> String {
    "claude-sonnet-4-5".to_string()
}

/// `codex`/`gemini` adapters: subprocess command plus tier model ids.
///
/// `codex` and `gemini` each get their own default `command`, so the field
/// default lives on `default_codex_credentials`/`default_gemini_credentials`
/// rather than on this struct's own `Default` impl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliCredentials {
    #[serde(default = "default_cli_command")]
    pub command: String,
    #[serde(default = "default_cli_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_cli_capable_model")]
    pub capable_model: String,
}

fn default_codex_credentials() -> CliCredentials {
    CliCredentials {
        command: "codex".to_string(),
        ..CliCredentials::default()
    }
}
fn default_gemini_credentials() -> CliCredentials {
    CliCredentials {
        command: "gemini".to_string(),
        ..CliCredentials::default()
    }
}

impl Default for CliCredentials {
    fn default() -> Self {
        Self {
            command: default_cli_command(),
            fast_model: default_cli_fast_model(),
            capable_model: default_cli_capable_model(),
        }
    }
}

fn default_cli_command() -> String {
    "codex".to_string()
}
fn default_cli_fast_model() -> String {
    "fast".to_string()
}
fn default_cli_capable_model() -> String {
    "capable".to_string()
}

/// `openai`/`openrouter` adapters: HTTP credentials plus tier model ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_cli_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_cli_capable_model")]
    pub capable_model: String,
}

impl Default for HttpCredentials {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            chat_path: default_openai_chat_path(),
            fast_model: default_cli_fast_model(),
            capable_model: default_cli_capable_model(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_chat_path() -> String {
    "/v1/chat/completions".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    /// Comma/space-separated snowflake list; absence = deny everyone (fail-closed).
    #[serde(default)]
    pub user_allowlist: Vec<String>,
    /// Trusted bot ids additionally allowed for specific flows.
    #[serde(default)]
    pub trusted_bot_allowlist: Vec<String>,
    /// When non-empty, only these channel ids are processed.
    #[serde(default)]
    pub restrict_channel_ids: Vec<String>,
    /// Streaming edit throttle, default ~1000ms.
    #[serde(default = "default_edit_throttle_ms")]
    pub edit_throttle_ms: u64,
    #[serde(default)]
    pub require_mention: bool,
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
    /// Reaction-based turn acknowledgement (🧠 → ✅/❌); ambient enrichment, off by default.
    #[serde(default)]
    pub ack_reactions: bool,
    /// Character threshold below which an image-bearing reply is not suppressed.
    #[serde(default = "default_ack_image_suppress_chars")]
    pub ack_image_suppress_chars: usize,
    #[serde(default)]
    pub reaction_max_age_hours: Option<u64>,
    /// Register `/ask`, `/clear`, `/model` slash commands on connect.
    #[serde(default = "bool_true")]
    pub slash_commands: bool,
    /// Spin a new thread off the triggering message instead of replying inline.
    #[serde(default)]
    pub auto_thread: bool,
    /// Online status shown in presence: online/idle/dnd/invisible.
    #[serde(default = "default_status")]
    pub status: String,
    /// Optional activity line shown under the bot's name.
    #[serde(default)]
    pub activity_name: Option<String>,
    /// playing/listening/watching/competing/custom.
    #[serde(default)]
    pub activity_type: Option<String>,
    /// Attachments larger than this are skipped rather than inlined.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    /// Voice transcription backend: "none" or a provider name.
    #[serde(default = "default_voice_transcription")]
    pub voice_transcription: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            user_allowlist: Vec::new(),
            trusted_bot_allowlist: Vec::new(),
            restrict_channel_ids: Vec::new(),
            edit_throttle_ms: default_edit_throttle_ms(),
            require_mention: false,
            dm_allowed: true,
            ack_reactions: false,
            ack_image_suppress_chars: default_ack_image_suppress_chars(),
            reaction_max_age_hours: None,
            slash_commands: true,
            auto_thread: false,
            status: default_status(),
            activity_name: None,
            activity_type: None,
            max_attachment_bytes: default_max_attachment_bytes(),
            voice_transcription: default_voice_transcription(),
        }
    }
}

fn default_edit_throttle_ms() -> u64 {
    1000
}
fn default_ack_image_suppress_chars() -> usize {
    200
}
fn default_status() -> String {
    "online".to_string()
}
fn default_max_attachment_bytes() -> u64 {
    8_000_000
}
fn default_voice_transcription() -> String {
    "none".to_string()
}
fn bool_true() -> bool {
    true
}

/// Per-category action enable flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "bool_true")]
    pub channels: bool,
    #[serde(default = "bool_true")]
    pub messaging: bool,
    #[serde(default = "bool_true")]
    pub guild: bool,
    #[serde(default)]
    pub moderation: bool,
    #[serde(default = "bool_true")]
    pub polls: bool,
    #[serde(default = "bool_true")]
    pub tasks: bool,
    #[serde(default = "bool_true")]
    pub crons: bool,
    #[serde(default)]
    pub bot_profile: bool,
    #[serde(default = "bool_true")]
    pub forge: bool,
    #[serde(default = "bool_true")]
    pub plan: bool,
    #[serde(default = "bool_true")]
    pub memory: bool,
    #[serde(default)]
    pub imagegen: bool,
    #[serde(default)]
    pub voice: bool,
    #[serde(default)]
    pub config: bool,
    #[serde(default = "bool_true")]
    pub defer: bool,
    /// Bounds the follow-up re-invocation loop (§4.3 step 7).
    #[serde(default = "default_followup_depth")]
    pub action_followup_depth: u32,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            channels: true,
            messaging: true,
            guild: true,
            moderation: false,
            polls: true,
            tasks: true,
            crons: true,
            bot_profile: false,
            forge: true,
            plan: true,
            memory: true,
            imagegen: false,
            voice: false,
            config: false,
            defer: true,
            action_followup_depth: default_followup_depth(),
        }
    }
}

fn default_followup_depth() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default = "default_forge_max_audit_rounds")]
    pub max_audit_rounds: u32,
    /// Model tier the drafter invokes with.
    #[serde(default = "default_forge_model")]
    pub drafter_model: String,
    /// Model tier the auditor invokes with.
    #[serde(default = "default_forge_model")]
    pub auditor_model: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_audit_rounds: default_forge_max_audit_rounds(),
            drafter_model: default_forge_model(),
            auditor_model: default_forge_model(),
        }
    }
}

fn default_forge_max_audit_rounds() -> u32 {
    FORGE_MAX_AUDIT_ROUNDS_DEFAULT
}
fn default_forge_model() -> String {
    "capable".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default = "default_audit_fix_max")]
    pub audit_fix_max: u32,
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            audit_fix_max: default_audit_fix_max(),
            max_context_files: default_max_context_files(),
        }
    }
}

fn default_audit_fix_max() -> u32 {
    PLAN_PHASE_AUDIT_FIX_MAX_DEFAULT
}
fn default_max_context_files() -> usize {
    PLAN_PHASE_MAX_CONTEXT_FILES_DEFAULT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Tick interval for the run loop, default 1s.
    #[serde(default = "default_cron_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound (seconds) of the uniform jitter applied to next-fire times.
    #[serde(default = "default_cron_jitter_secs")]
    pub jitter_secs: u64,
    /// Lock files older than this are considered abandoned on startup.
    #[serde(default = "default_cron_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Forum channel whose threads are the source of truth for jobs
    /// (spec.md §4.8). Cron stays disabled until this is set.
    #[serde(default)]
    pub forum_channel_id: Option<String>,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_cron_tick_secs(),
            jitter_secs: default_cron_jitter_secs(),
            heartbeat_secs: default_cron_heartbeat_secs(),
            forum_channel_id: None,
        }
    }
}

fn default_cron_tick_secs() -> u64 {
    1
}
fn default_cron_jitter_secs() -> u64 {
    30
}
fn default_cron_heartbeat_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferConfig {
    #[serde(default = "default_defer_max_delay_seconds")]
    pub max_delay_seconds: u64,
    #[serde(default = "default_defer_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            max_delay_seconds: default_defer_max_delay_seconds(),
            max_concurrent: default_defer_max_concurrent(),
        }
    }
}

fn default_defer_max_delay_seconds() -> u64 {
    1800
}
fn default_defer_max_concurrent() -> usize {
    5
}

/// Context-assembly budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_message_history_budget")]
    pub message_history_budget: usize,
    #[serde(default = "default_durable_inject_max_chars")]
    pub durable_inject_max_chars: usize,
    #[serde(default = "default_shortterm_inject_max_chars")]
    pub shortterm_inject_max_chars: usize,
    #[serde(default = "default_attachment_text_budget")]
    pub attachment_text_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            message_history_budget: default_message_history_budget(),
            durable_inject_max_chars: default_durable_inject_max_chars(),
            shortterm_inject_max_chars: default_shortterm_inject_max_chars(),
            attachment_text_budget: default_attachment_text_budget(),
        }
    }
}

fn default_message_history_budget() -> usize {
    8_000
}
fn default_durable_inject_max_chars() -> usize {
    4_000
}
fn default_shortterm_inject_max_chars() -> usize {
    4_000
}
fn default_attachment_text_budget() -> usize {
    20_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = DiscoclawConfig::default();
        assert_eq!(cfg.runtime.timeout_ms, 1_800_000);
        assert_eq!(cfg.forge.max_audit_rounds, 5);
        assert_eq!(cfg.plan.audit_fix_max, 3);
        assert_eq!(cfg.plan.max_context_files, 5);
        assert_eq!(cfg.defer.max_delay_seconds, 1800);
        assert_eq!(cfg.defer.max_concurrent, 5);
    }

    #[test]
    fn runtime_id_roundtrip() {
        for id in [
            RuntimeId::Claude,
            RuntimeId::Openai,
            RuntimeId::Openrouter,
            RuntimeId::Codex,
            RuntimeId::Gemini,
        ] {
            let s = id.to_string();
            let parsed: RuntimeId = s.parse().unwrap();
            assert_eq!(parsed, id);
        }
    }
}
