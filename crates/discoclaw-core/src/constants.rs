//! Documented default values shared across crates.

pub const DEFAULT_RUNTIME_TIMEOUT_MS: u64 = 1_800_000;
pub const FORGE_MAX_AUDIT_ROUNDS_DEFAULT: u32 = 5;
pub const PLAN_PHASE_AUDIT_FIX_MAX_DEFAULT: u32 = 3;
pub const PLAN_PHASE_MAX_CONTEXT_FILES_DEFAULT: usize = 5;

/// Known workspace-root basenames normalized to a `workspace/` prefix by the
/// phase decomposer when they appear without a path separator.
pub const WORKSPACE_ROOT_BASENAMES: &[&str] = &[
    "TOOLS.md",
    "AGENTS.md",
    "MEMORY.md",
    "SOUL.md",
    "IDENTITY.md",
    "USER.md",
];

/// Canonical persona files loaded from the workspace root.
pub const PERSONA_FILES: &[&str] = &["SOUL.md", "IDENTITY.md", "USER.md"];

/// Fixed directory of persona context modules, resolved relative to the
/// workspace root. Required at startup — the process aborts if missing.
pub const PERSONA_CONTEXT_DIR: &str = "context";

/// Directory holding auto-indexed per-channel context files, one
/// `<channel_id>.md` per channel that has accumulated one.
pub const CHANNEL_CONTEXT_DIR: &str = "channel-context";

/// Sentinel model responses that are dropped instead of shown.
pub const TRIVIAL_SENTINELS: &[&str] = &["HEARTBEAT_OK", "(no output)"];

/// Boundary string the context assembler must emit exactly once, immediately
/// before the user message.
pub const CONTEXT_BOUNDARY: &str = "--- internal system context boundary ---";

/// Required plan-file sections, in order.
pub const PLAN_REQUIRED_SECTIONS: &[&str] = &[
    "## Objective",
    "## Scope",
    "## Changes",
    "## Risks",
    "## Testing",
    "## Audit Log",
    "## Implementation Notes",
];
