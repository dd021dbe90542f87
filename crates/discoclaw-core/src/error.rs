use thiserror::Error;

/// Top-level error kinds.
#[derive(Debug, Error)]
pub enum DiscoclawError {
    /// Startup-fatal: missing required persona context files, invalid config, PID lock conflict.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Surfaced in the health report; critical kinds fail startup.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Per-invocation runtime failure; never crashes the process.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A destructive tool invocation was blocked by the tool-call gate.
    #[error("Destructive tool call blocked: {0}")]
    ToolGate(String),

    /// Forge already running, or phases file already has an active writer.
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// A plan's content hash no longer matches its phases sidecar.
    #[error("Plan file has changed since phases were generated; run `!plan phases --regenerate`")]
    StalePlan,

    /// A failed phase retry was attempted without the required retry-safety records.
    #[error("Retry blocked: phase is missing modified_files/failure_hashes")]
    RetryBlocked,

    /// A JSON store on disk was malformed; callers back it up and proceed with defaults.
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    /// A chat-service error, keyed by its numeric code.
    #[error("Chat service error {code}: {message}")]
    Discord { code: u32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DiscoclawError {
    /// Short error code string for machine-readable surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            DiscoclawError::Config(_) => "CONFIG_ERROR",
            DiscoclawError::Credential(_) => "CREDENTIAL_ERROR",
            DiscoclawError::Runtime(_) => "RUNTIME_ERROR",
            DiscoclawError::ToolGate(_) => "TOOL_GATE_ERROR",
            DiscoclawError::Concurrency(_) => "CONCURRENCY_ERROR",
            DiscoclawError::StalePlan => "STALE_PLAN",
            DiscoclawError::RetryBlocked => "RETRY_BLOCKED",
            DiscoclawError::CorruptState(_) => "CORRUPT_STATE",
            DiscoclawError::Discord { .. } => "DISCORD_ERROR",
            DiscoclawError::Serialization(_) => "SERIALIZATION_ERROR",
            DiscoclawError::Io(_) => "IO_ERROR",
            DiscoclawError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Map a runtime error's message to the user-visible text from
    ///
    /// Falls back to `"Runtime error: <message>"` for anything unrecognized.
    pub fn friendly_runtime_message(message: &str) -> String {
        if message.contains("timeout reached") {
            return "Runtime timed out.".to_string();
        }
        if message.contains("rollout path missing") || message.contains("session state appears corrupted")
        {
            return "Session state is corrupted; retry will create a new session.".to_string();
        }
        format!("Runtime error: {message}")
    }

    /// `50083` ("thread archived") is swallowed; in the general abstraction this is
    /// the only chat-service code required to be recognized as recoverable.
    pub fn is_recoverable_send_skipped(&self) -> bool {
        matches!(self, DiscoclawError::Discord { code: 50083, .. })
    }
}

pub type Result<T> = std::result::Result<T, DiscoclawError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_timeout_message() {
        let msg = DiscoclawError::friendly_runtime_message("timeout reached after 1800s");
        assert_eq!(msg, "Runtime timed out.");
    }

    #[test]
    fn friendly_corrupt_session_message() {
        let msg = DiscoclawError::friendly_runtime_message("session state appears corrupted");
        assert!(msg.contains("retry will create a new session"));
    }

    #[test]
    fn friendly_fallback_is_prefixed() {
        let msg = DiscoclawError::friendly_runtime_message("subprocess exited with code 1");
        assert_eq!(msg, "Runtime error: subprocess exited with code 1");
    }

    #[test]
    fn thread_archived_is_recoverable() {
        let err = DiscoclawError::Discord {
            code: 50083,
            message: "thread archived".into(),
        };
        assert!(err.is_recoverable_send_skipped());
    }
}
