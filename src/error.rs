use std::process::ExitCode;

/// Errors that cause township to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    /// Policy refusal for the current role. Exits 2 with no output so
    /// guarded hooks can treat the command as a clean no.
    #[error("refused by role policy")]
    SilentRefusal,

    #[error("{0}")]
    Other(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::SilentRefusal | ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::ToolFailed { .. } => ExitCode::from(4),
            ExitError::Timeout { .. } => ExitCode::from(5),
            ExitError::Other(_) => ExitCode::from(1),
        }
    }

    /// True when the error should produce no stderr output.
    pub fn is_silent(&self) -> bool {
        matches!(self, ExitError::SilentRefusal)
    }
}
