use shared::error::ProtocolViolation;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("camera access denied (NO ACCESS)")]
    Permission,
    #[error("scanner failed to initialize: {reason}")]
    Initialization { reason: String },
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    #[error("`{operation}` called on a disposed or superseded scanner controller")]
    UseAfterDispose { operation: &'static str },
    #[error("scanner command `{command}` failed: {source}")]
    Command {
        command: &'static str,
        source: anyhow::Error,
    },
}

impl ScannerError {
    pub(crate) fn command(command: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Command { command, source }
    }

    /// Platform-style error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Permission => "NO ACCESS",
            Self::Initialization { .. } => "INITIALIZATION ERROR",
            Self::Protocol(_) => "PROTOCOL VIOLATION",
            Self::UseAfterDispose { .. } => "USE AFTER DISPOSE",
            Self::Command { .. } => "COMMAND FAILED",
        }
    }
}
