use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the platform side of a command call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct PlatformError {
    pub code: String,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The device subsystem said something the controller cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("unrecognized device event `{name}`")]
    UnknownEvent { name: String },
    #[error("malformed `{name}` event: {reason}")]
    MalformedEvent { name: String, reason: String },
    #[error("malformed reply to `{command}`: {reason}")]
    MalformedReply { command: String, reason: String },
}

impl ProtocolViolation {
    pub fn malformed_event(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_reply(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReply {
            command: command.into(),
            reason: reason.into(),
        }
    }
}
