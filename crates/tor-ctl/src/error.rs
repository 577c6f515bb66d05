use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong talking to a tor control port.
///
/// Matches the propagation policy: `Io`/`Closed`/`Protocol`/`Timeout` tear
/// down the owning [`crate::Connection`]; `Refused`/`Internal` fail only the
/// job that produced them.
#[derive(Debug, Error, Clone)]
pub enum ControlError {
    #[error("control socket I/O error: {message}")]
    Io { message: String },

    #[error("control connection closed")]
    Closed,

    #[error("protocol desync or malformed reply: {detail}")]
    Protocol { detail: String },

    #[error("command refused ({code}): {message}")]
    Refused { code: u16, message: String },

    #[error("tor internal error ({code}): {message}")]
    Internal { code: u16, message: String },

    #[error("command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("superseded by a later lifecycle action")]
    Interrupted,

    #[error("cancelled before dispatch")]
    Cancelled,

    #[error("runtime has been destroyed")]
    Destroyed,

    #[error("invalid configuration: {detail}")]
    Config { detail: String },
}

impl ControlError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => Self::Refused {
                code: status,
                message,
            },
            500..=599 => Self::Internal {
                code: status,
                message,
            },
            _ => Self::Protocol {
                detail: format!("unexpected status {status}: {message}"),
            },
        }
    }

    /// Whether this error tears down the owning connection, per the
    /// propagation policy.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Closed | Self::Protocol { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for ControlError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}
