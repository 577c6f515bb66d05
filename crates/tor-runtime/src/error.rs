use std::path::PathBuf;

use thiserror::Error;
use tor_ctl::ControlError;

/// Everything that can go wrong sequencing the tor lifecycle, on top of what
/// [`ControlError`] already covers at the wire level.
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("control protocol error: {0}")]
    Control(#[from] ControlError),

    #[error("failed to spawn tor binary `{binary}`: {message}")]
    Spawn { binary: PathBuf, message: String },

    #[error("tor process I/O error: {message}")]
    ProcessIo { message: String },

    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    #[error("authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("superseded by a later lifecycle action")]
    Interrupted,

    #[error("runtime has been destroyed")]
    Destroyed,

    #[error("tor process exited before the control connection could be established (code {code:?})")]
    ExitedBeforeReady { code: Option<i32> },
}

impl RuntimeError {
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        Self::ProcessIo {
            message: err.to_string(),
        }
    }
}
