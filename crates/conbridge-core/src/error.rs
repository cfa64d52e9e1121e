use std::time::Duration;

use thiserror::Error;

/// Errors produced by the process control bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("access denied")]
    AccessDenied,

    #[error("a process is already running")]
    AlreadyRunning,

    #[error("no active process")]
    NotRunning,

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("process input is closed (broken pipe)")]
    BrokenPipe,

    #[error("timed out after {} s", .0.as_secs())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<nix::Error> for BridgeError {
    fn from(e: nix::Error) -> Self {
        BridgeError::Io(std::io::Error::from(e))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
