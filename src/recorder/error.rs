//! Recorder errors

use crate::frame::CameraIdentity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("A start or stop is already in progress")]
    TransitionInProgress,

    #[error("Failed to open sink for {camera}: {reason}")]
    SinkOpenFailure { camera: CameraIdentity, reason: String },

    #[error("Sink is closed")]
    SinkClosed,

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecorderResult<T> = Result<T, RecorderError>;
