//! Error types and handling
//!
//! Crate-wide error type for the operator surface.

use crate::capture::CaptureError;
use crate::recorder::manifest::ManifestError;
use crate::recorder::{RecorderError, SinkError};
use crate::timecode::TimecodeError;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Timecode(#[from] TimecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Unknown camera: {0}")]
    UnknownCamera(String),
}

impl AppError {
    /// Stable code for an outer control layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Timecode(TimecodeError::MalformedTimecode(_)) => "MALFORMED_TIMECODE",
            AppError::Transport(TransportError::SourceNotFound(_)) => "SOURCE_NOT_FOUND",
            AppError::Transport(_) => "TRANSPORT_ERROR",
            AppError::Recorder(e) => match e {
                RecorderError::AlreadyRecording => "ALREADY_RECORDING",
                RecorderError::NotRecording => "NOT_RECORDING",
                RecorderError::TransitionInProgress => "TRANSITION_IN_PROGRESS",
                RecorderError::SinkOpenFailure { .. } => "SINK_OPEN_FAILURE",
                RecorderError::SinkClosed => "SINK_CLOSED",
                RecorderError::StorageError(_) | RecorderError::Io(_) => "STORAGE_ERROR",
            },
            AppError::Sink(_) => "STORAGE_ERROR",
            AppError::Manifest(_) => "MANIFEST_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::UnknownCamera(_) => "UNKNOWN_CAMERA",
        }
    }
}

/// Error response for an outer control layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: AppError = RecorderError::TransitionInProgress.into();
        assert_eq!(err.code(), "TRANSITION_IN_PROGRESS");

        let err: AppError = TimecodeError::MalformedTimecode("1:2".to_string()).into();
        let response = ErrorResponse::from(err);
        assert_eq!(response.code, "MALFORMED_TIMECODE");
        assert!(response.message.contains("1:2"));
    }
}
