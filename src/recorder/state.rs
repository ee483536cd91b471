//! Recording state management
//!
//! Defines the recording state machine, session tracking and events.

use super::writer::FinalStats;
use crate::frame::CameraIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Session directory name format, from the wall clock at start
pub const SESSION_DIR_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Current state of the recording controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Creating the session directory and opening sinks
    Starting,
    /// Frames are being written
    Recording,
    /// Closing sinks
    Stopping,
}

/// Events emitted by the recording controller
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started with the given session id
    Started(String),
    /// Recording stopped
    Stopped(String),
    /// A start attempt failed and was rolled back
    Error(String),
    /// A camera's source detached while recording; its sink was closed
    SourceDetached(CameraIdentity),
}

/// One start/stop cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    /// Timestamp-derived id, also the directory name
    pub session_id: String,
    pub directory: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Cameras that were attached at start and got a sink
    pub cameras: Vec<CameraIdentity>,
}

impl RecordingSession {
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    pub session: RecordingSession,

    /// Per-camera accounting, ordered by camera
    pub cameras: Vec<FinalStats>,

    /// Path of the session manifest, if it could be written
    pub manifest_path: Option<PathBuf>,
}

/// Create a fresh session directory under `root`.
///
/// The name comes from `started_at`; if a directory with that name already
/// exists a numeric suffix is added, so an earlier session is never reused.
pub fn create_session_dir(root: &Path, started_at: DateTime<Utc>) -> std::io::Result<(String, PathBuf)> {
    std::fs::create_dir_all(root)?;

    let base = started_at.format(SESSION_DIR_FORMAT).to_string();
    let mut session_id = base.clone();
    let mut suffix = 1;
    loop {
        let directory = root.join(&session_id);
        match std::fs::create_dir(&directory) {
            Ok(()) => return Ok((session_id, directory)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                session_id = format!("{base}_{suffix}");
                suffix += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
