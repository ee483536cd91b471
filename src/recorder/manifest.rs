//! Session manifest read/write
//!
//! Every finished session directory carries a `session.json` describing the
//! session and each camera's output files and final counters.

use super::state::RecordingSession;
use super::writer::FinalStats;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "session.json";

/// Current manifest layout version
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not a session directory: {0}")]
    InvalidSession(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionManifest {
    pub version: u32,
    pub session: RecordingSession,
    pub cameras: Vec<FinalStats>,
}

impl SessionManifest {
    pub fn new(session: RecordingSession, cameras: Vec<FinalStats>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            session,
            cameras,
        }
    }

    /// Cameras whose source detached before stop
    pub fn incomplete_cameras(&self) -> impl Iterator<Item = &FinalStats> {
        self.cameras.iter().filter(|c| c.incomplete)
    }
}

/// Write the manifest into its session directory
pub fn write_manifest(manifest: &SessionManifest) -> Result<PathBuf, ManifestError> {
    let path = manifest.session.directory.join(MANIFEST_FILE);
    let content = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, content)?;

    tracing::debug!("Wrote session manifest to {:?}", path);
    Ok(path)
}

/// Read the manifest from a session directory
pub fn read_manifest(session_dir: &Path) -> Result<SessionManifest, ManifestError> {
    if !session_dir.is_dir() {
        return Err(ManifestError::InvalidSession(format!("{:?} is not a directory", session_dir)));
    }

    let path = session_dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Err(ManifestError::InvalidSession(format!("{:?} has no {}", session_dir, MANIFEST_FILE)));
    }

    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
}
