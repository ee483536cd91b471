//! Media sink seam
//!
//! A sink turns a sequence of tagged frames for one camera into a finalized
//! file in the session directory. Sinks are synchronous and run on the
//! blocking pool.

use crate::frame::{CameraIdentity, TaggedFrame};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sink-level errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),
}

/// Per-camera output container
pub trait MediaSink: Send {
    fn write_frame(&mut self, frame: &TaggedFrame) -> Result<(), SinkError>;

    /// Flush and finalize the container, returning the files written
    fn finalize(&mut self) -> Result<Vec<PathBuf>, SinkError>;
}

/// Opens one sink per camera for a session
pub trait SinkFactory: Send + Sync {
    fn open(&self, camera: &CameraIdentity, session_dir: &Path) -> Result<Box<dyn MediaSink>, SinkError>;
}

/// File name stem for a camera, with path separators and other unsafe characters replaced
pub fn file_stem(camera: &CameraIdentity) -> String {
    camera
        .as_str()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(file_stem(&"CAM_A".into()), "CAM_A");
        assert_eq!(file_stem(&"../etc/passwd".into()), "_etc_passwd");
        assert_eq!(file_stem(&"Stage Left (1)".into()), "Stage Left _1_");
    }
}
