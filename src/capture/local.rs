//! Local recording on the capture node
//!
//! `LocalSaver` stands in for the network transport: every frame handed to
//! it is written straight into a sink in its own session directory, so the
//! transmitter loop can record locally without a receiver.

use crate::frame::{CameraIdentity, TaggedFrame};
use crate::recorder::manifest::{write_manifest, SessionManifest};
use crate::recorder::state::create_session_dir;
use crate::recorder::{RecorderError, RecorderResult, RecordingResult, RecordingSession, SinkFactory, SinkHandle};
use crate::transport::{StreamSender, TransportError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub struct LocalSaver {
    camera: CameraIdentity,
    session: Mutex<RecordingSession>,
    handle: Arc<Mutex<SinkHandle>>,
}

impl LocalSaver {
    /// Create a session directory under `output_root` and open the camera's sink in it
    pub fn create(factory: &dyn SinkFactory, camera: CameraIdentity, output_root: &Path) -> RecorderResult<Self> {
        let started_at = Utc::now();
        let (session_id, directory) = create_session_dir(output_root, started_at)?;
        let handle = SinkHandle::open(factory, &camera, &directory)?;
        tracing::info!("{}: saving locally to {:?}", camera, directory);

        Ok(Self {
            session: Mutex::new(RecordingSession {
                session_id,
                directory,
                started_at,
                ended_at: None,
                cameras: vec![camera.clone()],
            }),
            camera,
            handle: Arc::new(Mutex::new(handle)),
        })
    }

    pub fn session(&self) -> RecordingSession {
        self.session.lock().clone()
    }

    /// Finalize the sink and write the session manifest. Idempotent.
    pub fn close(&self) -> RecordingResult {
        let stats = self.handle.lock().close();

        let mut session = self.session.lock();
        if session.ended_at.is_none() {
            session.ended_at = Some(Utc::now());
        }
        let manifest = SessionManifest::new(session.clone(), vec![stats.clone()]);
        let manifest_path = match write_manifest(&manifest) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!("{}: failed to write session manifest: {}", self.camera, e);
                None
            }
        };

        RecordingResult {
            session: session.clone(),
            cameras: vec![stats],
            manifest_path,
        }
    }
}

#[async_trait]
impl StreamSender for LocalSaver {
    fn stream_name(&self) -> &CameraIdentity {
        &self.camera
    }

    async fn send(&self, frame: TaggedFrame) -> Result<(), TransportError> {
        let handle = self.handle.clone();
        let written = tokio::task::spawn_blocking(move || handle.lock().write(&frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        written.map_err(|e| match e {
            RecorderError::SinkClosed => TransportError::Closed(self.camera.clone()),
            other => TransportError::Send(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CapturedFrame;
    use crate::recorder::{read_manifest, read_raw_container, RawSinkFactory};
    use crate::timecode::{FrameTimecode, Timecode};
    use tempfile::tempdir;

    fn frame(sequence: u64) -> TaggedFrame {
        let captured = CapturedFrame::now(vec![sequence as u8; 4]);
        TaggedFrame {
            camera: "CAM_A".into(),
            sequence,
            payload: captured.payload,
            capture_timecode: FrameTimecode::Synced(Timecode::new(0, 0, 0, sequence as u8, 0)),
            capture_wall_clock: captured.wall_clock,
        }
    }

    #[tokio::test]
    async fn test_saves_frames_and_manifest() {
        let dir = tempdir().unwrap();
        let saver = LocalSaver::create(&RawSinkFactory, "CAM_A".into(), dir.path()).unwrap();
        for i in 0..3 {
            saver.send(frame(i)).await.unwrap();
        }

        let result = saver.close();
        assert_eq!(result.cameras[0].frames_written, 3);

        let session_dir = saver.session().directory;
        let (_, records) = read_raw_container(&session_dir.join("CAM_A.tcf")).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(read_manifest(&session_dir).unwrap().cameras.len(), 1);

        let err = saver.send(frame(3)).await.unwrap_err();
        assert_eq!(err, TransportError::Closed("CAM_A".into()));
    }
}
