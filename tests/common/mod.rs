//! Shared harness for the end-to-end recording tests.
//!
//! Wires a [`RecorderState`] to an in-process [`LocalTransport`] writing raw
//! containers under a temporary directory, plus feeders that publish frames
//! for a camera until aborted.

#![allow(dead_code)]

use multicam_sync::commands::RecorderState;
use multicam_sync::config::{ReceiverConfig, RecorderConfig, SinkKind};
use multicam_sync::receiver::SourceState;
use multicam_sync::recorder::SinkFactory;
use multicam_sync::timecode::{FrameTimecode, Timecode};
use multicam_sync::transport::{LocalTransport, StreamSender};
use multicam_sync::{CameraIdentity, CapturedFrame, TaggedFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub struct TestHarness {
    pub dir: TempDir,
    pub transport: LocalTransport,
    pub state: RecorderState,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_receiver(ReceiverConfig {
            attach_timeout_ms: 2_000,
            ..Default::default()
        })
    }

    pub fn with_receiver(receiver: ReceiverConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_millis(200));
        let state = RecorderState::new(Arc::new(transport.clone()), &receiver, &recorder_config(&dir));
        Self { dir, transport, state }
    }

    pub fn with_factory(receiver: ReceiverConfig, factory: Arc<dyn SinkFactory>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_millis(200));
        let state = RecorderState::with_sink_factory(
            Arc::new(transport.clone()),
            &receiver,
            &recorder_config(&dir),
            factory,
        );
        Self { dir, transport, state }
    }

    /// Publish `camera` and send a frame every `interval` until the returned feeder is aborted
    pub fn feed(&self, camera: &str, interval: Duration) -> Feeder {
        let publisher = self.transport.publish(camera);
        let sent = Arc::new(AtomicU64::new(0));
        let task = {
            let sent = sent.clone();
            let camera = CameraIdentity::from(camera);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                let mut sequence = 0u64;
                loop {
                    ticker.tick().await;
                    let _ = publisher.send(frame(&camera, sequence)).await;
                    sent.fetch_add(1, Ordering::Relaxed);
                    sequence += 1;
                }
            })
        };
        Feeder { task, sent }
    }

    /// Poll until `camera` reaches `state` or `within` elapses
    pub async fn wait_for_state(&self, camera: &str, state: SourceState, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let current = self
                .state
                .registry
                .get(&CameraIdentity::from(camera))
                .map(|s| s.state());
            if current == Some(state) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Names of the entries in a session directory
    pub fn session_files(&self, session_dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}

pub struct Feeder {
    pub task: JoinHandle<()>,
    pub sent: Arc<AtomicU64>,
}

impl Feeder {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn recorder_config(dir: &TempDir) -> RecorderConfig {
    RecorderConfig {
        output_root: dir.path().to_path_buf(),
        sink: SinkKind::Raw,
        ..Default::default()
    }
}

pub fn frame(camera: &CameraIdentity, sequence: u64) -> TaggedFrame {
    let captured = CapturedFrame::now(vec![(sequence % 256) as u8; 64]);
    let frame_number = (sequence % 30) as u8;
    let seconds = ((sequence / 30) % 60) as u8;
    TaggedFrame {
        camera: camera.clone(),
        sequence,
        payload: captured.payload,
        capture_timecode: FrameTimecode::Synced(Timecode::new(1, 0, seconds, frame_number, 0)),
        capture_wall_clock: captured.wall_clock,
    }
}
