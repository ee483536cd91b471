//! Recording-related commands

use crate::config::{ReceiverConfig, RecorderConfig};
use crate::frame::CameraIdentity;
use crate::receiver::{LivenessConfig, ReadinessReport, SourceRegistry, SourceStatus};
use crate::recorder::{
    sink_factory, RecorderError, RecorderStatus, RecordingController, RecordingResult, RecordingSession, SinkFactory,
};
use crate::transport::StreamReceiver;
use crate::utils::error::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often shutdown rechecks a controller that is mid-transition
const TRANSITION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Receiver state shared by the commands
pub struct RecorderState {
    pub registry: Arc<SourceRegistry>,
    pub controller: Arc<RecordingController>,
    attach_timeout: Duration,
    liveness_monitor: JoinHandle<()>,
}

impl RecorderState {
    /// Build the receiver with the sink selected by `recorder`.
    ///
    /// Starts the liveness sweep, so it must be called within a tokio runtime.
    pub fn new(transport: Arc<dyn StreamReceiver>, receiver: &ReceiverConfig, recorder: &RecorderConfig) -> Self {
        Self::with_sink_factory(transport, receiver, recorder, sink_factory(recorder))
    }

    pub fn with_sink_factory(
        transport: Arc<dyn StreamReceiver>,
        receiver: &ReceiverConfig,
        recorder: &RecorderConfig,
        factory: Arc<dyn SinkFactory>,
    ) -> Self {
        let registry = Arc::new(SourceRegistry::new(transport, LivenessConfig::from(receiver)));
        let controller = Arc::new(RecordingController::new(
            registry.clone(),
            factory,
            recorder.output_root.clone(),
        ));
        let liveness_monitor = registry.spawn_liveness_monitor(receiver.sweep_period());
        Self {
            registry,
            controller,
            attach_timeout: receiver.attach_timeout(),
            liveness_monitor,
        }
    }
}

impl Drop for RecorderState {
    fn drop(&mut self) {
        self.liveness_monitor.abort();
    }
}

/// Everything the operator sees about the receiver
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverStatus {
    pub sources: Vec<SourceStatus>,
    pub recorder: RecorderStatus,
}

/// Register the cameras expected on the transport
pub fn register_expected_cameras(state: &RecorderState, names: Vec<String>) -> Vec<SourceStatus> {
    state
        .registry
        .register(names)
        .iter()
        .map(|source| source.status())
        .collect()
}

/// Wait for the registered cameras, each bounded by the configured attach timeout
pub async fn wait_for_sources(state: &RecorderState) -> ReadinessReport {
    state.registry.wait_for_ready(state.attach_timeout).await
}

/// Detach a camera; it is excluded from readiness and later sessions
pub fn remove_camera(state: &RecorderState, name: &str) -> AppResult<()> {
    if state.registry.remove(&CameraIdentity::from(name)) {
        Ok(())
    } else {
        Err(AppError::UnknownCamera(name.to_string()))
    }
}

/// Start recording every attached camera
pub async fn start_recording(state: &RecorderState) -> AppResult<RecordingSession> {
    Ok(state.controller.start().await?)
}

/// Stop recording and finalize every camera's output
pub async fn stop_recording(state: &RecorderState) -> AppResult<RecordingResult> {
    Ok(state.controller.stop().await?)
}

pub fn get_status(state: &RecorderState) -> ReceiverStatus {
    ReceiverStatus {
        sources: state.registry.status(),
        recorder: state.controller.status(),
    }
}

/// Stop any running session so every sink is finalized, then detach all sources.
///
/// A start or stop already in flight is waited out first, so a session that
/// finishes starting during shutdown is still stopped.
pub async fn shutdown(state: &RecorderState) -> AppResult<Option<RecordingResult>> {
    let result = loop {
        match state.controller.stop().await {
            Ok(result) => break Ok(Some(result)),
            Err(RecorderError::NotRecording) => break Ok(None),
            Err(RecorderError::TransitionInProgress) => {
                tokio::time::sleep(TRANSITION_POLL_INTERVAL).await;
            }
            Err(e) => break Err(e),
        }
    };
    state.registry.shutdown();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkKind;
    use crate::frame::{CapturedFrame, TaggedFrame};
    use crate::receiver::SourceState;
    use crate::recorder::{MediaSink, RawSinkFactory, RecordingState, SinkError};
    use crate::timecode::FrameTimecode;
    use std::path::Path;
    use std::time::Instant;
    use crate::transport::LocalTransport;
    use tempfile::tempdir;

    fn state(root: &std::path::Path) -> RecorderState {
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_millis(20));
        let receiver = ReceiverConfig {
            attach_timeout_ms: 50,
            ..Default::default()
        };
        let recorder = RecorderConfig {
            output_root: root.to_path_buf(),
            sink: SinkKind::Raw,
            ..Default::default()
        };
        RecorderState::new(Arc::new(transport), &receiver, &recorder)
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        let statuses = register_expected_cameras(&state, vec!["CAM_A".to_string(), "CAM_B".to_string()]);
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == SourceState::Discovering));

        remove_camera(&state, "CAM_B").unwrap();
        let err = remove_camera(&state, "CAM_Z").unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CAMERA");

        let report = wait_for_sources(&state).await;
        assert_eq!(report.timed_out, vec![CameraIdentity::from("CAM_A")]);
    }

    #[tokio::test]
    async fn test_command_misuse_reports_codes() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());

        let err = stop_recording(&state).await.unwrap_err();
        assert_eq!(err.code(), "NOT_RECORDING");

        start_recording(&state).await.unwrap();
        let err = start_recording(&state).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_RECORDING");
        assert_eq!(get_status(&state).recorder.state, RecordingState::Recording);

        let result = shutdown(&state).await.unwrap();
        assert!(result.is_some());
        assert_eq!(get_status(&state).recorder.state, RecordingState::Idle);
    }

    /// Raw sinks that take a while to open
    struct SlowOpenFactory;

    impl SinkFactory for SlowOpenFactory {
        fn open(&self, camera: &CameraIdentity, session_dir: &Path) -> Result<Box<dyn MediaSink>, SinkError> {
            std::thread::sleep(Duration::from_millis(300));
            RawSinkFactory.open(camera, session_dir)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_waits_for_start_in_flight() {
        let dir = tempdir().unwrap();
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_millis(20));
        let recorder = RecorderConfig {
            output_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let state = Arc::new(RecorderState::with_sink_factory(
            Arc::new(transport),
            &ReceiverConfig::default(),
            &recorder,
            Arc::new(SlowOpenFactory),
        ));
        for source in state.registry.register(["CAM_A"]) {
            let captured = CapturedFrame::now(vec![0u8; 16]);
            let frame = TaggedFrame {
                camera: source.name().clone(),
                sequence: 0,
                payload: captured.payload,
                capture_timecode: FrameTimecode::Unsynchronized,
                capture_wall_clock: captured.wall_clock,
            };
            source.on_frame_received(frame, Instant::now());
        }

        let starting = {
            let state = state.clone();
            tokio::spawn(async move { start_recording(&state).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.controller.state(), RecordingState::Starting);

        let result = shutdown(&state).await.unwrap();
        starting.await.unwrap().unwrap();

        let result = result.expect("the started session is stopped");
        assert_eq!(result.cameras.len(), 1);
        assert!(result.cameras[0].finalized);
        assert_eq!(state.controller.state(), RecordingState::Idle);
        assert!(state
            .registry
            .sources()
            .iter()
            .all(|s| s.state() == SourceState::Detached));
    }
}
