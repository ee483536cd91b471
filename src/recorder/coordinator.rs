//! Recording controller
//!
//! Drives the session lifecycle: `Idle -> Starting -> Recording -> Stopping -> Idle`.
//! Start and stop are serialized; a command arriving while another
//! transition is in flight is rejected rather than queued.

use super::error::{RecorderError, RecorderResult};
use super::manifest::{write_manifest, SessionManifest};
use super::sink::SinkFactory;
use super::state::{create_session_dir, RecordingEvent, RecordingResult, RecordingSession, RecordingState};
use super::writer::{drain_queue, FinalStats, SinkCounters, SinkHandle};
use crate::frame::{CameraIdentity, TaggedFrame};
use crate::receiver::{SourceRegistry, StreamSource};
use crate::utils::queue::DropOldestQueue;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Live per-camera counters of the running session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkStatus {
    pub camera: CameraIdentity,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub integrity_warnings: u64,

    /// False once the camera's sink has been closed
    pub writing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatus {
    pub state: RecordingState,
    pub session: Option<RecordingSession>,
    pub sinks: Vec<SinkStatus>,
}

struct ActiveWriter {
    camera: CameraIdentity,
    source: Arc<StreamSource>,
    queue: Arc<DropOldestQueue<TaggedFrame>>,
    counters: Arc<SinkCounters>,
    task: JoinHandle<FinalStats>,
}

impl ActiveWriter {
    fn status(&self) -> SinkStatus {
        let writing = !self.task.is_finished();
        // evictions are folded into the counters when the writer finishes
        let pending_evictions = if writing { self.queue.evicted() } else { 0 };
        SinkStatus {
            camera: self.camera.clone(),
            frames_written: self.counters.frames_written(),
            frames_dropped: self.counters.frames_dropped() + pending_evictions,
            integrity_warnings: self.counters.integrity_warnings(),
            writing,
        }
    }
}

struct ActiveSession {
    session: RecordingSession,
    writers: Vec<ActiveWriter>,
    stop_requested: Arc<AtomicBool>,
}

/// Records every attached source of a registry into per-session sinks
pub struct RecordingController {
    /// Current recording state
    state: Arc<RwLock<RecordingState>>,

    /// Held for the whole of a start or stop
    transition: tokio::sync::Mutex<()>,

    registry: Arc<SourceRegistry>,
    factory: Arc<dyn SinkFactory>,
    output_root: PathBuf,

    active: Mutex<Option<ActiveSession>>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl RecordingController {
    pub fn new(registry: Arc<SourceRegistry>, factory: Arc<dyn SinkFactory>, output_root: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            transition: tokio::sync::Mutex::new(()),
            registry,
            factory,
            output_root: output_root.into(),
            active: Mutex::new(None),
            event_tx,
        }
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    pub fn output_root(&self) -> &PathBuf {
        &self.output_root
    }

    /// Start a new session with every currently attached source.
    ///
    /// Sources that attach later do not join this session. If any sink
    /// fails to open, the sinks already opened are closed and the
    /// controller returns to `Idle`.
    pub async fn start(&self) -> RecorderResult<RecordingSession> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| RecorderError::TransitionInProgress)?;

        {
            let mut state = self.state.write();
            if *state != RecordingState::Idle {
                return Err(RecorderError::AlreadyRecording);
            }
            *state = RecordingState::Starting;
        }

        match self.open_session() {
            Ok(active) => {
                let session = active.session.clone();
                *self.active.lock() = Some(active);
                *self.state.write() = RecordingState::Recording;
                let _ = self.event_tx.send(RecordingEvent::Started(session.session_id.clone()));
                tracing::info!(
                    "Recording started: session {} with {} camera(s)",
                    session.session_id,
                    session.cameras.len()
                );
                Ok(session)
            }
            Err(e) => {
                *self.state.write() = RecordingState::Idle;
                tracing::error!("Failed to start recording: {}", e);
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn open_session(&self) -> RecorderResult<ActiveSession> {
        let started_at = Utc::now();
        let (session_id, directory) = create_session_dir(&self.output_root, started_at)?;
        tracing::info!("Created session directory {:?}", directory);

        let sources = self.registry.attached_sources();
        let mut opened: Vec<(Arc<StreamSource>, SinkHandle)> = Vec::with_capacity(sources.len());
        for source in sources {
            match SinkHandle::open(self.factory.as_ref(), source.name(), &directory) {
                Ok(handle) => opened.push((source, handle)),
                Err(e) => {
                    for (_, mut handle) in opened {
                        handle.close();
                    }
                    return Err(e);
                }
            }
        }

        let stop_requested = Arc::new(AtomicBool::new(false));
        let mut writers = Vec::with_capacity(opened.len());
        for (source, handle) in opened {
            let queue = source.begin_recording().unwrap_or_else(|| {
                // detached between the snapshot and now; the writer closes at once
                let queue = Arc::new(DropOldestQueue::new(1));
                queue.close();
                queue
            });
            let counters = handle.counters();
            let task = {
                let queue = queue.clone();
                let source = source.clone();
                let stop_requested = stop_requested.clone();
                let events = self.event_tx.clone();
                tokio::task::spawn_blocking(move || drain_queue(handle, queue, source, stop_requested, events))
            };
            writers.push(ActiveWriter {
                camera: source.name().clone(),
                source,
                queue,
                counters,
                task,
            });
        }

        let session = RecordingSession {
            session_id,
            directory,
            started_at,
            ended_at: None,
            cameras: writers.iter().map(|w| w.camera.clone()).collect(),
        };
        Ok(ActiveSession {
            session,
            writers,
            stop_requested,
        })
    }

    /// Stop the session, finalize every sink and write the manifest
    pub async fn stop(&self) -> RecorderResult<RecordingResult> {
        let _guard = self
            .transition
            .try_lock()
            .map_err(|_| RecorderError::TransitionInProgress)?;

        {
            let mut state = self.state.write();
            if *state != RecordingState::Recording {
                return Err(RecorderError::NotRecording);
            }
            *state = RecordingState::Stopping;
        }

        let active = self.active.lock().take();
        let Some(active) = active else {
            *self.state.write() = RecordingState::Idle;
            return Err(RecorderError::NotRecording);
        };
        tracing::info!("Stopping recording: session {}", active.session.session_id);

        active.stop_requested.store(true, Ordering::SeqCst);
        for writer in &active.writers {
            writer.source.end_recording();
            writer.queue.close();
        }

        let mut cameras = Vec::with_capacity(active.writers.len());
        for writer in active.writers {
            match writer.task.await {
                Ok(stats) => cameras.push(stats),
                Err(e) => {
                    tracing::error!("{}: writer task failed: {}", writer.camera, e);
                    cameras.push(FinalStats {
                        camera: writer.camera,
                        frames_written: writer.counters.frames_written(),
                        frames_dropped: writer.counters.frames_dropped() + writer.queue.evicted(),
                        integrity_warnings: writer.counters.integrity_warnings(),
                        last_timecode: None,
                        output_files: Vec::new(),
                        finalized: false,
                        incomplete: true,
                    });
                }
            }
        }

        let mut session = active.session;
        session.ended_at = Some(Utc::now());

        let manifest = SessionManifest::new(session.clone(), cameras.clone());
        let manifest_path = match write_manifest(&manifest) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!("Failed to write session manifest: {}", e);
                let _ = self.event_tx.send(RecordingEvent::Error(e.to_string()));
                None
            }
        };

        *self.state.write() = RecordingState::Idle;
        let _ = self.event_tx.send(RecordingEvent::Stopped(session.session_id.clone()));
        tracing::info!(
            "Recording stopped: session {}, duration {}ms",
            session.session_id,
            session.duration_ms().unwrap_or(0)
        );

        Ok(RecordingResult {
            session,
            cameras,
            manifest_path,
        })
    }

    pub fn status(&self) -> RecorderStatus {
        let state = self.state();
        let active = self.active.lock();
        RecorderStatus {
            state,
            session: active.as_ref().map(|a| a.session.clone()),
            sinks: active
                .as_ref()
                .map(|a| a.writers.iter().map(ActiveWriter::status).collect())
                .unwrap_or_default(),
        }
    }
}
