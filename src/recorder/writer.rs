//! Session writer
//!
//! A `SinkHandle` wraps one camera's media sink for one session and keeps
//! the per-camera counters. Each handle is drained by its own writer on the
//! blocking pool so cameras write in parallel.

use super::error::{RecorderError, RecorderResult};
use super::sink::{MediaSink, SinkFactory};
use super::state::RecordingEvent;
use crate::frame::{CameraIdentity, TaggedFrame};
use crate::receiver::{SourceState, StreamSource};
use crate::timecode::Timecode;
use crate::utils::queue::DropOldestQueue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Live counters for one sink, readable while the writer runs
#[derive(Debug, Default)]
pub struct SinkCounters {
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    integrity_warnings: AtomicU64,
}

impl SinkCounters {
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn integrity_warnings(&self) -> u64 {
        self.integrity_warnings.load(Ordering::Relaxed)
    }
}

/// Final accounting for one camera in one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStats {
    pub camera: CameraIdentity,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub integrity_warnings: u64,
    pub last_timecode: Option<Timecode>,
    pub output_files: Vec<PathBuf>,

    /// The container was flushed and closed without error
    pub finalized: bool,

    /// The source detached before the session stopped
    pub incomplete: bool,
}

/// One camera's sink for one session
pub struct SinkHandle {
    camera: CameraIdentity,
    sink: Option<Box<dyn MediaSink>>,
    counters: Arc<SinkCounters>,
    last_timecode: Option<Timecode>,
    incomplete: bool,
    final_stats: Option<FinalStats>,
}

impl SinkHandle {
    /// Open a sink through `factory`; failure is a `SinkOpenFailure`
    pub fn open(factory: &dyn SinkFactory, camera: &CameraIdentity, session_dir: &Path) -> RecorderResult<Self> {
        let sink = factory
            .open(camera, session_dir)
            .map_err(|e| RecorderError::SinkOpenFailure {
                camera: camera.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(camera.clone(), sink))
    }

    pub fn new(camera: CameraIdentity, sink: Box<dyn MediaSink>) -> Self {
        Self {
            camera,
            sink: Some(sink),
            counters: Arc::new(SinkCounters::default()),
            last_timecode: None,
            incomplete: false,
            final_stats: None,
        }
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    pub fn counters(&self) -> Arc<SinkCounters> {
        self.counters.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.final_stats.is_some()
    }

    /// Write one frame as-is.
    ///
    /// A storage failure counts the frame as dropped and is returned to the
    /// caller; the sink stays open for the next frame.
    pub fn write(&mut self, frame: &TaggedFrame) -> RecorderResult<()> {
        let sink = self.sink.as_mut().ok_or(RecorderError::SinkClosed)?;

        if let Err(e) = sink.write_frame(frame) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!("{}: failed to write frame {}: {}", self.camera, frame.sequence, e);
            return Err(RecorderError::StorageError(e.to_string()));
        }
        self.counters.frames_written.fetch_add(1, Ordering::Relaxed);

        if let Some(timecode) = frame.capture_timecode.timecode() {
            if let Some(last) = self.last_timecode {
                if timecode <= last {
                    self.counters.integrity_warnings.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "{}: timecode {} does not advance past {} (frame {})",
                        self.camera,
                        timecode,
                        last,
                        frame.sequence
                    );
                }
            }
            self.last_timecode = Some(timecode);
        }
        Ok(())
    }

    /// Count frames lost before reaching the sink
    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.counters.frames_dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn mark_incomplete(&mut self) {
        self.incomplete = true;
    }

    /// Flush and finalize. Closing again returns the same stats.
    pub fn close(&mut self) -> FinalStats {
        if let Some(stats) = &self.final_stats {
            return stats.clone();
        }

        let (output_files, finalized) = match self.sink.take() {
            Some(mut sink) => match sink.finalize() {
                Ok(files) => (files, true),
                Err(e) => {
                    tracing::error!("{}: failed to finalize sink: {}", self.camera, e);
                    (Vec::new(), false)
                }
            },
            None => (Vec::new(), false),
        };

        let stats = FinalStats {
            camera: self.camera.clone(),
            frames_written: self.counters.frames_written(),
            frames_dropped: self.counters.frames_dropped(),
            integrity_warnings: self.counters.integrity_warnings(),
            last_timecode: self.last_timecode,
            output_files,
            finalized,
            incomplete: self.incomplete,
        };
        tracing::info!(
            "{}: sink closed, {} written, {} dropped, {} integrity warnings",
            self.camera,
            stats.frames_written,
            stats.frames_dropped,
            stats.integrity_warnings
        );
        self.final_stats = Some(stats.clone());
        stats
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.close();
        }
    }
}

/// Drain a source's recording queue into its sink until the queue closes.
///
/// Runs on the blocking pool. If the queue closed because the source
/// detached (and not because of `stop_requested`), the camera is flagged
/// incomplete and a `SourceDetached` event is emitted.
pub(crate) fn drain_queue(
    mut handle: SinkHandle,
    queue: Arc<DropOldestQueue<TaggedFrame>>,
    source: Arc<StreamSource>,
    stop_requested: Arc<AtomicBool>,
    events: broadcast::Sender<RecordingEvent>,
) -> FinalStats {
    while let Some(frame) = futures::executor::block_on(queue.pop()) {
        // storage failures are already counted as drops
        let _ = handle.write(&frame);
    }
    handle.record_dropped(queue.evicted());

    if !stop_requested.load(Ordering::SeqCst) && source.state() == SourceState::Detached {
        tracing::warn!("{}: source detached mid-recording, closing its sink", handle.camera());
        handle.mark_incomplete();
        let _ = events.send(RecordingEvent::SourceDetached(handle.camera().clone()));
    }

    handle.close()
}
