//! Stream source
//!
//! Receive-side state for one remote camera: liveness, the latest frame for
//! display, and the recording queue while a session is running.

use crate::config::ReceiverConfig;
use crate::frame::{CameraIdentity, TaggedFrame};
use crate::utils::queue::DropOldestQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Lifecycle of a stream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    /// Registered, no frame received yet
    Discovering,
    /// Receiving frames
    Attached,
    /// No frame within the liveness window; recovers on the next frame
    Stale,
    /// Removed or timed out; needs re-registration
    Detached,
}

/// Liveness and buffering parameters
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Silence after which an attached source becomes stale
    pub liveness_window: Duration,

    /// Silence after which a stale source is detached.
    /// Measured from the last frame, so it must exceed `liveness_window`.
    pub detach_grace: Duration,

    /// Recording queue bound per source
    pub queue_depth: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::from(&ReceiverConfig::default())
    }
}

impl From<&ReceiverConfig> for LivenessConfig {
    fn from(config: &ReceiverConfig) -> Self {
        Self {
            liveness_window: Duration::from_millis(config.liveness_window_ms),
            detach_grace: Duration::from_millis(config.detach_grace_ms),
            queue_depth: config.queue_depth,
        }
    }
}

/// Point-in-time view of a source
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub name: CameraIdentity,
    pub state: SourceState,
    pub frames_received: u64,
    /// Average frame rate since the first frame
    pub fps: f64,
    pub recording: bool,
}

#[derive(Default)]
struct Inner {
    first_frame_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frames_received: u64,
    latest: Option<TaggedFrame>,
    recording: Option<Arc<DropOldestQueue<TaggedFrame>>>,
}

/// One expected remote camera
pub struct StreamSource {
    name: CameraIdentity,
    config: LivenessConfig,
    state: watch::Sender<SourceState>,
    inner: Mutex<Inner>,
}

impl StreamSource {
    pub fn new(name: CameraIdentity, config: LivenessConfig) -> Self {
        let (state, _) = watch::channel(SourceState::Discovering);
        Self {
            name,
            config,
            state,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &CameraIdentity {
        &self.name
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    /// Accept one frame from the transport.
    ///
    /// Refreshes liveness, replaces the display frame and, while recording,
    /// queues the frame for the sink. Frames for a detached source are
    /// discarded.
    pub fn on_frame_received(&self, frame: TaggedFrame, now: Instant) -> SourceState {
        let mut inner = self.inner.lock();
        let previous = self.state();
        if previous == SourceState::Detached {
            return previous;
        }

        inner.first_frame_at.get_or_insert(now);
        inner.last_frame_at = Some(now);
        inner.frames_received += 1;

        if let Some(queue) = &inner.recording {
            if let Ok(Some(evicted)) = queue.push(frame.clone()) {
                tracing::debug!(
                    "{}: recording queue full, dropped frame {}",
                    self.name,
                    evicted.sequence
                );
            }
        }
        inner.latest = Some(frame);

        match previous {
            SourceState::Discovering => tracing::info!("{}: attached", self.name),
            SourceState::Stale => tracing::info!("{}: recovered", self.name),
            _ => {}
        }
        self.state.send_replace(SourceState::Attached);
        SourceState::Attached
    }

    /// Apply the liveness rules as of `now` and return the resulting state
    pub fn liveness_check(&self, now: Instant) -> SourceState {
        let mut inner = self.inner.lock();
        let state = self.state();
        let silence = match inner.last_frame_at {
            Some(last) => now.saturating_duration_since(last),
            None => return state,
        };

        match state {
            SourceState::Attached if silence >= self.config.liveness_window => {
                tracing::warn!("{}: no frame for {:?}, marking stale", self.name, silence);
                self.state.send_replace(SourceState::Stale);
                SourceState::Stale
            }
            SourceState::Stale if silence >= self.config.detach_grace => {
                tracing::warn!("{}: no frame for {:?}, detaching", self.name, silence);
                self.detach_locked(&mut inner);
                SourceState::Detached
            }
            state => state,
        }
    }

    /// Detach explicitly; any active recording queue is closed
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        if self.state() != SourceState::Detached {
            tracing::info!("{}: detached", self.name);
            self.detach_locked(&mut inner);
        }
    }

    fn detach_locked(&self, inner: &mut Inner) {
        self.state.send_replace(SourceState::Detached);
        if let Some(queue) = inner.recording.take() {
            queue.close();
        }
    }

    /// Wait until the source attaches; `false` if it detaches first
    pub async fn wait_until_attached(&self) -> bool {
        let mut rx = self.state.subscribe();
        let result = rx
            .wait_for(|s| matches!(s, SourceState::Attached | SourceState::Detached))
            .await
            .map(|s| *s == SourceState::Attached);
        result.unwrap_or(false)
    }

    /// Most recent frame, for live display
    pub fn latest_frame(&self) -> Option<TaggedFrame> {
        self.inner.lock().latest.clone()
    }

    /// Start queueing received frames for a sink.
    ///
    /// Returns `None` for a detached source.
    pub fn begin_recording(&self) -> Option<Arc<DropOldestQueue<TaggedFrame>>> {
        let mut inner = self.inner.lock();
        if self.state() == SourceState::Detached {
            return None;
        }
        let queue = Arc::new(DropOldestQueue::new(self.config.queue_depth));
        if let Some(old) = inner.recording.replace(queue.clone()) {
            old.close();
        }
        Some(queue)
    }

    /// Stop queueing; frames already queued stay available to the sink
    pub fn end_recording(&self) {
        if let Some(queue) = self.inner.lock().recording.take() {
            queue.close();
        }
    }

    pub fn status(&self) -> SourceStatus {
        let inner = self.inner.lock();
        let fps = match (inner.first_frame_at, inner.last_frame_at) {
            (Some(first), Some(last)) if last > first => {
                (inner.frames_received.saturating_sub(1)) as f64 / (last - first).as_secs_f64()
            }
            _ => 0.0,
        };
        SourceStatus {
            name: self.name.clone(),
            state: self.state(),
            frames_received: inner.frames_received,
            fps,
            recording: inner.recording.is_some(),
        }
    }
}
