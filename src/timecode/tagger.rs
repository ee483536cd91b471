//! Frame tagging
//!
//! Binds the clock's current reading to each captured frame.

use super::clock::TimecodeClock;
use super::types::FrameTimecode;
use crate::frame::{CameraIdentity, CapturedFrame, TaggedFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tags frames for one camera.
///
/// Never waits for the clock: a reading older than the staleness threshold
/// (after the offset is applied) yields [`FrameTimecode::Unsynchronized`].
pub struct FrameTagger {
    camera: CameraIdentity,
    clock: Arc<TimecodeClock>,
    staleness_threshold: Duration,
    next_sequence: AtomicU64,
    unsynchronized: AtomicU64,
}

impl FrameTagger {
    pub fn new(camera: CameraIdentity, clock: Arc<TimecodeClock>) -> Self {
        let staleness_threshold = clock.config().staleness_threshold;
        Self {
            camera,
            clock,
            staleness_threshold,
            next_sequence: AtomicU64::new(0),
            unsynchronized: AtomicU64::new(0),
        }
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn camera(&self) -> &CameraIdentity {
        &self.camera
    }

    /// Number of frames tagged as unsynchronized so far
    pub fn unsynchronized_count(&self) -> u64 {
        self.unsynchronized.load(Ordering::Relaxed)
    }

    pub fn tag(&self, frame: CapturedFrame) -> TaggedFrame {
        let snapshot = self.clock.snapshot_at(frame.captured_at);
        let threshold_ms = self.staleness_threshold.as_secs_f64() * 1000.0;

        let capture_timecode = if snapshot.age_ms <= threshold_ms {
            FrameTimecode::Synced(snapshot.timecode)
        } else {
            if self.unsynchronized.fetch_add(1, Ordering::Relaxed) == 0 {
                tracing::warn!(
                    "{}: timecode reading is {:.0}ms old, tagging frames as unsynchronized",
                    self.camera,
                    snapshot.age_ms
                );
            }
            FrameTimecode::Unsynchronized
        };

        TaggedFrame {
            camera: self.camera.clone(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
            payload: frame.payload,
            capture_timecode,
            capture_wall_clock: frame.wall_clock,
        }
    }
}
