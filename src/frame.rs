//! Frame and camera identity types shared by the capture and receive sides

use crate::timecode::FrameTimecode;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Operator-assigned camera name.
///
/// Used as the stream name on the transport and as the join key between a
/// transmitter and the receiver's stream source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraIdentity(String);

impl CameraIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CameraIdentity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A frame as it leaves the camera, before tagging
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Pixel data, opaque to this crate
    pub payload: Bytes,

    /// Monotonic capture instant, used to age the clock reading
    pub captured_at: Instant,

    /// Wall-clock capture time
    pub wall_clock: DateTime<Utc>,
}

impl CapturedFrame {
    /// Stamp a payload as captured right now
    pub fn now(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            captured_at: Instant::now(),
            wall_clock: Utc::now(),
        }
    }
}

/// A captured frame bound to the timecode that was current when it was taken
#[derive(Debug, Clone)]
pub struct TaggedFrame {
    pub camera: CameraIdentity,

    /// Per-camera capture counter, starting at 0
    pub sequence: u64,

    pub payload: Bytes,

    pub capture_timecode: FrameTimecode,

    pub capture_wall_clock: DateTime<Utc>,
}

impl TaggedFrame {
    /// Milliseconds since the Unix epoch of the capture wall clock
    pub fn wall_clock_ms(&self) -> i64 {
        self.capture_wall_clock.timestamp_millis()
    }
}
