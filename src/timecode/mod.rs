//! Timecode ingestion and frame tagging
//!
//! - Timecode / FrameTimecode value types
//! - TimecodeClock holding the latest broadcast reading
//! - FrameTagger binding that reading to captured frames
//! - Listener task decoding the OSC broadcast

pub mod clock;
pub mod listener;
pub mod tagger;
pub mod types;

pub use clock::{ClockConfig, ClockEvent, ClockSnapshot, ClockStats, MessageOutcome, TimecodeClock};
pub use listener::{spawn_listener, ListenerConfig, ListenerHandle};
pub use tagger::FrameTagger;
pub use types::{FrameTimecode, Timecode, TimecodeError, SUBFRAMES_PER_FRAME};
