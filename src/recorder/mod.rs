//! Recording system module
//!
//! - `RecordingController` runs the session state machine
//! - `SinkHandle` writes one camera's frames for one session
//! - `MediaSink`/`SinkFactory` are the container seam, with ffmpeg and raw implementations

pub mod coordinator;
pub mod error;
pub mod ffmpeg;
pub mod manifest;
pub mod raw;
pub mod sink;
pub mod state;
pub mod writer;

pub use coordinator::{RecorderStatus, RecordingController, SinkStatus};
pub use error::{RecorderError, RecorderResult};
pub use ffmpeg::{ffmpeg_available, FfmpegSinkFactory};
pub use manifest::{read_manifest, SessionManifest};
pub use raw::{read_raw_container, RawSinkFactory};
pub use sink::{MediaSink, SinkError, SinkFactory};
pub use state::{RecordingEvent, RecordingResult, RecordingSession, RecordingState};
pub use writer::{FinalStats, SinkHandle};

use crate::config::{RecorderConfig, SinkKind};
use std::sync::Arc;

/// Build the sink factory selected by the configuration
pub fn sink_factory(config: &RecorderConfig) -> Arc<dyn SinkFactory> {
    match config.sink {
        SinkKind::Ffmpeg => Arc::new(FfmpegSinkFactory::from(config)),
        SinkKind::Raw => Arc::new(RawSinkFactory),
    }
}
