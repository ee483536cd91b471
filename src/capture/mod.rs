//! Capture side
//!
//! Camera acquisition, frame tagging and hand-off to the transport.

pub mod local;
pub mod synthetic;
pub mod traits;
pub mod transmitter;

pub use local::LocalSaver;
pub use synthetic::TestPatternSource;
pub use traits::{CameraInfo, CaptureError, FrameSource, Resolution};
pub use transmitter::{Transmitter, TransmitterStats};
