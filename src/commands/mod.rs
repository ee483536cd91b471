//! Operator command handlers
//!
//! The surface an outer control layer (or the CLI) drives: registering
//! cameras, starting and stopping sessions, and reading status.

pub mod recording;
pub mod timecode;

pub use recording::{ReceiverStatus, RecorderState};
pub use timecode::TimecodeStatus;
