//! Receive side
//!
//! Tracks each expected remote camera from discovery through detachment.

pub mod registry;
pub mod source;

pub use registry::{ReadinessReport, SourceRegistry, StateChange};
pub use source::{LivenessConfig, SourceState, SourceStatus, StreamSource};
