//! multicam-sync - timecode-synchronized multi-camera capture and recording.
//!
//! Capture nodes tag every frame with the house timecode received over OSC
//! and publish it under the camera's name. The receiver tracks each expected
//! camera and records the attached ones into one session directory per
//! start/stop cycle.

pub mod capture;
pub mod commands;
pub mod config;
pub mod frame;
pub mod receiver;
pub mod recorder;
pub mod timecode;
pub mod transport;
pub mod utils;

pub use frame::{CameraIdentity, CapturedFrame, TaggedFrame};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "multicam_sync=debug,info";

/// Initialize tracing/logging. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
