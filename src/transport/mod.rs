//! Video transport seam
//!
//! The streaming SDK that moves frames between nodes sits behind two traits:
//! a sender bound to one stream name and a receiver that attaches to a
//! stream by name. `LocalTransport` implements both in-process.

pub mod local;

use crate::frame::{CameraIdentity, TaggedFrame};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use local::{LocalPublisher, LocalTransport};

/// Frames arriving from one attached stream, in transport order
pub type FrameStream = BoxStream<'static, TaggedFrame>;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No publisher found for stream: {0}")]
    SourceNotFound(CameraIdentity),

    #[error("Stream closed: {0}")]
    Closed(CameraIdentity),

    #[error("Send failed: {0}")]
    Send(String),
}

/// Publishes tagged frames under a human-readable stream name
#[async_trait]
pub trait StreamSender: Send + Sync {
    fn stream_name(&self) -> &CameraIdentity;

    /// Hand one frame to the transport; delivery is best-effort
    async fn send(&self, frame: TaggedFrame) -> Result<(), TransportError>;
}

/// Attaches to remote streams by name
#[async_trait]
pub trait StreamReceiver: Send + Sync {
    /// Find the publisher for `name` and start receiving its frames.
    ///
    /// Fails with `SourceNotFound` when no matching publisher shows up.
    async fn attach(&self, name: &CameraIdentity) -> Result<FrameStream, TransportError>;
}
