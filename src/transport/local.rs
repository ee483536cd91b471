//! In-process loopback transport
//!
//! Publishers and subscribers meet in a shared name table. Each stream is a
//! broadcast channel, so a slow subscriber loses the oldest frames instead
//! of stalling the publisher.

use super::{FrameStream, StreamReceiver, StreamSender, TransportError};
use crate::frame::{CameraIdentity, TaggedFrame};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

type PublisherTable = Arc<RwLock<HashMap<CameraIdentity, (u64, broadcast::Sender<TaggedFrame>)>>>;

static NEXT_PUBLISHER_ID: AtomicU64 = AtomicU64::new(0);

/// Loopback transport shared by local transmitters and receivers
#[derive(Clone)]
pub struct LocalTransport {
    publishers: PublisherTable,
    capacity: usize,
    discovery_timeout: Duration,
    discovery_poll: Duration,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            publishers: Arc::new(RwLock::new(HashMap::new())),
            capacity: 64,
            discovery_timeout: Duration::from_secs(10),
            discovery_poll: Duration::from_millis(100),
        }
    }

    /// How long `attach` looks for a publisher before giving up
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Frames buffered per subscriber before the oldest are lost
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Advertise a stream. Dropping the publisher ends the stream for subscribers.
    pub fn publish(&self, name: impl Into<CameraIdentity>) -> LocalPublisher {
        let name = name.into();
        let (tx, _) = broadcast::channel(self.capacity);
        let id = NEXT_PUBLISHER_ID.fetch_add(1, Ordering::Relaxed);
        if self.publishers.write().insert(name.clone(), (id, tx.clone())).is_some() {
            tracing::warn!("Replacing existing publisher for {}", name);
        }
        tracing::info!("Publishing stream {}", name);
        LocalPublisher {
            id,
            name,
            tx,
            publishers: self.publishers.clone(),
        }
    }

    /// Names currently advertised
    pub fn advertised(&self) -> Vec<CameraIdentity> {
        let mut names: Vec<_> = self.publishers.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn find(&self, name: &CameraIdentity) -> Option<broadcast::Receiver<TaggedFrame>> {
        self.publishers.read().get(name).map(|(_, tx)| tx.subscribe())
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamReceiver for LocalTransport {
    async fn attach(&self, name: &CameraIdentity) -> Result<FrameStream, TransportError> {
        let deadline = tokio::time::Instant::now() + self.discovery_timeout;
        let rx = loop {
            if let Some(rx) = self.find(name) {
                break rx;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TransportError::SourceNotFound(name.clone()));
            }
            tokio::time::sleep(self.discovery_poll).await;
        };

        tracing::debug!("Attached to local stream {}", name);
        let name = name.clone();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let name = name.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) => return Some((frame, rx)),
                        Err(RecvError::Lagged(missed)) => {
                            tracing::debug!("{}: subscriber lagged, {} frames lost", name, missed);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Sending half of a local stream
pub struct LocalPublisher {
    id: u64,
    name: CameraIdentity,
    tx: broadcast::Sender<TaggedFrame>,
    publishers: PublisherTable,
}

#[async_trait]
impl StreamSender for LocalPublisher {
    fn stream_name(&self) -> &CameraIdentity {
        &self.name
    }

    async fn send(&self, frame: TaggedFrame) -> Result<(), TransportError> {
        // no subscribers is not an error: the frame is simply not delivered
        let _ = self.tx.send(frame);
        Ok(())
    }
}

impl Drop for LocalPublisher {
    fn drop(&mut self) {
        let mut publishers = self.publishers.write();
        if publishers.get(&self.name).is_some_and(|(id, _)| *id == self.id) {
            publishers.remove(&self.name);
        }
        tracing::info!("Stopped publishing stream {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CapturedFrame;
    use crate::timecode::FrameTimecode;
    use futures::StreamExt;

    fn frame(camera: &str, sequence: u64) -> TaggedFrame {
        let captured = CapturedFrame::now(vec![sequence as u8]);
        TaggedFrame {
            camera: camera.into(),
            sequence,
            payload: captured.payload,
            capture_timecode: FrameTimecode::Unsynchronized,
            capture_wall_clock: captured.wall_clock,
        }
    }

    #[tokio::test]
    async fn test_attach_and_receive_in_order() {
        let transport = LocalTransport::new();
        let publisher = transport.publish("CAM_A");
        let mut stream = transport.attach(&"CAM_A".into()).await.unwrap();

        for i in 0..3 {
            publisher.send(frame("CAM_A", i)).await.unwrap();
        }
        for i in 0..3 {
            assert_eq!(stream.next().await.unwrap().sequence, i);
        }
    }

    #[tokio::test]
    async fn test_attach_times_out_without_publisher() {
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_millis(50));
        let result = transport.attach(&"MISSING".into()).await;
        assert!(matches!(result, Err(TransportError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_attach_waits_for_late_publisher() {
        let transport = LocalTransport::new().with_discovery_timeout(Duration::from_secs(2));
        let attach = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.attach(&"LATE".into()).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _publisher = transport.publish("LATE");
        assert!(attach.await.unwrap());
    }

    #[tokio::test]
    async fn test_dropping_publisher_ends_stream() {
        let transport = LocalTransport::new();
        let publisher = transport.publish("CAM_A");
        let mut stream = transport.attach(&"CAM_A".into()).await.unwrap();
        drop(publisher);
        assert!(stream.next().await.is_none());
        assert!(transport.advertised().is_empty());
    }
}
