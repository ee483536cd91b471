//! Capture, tag and transmit
//!
//! A capture thread pulls frames from the camera at its native rate, tags
//! them and pushes them into a small drop-oldest queue. A separate async
//! task drains the queue into the transport, so a slow transport loses the
//! oldest unsent frames instead of stalling capture.

use super::traits::FrameSource;
use crate::frame::TaggedFrame;
use crate::timecode::FrameTagger;
use crate::transport::StreamSender;
use crate::utils::queue::DropOldestQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Totals reported when a transmitter stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmitterStats {
    pub frames_captured: u64,
    pub frames_sent: u64,

    /// Oldest unsent frames dropped under backpressure
    pub frames_dropped: u64,
    pub send_errors: u64,
    pub unsynchronized: u64,
}

pub struct Transmitter {
    /// Whether capture should continue
    running: Arc<AtomicBool>,
    tagger: Arc<FrameTagger>,
    queue: Arc<DropOldestQueue<TaggedFrame>>,
    counters: Arc<Counters>,

    /// Capture thread handle
    capture_thread: Option<std::thread::JoinHandle<()>>,
    send_task: Option<JoinHandle<()>>,
}

impl Transmitter {
    /// Start capturing from `source` and sending through `sender`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        tagger: Arc<FrameTagger>,
        sender: Arc<dyn StreamSender>,
        queue_depth: usize,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let queue = Arc::new(DropOldestQueue::new(queue_depth));
        let counters = Arc::new(Counters::default());

        tracing::info!(
            "Starting transmitter {} from {} ({}x{} @ {}fps)",
            tagger.camera(),
            source.info().name,
            source.info().resolution.width,
            source.info().resolution.height,
            source.info().fps
        );

        let capture_thread = {
            let running = running.clone();
            let tagger = tagger.clone();
            let queue = queue.clone();
            let counters = counters.clone();
            std::thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match source.next_frame() {
                        Ok(Some(frame)) => {
                            let tagged = tagger.tag(frame);
                            counters.captured.fetch_add(1, Ordering::Relaxed);
                            if let Ok(Some(dropped)) = queue.push(tagged) {
                                tracing::debug!(
                                    "{}: transport backlog, dropped frame {}",
                                    tagger.camera(),
                                    dropped.sequence
                                );
                            }
                        }
                        Ok(None) => {
                            tracing::info!("{}: capture source ended", tagger.camera());
                            break;
                        }
                        Err(e) => {
                            tracing::error!("{}: capture failed: {}", tagger.camera(), e);
                            break;
                        }
                    }
                }
                queue.close();
            })
        };

        let send_task = {
            let queue = queue.clone();
            let counters = counters.clone();
            tokio::spawn(async move {
                while let Some(frame) = queue.pop().await {
                    match sender.send(frame).await {
                        Ok(()) => {
                            counters.sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            if counters.send_errors.fetch_add(1, Ordering::Relaxed) == 0 {
                                tracing::warn!("{}: send failed: {}", sender.stream_name(), e);
                            }
                        }
                    }
                }
            })
        };

        Self {
            running,
            tagger,
            queue,
            counters,
            capture_thread: Some(capture_thread),
            send_task: Some(send_task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.queue.is_closed()
    }

    pub fn stats(&self) -> TransmitterStats {
        TransmitterStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_dropped: self.queue.evicted(),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
            unsynchronized: self.tagger.unsynchronized_count(),
        }
    }

    /// Wait for the source to run out of frames, then flush the backlog
    pub async fn finished(mut self) -> TransmitterStats {
        self.join().await;
        self.stats()
    }

    /// Stop capturing and flush frames already queued
    pub async fn stop(mut self) -> TransmitterStats {
        self.running.store(false, Ordering::Relaxed);
        self.join().await;
        let stats = self.stats();
        tracing::info!(
            "Transmitter {} stopped: {} captured, {} sent, {} dropped",
            self.tagger.camera(),
            stats.frames_captured,
            stats.frames_sent,
            stats.frames_dropped
        );
        stats
    }

    async fn join(&mut self) {
        if let Some(thread) = self.capture_thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::error!("{}: capture thread panicked", self.tagger.camera());
            }
        }
        // the capture thread closes the queue on exit
        self.queue.close();
        if let Some(task) = self.send_task.take() {
            if let Err(e) = task.await {
                tracing::error!("{}: send task failed: {}", self.tagger.camera(), e);
            }
        }
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.queue.close();
    }
}
