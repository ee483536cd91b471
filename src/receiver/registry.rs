//! Source registry
//!
//! Owns the expected camera set. Each registered name gets a stream source
//! and its own receive task; readiness waits run per source in parallel.

use super::source::{LivenessConfig, SourceState, SourceStatus, StreamSource};
use crate::frame::CameraIdentity;
use crate::transport::StreamReceiver;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Back-off between attach attempts for a source that is not yet published
const ATTACH_RETRY: Duration = Duration::from_millis(500);

/// Outcome of waiting for the expected sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub attached: Vec<CameraIdentity>,
    pub timed_out: Vec<CameraIdentity>,
}

impl ReadinessReport {
    pub fn is_complete(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// A source whose state changed during a liveness sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub name: CameraIdentity,
    pub from: SourceState,
    pub to: SourceState,
}

struct Entry {
    source: Arc<StreamSource>,
    receive_task: JoinHandle<()>,
}

pub struct SourceRegistry {
    transport: Arc<dyn StreamReceiver>,
    config: LivenessConfig,
    sources: RwLock<BTreeMap<CameraIdentity, Entry>>,
}

impl SourceRegistry {
    pub fn new(transport: Arc<dyn StreamReceiver>, config: LivenessConfig) -> Self {
        Self {
            transport,
            config,
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register expected camera names and start attaching to them.
    ///
    /// Names already registered and not detached are left alone; detached
    /// names get a fresh source. Must be called within a tokio runtime.
    pub fn register<I, N>(&self, names: I) -> Vec<Arc<StreamSource>>
    where
        I: IntoIterator<Item = N>,
        N: Into<CameraIdentity>,
    {
        let mut sources = self.sources.write();
        let mut registered = Vec::new();

        for name in names {
            let name = name.into();
            if let Some(entry) = sources.get(&name) {
                if entry.source.state() != SourceState::Detached {
                    registered.push(entry.source.clone());
                    continue;
                }
                entry.receive_task.abort();
            }

            tracing::info!("Registering expected camera {}", name);
            let source = Arc::new(StreamSource::new(name.clone(), self.config.clone()));
            let receive_task = tokio::spawn(receive_loop(self.transport.clone(), source.clone()));
            sources.insert(
                name,
                Entry {
                    source: source.clone(),
                    receive_task,
                },
            );
            registered.push(source);
        }

        registered
    }

    /// Detach a source and stop receiving it; other sources are unaffected
    pub fn remove(&self, name: &CameraIdentity) -> bool {
        match self.sources.read().get(name) {
            Some(entry) => {
                entry.source.detach();
                entry.receive_task.abort();
                true
            }
            None => false,
        }
    }

    /// Wait for every non-detached source to attach, each bounded by `per_source_timeout`
    pub async fn wait_for_ready(&self, per_source_timeout: Duration) -> ReadinessReport {
        let pending: Vec<Arc<StreamSource>> = self
            .sources()
            .into_iter()
            .filter(|s| s.state() != SourceState::Detached)
            .collect();

        let results = futures::future::join_all(pending.iter().map(|source| async move {
            let attached = tokio::time::timeout(per_source_timeout, source.wait_until_attached())
                .await
                .unwrap_or(false);
            (source.name().clone(), attached)
        }))
        .await;

        let mut report = ReadinessReport::default();
        for (name, attached) in results {
            if attached {
                report.attached.push(name);
            } else {
                tracing::warn!("Source {} did not attach within {:?}", name, per_source_timeout);
                report.timed_out.push(name);
            }
        }
        report
    }

    /// Run liveness checks on all sources as of `now`.
    ///
    /// The registry lock is only held to snapshot the source list.
    pub fn sweep(&self, now: Instant) -> Vec<StateChange> {
        let mut changes = Vec::new();
        for source in self.sources() {
            let from = source.state();
            let to = source.liveness_check(now);
            if from != to {
                changes.push(StateChange {
                    name: source.name().clone(),
                    from,
                    to,
                });
            }
        }
        changes
    }

    /// Sweep on a fixed period until the returned task is aborted
    pub fn spawn_liveness_monitor(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep(Instant::now());
            }
        })
    }

    pub fn get(&self, name: &CameraIdentity) -> Option<Arc<StreamSource>> {
        self.sources.read().get(name).map(|e| e.source.clone())
    }

    /// All registered sources, ordered by name
    pub fn sources(&self) -> Vec<Arc<StreamSource>> {
        self.sources.read().values().map(|e| e.source.clone()).collect()
    }

    pub fn attached_sources(&self) -> Vec<Arc<StreamSource>> {
        self.sources()
            .into_iter()
            .filter(|s| s.state() == SourceState::Attached)
            .collect()
    }

    pub fn status(&self) -> Vec<SourceStatus> {
        self.sources().iter().map(|s| s.status()).collect()
    }

    /// Detach everything and stop all receive tasks
    pub fn shutdown(&self) {
        for entry in self.sources.read().values() {
            entry.source.detach();
            entry.receive_task.abort();
        }
    }
}

impl Drop for SourceRegistry {
    fn drop(&mut self) {
        for entry in self.sources.get_mut().values() {
            entry.receive_task.abort();
        }
    }
}

async fn receive_loop(transport: Arc<dyn StreamReceiver>, source: Arc<StreamSource>) {
    while source.state() != SourceState::Detached {
        match transport.attach(source.name()).await {
            Ok(mut stream) => {
                tracing::info!("{}: stream found", source.name());
                while let Some(frame) = stream.next().await {
                    if frame.camera != *source.name() {
                        tracing::warn!(
                            "{}: ignoring frame advertised as {}",
                            source.name(),
                            frame.camera
                        );
                        continue;
                    }
                    if source.on_frame_received(frame, Instant::now()) == SourceState::Detached {
                        return;
                    }
                }
                tracing::warn!("{}: stream ended", source.name());
            }
            Err(e) => tracing::debug!("{}: attach failed: {}", source.name(), e),
        }
        tokio::time::sleep(ATTACH_RETRY).await;
    }
}
