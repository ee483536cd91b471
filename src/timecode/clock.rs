//! Timecode clock
//!
//! Holds the most recent broadcast timecode. The reading is replaced as a
//! whole under a lock, so readers always observe a complete value.

use super::types::{Timecode, TimecodeError, SUBFRAMES_PER_FRAME};
use crate::config::TimecodeConfig;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Clock parameters
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Nominal frame rate of the broadcast
    pub fps: u32,

    /// Readings older than this are treated as not synchronized
    pub staleness_threshold: Duration,

    /// Signed correction added to the age of every reading
    pub offset_ms: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::from(&TimecodeConfig::default())
    }
}

impl From<&TimecodeConfig> for ClockConfig {
    fn from(config: &TimecodeConfig) -> Self {
        Self {
            fps: config.fps,
            staleness_threshold: config.staleness_threshold(),
            offset_ms: config.offset_ms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    timecode: Timecode,
    ticks: u64,
    received_at: Instant,
}

/// Current clock value and how old it is.
///
/// `age_ms` is infinite until the first message arrives; `timecode` is then
/// [`Timecode::ZERO`] and must not be used as a real value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    pub timecode: Timecode,
    pub age_ms: f64,
}

impl ClockSnapshot {
    pub fn is_synchronized(&self) -> bool {
        self.age_ms.is_finite()
    }
}

/// Events emitted by the clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockEvent {
    /// A value more than one frame earlier than the previous one was accepted
    Discontinuity { previous: Timecode, current: Timecode },
}

/// What happened to a successfully parsed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Accepted(Timecode),
    /// Accepted, but jumped backwards (wraparound or source reset)
    Discontinuity { previous: Timecode, current: Timecode },
    /// Up to one frame behind the current value; treated as a late packet and dropped
    Reordered(Timecode),
}

/// Message counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockStats {
    pub accepted: u64,
    pub malformed: u64,
    pub reordered: u64,
    pub discontinuities: u64,
}

/// Shared timecode clock fed by the listener and read by frame taggers
pub struct TimecodeClock {
    config: ClockConfig,
    current: RwLock<Option<Reading>>,
    stats: Mutex<ClockStats>,
    event_tx: broadcast::Sender<ClockEvent>,
}

impl TimecodeClock {
    pub fn new(config: ClockConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            current: RwLock::new(None),
            stats: Mutex::new(ClockStats::default()),
            event_tx,
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// Subscribe to discontinuity events
    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.event_tx.subscribe()
    }

    pub fn stats(&self) -> ClockStats {
        *self.stats.lock()
    }

    /// Feed one raw broadcast payload
    pub fn on_message(&self, raw: &str) -> Result<MessageOutcome, TimecodeError> {
        self.on_message_at(raw, Instant::now())
    }

    /// Feed one raw broadcast payload received at `now`.
    ///
    /// Malformed payloads leave the clock untouched.
    pub fn on_message_at(&self, raw: &str, now: Instant) -> Result<MessageOutcome, TimecodeError> {
        let timecode = match raw
            .parse::<Timecode>()
            .and_then(|tc| tc.validate_for_fps(self.config.fps).map(|_| tc))
        {
            Ok(tc) => tc,
            Err(e) => {
                self.stats.lock().malformed += 1;
                tracing::debug!("Discarding timecode message: {}", e);
                return Err(e);
            }
        };
        let ticks = timecode.ticks(self.config.fps);

        let mut current = self.current.write();
        let outcome = match *current {
            Some(previous) if ticks < previous.ticks => {
                if previous.ticks - ticks <= SUBFRAMES_PER_FRAME {
                    self.stats.lock().reordered += 1;
                    return Ok(MessageOutcome::Reordered(timecode));
                }
                MessageOutcome::Discontinuity {
                    previous: previous.timecode,
                    current: timecode,
                }
            }
            _ => MessageOutcome::Accepted(timecode),
        };

        *current = Some(Reading {
            timecode,
            ticks,
            received_at: now,
        });
        drop(current);

        let mut stats = self.stats.lock();
        stats.accepted += 1;
        if let MessageOutcome::Discontinuity { previous, current } = outcome {
            stats.discontinuities += 1;
            drop(stats);
            tracing::warn!("Timecode discontinuity: {} -> {}", previous, current);
            let _ = self
                .event_tx
                .send(ClockEvent::Discontinuity { previous, current });
        }

        Ok(outcome)
    }

    /// Snapshot of the clock as seen right now
    pub fn current_value(&self) -> ClockSnapshot {
        self.snapshot_at(Instant::now())
    }

    /// Snapshot of the clock aged relative to `at`, with the offset applied
    pub fn snapshot_at(&self, at: Instant) -> ClockSnapshot {
        let reading = *self.current.read();
        match reading {
            None => ClockSnapshot {
                timecode: Timecode::ZERO,
                age_ms: f64::INFINITY,
            },
            Some(reading) => {
                let raw_age = at.saturating_duration_since(reading.received_at);
                ClockSnapshot {
                    timecode: reading.timecode,
                    age_ms: raw_age.as_secs_f64() * 1000.0 + self.config.offset_ms as f64,
                }
            }
        }
    }
}

impl Default for TimecodeClock {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> TimecodeClock {
        TimecodeClock::new(ClockConfig {
            fps: 30,
            staleness_threshold: Duration::from_millis(200),
            offset_ms: 0,
        })
    }

    #[test]
    fn test_unsynchronized_before_first_message() {
        let clock = clock();
        let snapshot = clock.current_value();
        assert_eq!(snapshot.timecode, Timecode::ZERO);
        assert!(snapshot.age_ms.is_infinite());
        assert!(!snapshot.is_synchronized());
    }

    #[test]
    fn test_accepts_and_ages() {
        let clock = clock();
        let t0 = Instant::now();
        let outcome = clock.on_message_at("01:00:00:10:2", t0).unwrap();
        assert_eq!(outcome, MessageOutcome::Accepted(Timecode::new(1, 0, 0, 10, 2)));

        let snapshot = clock.snapshot_at(t0 + Duration::from_millis(40));
        assert_eq!(snapshot.timecode, Timecode::new(1, 0, 0, 10, 2));
        assert!((snapshot.age_ms - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_does_not_mutate() {
        let clock = clock();
        let t0 = Instant::now();
        clock.on_message_at("00:00:01:00:0", t0).unwrap();

        assert!(clock.on_message_at("garbage", t0 + Duration::from_millis(10)).is_err());
        // frame 30 is out of range at 30 fps
        assert!(clock.on_message_at("00:00:02:30:0", t0).is_err());

        let snapshot = clock.snapshot_at(t0 + Duration::from_millis(20));
        assert_eq!(snapshot.timecode, Timecode::new(0, 0, 1, 0, 0));
        assert!((snapshot.age_ms - 20.0).abs() < 1e-6);
        assert_eq!(clock.stats().malformed, 2);
        assert_eq!(clock.stats().accepted, 1);
    }

    #[test]
    fn test_discontinuity_is_reported_and_accepted() {
        let clock = clock();
        let mut events = clock.subscribe();
        let t0 = Instant::now();

        clock.on_message_at("23:59:59:29:3", t0).unwrap();
        let outcome = clock.on_message_at("00:00:00:00:0", t0).unwrap();
        assert!(matches!(outcome, MessageOutcome::Discontinuity { .. }));
        assert_eq!(clock.snapshot_at(t0).timecode, Timecode::ZERO);
        assert!(clock.snapshot_at(t0).is_synchronized());

        assert_eq!(
            events.try_recv().unwrap(),
            ClockEvent::Discontinuity {
                previous: Timecode::new(23, 59, 59, 29, 3),
                current: Timecode::ZERO,
            }
        );
        assert_eq!(clock.stats().discontinuities, 1);
    }

    #[test]
    fn test_small_regression_is_dropped_as_reordered() {
        let clock = clock();
        let t0 = Instant::now();
        clock.on_message_at("00:00:01:05:2", t0).unwrap();

        // three subframes back
        let outcome = clock
            .on_message_at("00:00:01:04:3", t0 + Duration::from_millis(5))
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Reordered(Timecode::new(0, 0, 1, 4, 3)));

        let snapshot = clock.snapshot_at(t0 + Duration::from_millis(5));
        assert_eq!(snapshot.timecode, Timecode::new(0, 0, 1, 5, 2));
        assert!((snapshot.age_ms - 5.0).abs() < 1e-6);
        assert_eq!(clock.stats().reordered, 1);
    }

    #[test]
    fn test_accepted_ticks_non_decreasing_except_at_discontinuity() {
        let clock = clock();
        let mut events = clock.subscribe();
        let t0 = Instant::now();
        let sequence = [
            "00:00:00:00:0",
            "00:00:00:00:2",
            "00:00:00:00:1",
            "00:00:00:01:0",
            "00:00:00:01:0",
            "00:00:00:29:3",
            "00:00:01:00:0",
            "00:00:00:10:0",
            "00:00:00:11:0",
        ];

        let mut last_ticks = None;
        let mut flagged = 0;
        for raw in sequence {
            let outcome = clock.on_message_at(raw, t0).unwrap();
            let ticks = clock.snapshot_at(t0).timecode.ticks(30);
            match outcome {
                MessageOutcome::Discontinuity { .. } => flagged += 1,
                _ => {
                    if let Some(last) = last_ticks {
                        assert!(ticks >= last, "{raw} went backwards without a flag");
                    }
                }
            }
            last_ticks = Some(ticks);
        }

        assert_eq!(flagged, 1);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_offset_shifts_age() {
        let clock = TimecodeClock::new(ClockConfig {
            fps: 30,
            staleness_threshold: Duration::from_millis(200),
            offset_ms: -15,
        });
        let t0 = Instant::now();
        clock.on_message_at("00:00:00:00:0", t0).unwrap();
        let snapshot = clock.snapshot_at(t0 + Duration::from_millis(50));
        assert!((snapshot.age_ms - 35.0).abs() < 1e-6);
        // decoded value is untouched by the offset
        assert_eq!(snapshot.timecode, Timecode::ZERO);
    }
}
