//! Timecode commands

use crate::timecode::{ClockStats, TimecodeClock};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimecodeStatus {
    /// Current reading, `None` before the first message
    pub timecode: Option<String>,
    pub age_ms: Option<f64>,
    pub synchronized: bool,
    pub stats: ClockStats,
}

pub fn get_timecode(clock: &TimecodeClock) -> TimecodeStatus {
    let snapshot = clock.current_value();
    let received = snapshot.age_ms.is_finite();
    let threshold_ms = clock.config().staleness_threshold.as_secs_f64() * 1000.0;
    TimecodeStatus {
        timecode: received.then(|| snapshot.timecode.to_string()),
        age_ms: received.then_some(snapshot.age_ms),
        synchronized: received && snapshot.age_ms <= threshold_ms,
        stats: clock.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timecode::ClockConfig;

    #[test]
    fn test_status_before_and_after_first_message() {
        let clock = TimecodeClock::new(ClockConfig::default());
        let status = get_timecode(&clock);
        assert!(status.timecode.is_none());
        assert!(!status.synchronized);

        clock.on_message("01:00:00:10:2").unwrap();
        let status = get_timecode(&clock);
        assert_eq!(status.timecode.as_deref(), Some("01:00:00:10:2"));
        assert!(status.synchronized);
        assert_eq!(status.stats.accepted, 1);
    }
}
