//! Timecode value types
//!
//! Decodes the broadcast `hh:mm:ss:ff:sf` string into a value that can be
//! ordered and converted to subframe ticks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Subframes carried per frame by the broadcast (`sf` is 0..=3)
pub const SUBFRAMES_PER_FRAME: u64 = 4;

/// Width of each colon-delimited field, in order
const FIELD_WIDTHS: [usize; 5] = [2, 2, 2, 2, 1];

/// Timecode decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimecodeError {
    #[error("Malformed timecode: {0:?}")]
    MalformedTimecode(String),
}

/// A decoded broadcast timecode.
///
/// Field order matches significance, so the derived ordering is the same as
/// ordering by [`Timecode::ticks`] for any fps the frame field is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frame: u8,
    pub subframe: u8,
}

impl Timecode {
    /// The zero timecode, `00:00:00:00:0`
    pub const ZERO: Timecode = Timecode {
        hours: 0,
        minutes: 0,
        seconds: 0,
        frame: 0,
        subframe: 0,
    };

    pub fn new(hours: u8, minutes: u8, seconds: u8, frame: u8, subframe: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frame,
            subframe,
        }
    }

    /// Total subframe ticks since midnight at the given nominal fps
    pub fn ticks(&self, fps: u32) -> u64 {
        let seconds = (self.hours as u64 * 60 + self.minutes as u64) * 60 + self.seconds as u64;
        (seconds * fps as u64 + self.frame as u64) * SUBFRAMES_PER_FRAME + self.subframe as u64
    }

    /// Check the frame field against the nominal fps of the broadcast
    pub fn validate_for_fps(&self, fps: u32) -> Result<(), TimecodeError> {
        if (self.frame as u32) < fps {
            Ok(())
        } else {
            Err(TimecodeError::MalformedTimecode(format!(
                "{self} (frame {} >= {fps} fps)",
                self.frame
            )))
        }
    }
}

impl FromStr for Timecode {
    type Err = TimecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimecodeError::MalformedTimecode(s.to_string());

        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != FIELD_WIDTHS.len() {
            return Err(malformed());
        }

        let mut values = [0u8; 5];
        for ((field, width), value) in fields.iter().zip(FIELD_WIDTHS).zip(values.iter_mut()) {
            if field.len() != width || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            *value = field.parse().map_err(|_| malformed())?;
        }

        let [hours, minutes, seconds, frame, subframe] = values;
        if hours >= 24 || minutes >= 60 || seconds >= 60 || subframe as u64 >= SUBFRAMES_PER_FRAME {
            return Err(malformed());
        }

        Ok(Self::new(hours, minutes, seconds, frame, subframe))
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}:{}",
            self.hours, self.minutes, self.seconds, self.frame, self.subframe
        )
    }
}

impl TryFrom<String> for Timecode {
    type Error = TimecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timecode> for String {
    fn from(tc: Timecode) -> Self {
        tc.to_string()
    }
}

/// Timecode attached to a captured frame.
///
/// `Unsynchronized` marks frames captured while the clock had no fresh
/// reading. It is never equal to a genuine `00:00:00:00:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTimecode {
    Synced(Timecode),
    Unsynchronized,
}

impl FrameTimecode {
    pub fn timecode(&self) -> Option<Timecode> {
        match self {
            FrameTimecode::Synced(tc) => Some(*tc),
            FrameTimecode::Unsynchronized => None,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self, FrameTimecode::Synced(_))
    }
}

impl fmt::Display for FrameTimecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameTimecode::Synced(tc) => write!(f, "{tc}"),
            FrameTimecode::Unsynchronized => f.write_str("--:--:--:--:-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(s: &str) -> Timecode {
        let tc: Timecode = s.parse().unwrap_or_else(|e| panic!("{s:?} rejected: {e}"));
        assert_eq!(tc.to_string(), s);
        tc
    }

    #[test]
    fn test_round_trip_each_field_over_its_range() {
        // upper bounds are exclusive; the frame field accepts any two digits
        let ranges: [u8; 5] = [24, 60, 60, 100, 4];
        for (field, &range) in ranges.iter().enumerate() {
            for others in [[0u8; 5], [23, 59, 59, 99, 3]] {
                for value in 0..range {
                    let mut v = others;
                    v[field] = value;
                    let s = format!("{:02}:{:02}:{:02}:{:02}:{}", v[0], v[1], v[2], v[3], v[4]);
                    assert_eq!(assert_round_trip(&s), Timecode::new(v[0], v[1], v[2], v[3], v[4]));
                }
            }
        }
    }

    #[test]
    fn test_string_order_matches_tick_order() {
        const FPS: u8 = 30;
        let mut strings = Vec::new();
        // every minute of the day at the second and frame boundaries
        for h in 0..24u8 {
            for m in 0..60u8 {
                for s in [0u8, 59] {
                    for f in [0u8, FPS - 1] {
                        for sf in 0..4u8 {
                            strings.push(format!("{h:02}:{m:02}:{s:02}:{f:02}:{sf}"));
                        }
                    }
                }
            }
        }
        // every subframe of the last minute
        for s in 0..60u8 {
            for f in 0..FPS {
                for sf in 0..4u8 {
                    strings.push(format!("23:59:{s:02}:{f:02}:{sf}"));
                }
            }
        }
        strings.sort();
        strings.dedup();

        let parsed: Vec<Timecode> = strings.iter().map(|s| assert_round_trip(s)).collect();
        for (pair, names) in parsed.windows(2).zip(strings.windows(2)) {
            assert!(
                pair[0].ticks(FPS as u32) < pair[1].ticks(FPS as u32),
                "{} should precede {}",
                names[0],
                names[1]
            );
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_parse_fields() {
        let tc: Timecode = "10:20:30:15:2".parse().unwrap();
        assert_eq!(tc, Timecode::new(10, 20, 30, 15, 2));
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        for s in [
            "",
            "00:00:00:00",
            "00:00:00:00:0:0",
            "0:00:00:00:0",
            "00:00:00:00:00",
            "aa:00:00:00:0",
            "00:00:00:00:4",
            "24:00:00:00:0",
            "00:60:00:00:0",
            "00:00:60:00:0",
            "+1:00:00:00:0",
            " 00:00:00:00:0",
        ] {
            assert!(
                matches!(s.parse::<Timecode>(), Err(TimecodeError::MalformedTimecode(_))),
                "expected {s:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_ticks() {
        let tc = Timecode::new(0, 0, 1, 2, 3);
        // (1 * 30 + 2) * 4 + 3
        assert_eq!(tc.ticks(30), 131);
        assert_eq!(Timecode::ZERO.ticks(30), 0);
        assert_eq!(Timecode::new(1, 0, 0, 0, 0).ticks(25), 3600 * 25 * 4);
    }

    #[test]
    fn test_ordering_matches_ticks() {
        let a = Timecode::new(0, 0, 0, 29, 3);
        let b = Timecode::new(0, 0, 1, 0, 0);
        assert!(a < b);
        assert!(a.ticks(30) < b.ticks(30));
    }

    #[test]
    fn test_validate_for_fps() {
        let tc = Timecode::new(0, 0, 0, 29, 0);
        assert!(tc.validate_for_fps(30).is_ok());
        assert!(tc.validate_for_fps(25).is_err());
    }

    #[test]
    fn test_unsynchronized_is_distinct_from_zero() {
        let zero = FrameTimecode::Synced(Timecode::ZERO);
        assert_ne!(zero, FrameTimecode::Unsynchronized);
        assert_eq!(FrameTimecode::Unsynchronized.timecode(), None);
        assert_eq!(FrameTimecode::Unsynchronized.to_string(), "--:--:--:--:-");
    }

    #[test]
    fn test_serde_as_string() {
        let tc = Timecode::new(1, 2, 3, 4, 1);
        let json = serde_json::to_string(&tc).unwrap();
        assert_eq!(json, "\"01:02:03:04:1\"");
        let back: Timecode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tc);
    }
}
