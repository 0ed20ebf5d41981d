use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::EngineError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Time of day with minute resolution, stored as minute-of-day `0..1440`.
///
/// The textual form is always zero-padded `HH:MM`, so ordering by value and
/// ordering by the string agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

impl ClockTime {
    pub const MIDNIGHT: ClockTime = ClockTime(0);

    pub fn from_minute_of_day(minute: u32) -> Option<Self> {
        (minute < MINUTES_PER_DAY).then_some(Self(minute as u16))
    }

    /// Strict `HH:MM`: exactly two digits on each side of the colon.
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidTimeFormat(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let two_digits = |p: &str| p.len() == 2 && p.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(h) || !two_digits(m) {
            return Err(invalid());
        }
        let hours: u16 = h.parse().map_err(|_| invalid())?;
        let minutes: u16 = m.parse().map_err(|_| invalid())?;
        if hours > 23 || minutes > 59 {
            return Err(invalid());
        }
        Ok(Self(hours * 60 + minutes))
    }

    pub fn minute_of_day(self) -> u32 {
        self.0 as u32
    }

    pub fn hours(self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minutes(self) -> u8 {
        (self.0 % 60) as u8
    }

    /// Add (or with a negative value, subtract) minutes on a 24-hour clock.
    pub fn add_minutes(self, minutes: i64) -> Self {
        let total = (self.0 as i64 + minutes).rem_euclid(MINUTES_PER_DAY as i64);
        Self(total as u16)
    }

    /// Same-day addition: `None` once the result reaches or passes midnight.
    pub fn checked_add_minutes(self, minutes: u32) -> Option<Self> {
        Self::from_minute_of_day(self.minute_of_day().checked_add(minutes)?)
    }

    pub fn to_naive_time(self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(self.hours() as u32, self.minutes() as u32, 0)
            .unwrap_or(chrono::NaiveTime::MIN)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours(), self.minutes())
    }
}

impl FromStr for ClockTime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse `time` and shift it by `minutes`, wrapping around midnight.
pub fn add_minutes(time: &str, minutes: i64) -> Result<ClockTime, EngineError> {
    Ok(ClockTime::parse(time)?.add_minutes(minutes))
}

/// Evenly spaced start times `start, start + step, ...` strictly before `end`.
///
/// Lazy and `Clone`, so a sequence can be replayed from the beginning by
/// cloning it before iterating.
pub fn generate_slots(
    start: ClockTime,
    end: ClockTime,
    step_minutes: i32,
) -> Result<SlotSteps, EngineError> {
    if step_minutes <= 0 {
        return Err(EngineError::InvalidStep(step_minutes));
    }
    Ok(SlotSteps {
        next: start.minute_of_day(),
        end: end.minute_of_day(),
        step: step_minutes as u32,
    })
}

#[derive(Debug, Clone)]
pub struct SlotSteps {
    next: u32,
    end: u32,
    step: u32,
}

impl Iterator for SlotSteps {
    type Item = ClockTime;

    fn next(&mut self) -> Option<ClockTime> {
        if self.next >= self.end {
            return None;
        }
        let current = ClockTime(self.next as u16);
        self.next = self.next.saturating_add(self.step);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.next >= self.end {
            0
        } else {
            (self.end - self.next).div_ceil(self.step) as usize
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SlotSteps {}
impl FusedIterator for SlotSteps {}
