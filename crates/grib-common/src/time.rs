//! Forecast time units and intervals.

use crate::error::{RecordError, RecordResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Forecast time unit (GRIB2 code table 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Decade,
    Normal,
    Century,
    Hours3,
    Hours6,
    Hours12,
    Second,
}

impl TimeUnit {
    pub fn from_code(code: u8) -> RecordResult<Self> {
        Ok(match code {
            0 => TimeUnit::Minute,
            1 => TimeUnit::Hour,
            2 => TimeUnit::Day,
            3 => TimeUnit::Month,
            4 => TimeUnit::Year,
            5 => TimeUnit::Decade,
            6 => TimeUnit::Normal,
            7 => TimeUnit::Century,
            10 => TimeUnit::Hours3,
            11 => TimeUnit::Hours6,
            12 => TimeUnit::Hours12,
            13 => TimeUnit::Second,
            other => return Err(RecordError::UnknownTimeUnit(other)),
        })
    }

    pub fn code(&self) -> u8 {
        match self {
            TimeUnit::Minute => 0,
            TimeUnit::Hour => 1,
            TimeUnit::Day => 2,
            TimeUnit::Month => 3,
            TimeUnit::Year => 4,
            TimeUnit::Decade => 5,
            TimeUnit::Normal => 6,
            TimeUnit::Century => 7,
            TimeUnit::Hours3 => 10,
            TimeUnit::Hours6 => 11,
            TimeUnit::Hours12 => 12,
            TimeUnit::Second => 13,
        }
    }

    /// Number of base units in one of this unit (6 for `Hours6`).
    pub fn multiplier(&self) -> i32 {
        match self {
            TimeUnit::Hours3 => 3,
            TimeUnit::Hours6 => 6,
            TimeUnit::Hours12 => 12,
            TimeUnit::Decade => 10,
            TimeUnit::Normal => 30,
            TimeUnit::Century => 100,
            _ => 1,
        }
    }

    /// Name of the base unit.
    pub fn base_name(&self) -> &'static str {
        match self {
            TimeUnit::Second => "Second",
            TimeUnit::Minute => "Minute",
            TimeUnit::Hour | TimeUnit::Hours3 | TimeUnit::Hours6 | TimeUnit::Hours12 => "Hour",
            TimeUnit::Day => "Day",
            TimeUnit::Month => "Month",
            TimeUnit::Year | TimeUnit::Decade | TimeUnit::Normal | TimeUnit::Century => "Year",
        }
    }

    /// Length in seconds, for the units of fixed length.
    fn seconds(&self) -> Option<i64> {
        match self {
            TimeUnit::Second => Some(1),
            TimeUnit::Minute => Some(60),
            TimeUnit::Hour => Some(3600),
            TimeUnit::Hours3 => Some(3 * 3600),
            TimeUnit::Hours6 => Some(6 * 3600),
            TimeUnit::Hours12 => Some(12 * 3600),
            TimeUnit::Day => Some(86_400),
            _ => None,
        }
    }

    /// Length in months, for calendar units.
    fn months(&self) -> Option<i64> {
        match self {
            TimeUnit::Month => Some(1),
            TimeUnit::Year => Some(12),
            TimeUnit::Decade => Some(120),
            TimeUnit::Normal => Some(360),
            TimeUnit::Century => Some(1200),
            _ => None,
        }
    }

    /// The finest of `units`. Fixed-length units rank before calendar units.
    pub fn finest(units: impl IntoIterator<Item = TimeUnit>) -> Option<TimeUnit> {
        units.into_iter().min_by_key(|unit| match (unit.seconds(), unit.months()) {
            (Some(s), _) => (0, s),
            (None, Some(m)) => (1, m),
            (None, None) => (2, 0),
        })
    }

    /// Express `value` (in units of `self`) in units of `to`.
    ///
    /// Fails when the units are not commensurable or the result is not a
    /// whole number of `to` units.
    pub fn convert(&self, value: i32, to: TimeUnit) -> RecordResult<i32> {
        if *self == to {
            return Ok(value);
        }
        let incompatible = || RecordError::IncompatibleTimeUnit {
            from: self.to_string(),
            to: to.to_string(),
        };
        let (from_len, to_len) = match (self.seconds(), to.seconds()) {
            (Some(a), Some(b)) => (a, b),
            _ => match (self.months(), to.months()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(incompatible()),
            },
        };
        let scaled = value as i64 * from_len;
        if scaled % to_len != 0 {
            return Err(incompatible());
        }
        i32::try_from(scaled / to_len).map_err(|_| incompatible())
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.multiplier() {
            1 => write!(f, "{}", self.base_name()),
            n => write!(f, "{}_{}", n, self.base_name()),
        }
    }
}

impl TryFrom<u8> for TimeUnit {
    type Error = RecordError;

    fn try_from(code: u8) -> RecordResult<Self> {
        TimeUnit::from_code(code)
    }
}

impl From<TimeUnit> for u8 {
    fn from(unit: TimeUnit) -> Self {
        unit.code()
    }
}

/// A forecast time interval `[start, end]` in some time unit.
///
/// Point forecasts are represented as degenerate intervals with
/// `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: i32,
    pub end: i32,
}

impl TimeInterval {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn point(offset: i32) -> Self {
        Self { start: offset, end: offset }
    }

    /// Widened so extreme offsets cannot overflow.
    pub fn length(&self) -> i64 {
        i64::from(self.end) - i64::from(self.start)
    }

    /// True for the degenerate `[0, 0]` interval some encoders emit.
    pub fn is_zero(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    pub fn convert(&self, from: TimeUnit, to: TimeUnit) -> RecordResult<Self> {
        Ok(Self {
            start: from.convert(self.start, to)?,
            end: from.convert(self.end, to)?,
        })
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "({},{})", self.start, self.end)
        }
    }
}

/// Milliseconds since the Unix epoch, the resolution used for all file
/// modification times in the index.
pub fn system_time_millis(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_codes() {
        for code in [0u8, 1, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13] {
            let unit = TimeUnit::from_code(code).unwrap();
            assert_eq!(unit.code(), code);
        }
        assert_eq!(TimeUnit::from_code(8), Err(RecordError::UnknownTimeUnit(8)));
    }

    #[test]
    fn test_time_unit_display() {
        assert_eq!(TimeUnit::Hour.to_string(), "Hour");
        assert_eq!(TimeUnit::Hours6.to_string(), "6_Hour");
    }

    #[test]
    fn test_convert_between_fixed_units() {
        assert_eq!(TimeUnit::Hours6.convert(2, TimeUnit::Hour), Ok(12));
        assert_eq!(TimeUnit::Hour.convert(12, TimeUnit::Hours6), Ok(2));
        assert_eq!(TimeUnit::Day.convert(1, TimeUnit::Minute), Ok(1440));
        assert!(TimeUnit::Hour.convert(5, TimeUnit::Hours6).is_err());
    }

    #[test]
    fn test_convert_calendar_units() {
        assert_eq!(TimeUnit::Year.convert(2, TimeUnit::Month), Ok(24));
        assert!(TimeUnit::Month.convert(1, TimeUnit::Day).is_err());
    }

    #[test]
    fn test_finest_unit() {
        let units = [TimeUnit::Hours6, TimeUnit::Month, TimeUnit::Minute, TimeUnit::Hour];
        assert_eq!(TimeUnit::finest(units), Some(TimeUnit::Minute));
        assert_eq!(TimeUnit::finest([TimeUnit::Year, TimeUnit::Month]), Some(TimeUnit::Month));
        assert_eq!(TimeUnit::finest([TimeUnit::Year, TimeUnit::Day]), Some(TimeUnit::Day));
        assert_eq!(TimeUnit::finest(std::iter::empty()), None);
    }

    #[test]
    fn test_interval_basics() {
        let intv = TimeInterval::new(6, 12);
        assert_eq!(intv.length(), 6);
        assert!(!intv.is_zero());
        assert!(TimeInterval::new(0, 0).is_zero());
        assert_eq!(intv.to_string(), "(6,12)");
        assert_eq!(TimeInterval::point(3).to_string(), "3");
    }

    #[test]
    fn test_interval_length_at_extremes() {
        let intv = TimeInterval::new(i32::MIN, i32::MAX);
        assert_eq!(intv.length(), u32::MAX as i64);
        assert_eq!(TimeInterval::new(i32::MAX, i32::MIN).length(), -(u32::MAX as i64));
    }

    #[test]
    fn test_system_time_millis() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(1_500);
        assert_eq!(system_time_millis(t), 1_500);
    }
}
