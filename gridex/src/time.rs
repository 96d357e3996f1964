use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};

use crate::errors::{Error, Result};

/// A point in time, e.g. the reference time of a forecast run
pub type Instant = DateTime<Utc>;

/// Unit of a forecast time offset.
///
/// Codes follow WMO code table 4.4. Only units with a fixed length in seconds are supported, and
/// every supported unit evenly divides every longer one, so converting a value to the finer of
/// two units is always exact.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Minute = 0,
    Hour = 1,
    Day = 2,
    ThreeHours = 10,
    SixHours = 11,
    TwelveHours = 12,
    Second = 13,
}

impl TimeUnit {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Length of one unit, in seconds
    pub fn seconds(self) -> i64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::ThreeHours => 3 * 3600,
            TimeUnit::SixHours => 6 * 3600,
            TimeUnit::TwelveHours => 12 * 3600,
            TimeUnit::Day => 24 * 3600,
        }
    }

    /// The finer of two units
    pub fn finest(self, other: TimeUnit) -> TimeUnit {
        if other.seconds() < self.seconds() {
            other
        } else {
            self
        }
    }

    /// Express a value in this unit as seconds
    pub fn to_seconds(self, value: i32) -> i64 {
        value as i64 * self.seconds()
    }

    /// Express a number of seconds in this unit, if it is a whole number of units
    pub fn from_seconds(self, seconds: i64) -> Option<i32> {
        let unit = self.seconds();
        if seconds % unit == 0 {
            i32::try_from(seconds / unit).ok()
        } else {
            None
        }
    }

    /// Whether a value in this unit can be expressed in every supported unit.
    ///
    /// Seconds are the finest unit, so this holds when the value fits in an `i32` of seconds.
    ///
    pub fn is_representable(self, value: i32) -> bool {
        i32::try_from(self.to_seconds(value)).is_ok()
    }

    /// Add an offset, given in seconds, to an instant. Returns `None` if the result is out of
    /// range.
    pub fn valid_time(run: Instant, seconds: i64) -> Option<Instant> {
        run.checked_add_signed(Duration::try_seconds(seconds)?)
    }
}

impl TryFrom<u8> for TimeUnit {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(TimeUnit::Minute),
            1 => Ok(TimeUnit::Hour),
            2 => Ok(TimeUnit::Day),
            10 => Ok(TimeUnit::ThreeHours),
            11 => Ok(TimeUnit::SixHours),
            12 => Ok(TimeUnit::TwelveHours),
            13 => Ok(TimeUnit::Second),
            _ => Err(Error::Descriptor(format!("unsupported time unit code {code}"))),
        }
    }
}

/// Order units from finest to coarsest
impl PartialOrd for TimeUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seconds().cmp(&other.seconds())
    }
}
