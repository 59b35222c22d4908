//! Sequence-axis time helpers
//!
//! Time coordinates are held in memory as [`NaiveDateTime`] (UTC, no zone) and
//! persisted as integer seconds since the Unix epoch. A [`Frequency`] is a
//! fixed step; calendar-relative steps (months, years) are not supported
//! because the template axis must be a regular series.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Units attribute written on persisted time coordinates.
pub const EPOCH_SECONDS_UNITS: &str = "seconds since 1970-01-01 00:00:00";

/// A fixed step between consecutive sequence coordinates
///
/// Parsed from offset strings such as `"1D"`, `"6H"`, `"30min"`, `"15T"`,
/// `"10S"` or `"1W"`. A bare unit means a multiple of one.
///
/// # Examples
///
/// ```
/// use gridstore_core::Frequency;
///
/// let f: Frequency = "6H".parse().unwrap();
/// assert_eq!(f.seconds(), 6 * 3600);
/// assert_eq!(f.to_string(), "6H");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frequency {
    seconds: i64,
}

impl Frequency {
    /// One step per day
    pub const DAILY: Frequency = Frequency { seconds: 86_400 };

    /// Create a frequency from a positive number of seconds
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(Error::Planning(format!(
                "frequency must be positive, got {} seconds",
                seconds
            )));
        }
        // chrono durations hold at most i64::MAX milliseconds
        if seconds > i64::MAX / 1_000 {
            return Err(Error::Planning(format!(
                "frequency of {} seconds is out of range",
                seconds
            )));
        }
        Ok(Frequency { seconds })
    }

    /// Step length in seconds
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Step as a chrono duration
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds)
    }

    /// Infer the step from the first two entries of a time axis
    ///
    /// Returns `None` when fewer than two entries exist or the first step is
    /// not positive.
    pub fn infer(values: &[NaiveDateTime]) -> Option<Frequency> {
        match values {
            [first, second, ..] => Frequency::from_seconds((*second - *first).num_seconds()).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(i64, &str); 5] = [
            (604_800, "W"),
            (86_400, "D"),
            (3_600, "H"),
            (60, "min"),
            (1, "S"),
        ];
        for (size, unit) in UNITS {
            if self.seconds % size == 0 {
                return write!(f, "{}{}", self.seconds / size, unit);
            }
        }
        write!(f, "{}S", self.seconds)
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (count, unit) = s.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| Error::Planning(format!("invalid frequency '{}'", s)))?
        };
        let unit_seconds = match unit {
            "W" | "w" => 604_800,
            "D" | "d" => 86_400,
            "H" | "h" => 3_600,
            "T" | "min" => 60,
            "S" | "s" => 1,
            _ => {
                return Err(Error::Planning(format!(
                    "unsupported frequency '{}' (use W, D, H, min/T or S)",
                    s
                )))
            }
        };
        let seconds = count
            .checked_mul(unit_seconds)
            .ok_or_else(|| Error::Planning(format!("frequency '{}' is out of range", s)))?;
        Frequency::from_seconds(seconds)
    }
}

impl TryFrom<String> for Frequency {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Frequency> for String {
    fn from(f: Frequency) -> Self {
        f.to_string()
    }
}

/// Parse a timestamp given as a date, a date-time or an RFC 3339 string.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::Planning(format!("invalid timestamp '{}'", s)))
}

/// Format a timestamp in the canonical `YYYY-MM-DDTHH:MM:SS` form.
pub fn format_datetime(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Seconds since the Unix epoch
pub fn to_epoch_seconds(t: &NaiveDateTime) -> i64 {
    t.and_utc().timestamp()
}

/// Inverse of [`to_epoch_seconds`]
pub fn from_epoch_seconds(seconds: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp(seconds, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::Corruption(format!("timestamp {} out of range", seconds)))
}

/// Regular series from `start` to `end` inclusive at `freq`
///
/// # Examples
///
/// ```
/// use gridstore_core::time::{date_range, parse_datetime};
/// use gridstore_core::Frequency;
///
/// let start = parse_datetime("2000-01-01").unwrap();
/// let end = parse_datetime("2000-01-10").unwrap();
/// assert_eq!(date_range(start, end, Frequency::DAILY).unwrap().len(), 10);
/// ```
pub fn date_range(
    start: NaiveDateTime,
    end: NaiveDateTime,
    freq: Frequency,
) -> Result<Vec<NaiveDateTime>> {
    if end < start {
        return Err(Error::Planning(format!(
            "global end {} precedes global start {}",
            format_datetime(&end),
            format_datetime(&start)
        )));
    }
    let span = (end - start).num_seconds();
    let steps = span / freq.seconds();
    Ok((0..=steps).map(|i| start + chrono::Duration::seconds(i * freq.seconds())).collect())
}
