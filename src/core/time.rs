//! Scheduled instants.
//!
//! A [`ScheduledTime`] is a UTC instant with one-second resolution. It is the
//! time axis of every slot: schedules produce them, triggers resolve paths
//! from them, and the state database indexes slots by them.

use chrono::{DateTime, Datelike, NaiveDateTime, SubsecRound, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical output format.
const DISPLAY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Minute-precision format accepted on input and handed to external jobs.
const NOMINAL_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

const SECONDS_PER_HOUR: i64 = 3600;

/// Largest time shift, in seconds, that offsets, delays and intervals may
/// use: one hundred years.
pub const MAX_SHIFT_SECS: i64 = 100 * 366 * 24 * SECONDS_PER_HOUR;

/// Error returned when a string is not a valid scheduled time.
#[derive(Debug, Error)]
#[error("invalid scheduled time '{input}': expected YYYY-MM-DDTHH:MMZ or RFC 3339")]
pub struct TimeParseError {
    input: String,
}

/// Shifting a time left the range chrono can represent.
#[derive(Debug, Clone, Error)]
#[error("{base} shifted by {shift} is out of range")]
pub struct TimeOutOfRange {
    base: ScheduledTime,
    shift: String,
}

impl TimeOutOfRange {
    fn new(base: ScheduledTime, shift: String) -> Self {
        Self { base, shift }
    }
}

/// A UTC instant truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduledTime(DateTime<Utc>);

impl ScheduledTime {
    /// Wrap a chrono timestamp, dropping sub-second precision.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self(time.trunc_subsecs(0))
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// The Unix epoch.
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Get the underlying chrono timestamp.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Shift by a (possibly negative) number of seconds.
    pub fn plus_seconds(&self, seconds: i64) -> Result<Self, TimeOutOfRange> {
        TimeDelta::try_seconds(seconds)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
            .ok_or_else(|| TimeOutOfRange::new(*self, format!("{seconds}s")))
    }

    /// Shift by a (possibly negative) number of hours.
    pub fn plus_hours(&self, hours: i64) -> Result<Self, TimeOutOfRange> {
        TimeDelta::try_hours(hours)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .map(Self)
            .ok_or_else(|| TimeOutOfRange::new(*self, format!("{hours}h")))
    }

    /// Shift backwards by a number of hours.
    pub fn minus_hours(&self, hours: u32) -> Result<Self, TimeOutOfRange> {
        TimeDelta::try_hours(i64::from(hours))
            .and_then(|delta| self.0.checked_sub_signed(delta))
            .map(Self)
            .ok_or_else(|| TimeOutOfRange::new(*self, format!("-{hours}h")))
    }

    /// Seconds elapsed from `earlier` to `self`. Negative when `earlier` is later.
    pub fn seconds_since(&self, earlier: &ScheduledTime) -> i64 {
        (self.0 - earlier.0).num_seconds()
    }

    /// Truncate to the start of the hour.
    pub fn full_hour(&self) -> Self {
        let past_hour = self.0.timestamp().rem_euclid(SECONDS_PER_HOUR);
        Self(self.0 - TimeDelta::seconds(past_hour))
    }

    /// Whether this instant sits exactly on an hour boundary.
    pub fn is_full_hour(&self) -> bool {
        self.0.timestamp().rem_euclid(SECONDS_PER_HOUR) == 0
    }

    /// Four-digit year.
    pub fn year(&self) -> String {
        format!("{:04}", self.0.year())
    }

    /// Two-digit month.
    pub fn month(&self) -> String {
        format!("{:02}", self.0.month())
    }

    /// Two-digit day of month.
    pub fn day(&self) -> String {
        format!("{:02}", self.0.day())
    }

    /// Two-digit hour.
    pub fn hour(&self) -> String {
        format!("{:02}", self.0.hour())
    }

    /// Two-digit minute.
    pub fn minute(&self) -> String {
        format!("{:02}", self.0.minute())
    }

    /// Two-digit second.
    pub fn second(&self) -> String {
        format!("{:02}", self.0.second())
    }

    /// Minute-precision representation (`2013-11-27T15:00Z`).
    pub fn nominal_time(&self) -> String {
        self.0.format(NOMINAL_FORMAT).to_string()
    }

    /// Replace `${year}`, `${month}`, `${day}`, `${hour}`, `${minute}` and
    /// `${second}` tokens with this instant's zero-padded fields.
    ///
    /// Unknown tokens are left in place.
    pub fn substitute(&self, template: &str) -> String {
        [
            ("${year}", self.year()),
            ("${month}", self.month()),
            ("${day}", self.day()),
            ("${hour}", self.hour()),
            ("${minute}", self.minute()),
            ("${second}", self.second()),
        ]
        .iter()
        .fold(template.to_string(), |acc, (token, value)| {
            acc.replace(token, value)
        })
    }
}

impl From<DateTime<Utc>> for ScheduledTime {
    fn from(time: DateTime<Utc>) -> Self {
        Self::new(time)
    }
}

impl FromStr for ScheduledTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::new(parsed.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(trimmed, NOMINAL_FORMAT)
            .map(|naive| Self::new(naive.and_utc()))
            .map_err(|_| TimeParseError {
                input: s.to_string(),
            })
    }
}

impl fmt::Display for ScheduledTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DISPLAY_FORMAT))
    }
}

impl Serialize for ScheduledTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScheduledTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
