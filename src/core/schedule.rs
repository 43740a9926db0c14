//! Schedule parsing and slot enumeration.
//!
//! A schedule answers one question for the scheduler: which instants inside a
//! time range are slots of this workflow. Supported expressions are standard
//! cron, extended 6-field cron (with seconds), shortcuts (@hourly, @daily,
//! etc.) and epoch-aligned intervals (@every).

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use thiserror::Error;

use super::time::{MAX_SHIFT_SECS, ScheduledTime};

/// Errors that can occur when parsing or using schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// The set of instants at which a workflow has slots.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// The original expression string.
    expression: String,
    /// Timezone cron fields are evaluated in.
    timezone: Tz,
    /// Parsed schedule type.
    schedule_type: ScheduleType,
}

#[derive(Debug, Clone)]
enum ScheduleType {
    /// Standard cron schedule.
    Cron(Box<CronSchedule>),
    /// Every multiple of this many seconds since the Unix epoch.
    Interval(i64),
}

impl Schedule {
    /// Create a new schedule evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`, `@minutely`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// A schedule with one slot at every full hour.
    pub fn hourly() -> Self {
        Self {
            expression: "@hourly".to_string(),
            timezone: Tz::UTC,
            schedule_type: ScheduleType::Interval(3600),
        }
    }

    /// Create a new schedule with a specific timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl AsRef<str>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone: Tz = timezone
            .as_ref()
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.as_ref().to_string()))?;

        let schedule_type = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            schedule_type,
        })
    }

    fn parse_expression(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    fn parse_shortcut(expression: &str) -> Result<ScheduleType, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Ok(ScheduleType::Interval(3600)),
            "@minutely" => Ok(ScheduleType::Interval(60)),
            s if s.starts_with("@every ") => Self::parse_interval(&s[7..]),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_interval(interval: &str) -> Result<ScheduleType, ScheduleError> {
        let seconds = Self::parse_duration(interval.trim())?;
        Ok(ScheduleType::Interval(seconds))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s" into seconds.
    fn parse_duration(s: &str) -> Result<i64, ScheduleError> {
        let mut total_secs: i64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else {
                let num: i64 = current_num
                    .parse()
                    .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
                current_num.clear();

                let unit = match c {
                    's' => 1,
                    'm' => 60,
                    'h' => 3600,
                    'd' => 86400,
                    _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
                };
                total_secs = num
                    .checked_mul(unit)
                    .and_then(|secs| total_secs.checked_add(secs))
                    .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;
            }
        }

        // Trailing digits without a unit
        if !current_num.is_empty() || total_secs == 0 || total_secs > MAX_SHIFT_SECS {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(total_secs)
    }

    fn parse_cron(expression: &str) -> Result<ScheduleType, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            _ => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = CronSchedule::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(ScheduleType::Cron(Box::new(schedule)))
    }

    /// All slot instants in the half-open range `[from, to)`, ascending.
    pub fn scheduled_times(&self, from: ScheduledTime, to: ScheduledTime) -> Vec<ScheduledTime> {
        if from >= to {
            return Vec::new();
        }

        match &self.schedule_type {
            ScheduleType::Cron(schedule) => {
                // `after` is exclusive, so start one second early to include `from`
                let start = from
                    .plus_seconds(-1)
                    .unwrap_or(from)
                    .as_datetime()
                    .with_timezone(&self.timezone);
                schedule
                    .after(&start)
                    .map(|dt| ScheduledTime::new(dt.with_timezone(&Utc)))
                    .take_while(|t| *t < to)
                    .collect()
            }
            ScheduleType::Interval(seconds) => {
                let Some(step) = TimeDelta::try_seconds(*seconds) else {
                    return Vec::new();
                };
                let mut times = Vec::new();
                let mut next = Self::align_up(from.as_datetime(), *seconds);
                while let Some(current) = next
                    && current < to.as_datetime()
                {
                    times.push(ScheduledTime::new(current));
                    next = current.checked_add_signed(step);
                }
                times
            }
        }
    }

    /// The first multiple of `seconds` since the epoch at or after `time`.
    /// `None` past the end of the representable range.
    fn align_up(time: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
        let remainder = time.timestamp().rem_euclid(seconds);
        if remainder == 0 {
            Some(time)
        } else {
            TimeDelta::try_seconds(seconds - remainder)
                .and_then(|delta| time.checked_add_signed(delta))
        }
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone name.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }
}
