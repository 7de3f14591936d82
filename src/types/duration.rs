// src/types/duration.rs - Human-written punishment durations ("1M2d3h", "30m", ...)

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{ModerationError, Result};

pub const SECONDS_PER_MINUTE: u64 = 60;
pub const SECONDS_PER_HOUR: u64 = 3_600;
pub const SECONDS_PER_DAY: u64 = 86_400;
/// Calendar approximation: one month is always 30 days.
pub const SECONDS_PER_MONTH: u64 = 2_592_000;

fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(\d+)M)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")
            .expect("duration pattern is a valid regex")
    })
}

/// A validated duration made of months, days, hours, minutes and seconds.
///
/// The components are kept as written so that serialization reproduces the
/// same non-zero components in canonical order. The total span is computed
/// once at construction; a value that exists always represents a
/// non-negative span that fits in a [`chrono::Duration`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DurationSpec {
    months: u64,
    days: u64,
    hours: u64,
    minutes: u64,
    seconds: u64,
    total_seconds: i64,
}

impl DurationSpec {
    /// Parse `[<n>M][<n>d][<n>h][<n>m][<n>s]`. The empty string is a zero-length duration.
    pub fn parse(text: &str) -> Result<Self> {
        let captures = duration_pattern()
            .captures(text)
            .ok_or_else(|| ModerationError::InvalidFormat(format!("Invalid duration format: '{}'", text)))?;

        let mut components = [0u64; 5];
        for (index, component) in components.iter_mut().enumerate() {
            if let Some(value) = captures.get(index + 1) {
                *component = value.as_str().parse::<u64>().map_err(|_| {
                    ModerationError::InvalidFormat(format!("Duration component too large: '{}'", value.as_str()))
                })?;
            }
        }

        let [months, days, hours, minutes, seconds] = components;
        Self::from_components(months, days, hours, minutes, seconds)
    }

    /// Build a duration from explicit components, validating that the total span is representable.
    pub fn from_components(months: u64, days: u64, hours: u64, minutes: u64, seconds: u64) -> Result<Self> {
        let overflow = || ModerationError::InvalidFormat("Duration is too long".to_string());

        let total = [
            (months, SECONDS_PER_MONTH),
            (days, SECONDS_PER_DAY),
            (hours, SECONDS_PER_HOUR),
            (minutes, SECONDS_PER_MINUTE),
            (seconds, 1),
        ]
        .iter()
        .try_fold(0u64, |acc, (value, unit)| value.checked_mul(*unit).and_then(|s| acc.checked_add(s)))
        .ok_or_else(overflow)?;

        let total_seconds = i64::try_from(total).map_err(|_| overflow())?;
        // chrono spans are millisecond-bounded
        Duration::try_seconds(total_seconds).ok_or_else(overflow)?;

        Ok(Self { months, days, hours, minutes, seconds, total_seconds })
    }

    /// Zero-length duration (what the empty string parses to).
    pub fn zero() -> Self {
        Self { months: 0, days: 0, hours: 0, minutes: 0, seconds: 0, total_seconds: 0 }
    }

    /// Canonical decomposition of a span. Negative spans collapse to zero.
    pub fn from_span(span: Duration) -> Self {
        let total = span.num_seconds().max(0) as u64;

        let months = total / SECONDS_PER_MONTH;
        let remainder = total % SECONDS_PER_MONTH;
        let days = remainder / SECONDS_PER_DAY;
        let remainder = remainder % SECONDS_PER_DAY;
        let hours = remainder / SECONDS_PER_HOUR;
        let remainder = remainder % SECONDS_PER_HOUR;
        let minutes = remainder / SECONDS_PER_MINUTE;
        let seconds = remainder % SECONDS_PER_MINUTE;

        Self { months, days, hours, minutes, seconds, total_seconds: total as i64 }
    }

    pub fn total_seconds(&self) -> i64 {
        self.total_seconds
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds == 0
    }

    pub fn to_span(&self) -> Duration {
        Duration::seconds(self.total_seconds)
    }

    /// Absolute instant `now + span`, saturating at the largest representable instant.
    pub fn to_instant(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.to_span()).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The smaller of `self` and `max`. A duration already within `max` is returned unchanged.
    pub fn clamp(&self, max: Duration) -> Self {
        if self.to_span() > max {
            Self::from_span(max)
        } else {
            self.clone()
        }
    }

    /// Render the span for people, e.g. "1 day 2 hours 5 seconds".
    pub fn humanize(&self) -> String {
        humanize_span(self.to_span())
    }
}

/// Render a span as days/hours/minutes/seconds. Zero and negative spans render as "0 seconds".
pub fn humanize_span(span: Duration) -> String {
    let total = span.num_seconds().max(0) as u64;
    let parts = [
        (total / SECONDS_PER_DAY, "day"),
        ((total % SECONDS_PER_DAY) / SECONDS_PER_HOUR, "hour"),
        ((total % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE, "minute"),
        (total % SECONDS_PER_MINUTE, "second"),
    ];

    let rendered: Vec<String> = parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            if *value == 1 {
                format!("1 {}", unit)
            } else {
                format!("{} {}s", value, unit)
            }
        })
        .collect();

    if rendered.is_empty() {
        "0 seconds".to_string()
    } else {
        rendered.join(" ")
    }
}

impl fmt::Display for DurationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (value, suffix) in [
            (self.months, 'M'),
            (self.days, 'd'),
            (self.hours, 'h'),
            (self.minutes, 'm'),
            (self.seconds, 's'),
        ] {
            if value > 0 {
                write!(f, "{}{}", value, suffix)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DurationSpec {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DurationSpec {
    type Error = ModerationError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DurationSpec> for String {
    fn from(value: DurationSpec) -> Self {
        value.to_string()
    }
}

impl Default for DurationSpec {
    fn default() -> Self {
        Self::from_span(Duration::minutes(30))
    }
}
