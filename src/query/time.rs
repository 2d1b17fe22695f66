use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use super::QueryError;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A resampling bin width.
///
/// Accepts pandas-style offset aliases (`"10s"`, `"1min"`, `"5T"`, `"H"`,
/// `"D"`) and spelled-out intervals (`"10 MINUTES"`, `"1 HOUR 30 MINUTES"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frequency(TimeDelta);

impl Frequency {
    pub fn new(interval: TimeDelta) -> Result<Self, QueryError> {
        if interval <= TimeDelta::zero() {
            return Err(QueryError::InvalidFrequency(format!(
                "interval must be positive, got {interval}"
            )));
        }
        Ok(Self(interval))
    }

    pub fn interval(&self) -> TimeDelta {
        self.0
    }

    pub fn as_nanos(&self) -> i64 {
        self.0.num_nanoseconds().unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Frequency {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let nanos = match tokens.as_slice() {
            [] => return Err(QueryError::InvalidFrequency("empty frequency".to_string())),
            [alias] => parse_alias(alias)?,
            _ => parse_spelled(&tokens)?,
        };
        Frequency::new(TimeDelta::nanoseconds(nanos))
    }
}

/// `"10min"`, `"T"`, `"2h"`: an optional count followed by a unit.
fn parse_alias(alias: &str) -> Result<i64, QueryError> {
    let split = alias.find(|c: char| !c.is_ascii_digit()).unwrap_or(alias.len());
    let (count, unit) = alias.split_at(split);
    let count: i64 = if count.is_empty() {
        1
    } else {
        count.parse().map_err(|_| invalid(alias))?
    };
    let unit = unit_nanos(unit).ok_or_else(|| invalid(alias))?;
    count.checked_mul(unit).ok_or_else(|| invalid(alias))
}

/// `"1 HOUR 15 MINUTES"`: pairs of count and unit, summed.
fn parse_spelled(tokens: &[&str]) -> Result<i64, QueryError> {
    if tokens.len() % 2 != 0 {
        return Err(invalid(&tokens.join(" ")));
    }
    let mut total: i64 = 0;
    for pair in tokens.chunks(2) {
        let count: i64 = pair[0].parse().map_err(|_| invalid(pair[0]))?;
        let unit = unit_nanos(pair[1]).ok_or_else(|| invalid(pair[1]))?;
        total = count
            .checked_mul(unit)
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| invalid(&tokens.join(" ")))?;
    }
    Ok(total)
}

fn unit_nanos(unit: &str) -> Option<i64> {
    let nanos = match unit {
        "ns" | "N" => 1,
        "us" | "U" => 1_000,
        "ms" | "L" => 1_000_000,
        "s" | "S" => NANOS_PER_SECOND,
        "min" | "T" => 60 * NANOS_PER_SECOND,
        "h" | "H" => 3_600 * NANOS_PER_SECOND,
        "d" | "D" => 86_400 * NANOS_PER_SECOND,
        "W" => 7 * 86_400 * NANOS_PER_SECOND,
        _ => match unit.to_ascii_lowercase().as_str() {
            "nanosecond" | "nanoseconds" => 1,
            "microsecond" | "microseconds" => 1_000,
            "millisecond" | "milliseconds" => 1_000_000,
            "sec" | "secs" | "second" | "seconds" => NANOS_PER_SECOND,
            "mins" | "minute" | "minutes" => 60 * NANOS_PER_SECOND,
            "hour" | "hours" => 3_600 * NANOS_PER_SECOND,
            "day" | "days" => 86_400 * NANOS_PER_SECOND,
            "week" | "weeks" => 7 * 86_400 * NANOS_PER_SECOND,
            _ => return None,
        },
    };
    Some(nanos)
}

fn invalid(input: &str) -> QueryError {
    QueryError::InvalidFrequency(input.to_string())
}

/// Normalizes a range bound to UTC.
///
/// RFC 3339 strings keep their offset; naive date-times (`T` or space
/// separated, optional fraction) and bare dates are taken as UTC.
pub fn parse_bound(s: &str) -> Result<DateTime<Utc>, QueryError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| QueryError::InvalidBound(s.to_string()))
}
