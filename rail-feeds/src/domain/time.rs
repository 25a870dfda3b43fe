//! Time parsing shared by the feeds.
//!
//! Boards carry wall-clock times as "HH:MM" (Darwin push also uses
//! "HH:MM:SS" for working times), estimates as either a time or a status
//! phrase, and Network Rail JSON feeds carry instants as epoch-millisecond
//! strings.

use std::fmt;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::{Serialize, Serializer};

/// Error returned when parsing an invalid time string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time: {reason}")]
pub struct TimeError {
    reason: &'static str,
}

impl TimeError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Parse "HH:MM" or "HH:MM:SS" into a time of day.
///
/// ```
/// use rail_feeds::domain::parse_hhmm;
///
/// assert_eq!(parse_hhmm("14:30").unwrap().to_string(), "14:30:00");
/// assert!(parse_hhmm("1430").is_err());
/// assert!(parse_hhmm("25:00").is_err());
/// ```
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, TimeError> {
    let bytes = s.as_bytes();
    if bytes.len() != 5 && bytes.len() != 8 {
        return Err(TimeError::new("expected HH:MM or HH:MM:SS"));
    }
    if bytes[2] != b':' || (bytes.len() == 8 && bytes[5] != b':') {
        return Err(TimeError::new("misplaced separator"));
    }

    let hour = two_digits(&bytes[0..2]).ok_or_else(|| TimeError::new("invalid hour digits"))?;
    let minute =
        two_digits(&bytes[3..5]).ok_or_else(|| TimeError::new("invalid minute digits"))?;
    let second = if bytes.len() == 8 {
        two_digits(&bytes[6..8]).ok_or_else(|| TimeError::new("invalid second digits"))?
    } else {
        0
    };

    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| TimeError::new("out of range"))
}

/// Parse the compact "HHMM" / "HHMMSS" form used by CIF-style schedules.
pub fn parse_compact_time(s: &str) -> Result<NaiveTime, TimeError> {
    let s = s.trim();
    let bytes = s.as_bytes();
    if bytes.len() != 4 && bytes.len() != 6 {
        return Err(TimeError::new("expected HHMM or HHMMSS"));
    }
    let hour = two_digits(&bytes[0..2]).ok_or_else(|| TimeError::new("invalid hour digits"))?;
    let minute =
        two_digits(&bytes[2..4]).ok_or_else(|| TimeError::new("invalid minute digits"))?;
    let second = if bytes.len() == 6 {
        two_digits(&bytes[4..6]).ok_or_else(|| TimeError::new("invalid second digits"))?
    } else {
        0
    };
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| TimeError::new("out of range"))
}

fn two_digits(bytes: &[u8]) -> Option<u32> {
    match bytes {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => {
            Some(u32::from(a - b'0') * 10 + u32::from(b - b'0'))
        }
        _ => None,
    }
}

/// Parse an instant from a feed: epoch milliseconds ("1511528940000") or RFC 3339.
pub fn parse_feed_timestamp(s: &str) -> Result<DateTime<Utc>, TimeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(TimeError::new("empty timestamp"));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = s
            .parse()
            .map_err(|_| TimeError::new("epoch milliseconds overflow"))?;
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| TimeError::new("epoch milliseconds out of range"));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TimeError::new("expected epoch milliseconds or RFC 3339"))
}

/// An estimate as shown on a departure board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedTime {
    OnTime,
    At(NaiveTime),
    Delayed,
    Cancelled,
    /// No estimate available (field absent or unrecognised)
    Unknown,
}

impl ExpectedTime {
    /// Interpret a board estimate field ("On time", "Delayed", "Cancelled", "10:15").
    pub fn parse(field: Option<&str>) -> Self {
        let Some(field) = field.map(str::trim) else {
            return ExpectedTime::Unknown;
        };
        match field {
            "On time" | "on time" => ExpectedTime::OnTime,
            "Delayed" | "delayed" => ExpectedTime::Delayed,
            "Cancelled" | "cancelled" => ExpectedTime::Cancelled,
            other => parse_hhmm(other)
                .map(ExpectedTime::At)
                .unwrap_or(ExpectedTime::Unknown),
        }
    }

    /// Delay in whole minutes against a scheduled time, when computable.
    /// Times more than 12 hours apart are treated as crossing midnight.
    pub fn delay_minutes(&self, scheduled: NaiveTime) -> Option<i64> {
        match self {
            ExpectedTime::OnTime => Some(0),
            ExpectedTime::At(t) => {
                let mut mins = t.signed_duration_since(scheduled).num_minutes();
                if mins < -720 {
                    mins += 1440;
                } else if mins > 720 {
                    mins -= 1440;
                }
                Some(mins)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ExpectedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedTime::OnTime => f.write_str("On time"),
            ExpectedTime::At(t) => write!(f, "{}", t.format("%H:%M")),
            ExpectedTime::Delayed => f.write_str("Delayed"),
            ExpectedTime::Cancelled => f.write_str("Cancelled"),
            ExpectedTime::Unknown => f.write_str(""),
        }
    }
}

impl Serialize for ExpectedTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn hhmm_and_hhmmss() {
        assert_eq!(parse_hhmm("00:00").unwrap(), t(0, 0));
        assert_eq!(parse_hhmm("23:59").unwrap(), t(23, 59));
        assert_eq!(
            parse_hhmm("10:30:30").unwrap(),
            NaiveTime::from_hms_opt(10, 30, 30).unwrap()
        );
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("1:30").is_err());
        assert!(parse_hhmm("12-30").is_err());
    }

    #[test]
    fn compact_times() {
        assert_eq!(parse_compact_time("1030").unwrap(), t(10, 30));
        assert_eq!(
            parse_compact_time("103015").unwrap(),
            NaiveTime::from_hms_opt(10, 30, 15).unwrap()
        );
        assert!(parse_compact_time("").is_err());
        assert!(parse_compact_time("10H").is_err());
    }

    #[test]
    fn feed_timestamps() {
        let ts = parse_feed_timestamp("1511528940000").unwrap();
        assert_eq!(ts.timestamp_millis(), 1_511_528_940_000);

        let ts = parse_feed_timestamp("2024-03-15T10:30:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-15T10:30:00+00:00");

        assert!(parse_feed_timestamp("").is_err());
        assert!(parse_feed_timestamp("yesterday").is_err());
    }

    #[test]
    fn expected_time_statuses() {
        assert_eq!(ExpectedTime::parse(Some("On time")), ExpectedTime::OnTime);
        assert_eq!(ExpectedTime::parse(Some("Delayed")), ExpectedTime::Delayed);
        assert_eq!(ExpectedTime::parse(Some("Cancelled")), ExpectedTime::Cancelled);
        assert_eq!(ExpectedTime::parse(Some("10:15")), ExpectedTime::At(t(10, 15)));
        assert_eq!(ExpectedTime::parse(Some("No report")), ExpectedTime::Unknown);
        assert_eq!(ExpectedTime::parse(None), ExpectedTime::Unknown);
    }

    #[test]
    fn delay_minutes_handles_midnight() {
        assert_eq!(ExpectedTime::At(t(10, 5)).delay_minutes(t(10, 0)), Some(5));
        assert_eq!(ExpectedTime::At(t(0, 3)).delay_minutes(t(23, 58)), Some(5));
        assert_eq!(ExpectedTime::At(t(23, 58)).delay_minutes(t(0, 1)), Some(-3));
        assert_eq!(ExpectedTime::OnTime.delay_minutes(t(9, 0)), Some(0));
        assert_eq!(ExpectedTime::Delayed.delay_minutes(t(9, 0)), None);
    }

    #[test]
    fn display_matches_board_wording() {
        assert_eq!(ExpectedTime::At(t(9, 5)).to_string(), "09:05");
        assert_eq!(ExpectedTime::OnTime.to_string(), "On time");
    }
}
