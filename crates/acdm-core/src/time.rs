//! Timestamp helpers for the backend wire format and HHMM inputs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use thiserror::Error;

/// The backend encodes an unset time as one millisecond before the epoch.
pub const UNSET_TIME: &str = "1969-12-31T23:59:59.999Z";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("Invalid time format. Expected: HHMM (24 hours)")]
    InvalidClock,
}

/// Format a time for the backend (`YYYY-MM-DDTHH:MM:SS.mmmZ`).
pub fn format_backend_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) if time.timestamp_millis() >= 0 => {
            time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
        }
        _ => UNSET_TIME.to_string(),
    }
}

/// Parse a backend timestamp. The unset marker and anything before the epoch yield `None`.
pub fn parse_backend_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            let naive = raw.strip_suffix('Z').unwrap_or(raw);
            NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.and_utc())
        })?;

    if parsed.timestamp_millis() < 0 {
        return None;
    }
    Some(parsed)
}

/// Parse a strict four digit HHMM clock on the UTC date of `now`.
pub fn parse_hhmm(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeError> {
    let raw = raw.trim();
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimeError::InvalidClock);
    }
    let hours: u32 = raw[..2].parse().map_err(|_| TimeError::InvalidClock)?;
    let minutes: u32 = raw[2..].parse().map_err(|_| TimeError::InvalidClock)?;
    let clock = NaiveTime::from_hms_opt(hours, minutes, 0).ok_or(TimeError::InvalidClock)?;
    Ok(at_clock(now.date_naive(), clock))
}

/// Convert a flight-plan departure time (HHMM, possibly short) to a UTC instant.
///
/// Empty or over-long values fall back to `now`; short values are left-padded.
pub fn departure_time_from_hhmm(raw: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > 4 {
        return now;
    }
    let padded = format!("{:0>4}", raw);
    parse_hhmm(&padded, now).unwrap_or(now)
}

fn at_clock(date: NaiveDate, clock: NaiveTime) -> DateTime<Utc> {
    date.and_time(clock).and_utc()
}
