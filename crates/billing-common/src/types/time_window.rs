//! Billing windows and ISO-8601 timestamp handling
//!
//! A [`TimeWindow`] is the half-open interval `[start, end)` that one scheduler
//! cycle bills for. Windows produced by [`TimeWindow::next`] are contiguous:
//! the end of one is the start of the next.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Half-open billing window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive window start
    pub start: DateTime<Utc>,
    /// Exclusive window end
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `length` beginning at `start`
    pub fn starting_at(start: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start,
            end: start + length,
        }
    }

    /// Window length
    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Window length in whole seconds
    pub fn length_secs(&self) -> i64 {
        self.length().num_seconds()
    }

    /// The window immediately following this one, of the same length
    pub fn next(&self) -> Self {
        Self::starting_at(self.end, self.length())
    }

    /// Whether `instant` falls inside `[start, end)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", format_iso_utc(self.start), format_iso_utc(self.end))
    }
}

/// Offset-carrying forms tried after strict RFC 3339
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];

/// Offset-less forms, read as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse an ISO-8601 timestamp into a UTC instant.
///
/// Accepts RFC 3339 strings (`Z` or a numeric offset), minute precision,
/// a space instead of `T`, and a bare date (midnight). Offset-less input is
/// taken to be UTC.
pub fn parse_iso_timestamp(input: &str) -> Result<DateTime<Utc>, InputError> {
    let trimmed = input.trim();

    let rfc_err = match DateTime::parse_from_rfc3339(trimmed) {
        Ok(parsed) => return Ok(parsed.with_timezone(&Utc)),
        Err(e) => e,
    };

    let mut normalized = trimmed.replacen(' ', "T", 1);
    if normalized.ends_with(['Z', 'z']) {
        normalized.pop();
        normalized.push_str("+00:00");
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&normalized, format).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| InputError::InvalidTimestamp {
            input: input.to_string(),
            reason: rfc_err.to_string(),
        })
}

/// Format an instant as ISO-8601 with an explicit `Z` suffix
pub fn format_iso_utc(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Drop sub-second precision
pub fn truncate_to_seconds(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(0)
}
