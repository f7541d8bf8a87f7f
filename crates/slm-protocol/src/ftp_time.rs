//! FTP directory-listing timestamp parsing (§4.4).
//!
//! Unix `LIST` output reports modification times in one of two forms:
//! `MMM DD HH:MM` (current year, omitted) or `MMM DD YYYY` (an older file,
//! year given but no time-of-day). Both are naive — the device's own clock
//! is assumed to run in the configured timezone; if that clock was never
//! synced (see the Cycle Orchestrator's clock-sync step) this assumption is
//! wrong and the caller must not silently correct for it.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::fmt;

/// Timestamp parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpTimeParseError(pub String);

impl fmt::Display for FtpTimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unparseable FTP listing timestamp: {}", self.0)
    }
}

impl std::error::Error for FtpTimeParseError {}

/// Parse a Unix `LIST` modification-time field and convert it to UTC using
/// `tz_offset_hours` (the gateway's configured device-timezone offset from
/// UTC, e.g. `-5.0`), taking `now_utc` as the reference instant for the
/// current-year heuristic.
///
/// `raw` is the three whitespace-separated tokens as they appear in `LIST`
/// output, e.g. `"Jan 07 14:23"` or `"Jan 07  2024"`.
pub fn parse_listing_mtime(
    raw: &str,
    now_utc: DateTime<Utc>,
    tz_offset_hours: f64,
) -> Result<DateTime<Utc>, FtpTimeParseError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(FtpTimeParseError(raw.to_owned()));
    }
    let month = parse_month(tokens[0]).ok_or_else(|| FtpTimeParseError(raw.to_owned()))?;
    let day: u32 = tokens[1]
        .parse()
        .map_err(|_| FtpTimeParseError(raw.to_owned()))?;

    let offset_seconds = (tz_offset_hours * 3600.0).round() as i32;
    let now_local = now_utc + chrono::Duration::seconds(offset_seconds as i64);

    let naive = if let Some((h, m)) = tokens[2].split_once(':') {
        // MMM DD HH:MM — current year, assign now-in-zone's year; roll back
        // one year if the result would be in the future.
        let hour: u32 = h.parse().map_err(|_| FtpTimeParseError(raw.to_owned()))?;
        let minute: u32 = m.parse().map_err(|_| FtpTimeParseError(raw.to_owned()))?;
        let candidate_year = now_local.year();
        let mut naive = build_naive(candidate_year, month, day, hour, minute, 0, raw)?;
        if naive > now_local.naive_local() {
            naive = build_naive(candidate_year - 1, month, day, hour, minute, 0, raw)?;
        }
        naive
    } else {
        // MMM DD YYYY — explicit year, midnight.
        let year: i32 = tokens[2]
            .parse()
            .map_err(|_| FtpTimeParseError(raw.to_owned()))?;
        build_naive(year, month, day, 0, 0, 0, raw)?
    };

    let local = naive_as_offset(naive, offset_seconds);
    Ok(local.with_timezone(&Utc))
}

fn build_naive(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    raw: &str,
) -> Result<NaiveDateTime, FtpTimeParseError> {
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| FtpTimeParseError(raw.to_owned()))?;
    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| FtpTimeParseError(raw.to_owned()))?;
    Ok(NaiveDateTime::new(date, time))
}

fn naive_as_offset(naive: NaiveDateTime, offset_seconds: i32) -> DateTime<chrono::FixedOffset> {
    let offset = chrono::FixedOffset::east_opt(offset_seconds).expect("offset in range");
    offset
        .from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| offset.from_utc_datetime(&naive))
}

fn parse_month(token: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(token))
        .map(|idx| idx as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mmm_dd_yyyy_parses_at_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let ts = parse_listing_mtime("Jan 07 2024", now, -5.0).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-07T05:00:00+00:00");
    }

    #[test]
    fn future_current_year_candidate_rolls_back_one_year() {
        // "now" is Jan 7 2026 in UTC-5 local time; a listing of "Dec 31 23:00"
        // would land in the future this year, so it must be last year.
        let now = Utc.with_ymd_and_hms(2026, 1, 7, 12, 0, 0).unwrap();
        let ts = parse_listing_mtime("Dec 31 23:00", now, -5.0).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T04:00:00+00:00");
    }

    #[test]
    fn same_year_candidate_in_the_past_is_kept() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let ts = parse_listing_mtime("Jan 07 14:23", now, -5.0).unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-07T19:23:00+00:00");
    }

    #[test]
    fn malformed_input_is_rejected() {
        let now = Utc::now();
        assert!(parse_listing_mtime("garbage", now, -5.0).is_err());
        assert!(parse_listing_mtime("Xxx 07 14:23", now, -5.0).is_err());
    }
}
