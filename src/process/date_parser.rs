use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::process::utils::clean_str;

/// Date-time layouts accepted for `start_time`, tried in order. Slashed dates are month-first.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const DURATION_FORMAT: &str = "%H:%M:%S";

/// Spurious hour component the session export prepends to durations.
const DURATION_PREFIX: &str = "00:";

/// Free-text start time → naive date-time. Offsets are normalised to UTC.
pub fn parse_start_time(raw: &str) -> Option<NaiveDateTime> {
    let s = clean_str(raw);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&s, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn format_start_time(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Drop the first `00:` and read what is left as a time of day.
///
/// `"00:01:30:00"` → `01:30:00`.
pub fn parse_usage_time(raw: &str) -> Option<NaiveTime> {
    let stripped = raw.trim().replacen(DURATION_PREFIX, "", 1);
    NaiveTime::parse_from_str(&stripped, DURATION_FORMAT).ok()
}

pub fn format_usage_time(t: &NaiveTime) -> String {
    t.format(DURATION_FORMAT).to_string()
}
