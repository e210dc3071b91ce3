use once_cell::sync::Lazy;
use regex::Regex;

/// Spellings a flat file uses for "no value".
const MISSING_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "NULL", "null", "None", "<NA>", "#N/A",
    "#NA", "#N/A N/A", "1.#IND", "-1.#IND", "1.#QNAN", "-1.#QNAN",
];

const BYTES_PER_GB_FROM_KB: f64 = 1024.0 * 1024.0;

static DECIMAL_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").unwrap());

/// Trim whitespace and strip outer quotes if present.
pub fn clean_str(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_missing(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw.trim())
}

/// First `digits.digits` run in `raw`, as a float.
pub fn extract_decimal(raw: &str) -> Option<f64> {
    DECIMAL_RUN
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Plain number, e.g. a `total_transfer` cell.
pub fn parse_number(raw: &str) -> Option<f64> {
    clean_str(raw).parse::<f64>().ok().filter(|v| v.is_finite())
}

/// KB → GB, rounded to two decimals.
pub fn kb_to_gb(kb: f64) -> f64 {
    round_to(kb / BYTES_PER_GB_FROM_KB, 2)
}

/// Round half to even, so exact ties such as `0.125` go to `0.12`.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

/// Shortest rendering that still reads as a float: `1024.0`, `3.25`.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
