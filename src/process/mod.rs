// src/process/mod.rs
pub mod columns;
pub mod date_parser;
pub mod raw_table;
pub mod utils;
pub mod value;

use tracing::debug;

use crate::error::NormalizeError;
use columns::{
    canonicalize_columns, DOWNLOAD, DOWNLOAD_GB, START_TIME, TOTAL_TRANSFER, TOTAL_TRANSFER_GB,
    UPLOAD, UPLOAD_GB, USAGE_TIME,
};
use raw_table::RawTable;
use value::{TypedTable, Value};

/// Apply the fixed rule set to a raw snapshot.
///
/// 1. canonical column names
/// 2. drop rows with any missing value
/// 3. parse `start_time`
/// 4. normalise `usage_time` to `HH:MM:SS`
/// 5. reduce `upload` / `download` to their decimal number
/// 6. append `upload_gb`, `download_gb`, `total_transfer_gb`
///
/// Any value that fails rules 3–6 fails the whole table; no row is skipped
/// after the completeness filter.
#[tracing::instrument(level = "debug", skip(raw), fields(rows = raw.row_count()))]
pub fn normalize(raw: &RawTable) -> Result<TypedTable, NormalizeError> {
    let columns = canonicalize_columns(&raw.headers);
    let mut table = TypedTable::from_raw(columns, raw);

    for required in [START_TIME, USAGE_TIME, UPLOAD, DOWNLOAD, TOTAL_TRANSFER] {
        table.column_index(required)?;
    }

    let before = table.row_count();
    table.rows.retain(|row| !row.values.iter().any(Value::is_missing));
    debug!(before, after = table.row_count(), "completeness filter");

    table.map_column(START_TIME, |v, row| {
        let raw = text(v);
        date_parser::parse_start_time(raw)
            .map(Value::Timestamp)
            .ok_or_else(|| unparseable(START_TIME, row, raw, "a date-time"))
    })?;

    table.map_column(USAGE_TIME, |v, row| {
        let raw = text(v);
        date_parser::parse_usage_time(raw)
            .map(Value::Time)
            .ok_or_else(|| unparseable(USAGE_TIME, row, raw, "a 00:HH:MM:SS duration"))
    })?;

    for column in [UPLOAD, DOWNLOAD] {
        table.map_column(column, |v, row| {
            let raw = text(v);
            utils::extract_decimal(raw)
                .map(Value::Float)
                .ok_or_else(|| unparseable(column, row, raw, "a decimal number"))
        })?;
    }

    for (source, derived) in [
        (UPLOAD, UPLOAD_GB),
        (DOWNLOAD, DOWNLOAD_GB),
        (TOTAL_TRANSFER, TOTAL_TRANSFER_GB),
    ] {
        let idx = table.column_index(source)?;
        table.push_column(derived, |row| {
            let kb = match &row.values[idx] {
                Value::Float(v) => Some(*v),
                other => utils::parse_number(text(other)),
            };
            kb.map(|kb| Value::Decimal {
                value: utils::kb_to_gb(kb),
                scale: 2,
            })
            .ok_or_else(|| unparseable(source, row.source_row, text(&row.values[idx]), "a number"))
        })?;
    }

    Ok(table)
}

fn text(v: &Value) -> &str {
    match v {
        Value::Text(s) => s,
        _ => "",
    }
}

fn unparseable(column: &str, row: usize, value: &str, expected: &'static str) -> NormalizeError {
    NormalizeError::Unparseable {
        column: column.to_string(),
        row,
        value: value.to_string(),
        expected,
    }
}
