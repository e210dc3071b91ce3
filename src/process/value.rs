use anyhow::{Context, Result};
use chrono::{NaiveDateTime, NaiveTime};
use csv::WriterBuilder;

use crate::error::NormalizeError;
use crate::process::{
    date_parser::{format_start_time, format_usage_time},
    raw_table::RawTable,
    utils::{format_float, is_missing},
};

/// One cell after (or before) normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Text(String),
    Timestamp(NaiveDateTime),
    Time(NaiveTime),
    Float(f64),
    /// Fixed-point rendering with `scale` fractional digits.
    Decimal { value: f64, scale: usize },
}

impl Value {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if !is_missing(s) => Value::Text(s.to_string()),
            _ => Value::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn render(&self) -> String {
        match self {
            Value::Missing => String::new(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(dt) => format_start_time(dt),
            Value::Time(t) => format_usage_time(t),
            Value::Float(v) => format_float(*v),
            Value::Decimal { value, scale } => format!("{:.*}", scale, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    /// 1-based position of this row in the raw artifact.
    pub source_row: usize,
    pub values: Vec<Value>,
}

/// Column-ordered table of typed cells. Column order is fixed at construction
/// and only grows by appending, so the serialized header is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedTable {
    pub columns: Vec<String>,
    pub rows: Vec<TypedRow>,
}

impl TypedTable {
    /// Lift raw text under the given (already canonical) column names.
    pub fn from_raw(columns: Vec<String>, raw: &RawTable) -> Self {
        let width = columns.len();
        let rows = raw
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let mut values: Vec<Value> =
                    row.iter().map(|v| Value::from_raw(v.as_deref())).collect();
                values.resize(width, Value::Missing);
                TypedRow {
                    source_row: i + 1,
                    values,
                }
            })
            .collect();
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Result<usize, NormalizeError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| NormalizeError::MissingColumn(name.to_string()))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rewrite every cell of `column` through `f`; the first failure aborts.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<(), NormalizeError>
    where
        F: FnMut(&Value, usize) -> Result<Value, NormalizeError>,
    {
        let idx = self.column_index(column)?;
        for row in &mut self.rows {
            let next = f(&row.values[idx], row.source_row)?;
            row.values[idx] = next;
        }
        Ok(())
    }

    /// Append `name`, computing each row's cell from that row.
    pub fn push_column<F>(&mut self, name: &str, mut f: F) -> Result<(), NormalizeError>
    where
        F: FnMut(&TypedRow) -> Result<Value, NormalizeError>,
    {
        let mut cells = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            cells.push(f(row)?);
        }
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row.values.push(cell);
        }
        self.columns.push(name.to_string());
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut wtr = WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.values.iter().map(Value::render))?;
        }
        wtr.into_inner().context("flushing CSV writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rendering() {
        let dt = NaiveDate::from_ymd_opt(2022, 5, 8)
            .unwrap()
            .and_hms_opt(20, 37, 0)
            .unwrap();
        assert_eq!(Value::Timestamp(dt).render(), "2022-05-08 20:37:00");
        let t = NaiveTime::from_hms_opt(1, 30, 0).unwrap();
        assert_eq!(Value::Time(t).render(), "01:30:00");
        assert_eq!(Value::Float(2048.0).render(), "2048.0");
        assert_eq!(Value::Decimal { value: 2.0, scale: 2 }.render(), "2.00");
        assert_eq!(Value::Missing.render(), "");
    }

    #[test]
    fn lifting_marks_null_tokens_missing() {
        let mut raw = RawTable::new(vec!["a".into(), "b".into()]);
        raw.rows.push(vec![Some("x".into()), Some("NaN".into())]);
        raw.rows.push(vec![Some("y".into())]);
        let t = TypedTable::from_raw(raw.headers.clone(), &raw);
        assert_eq!(t.rows[0].values, vec![Value::Text("x".into()), Value::Missing]);
        assert_eq!(t.rows[1].values, vec![Value::Text("y".into()), Value::Missing]);
        assert_eq!(t.rows[1].source_row, 2);
    }

    #[test]
    fn pushed_columns_append_in_order() -> Result<()> {
        let mut raw = RawTable::new(vec!["n".into()]);
        raw.rows.push(vec![Some("1".into())]);
        let mut t = TypedTable::from_raw(vec!["n".into()], &raw);
        t.push_column("n_twice", |_| Ok(Value::Float(2.0)))?;
        t.push_column("n_label", |_| Ok(Value::Text("one".into())))?;
        assert_eq!(t.columns, vec!["n", "n_twice", "n_label"]);
        assert_eq!(String::from_utf8(t.to_csv_bytes()?)?, "n,n_twice,n_label\n1,2.0,one\n");
        Ok(())
    }
}
