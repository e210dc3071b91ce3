pub mod warehouse;

use anyhow::{anyhow, Context, Result};
use duckdb::{appender_params_from_iter, Connection};
use std::sync::Mutex;
use tracing::debug;

use crate::ports::StagingStore;
use crate::process::raw_table::RawTable;

pub use warehouse::DuckWarehouse;

/// Open a DuckDB database on disk at `path`, creating the file if it doesn't exist.
/// `:memory:` opens an in-memory database.
pub fn open_db(path: &str) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(path).with_context(|| format!("opening DuckDB at {}", path))?
    };
    Ok(conn)
}

/// Open a DuckDB in‐memory database
pub fn open_mem_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    Ok(conn)
}

/// Double-quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names of `table` in ordinal order; empty if the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'main' AND table_name = ?
         ORDER BY ordinal_position",
    )?;
    let cols = stmt
        .query_map([table], |r| r.get::<_, String>(0))?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(cols)
}

/// Staging tables in DuckDB. Every column is `VARCHAR`; the Normalizer
/// re-parses whatever it needs.
pub struct DuckStagingStore {
    conn: Mutex<Connection>,
}

impl DuckStagingStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_db(path)?))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("staging connection poisoned"))
    }
}

impl StagingStore for DuckStagingStore {
    fn replace_table(&self, name: &str, table: &RawTable) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("beginning staging transaction")?;

        let ident = quote_ident(name);
        let column_defs = table
            .headers
            .iter()
            .map(|h| format!("{} VARCHAR", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {ident}; CREATE TABLE {ident} ({column_defs});"
        ))
        .with_context(|| format!("recreating staging table {}", name))?;

        {
            let mut appender = tx
                .appender(name)
                .with_context(|| format!("opening appender for {}", name))?;
            for row in &table.rows {
                appender.append_row(appender_params_from_iter(row.iter().map(|v| v.as_deref())))?;
            }
            appender.flush()?;
        }

        tx.commit()
            .with_context(|| format!("committing staging table {}", name))?;
        debug!(table = name, rows = table.row_count(), "staging table replaced");
        Ok(())
    }

    fn read_table(&self, name: &str) -> Result<Option<RawTable>> {
        let conn = self.lock()?;
        let headers = table_columns(&conn, name)?;
        if headers.is_empty() {
            return Ok(None);
        }

        let select_list = headers
            .iter()
            .map(|h| format!("CAST({} AS VARCHAR)", quote_ident(h)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", select_list, quote_ident(name));
        let width = headers.len();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| {
                (0..width)
                    .map(|i| r.get::<_, Option<String>>(i))
                    .collect::<duckdb::Result<Vec<_>>>()
            })?
            .collect::<duckdb::Result<Vec<_>>>()
            .with_context(|| format!("reading staging table {}", name))?;

        Ok(Some(RawTable { headers, rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawTable {
        let mut t = RawTable::new(vec!["Name".into(), "Upload".into(), "Note \"q\"".into()]);
        t.rows.push(vec![Some("alice".into()), Some("1.5 KB".into()), None]);
        t.rows.push(vec![Some("bob".into()), None, Some("x".into())]);
        t.rows.push(vec![Some("bob".into()), None, Some("x".into())]);
        t
    }

    #[test]
    fn replace_then_read_round_trips() -> Result<()> {
        let store = DuckStagingStore::new(open_mem_db()?);
        store.replace_table("sessions", &sample())?;
        let back = store.read_table("sessions")?.expect("table exists");
        assert_eq!(back, sample());
        Ok(())
    }

    #[test]
    fn replace_discards_previous_schema_and_rows() -> Result<()> {
        let store = DuckStagingStore::new(open_mem_db()?);
        store.replace_table("sessions", &sample())?;

        let mut narrower = RawTable::new(vec!["only".into()]);
        narrower.rows.push(vec![Some("1".into())]);
        store.replace_table("sessions", &narrower)?;
        assert_eq!(store.read_table("sessions")?, Some(narrower.clone()));

        store.replace_table("sessions", &narrower)?;
        assert_eq!(store.read_table("sessions")?, Some(narrower));
        Ok(())
    }

    #[test]
    fn failed_replace_keeps_previous_table() -> Result<()> {
        let store = DuckStagingStore::new(open_mem_db()?);
        store.replace_table("sessions", &sample())?;

        // Duplicate column names make CREATE TABLE fail inside the transaction.
        let bad = RawTable::new(vec!["a".into(), "a".into()]);
        assert!(store.replace_table("sessions", &bad).is_err());
        assert_eq!(store.read_table("sessions")?, Some(sample()));
        Ok(())
    }

    #[test]
    fn missing_table_reads_as_none() -> Result<()> {
        let store = DuckStagingStore::new(open_mem_db()?);
        assert!(store.read_table("nope")?.is_none());
        Ok(())
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
