use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use duckdb::Connection;
use std::{io::Write, sync::Arc, sync::Mutex};
use tracing::info;

use crate::duck::{open_db, quote_ident};
use crate::error::WarehouseError;
use crate::ports::{ObjectStore, Warehouse};

/// Analytical warehouse backed by a DuckDB database.
///
/// The flat file is fetched through the object store, staged in a temp file,
/// and loaded with DuckDB's CSV reader inside one transaction, so the target
/// table keeps its previous contents unless the whole load commits.
pub struct DuckWarehouse {
    conn: Mutex<Connection>,
    objects: Arc<dyn ObjectStore>,
}

impl DuckWarehouse {
    pub fn new(conn: Connection, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            conn: Mutex::new(conn),
            objects,
        }
    }

    pub fn open(path: &str, objects: Arc<dyn ObjectStore>) -> Result<Self> {
        Ok(Self::new(open_db(path)?, objects))
    }

    /// Rows currently in `table`, or `None` if it does not exist.
    pub fn row_count(&self, table: &str) -> Result<Option<u64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("warehouse connection poisoned"))?;
        if super::table_columns(&conn, table)?.is_empty() {
            return Ok(None);
        }
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |r| r.get(0),
        )?;
        Ok(Some(n as u64))
    }

    /// Column names of `table` in order.
    pub fn columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("warehouse connection poisoned"))?;
        super::table_columns(&conn, table)
    }

    /// Replace `table` with the flat file in `bytes`, all-or-nothing.
    fn replace_from_bytes(&self, bytes: &[u8], source_key: &str, table: &str) -> Result<u64> {
        if bytes.is_empty() {
            bail!("{} is empty; a header row is required", source_key);
        }

        let mut staged = tempfile::Builder::new()
            .prefix("warehouse_load_")
            .suffix(".csv")
            .tempfile()
            .context("creating temp file for warehouse load")?;
        staged.write_all(bytes)?;
        staged.flush()?;
        let path = staged.path().to_string_lossy().replace('\'', "''");

        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("warehouse connection poisoned"))?;
        let tx = conn.transaction().context("beginning warehouse transaction")?;
        let ident = quote_ident(table);
        tx.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {ident} AS SELECT * FROM read_csv('{path}', \
             header = true, delim = ',', quote = '\"', escape = '\"', auto_detect = true);"
        ))
        .with_context(|| format!("loading {} into {}", source_key, table))?;
        let rows: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {ident}"), [], |r| r.get(0))?;
        tx.commit()
            .with_context(|| format!("committing warehouse table {}", table))?;
        Ok(rows as u64)
    }
}

#[async_trait]
impl Warehouse for DuckWarehouse {
    async fn load_csv_replace(
        &self,
        source_key: &str,
        table: &str,
    ) -> Result<u64, WarehouseError> {
        let bytes = self
            .objects
            .get(source_key)
            .await
            .with_context(|| format!("fetching {}", self.objects.uri(source_key)))
            .map_err(WarehouseError::Source)?;

        let rows = self
            .replace_from_bytes(&bytes, source_key, table)
            .map_err(WarehouseError::Load)?;

        info!(table, rows, source = %self.objects.uri(source_key), "warehouse table replaced");
        Ok(rows)
    }
}
