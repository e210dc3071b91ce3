use anyhow::Result;
use async_trait::async_trait;

use crate::error::WarehouseError;
use crate::process::raw_table::RawTable;

/// Relational store used purely as a bulk sink for the Loader and a bulk
/// source for the Archiver.
pub trait StagingStore: Send + Sync {
    /// Replace table `name` (schema and rows) with `table`, all-or-nothing.
    fn replace_table(&self, name: &str, table: &RawTable) -> Result<()>;

    /// Every row of table `name` in stored column order, or `None` if it does not exist.
    fn read_table(&self, name: &str) -> Result<Option<RawTable>>;
}

/// Byte-blob store. A `put` is visible completely or not at all.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Human-readable location of `key`, for logs and run summaries.
    fn uri(&self, key: &str) -> String;
}

/// "Load CSV, truncate-and-replace" primitive of the analytical warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Replace `table` with the contents of the flat file at `source_key`.
    /// Returns the number of rows now in `table`. On any error `table` keeps
    /// its previous contents.
    async fn load_csv_replace(&self, source_key: &str, table: &str)
        -> Result<u64, WarehouseError>;
}
