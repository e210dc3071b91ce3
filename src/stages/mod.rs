//! The four pipeline stages. Each reads from and writes to named storage
//! locations only; nothing is passed in memory from one stage to the next.

pub mod archive;
pub mod load;
pub mod transform;
pub mod warehouse;

use serde::Serialize;

use crate::error::Stage;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// What one successful stage produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub dataset: String,
    pub rows: u64,
    /// Table name or object URI the stage wrote.
    pub location: String,
}

pub use archive::archive_dataset;
pub use load::{load_directory, LoadReport};
pub use transform::transform_dataset;
pub use warehouse::load_warehouse;
