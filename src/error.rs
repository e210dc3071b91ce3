use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Archive,
    Transform,
    WarehouseLoad,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Load,
        Stage::Archive,
        Stage::Transform,
        Stage::WarehouseLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Archive => "archive",
            Stage::Transform => "transform",
            Stage::WarehouseLoad => "warehouse_load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that survived the completeness filter but violates its column's format.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("raw artifact is not a valid flat file: {0}")]
    MalformedCsv(String),

    #[error("required column `{0}` is absent")]
    MissingColumn(String),

    #[error("row {row}: column `{column}` value {value:?} is not {expected}")]
    Unparseable {
        column: String,
        /// 1-based data row number in the raw artifact.
        row: usize,
        value: String,
        expected: &'static str,
    },
}

/// Stage-level failure. Every variant halts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input error: {0:#}")]
    Input(anyhow::Error),

    #[error("staging table `{0}` does not exist")]
    MissingTable(String),

    #[error("connectivity error: {0:#}")]
    Connectivity(anyhow::Error),

    #[error("data validity error: {0}")]
    DataValidity(#[from] NormalizeError),

    #[error("warehouse load error: {0:#}")]
    WarehouseLoad(anyhow::Error),

    #[error("run cancelled before stage `{0}`")]
    Cancelled(Stage),
}

/// Failure of the warehouse "load CSV, truncate-and-replace" primitive.
///
/// Reading the source blob is kept apart from the load itself: an unreachable
/// bucket is worth retrying, a rejected load is not.
#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("reading load source: {0:#}")]
    Source(anyhow::Error),

    #[error("{0:#}")]
    Load(anyhow::Error),
}

impl From<WarehouseError> for PipelineError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Source(e) => PipelineError::Connectivity(e),
            WarehouseError::Load(e) => PipelineError::WarehouseLoad(e),
        }
    }
}

impl PipelineError {
    /// Only an unreachable store/bucket can be fixed by trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Connectivity(_))
    }
}
