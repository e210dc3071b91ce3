use anyhow::{anyhow, Context};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    dataset::DatasetDescriptor,
    error::{PipelineError, Stage},
    ports::{ObjectStore, StagingStore},
    stages::{StageReport, CSV_CONTENT_TYPE},
};

/// Copy staging table `ds.name` verbatim to the raw archive location.
///
/// The staging scan is blocking and runs on the blocking pool.
#[instrument(level = "info", skip(ds, staging, objects), fields(dataset = %ds.name))]
pub async fn archive_dataset(
    ds: &DatasetDescriptor,
    staging: Arc<dyn StagingStore>,
    objects: &dyn ObjectStore,
) -> Result<StageReport, PipelineError> {
    let name = ds.name.clone();
    let table = tokio::task::spawn_blocking(move || {
        staging
            .read_table(&name)
            .with_context(|| format!("reading staging table {}", name))
    })
    .await
    .map_err(|e| PipelineError::Connectivity(anyhow!("staging read task failed: {}", e)))?
    .map_err(PipelineError::Connectivity)?
    .ok_or_else(|| PipelineError::MissingTable(ds.name.clone()))?;

    let bytes = table
        .to_csv_bytes()
        .map_err(PipelineError::Input)?;

    objects
        .put(&ds.raw_key, bytes, CSV_CONTENT_TYPE)
        .await
        .map_err(PipelineError::Connectivity)?;

    let location = objects.uri(&ds.raw_key);
    info!(rows = table.row_count(), %location, "raw snapshot archived");
    Ok(StageReport {
        stage: Stage::Archive,
        dataset: ds.name.clone(),
        rows: table.row_count() as u64,
        location,
    })
}
