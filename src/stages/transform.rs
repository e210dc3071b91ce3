use anyhow::Context;
use tracing::{info, instrument};

use crate::{
    dataset::DatasetDescriptor,
    error::{NormalizeError, PipelineError, Stage},
    ports::ObjectStore,
    process::{normalize, raw_table::RawTable},
    stages::{StageReport, CSV_CONTENT_TYPE},
};

/// Download the raw snapshot, normalise it, upload the transformed snapshot.
///
/// A value that fails to parse fails the stage and nothing is uploaded.
#[instrument(level = "info", skip(ds, objects), fields(dataset = %ds.name))]
pub async fn transform_dataset(
    ds: &DatasetDescriptor,
    objects: &dyn ObjectStore,
) -> Result<StageReport, PipelineError> {
    let raw_bytes = objects
        .get(&ds.raw_key)
        .await
        .map_err(PipelineError::Connectivity)?;

    let raw = RawTable::from_csv_bytes(&raw_bytes)
        .map_err(|e| NormalizeError::MalformedCsv(format!("{:#}", e)))?;
    let table = normalize(&raw)?;
    info!(
        raw_rows = raw.row_count(),
        kept_rows = table.row_count(),
        "normalised"
    );

    let bytes = table
        .to_csv_bytes()
        .context("serialising transformed snapshot")
        .map_err(PipelineError::Input)?;
    objects
        .put(&ds.transformed_key, bytes, CSV_CONTENT_TYPE)
        .await
        .map_err(PipelineError::Connectivity)?;

    let location = objects.uri(&ds.transformed_key);
    info!(%location, "transformed snapshot uploaded");
    Ok(StageReport {
        stage: Stage::Transform,
        dataset: ds.name.clone(),
        rows: table.row_count() as u64,
        location,
    })
}
