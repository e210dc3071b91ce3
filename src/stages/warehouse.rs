use tracing::{info, instrument};

use crate::{
    dataset::DatasetDescriptor,
    error::{PipelineError, Stage},
    ports::Warehouse,
    stages::StageReport,
};

/// Truncate-and-replace `table` with the transformed snapshot of `ds`.
///
/// A source blob that cannot be read is a connectivity failure; a load the
/// warehouse rejects is a warehouse-load failure.
#[instrument(level = "info", skip(ds, warehouse), fields(dataset = %ds.name))]
pub async fn load_warehouse(
    ds: &DatasetDescriptor,
    warehouse: &dyn Warehouse,
    table: &str,
) -> Result<StageReport, PipelineError> {
    let rows = warehouse
        .load_csv_replace(&ds.transformed_key, table)
        .await
        .map_err(PipelineError::from)?;
    info!(table, rows, "warehouse load complete");
    Ok(StageReport {
        stage: Stage::WarehouseLoad,
        dataset: ds.name.clone(),
        rows,
        location: table.to_string(),
    })
}
