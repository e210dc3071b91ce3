use anyhow::{anyhow, Context};
use glob::glob;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::{
    dataset::dataset_name_from_path,
    error::{PipelineError, Stage},
    ports::StagingStore,
    process::raw_table::RawTable,
    stages::StageReport,
};

/// Outcome of loading a directory: one report per staging table written.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub tables: Vec<StageReport>,
}

/// Every `*.csv` directly under `dir`, sorted by path.
pub fn discover_flat_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::Input(anyhow!(
            "input directory {} does not exist or is not a directory",
            dir.display()
        )));
    }
    let pattern = format!("{}/*.csv", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut paths = glob(&pattern)
        .context("invalid glob pattern for input directory")
        .map_err(PipelineError::Input)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("listing {}", dir.display()))
        .map_err(PipelineError::Input)?;
    paths.retain(|p| p.is_file());
    paths.sort();
    Ok(paths)
}

/// Load every flat file in `dir` into a staging table named after it.
///
/// All files are parsed before anything is written, so an unparseable file
/// halts the stage without touching the store. Each table replace is itself
/// all-or-nothing.
#[instrument(level = "info", skip(dir, staging), fields(dir = %dir.display()))]
pub fn load_directory(dir: &Path, staging: &dyn StagingStore) -> Result<LoadReport, PipelineError> {
    let paths = discover_flat_files(dir)?;
    info!(files = paths.len(), "discovered flat files");

    let parsed: Vec<(String, RawTable)> = paths
        .par_iter()
        .map(|path| -> anyhow::Result<(String, RawTable)> {
            let name = dataset_name_from_path(path)
                .ok_or_else(|| anyhow!("cannot derive a dataset name from {}", path.display()))?;
            let table = RawTable::from_csv_path(path)?;
            Ok((name, table))
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(PipelineError::Input)?;

    let mut tables = Vec::with_capacity(parsed.len());
    for (name, table) in parsed {
        staging
            .replace_table(&name, &table)
            .with_context(|| format!("writing staging table {}", name))
            .map_err(PipelineError::Connectivity)?;
        info!(table = %name, rows = table.row_count(), "Table created in staging store");
        tables.push(StageReport {
            stage: Stage::Load,
            dataset: name.clone(),
            rows: table.row_count() as u64,
            location: name,
        });
    }

    Ok(LoadReport { tables })
}
