use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Identity of one dataset as it moves through the four stages.
///
/// Built once per run and threaded through every stage, so the staging table
/// name and both object keys are never re-derived ad hoc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    /// Staging table name, also the stem of both object keys.
    pub name: String,
    /// `{raw-prefix}/{name}.csv`
    pub raw_key: String,
    /// `{transformed-prefix}/{name}_transformed.csv`
    pub transformed_key: String,
}

impl DatasetDescriptor {
    pub fn new(name: &str, raw_prefix: &str, transformed_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            raw_key: object_key(raw_prefix, &format!("{}.csv", name)),
            transformed_key: object_key(transformed_prefix, &format!("{}_transformed.csv", name)),
        }
    }
}

/// Joins a bucket "folder" and a file name, tolerating empty or slash-terminated prefixes.
pub fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Dataset name for a flat file: its base name up to the first `.`.
///
/// `sessions.csv` → `sessions`, `sessions.2024.csv` → `sessions`.
pub fn dataset_name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.split('.').next()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Metadata the scheduler hands to one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_id: Option<String>) -> Self {
        let started_at = Utc::now();
        let run_id =
            run_id.unwrap_or_else(|| format!("run_{}", started_at.format("%Y%m%dT%H%M%SZ")));
        Self { run_id, started_at }
    }
}
