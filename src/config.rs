// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::dataset::DatasetDescriptor;

/// Everything a run needs, resolved once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory of flat files the Loader ingests.
    pub input_dir: PathBuf,
    /// Dataset the Archiver, Normalizer and Warehouse Loader act on.
    pub dataset: String,
    pub staging: StagingConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StagingConfig {
    /// DuckDB file, or `:memory:`.
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs { bucket: String },
    Local { root: PathBuf },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(flatten)]
    pub backend: StorageBackend,
    pub raw_prefix: String,
    pub transformed_prefix: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseConfig {
    pub db_path: String,
    pub table: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("import_data"),
            dataset: "internet_session".into(),
            staging: StagingConfig::default(),
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            db_path: "staging.duckdb".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Gcs {
                bucket: "internet_usage_project_cp".into(),
            },
            raw_prefix: "internet_usage_raw_data".into(),
            transformed_prefix: "internet_usage_transformed_data".into(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_path: "warehouse.duckdb".into(),
            table: "internet_session".into(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            delay_secs: 180,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl PipelineConfig {
    /// Read the YAML file at `path` (or start from defaults), then apply
    /// `SESSIONFLOW_*` environment overrides. Called once, from `main`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("SESSIONFLOW_INPUT_DIR") {
            self.input_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("SESSIONFLOW_DATASET") {
            self.dataset = name;
        }
        if let Some(bucket) = lookup("SESSIONFLOW_GCS_BUCKET") {
            self.storage.backend = StorageBackend::Gcs { bucket };
        }
    }

    /// The descriptor every stage of this run works against.
    pub fn descriptor(&self) -> DatasetDescriptor {
        DatasetDescriptor::new(
            &self.dataset,
            &self.storage.raw_prefix,
            &self.storage.transformed_prefix,
        )
    }
}
