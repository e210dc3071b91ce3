pub mod retry;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{error, info, info_span, warn, Instrument};

use crate::{
    config::{PipelineConfig, StorageBackend},
    dataset::{DatasetDescriptor, RunContext},
    duck::{DuckStagingStore, DuckWarehouse},
    error::{PipelineError, Stage},
    ports::{ObjectStore, StagingStore, Warehouse},
    stages::{self, StageReport},
    storage::{GcsObjectStore, LocalObjectStore},
};
use retry::{run_with_retry, RetryPolicy};

/// Run-level cancellation. Checked before each stage starts; a stage in
/// progress always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called, immediately if it already was.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn check(&self, next: Stage) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled(next))
        } else {
            Ok(())
        }
    }
}

/// Outcome of one complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub dataset: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub stages: Vec<StageReport>,
}

/// Loader → Archiver → Normalizer → Warehouse Loader, strictly in sequence.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    staging: Arc<dyn StagingStore>,
    objects: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    retry: RetryPolicy,
    cancel: CancelFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        staging: Arc<dyn StagingStore>,
        objects: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            config,
            staging,
            objects,
            warehouse,
            retry: RetryPolicy::from(&config.retry),
            cancel: CancelFlag::new(),
        }
    }

    /// Open the stores `config` names: DuckDB staging and warehouse files,
    /// and either a GCS bucket or a local object directory.
    pub async fn connect(config: &'a PipelineConfig) -> anyhow::Result<Self> {
        let staging: Arc<dyn StagingStore> = Arc::new(
            DuckStagingStore::open(&config.staging.db_path).context("opening staging store")?,
        );
        let objects: Arc<dyn ObjectStore> = match &config.storage.backend {
            StorageBackend::Gcs { bucket } => Arc::new(GcsObjectStore::connect(bucket).await?),
            StorageBackend::Local { root } => Arc::new(LocalObjectStore::new(root)?),
        };
        let warehouse: Arc<dyn Warehouse> = Arc::new(
            DuckWarehouse::open(&config.warehouse.db_path, objects.clone())
                .context("opening warehouse")?,
        );
        Ok(Self::new(config, staging, objects, warehouse))
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run all four stages. The first failure (after retries) halts the run;
    /// the warehouse table is only replaced when every earlier stage succeeded.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, PipelineError> {
        let ds = self.config.descriptor();
        let span = info_span!("run", run_id = %ctx.run_id, dataset = %ds.name);

        async {
            let started = Instant::now();
            info!("run started");
            let mut reports = Vec::new();

            for stage in Stage::ALL {
                self.cancel.check(stage)?;
                let produced = self.execute(stage, &ds).await?;
                if stage == Stage::Load && !produced.iter().any(|r| r.dataset == ds.name) {
                    return Err(PipelineError::Input(anyhow!(
                        "no flat file in {} produced dataset `{}`",
                        self.config.input_dir.display(),
                        ds.name
                    )));
                }
                reports.extend(produced);
            }

            let elapsed = started.elapsed();
            info!(elapsed_ms = elapsed.as_millis() as u64, "run complete");
            Ok(RunSummary {
                run_id: ctx.run_id.clone(),
                dataset: ds.name.clone(),
                started_at: ctx.started_at,
                elapsed_secs: elapsed.as_secs_f64(),
                stages: reports,
            })
        }
        .instrument(span)
        .await
    }

    /// Run now, then once every `every` until cancelled. Ticks missed while a
    /// run is in progress are skipped, so runs never overlap. A failed run is
    /// logged and the schedule carries on. Returns how many runs were started.
    pub async fn run_scheduled(&self, every: Duration) -> u64 {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "scheduler started");

        let mut runs = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.cancel.cancelled() => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }

            runs += 1;
            match self.run(&RunContext::new(None)).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    elapsed_secs = summary.elapsed_secs,
                    "scheduled run succeeded"
                ),
                Err(e) => error!(error = %e, "scheduled run failed"),
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }
        info!(runs, "scheduler stopped");
        runs
    }

    /// Run one stage on its own, with the same retry policy as a full run.
    pub async fn run_stage(&self, stage: Stage) -> Result<Vec<StageReport>, PipelineError> {
        let ds = self.config.descriptor();
        self.cancel.check(stage)?;
        self.execute(stage, &ds).await
    }

    async fn execute(
        &self,
        stage: Stage,
        ds: &DatasetDescriptor,
    ) -> Result<Vec<StageReport>, PipelineError> {
        info!(%stage, "stage started");
        let reports = match stage {
            Stage::Load => {
                run_with_retry(stage, self.retry, move || async move {
                    self.load_blocking().await
                })
                .await?
            }
            Stage::Archive => vec![
                run_with_retry(stage, self.retry, move || async move {
                    stages::archive_dataset(ds, Arc::clone(&self.staging), self.objects.as_ref())
                        .await
                })
                .await?,
            ],
            Stage::Transform => vec![
                run_with_retry(stage, self.retry, move || async move {
                    stages::transform_dataset(ds, self.objects.as_ref()).await
                })
                .await?,
            ],
            Stage::WarehouseLoad => vec![
                run_with_retry(stage, self.retry, move || async move {
                    stages::load_warehouse(
                        ds,
                        self.warehouse.as_ref(),
                        &self.config.warehouse.table,
                    )
                    .await
                })
                .await?,
            ],
        };
        info!(%stage, outputs = reports.len(), "stage succeeded");
        Ok(reports)
    }

    /// Parsing and bulk writes are blocking; keep them off the async workers.
    async fn load_blocking(&self) -> Result<Vec<StageReport>, PipelineError> {
        let dir = self.config.input_dir.clone();
        let staging = Arc::clone(&self.staging);
        let report = tokio::task::spawn_blocking(move || {
            stages::load_directory(&dir, staging.as_ref())
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "load task aborted");
            PipelineError::Input(anyhow!("load task failed: {}", e))
        })??;
        Ok(report.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, StagingConfig};
    use crate::duck::open_mem_db;
    use crate::process::raw_table::RawTable;
    use anyhow::Result;
    use std::{fs, path::Path};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,sessionflow=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    const SESSIONS: &str = "\
Name,Start_Time,Usage_Time,IP,MAC,Upload,Download,Total_Transfer,Seession_Break_Reason
alice,2022-05-08 20:37:00,00:01:30:00,10.0.0.1,aa:bb:cc:00:00:01,1048576.0 KB,2097152.0 KB,3145728,Idle-Timeout
bob,05/09/2022 08:00,00:00:45:10,10.0.0.2,aa:bb:cc:00:00:02,512.5 KB,1024.25 KB,1537,Lost-Carrier
carol,2022-05-10 12:15:30,00:02:00:00,10.0.0.3,aa:bb:cc:00:00:03,0.0 KB,10.5 KB,11,Session-Timeout
dave,2022-05-11 09:00:00,00:00:05:00,10.0.0.4,aa:bb:cc:00:00:04,1.5 KB,,2,User-Request
";

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
        staging: Arc<DuckStagingStore>,
        objects: Arc<LocalObjectStore>,
        warehouse: Arc<DuckWarehouse>,
    }

    impl Fixture {
        fn new(sessions_csv: &str) -> Result<Self> {
            init_test_logging();
            let dir = tempfile::tempdir()?;
            let input = dir.path().join("import");
            fs::create_dir_all(&input)?;
            fs::write(input.join("sessions.csv"), sessions_csv)?;

            let config = PipelineConfig {
                input_dir: input,
                dataset: "sessions".into(),
                staging: StagingConfig {
                    db_path: ":memory:".into(),
                },
                storage: crate::config::StorageConfig {
                    backend: StorageBackend::Local {
                        root: dir.path().join("objects"),
                    },
                    raw_prefix: "raw".into(),
                    transformed_prefix: "transformed".into(),
                },
                retry: RetryConfig {
                    retries: 0,
                    delay_secs: 0,
                },
                ..PipelineConfig::default()
            };

            let objects = Arc::new(LocalObjectStore::new(dir.path().join("objects"))?);
            let warehouse = Arc::new(DuckWarehouse::new(open_mem_db()?, objects.clone()));
            Ok(Self {
                _dir: dir,
                config,
                staging: Arc::new(DuckStagingStore::new(open_mem_db()?)),
                objects,
                warehouse,
            })
        }

        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline::new(
                &self.config,
                self.staging.clone(),
                self.objects.clone(),
                self.warehouse.clone(),
            )
        }

        fn input_path(&self) -> &Path {
            &self.config.input_dir
        }

        /// A pipeline whose Loader raises `cancel` while it writes staging.
        fn pipeline_cancelled_during_load(&self, cancel: &CancelFlag) -> Pipeline<'_> {
            let staging = CancelOnWrite {
                inner: self.staging.clone(),
                cancel: cancel.clone(),
            };
            Pipeline::new(
                &self.config,
                Arc::new(staging),
                self.objects.clone(),
                self.warehouse.clone(),
            )
            .with_cancel(cancel.clone())
        }
    }

    struct CancelOnWrite {
        inner: Arc<DuckStagingStore>,
        cancel: CancelFlag,
    }

    impl StagingStore for CancelOnWrite {
        fn replace_table(&self, name: &str, table: &RawTable) -> Result<()> {
            self.cancel.cancel();
            self.inner.replace_table(name, table)
        }

        fn read_table(&self, name: &str) -> Result<Option<RawTable>> {
            self.inner.read_table(name)
        }
    }

    #[tokio::test]
    async fn end_to_end_drops_incomplete_row() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let summary = fx.pipeline().run(&RunContext::new(Some("test".into()))).await?;

        let stages: Vec<_> = summary.stages.iter().map(|r| (r.stage, r.rows)).collect();
        assert_eq!(
            stages,
            vec![
                (Stage::Load, 4),
                (Stage::Archive, 4),
                (Stage::Transform, 3),
                (Stage::WarehouseLoad, 3),
            ]
        );

        assert_eq!(fx.staging.read_table("sessions")?.map(|t| t.row_count()), Some(4));
        let raw = RawTable::from_csv_bytes(&fx.objects.get("raw/sessions.csv").await?)?;
        assert_eq!(raw.row_count(), 4);

        let transformed =
            RawTable::from_csv_bytes(&fx.objects.get("transformed/sessions_transformed.csv").await?)?;
        assert_eq!(transformed.row_count(), 3);
        assert_eq!(transformed.headers.len(), raw.headers.len() + 3);
        assert_eq!(
            &transformed.headers[transformed.headers.len() - 3..],
            &["upload_gb", "download_gb", "total_transfer_gb"]
        );
        assert!(transformed.headers.contains(&"session_break_reason".to_string()));

        assert_eq!(fx.warehouse.row_count("internet_session")?, Some(3));
        assert_eq!(fx.warehouse.columns("internet_session")?, transformed.headers);
        Ok(())
    }

    #[tokio::test]
    async fn rerun_replaces_every_artifact() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let pipeline = fx.pipeline();
        pipeline.run(&RunContext::new(None)).await?;
        let first = fx.objects.get("transformed/sessions_transformed.csv").await?;

        pipeline.run(&RunContext::new(None)).await?;
        let second = fx.objects.get("transformed/sessions_transformed.csv").await?;
        assert_eq!(first, second);
        assert_eq!(fx.warehouse.row_count("internet_session")?, Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_value_halts_run_and_keeps_previous_warehouse_data() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        fx.pipeline().run(&RunContext::new(None)).await?;

        let broken = SESSIONS.replace("512.5 KB", "512 KB");
        fs::write(fx.input_path().join("sessions.csv"), broken)?;
        let err = fx.pipeline().run(&RunContext::new(None)).await.unwrap_err();
        assert!(matches!(err, PipelineError::DataValidity(_)));

        assert_eq!(fx.warehouse.row_count("internet_session")?, Some(3));
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_skips_remaining_stages() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = fx
            .pipeline()
            .with_cancel(cancel)
            .run(&RunContext::new(None))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(Stage::Load)));
        assert!(fx.staging.read_table("sessions")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_mid_run_stops_before_the_next_stage() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let cancel = CancelFlag::new();
        let err = fx
            .pipeline_cancelled_during_load(&cancel)
            .run(&RunContext::new(None))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(Stage::Archive)));
        assert_eq!(fx.staging.read_table("sessions")?.map(|t| t.row_count()), Some(4));
        assert!(fx.objects.get("raw/sessions.csv").await.is_err());
        assert_eq!(fx.warehouse.row_count("internet_session")?, None);
        Ok(())
    }

    #[tokio::test]
    async fn scheduler_stops_after_a_cancelled_run() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let cancel = CancelFlag::new();
        let pipeline = fx.pipeline_cancelled_during_load(&cancel);

        let runs = tokio::time::timeout(
            Duration::from_secs(30),
            pipeline.run_scheduled(Duration::from_secs(3600)),
        )
        .await?;
        assert_eq!(runs, 1);
        Ok(())
    }

    #[tokio::test]
    async fn scheduler_wakes_on_cancel_between_ticks() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let cancel = CancelFlag::new();
        let pipeline = fx.pipeline().with_cancel(cancel.clone());

        let (runs, ()) = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::join!(pipeline.run_scheduled(Duration::from_secs(3600)), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        })
        .await?;
        assert_eq!(runs, 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_resolves_for_late_and_early_waiters() -> Result<()> {
        let cancel = CancelFlag::new();
        let waiter = cancel.clone();
        let wait = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), wait).await??;

        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn run_fails_when_input_lacks_the_dataset() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        fs::rename(
            fx.input_path().join("sessions.csv"),
            fx.input_path().join("other.csv"),
        )?;
        let err = fx.pipeline().run(&RunContext::new(None)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
        assert!(fx.objects.get("raw/sessions.csv").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn single_stages_run_in_isolation() -> Result<()> {
        let fx = Fixture::new(SESSIONS)?;
        let pipeline = fx.pipeline();
        let loaded = pipeline.run_stage(Stage::Load).await?;
        assert_eq!(loaded.len(), 1);
        let archived = pipeline.run_stage(Stage::Archive).await?;
        assert_eq!(archived[0].rows, 4);
        assert!(archived[0].location.ends_with("raw/sessions.csv"));
        Ok(())
    }
}
