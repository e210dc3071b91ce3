use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionflow::{
    config::PipelineConfig,
    dataset::RunContext,
    error::Stage,
    pipeline::{CancelFlag, Pipeline},
};
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Weekly internet-session pipeline: flat files → staging → raw → transformed → warehouse.
#[derive(Parser, Debug)]
#[command(name = "sessionflow", version)]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long, env = "SESSIONFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all four stages once
    Run {
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Load the input directory into staging tables
    Load,
    /// Export the dataset's staging table to the raw location
    Archive,
    /// Normalize the raw artifact into the transformed location
    Transform,
    /// Replace the warehouse table with the transformed artifact
    Warehouse,
    /// Run the full pipeline now and then every `schedule.interval_secs`
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;
    info!(
        input_dir = %config.input_dir.display(),
        dataset = %config.dataset,
        warehouse_table = %config.warehouse.table,
        "configuration loaded"
    );

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping before the next stage");
                cancel.cancel();
            }
        });
    }

    let pipeline = Pipeline::connect(&config)
        .await
        .context("connecting pipeline stores")?
        .with_cancel(cancel);

    let single = match cli.command {
        Command::Run { run_id } => {
            let summary = pipeline.run(&RunContext::new(run_id)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }
        Command::Schedule => {
            let every = Duration::from_secs(config.schedule.interval_secs);
            pipeline.run_scheduled(every).await;
            return Ok(());
        }
        Command::Load => Stage::Load,
        Command::Archive => Stage::Archive,
        Command::Transform => Stage::Transform,
        Command::Warehouse => Stage::WarehouseLoad,
    };

    let reports = pipeline.run_stage(single).await?;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
