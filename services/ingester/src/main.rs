//! HRRR point ingester.
//!
//! Downloads HRRR surface forecasts from the NOAA archive, extracts the
//! requested variables at the points of a CSV file, and upserts them into
//! a SQLite table:
//! - Partial downloads through the `.idx` inventory when available
//! - Automatic retry with exponential backoff
//! - Idempotent writes, so interrupted runs can simply be repeated

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ingestion::{load_points, ForecastSink, IngestConfig, Pipeline, Stager};
use storage::{ForecastStore, RemoteSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "hrrr-ingest")]
#[command(about = "Extract HRRR forecast values at points into SQLite")]
pub struct Args {
    /// CSV file with latitude/longitude columns and an optional id column
    #[arg(required_unless_present = "list_variables")]
    pub points_file: Option<PathBuf>,

    /// Newest run date to ingest (YYYYMMDD, default: yesterday UTC)
    #[arg(long)]
    pub run_date: Option<String>,

    /// Comma-separated variable names (default: all)
    #[arg(long)]
    pub variables: Option<String>,

    /// Hours of daily runs to look back from the run date
    #[arg(long)]
    pub num_hours: Option<u32>,

    /// Model cycle hour (00-23)
    #[arg(long)]
    pub cycle: Option<String>,

    /// Forecast hours as a range ("0-15") or a list ("0,3,6")
    #[arg(long)]
    pub forecast_hours: Option<String>,

    /// HRRR product, e.g. wrfsfc
    #[arg(long)]
    pub file_type: Option<String>,

    /// SQLite database file
    #[arg(long)]
    pub db_file: Option<PathBuf>,

    /// Table to write into
    #[arg(long)]
    pub table_name: Option<String>,

    /// YAML configuration file
    #[arg(long, env = "HRRR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Files processed at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Flag points whose nearest grid cell is farther than this (km)
    #[arg(long)]
    pub out_of_domain_km: Option<f64>,

    /// Directory for staged downloads
    #[arg(long, env = "HRRR_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Always download whole files, ignoring `.idx` inventories
    #[arg(long)]
    pub no_index: bool,

    /// Log level
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Print the variable catalog and exit
    #[arg(long)]
    pub list_variables: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    if args.list_variables {
        let config = config::load(&args)?;
        print!("{}", config::render_catalog(&config.catalog()?));
        return Ok(());
    }

    let config = config::load(&args)?;
    let variables = Arc::new(config.resolver()?);

    let points_file = args
        .points_file
        .as_deref()
        .context("a points file is required")?;
    let points = load_points(points_file)
        .with_context(|| format!("loading points from {}", points_file.display()))?;

    let plan = config.plan(Utc::now())?;
    info!(
        files = plan.len(),
        points = points.len(),
        variables = ?variables.names().collect::<Vec<_>>(),
        db_file = %config.db_file.display(),
        "Starting HRRR ingestion"
    );

    let store = ForecastStore::open(&config.db_file, &config.table_name)
        .await
        .with_context(|| format!("opening store {}", config.db_file.display()))?;
    let source = RemoteSource::new(&config.source).context("creating remote source")?;

    let summary = {
        let pipeline = build_pipeline(&config, source, store.clone(), variables, points);

        // Handle Ctrl+C
        let cancel = pipeline.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received shutdown signal, cancelling in-flight files");
                cancel.cancel();
            }
        });

        pipeline.run(&plan).await
    };

    store.close().await;
    println!("{}", summary.render());
    Ok(())
}

fn build_pipeline(
    config: &IngestConfig,
    source: RemoteSource,
    store: ForecastStore,
    variables: Arc<ingestion::VariableResolver>,
    points: Vec<ingestion::TargetPoint>,
) -> Pipeline {
    let stager = Stager::new(source, config.staging_options(), variables.clone());
    let sink: Arc<dyn ForecastSink> = Arc::new(store);
    Pipeline::new(stager, sink, variables, points, config.pipeline_options())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}
