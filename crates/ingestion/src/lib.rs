//! HRRR point extraction.
//!
//! Pulls values of selected weather variables at fixed points out of HRRR
//! GRIB2 forecasts and writes them to an idempotent store.
//!
//! # Architecture
//!
//! For every planned (run date, cycle, forecast hour) the [`Pipeline`]:
//!
//! - stages the remote file to local disk ([`Stager`]), fetching only the
//!   requested messages when an `.idx` inventory exists
//! - scans message headers and keeps those the [`VariableResolver`] wants
//! - resolves target points once per grid through the shared grid index cache
//! - reads each matched message's values at the resolved cells
//! - upserts the records through a [`ForecastSink`]
//!
//! Failures are isolated per file and summarised in a [`RunSummary`].

pub mod config;
pub mod decoder;
pub mod error;
pub mod extract;
pub mod idx;
pub mod pipeline;
pub mod points;
pub mod run;
pub mod sink;
pub mod staging;
pub mod variables;

// Re-exports
pub use config::{IngestConfig, RetryConfig};
pub use decoder::{
    DecoderFactory, Grib2Decoder, Grib2Source, MemoryDecoder, MemoryMessage, MemorySource,
    MessageHeader, MessageSource,
};
pub use error::{IngestionError, Result};
pub use extract::{build_records, extract, value_at, PointMapping, PointMatch};
pub use pipeline::{FileReport, FileStatus, Pipeline, PipelineOptions, RunSummary};
pub use points::{load_points, parse_points, TargetPoint};
pub use run::{
    default_run_date, parse_cycle, parse_forecast_hours, parse_run_date, plan_runs,
    ForecastRunKey, DEFAULT_KEY_TEMPLATE,
};
pub use sink::ForecastSink;
pub use staging::{StagedFile, Stager, StagingMode, StagingOptions};
pub use variables::{
    hrrr_variables, parse_variable_list, VariableCatalog, VariableResolver, VariableSelector,
    VariableSpec,
};
