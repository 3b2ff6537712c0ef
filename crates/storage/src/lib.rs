//! Storage layer for the HRRR point ingester.
//!
//! - [`RemoteSource`]: read-only access to the published GRIB2 archive (S3, HTTP or in-memory)
//! - [`FingerprintCache`]: process-wide, build-once cache of per-grid artefacts
//! - [`ForecastStore`]: SQLite sink with idempotent upserts keyed on the natural key

pub mod error;
pub mod forecast_store;
pub mod grid_cache;
pub mod object_store;

pub use self::object_store::{RemoteSource, RemoteSourceConfig};
pub use error::{Result, StorageError};
pub use forecast_store::{
    ExtractionRecord, ForecastStore, NaturalKey, RecordFailure, UpsertOutcome, DEFAULT_TABLE_NAME,
};
pub use grid_cache::{CacheStats, FingerprintCache, GridIndexCache};
