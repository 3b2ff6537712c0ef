//! Error types for the ingestion crate.
//!
//! Failures are classified so the pipeline can decide, per file or per
//! record, whether to skip, retry, or report and carry on.

use grib2_parser::Grib2Error;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The remote file for this run does not exist (yet).
    #[error("Not available: {key}")]
    NotAvailable { key: String },

    /// Network or disk failure while staging; worth retrying.
    #[error("Transient I/O failure for {key}: {reason}")]
    TransientIo { key: String, reason: String },

    #[error("Corrupt file {key}: {reason}")]
    CorruptFile { key: String, reason: String },

    #[error("Unknown variable(s): {}", .0.join(", "))]
    UnknownVariable(Vec<String>),

    #[error("Point {point_id} is {distance_km:.1} km from the nearest grid cell (limit {limit_km} km)")]
    OutOfDomain {
        point_id: String,
        distance_km: f64,
        limit_km: f64,
    },

    #[error("Storage conflict for {key}: {reason}")]
    StorageConflict { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid points file: {0}")]
    InvalidPoints(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestionError {
    /// Map a remote-source failure for `key` into the taxonomy.
    pub fn from_remote(key: &str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => IngestionError::NotAvailable {
                key: key.to_string(),
            },
            other => IngestionError::TransientIo {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Map a local disk failure while staging `key`.
    pub fn from_staging_io(key: &str, err: std::io::Error) -> Self {
        IngestionError::TransientIo {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn corrupt(key: &str, err: Grib2Error) -> Self {
        IngestionError::CorruptFile {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// Only transient staging failures are retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestionError::TransientIo { .. })
    }

    /// Stable tag used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::NotAvailable { .. } => "not_available",
            IngestionError::TransientIo { .. } => "transient_io",
            IngestionError::CorruptFile { .. } => "corrupt_file",
            IngestionError::UnknownVariable(_) => "unknown_variable",
            IngestionError::OutOfDomain { .. } => "out_of_domain",
            IngestionError::StorageConflict { .. } => "storage_conflict",
            IngestionError::InvalidConfig(_) => "invalid_config",
            IngestionError::InvalidPoints(_) => "invalid_points",
            IngestionError::Io(_) => "io",
            IngestionError::Storage(_) => "storage",
            IngestionError::Cancelled => "cancelled",
            IngestionError::Other(_) => "other",
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
