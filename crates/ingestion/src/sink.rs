//! Destination for extraction records.

use async_trait::async_trait;
use storage::{ExtractionRecord, ForecastStore, StorageError, UpsertOutcome};

/// Writes records so that each natural key is stored at most once.
#[async_trait]
pub trait ForecastSink: Send + Sync {
    /// Insert new keys and rewrite existing ones only when they changed.
    /// Per-record failures are reported in the outcome; an `Err` means the
    /// batch as a whole could not be written.
    async fn upsert(&self, records: &[ExtractionRecord]) -> Result<UpsertOutcome, StorageError>;
}

#[async_trait]
impl ForecastSink for ForecastStore {
    async fn upsert(&self, records: &[ExtractionRecord]) -> Result<UpsertOutcome, StorageError> {
        ForecastStore::upsert(self, records).await
    }
}
