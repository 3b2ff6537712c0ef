//! Remote staging: copy one forecast file to local disk for decoding.
//!
//! The decoder needs a real file handle, so the object is written to a
//! named temporary file first. When the `.idx` inventory is available only
//! the byte ranges of requested messages are fetched. The staged file is
//! deleted when its [`StagedFile`] is dropped, whichever way processing ends.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use storage::RemoteSource;

use crate::config::RetryConfig;
use crate::error::{IngestionError, Result};
use crate::idx::{offset_beyond, parse_idx, select_ranges};
use crate::run::{ForecastRunKey, DEFAULT_KEY_TEMPLATE};
use crate::variables::VariableResolver;

/// How much of the remote object ended up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingMode {
    /// The whole object
    Full,
    /// Only the listed byte ranges, concatenated
    Partial { ranges: Vec<Range<u64>> },
}

/// A forecast file on local disk. Removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    file: NamedTempFile,
    run_key: ForecastRunKey,
    source: String,
    bytes: u64,
    mode: StagingMode,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn run_key(&self) -> &ForecastRunKey {
        &self.run_key
    }

    /// Object key the file came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn mode(&self) -> &StagingMode {
        &self.mode
    }

    /// Delete the local copy now, reporting any error.
    pub fn close(self) -> Result<()> {
        self.file.close()?;
        Ok(())
    }
}

/// Staging settings.
#[derive(Debug, Clone)]
pub struct StagingOptions {
    pub key_template: String,
    pub file_type: String,
    /// Directory for staged files; the system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    /// Fetch only requested messages when an `.idx` inventory exists
    pub use_index: bool,
    pub retry: RetryConfig,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            key_template: DEFAULT_KEY_TEMPLATE.to_string(),
            file_type: "wrfsfc".to_string(),
            staging_dir: None,
            use_index: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Fetches forecast files into scoped local copies.
pub struct Stager {
    source: RemoteSource,
    options: StagingOptions,
    variables: Arc<VariableResolver>,
}

impl Stager {
    pub fn new(source: RemoteSource, options: StagingOptions, variables: Arc<VariableResolver>) -> Self {
        Self {
            source,
            options,
            variables,
        }
    }

    pub fn object_key(&self, run_key: &ForecastRunKey) -> String {
        run_key.object_key(&self.options.key_template, &self.options.file_type)
    }

    /// Stage one forecast file, retrying transient failures with backoff.
    ///
    /// A missing object fails immediately with `NotAvailable`.
    #[instrument(skip(self, run_key), fields(run_key = %run_key))]
    pub async fn stage(&self, run_key: &ForecastRunKey) -> Result<StagedFile> {
        let object_key = self.object_key(run_key);
        let file = self.temp_file(&object_key)?;

        let retry = &self.options.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut delay = retry.initial_delay();
        let mut attempt = 0;
        let started = Instant::now();

        loop {
            attempt += 1;
            match self.attempt(&object_key, &file).await {
                Ok((bytes, mode)) => {
                    metrics::counter!("staging_bytes_total").increment(bytes);
                    metrics::histogram!("staging_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    info!(
                        key = %object_key,
                        bytes,
                        partial = matches!(mode, StagingMode::Partial { .. }),
                        attempt,
                        "Staged file"
                    );
                    return Ok(StagedFile {
                        file,
                        run_key: *run_key,
                        source: object_key,
                        bytes,
                        mode,
                    });
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    metrics::counter!("staging_retries_total").increment(1);
                    warn!(
                        key = %object_key,
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Staging failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, retry.max_delay());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn temp_file(&self, object_key: &str) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("hrrr-").suffix(".grib2");
        let file = match &self.options.staging_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| IngestionError::from_staging_io(object_key, e))?;
                builder.tempfile_in(dir)
            }
            None => builder.tempfile(),
        };
        file.map_err(|e| IngestionError::from_staging_io(object_key, e))
    }

    /// One full staging attempt into `file`, truncating whatever a previous
    /// attempt left behind.
    async fn attempt(&self, object_key: &str, file: &NamedTempFile) -> Result<(u64, StagingMode)> {
        let io_err = |e: std::io::Error| IngestionError::from_staging_io(object_key, e);

        let size = self
            .source
            .head(object_key)
            .await
            .map_err(|e| IngestionError::from_remote(object_key, e))?
            .ok_or_else(|| IngestionError::NotAvailable {
                key: object_key.to_string(),
            })?;

        file.as_file().set_len(0).map_err(io_err)?;
        let mut out = tokio::fs::File::from_std(file.reopen().map_err(io_err)?);

        let ranges = if self.options.use_index {
            self.plan_ranges(object_key, size).await
        } else {
            None
        };

        match ranges {
            Some(ranges) => {
                let mut written = 0u64;
                for range in &ranges {
                    let bytes = self
                        .source
                        .get_range(object_key, range.start as usize..range.end as usize)
                        .await
                        .map_err(|e| IngestionError::from_remote(object_key, e))?;
                    out.write_all(&bytes).await.map_err(io_err)?;
                    written += bytes.len() as u64;
                }
                out.flush().await.map_err(io_err)?;
                debug!(key = %object_key, ranges = ranges.len(), written, "Fetched indexed ranges");
                Ok((written, StagingMode::Partial { ranges }))
            }
            None => {
                let written = self
                    .source
                    .get_to_writer(object_key, &mut out)
                    .await
                    .map_err(|e| match e {
                        storage::StorageError::Io(io) => io_err(io),
                        other => IngestionError::from_remote(object_key, other),
                    })?;
                Ok((written, StagingMode::Full))
            }
        }
    }

    /// Byte ranges of requested messages according to the `.idx` companion.
    /// `None` means fetch the whole object.
    async fn plan_ranges(&self, object_key: &str, size: u64) -> Option<Vec<Range<u64>>> {
        let idx_key = format!("{}.idx", object_key);
        let text = match self.source.get(&idx_key).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.is_not_found() => {
                debug!(key = %idx_key, "No inventory, fetching whole file");
                return None;
            }
            Err(e) => {
                warn!(key = %idx_key, error = %e, "Inventory fetch failed, fetching whole file");
                return None;
            }
        };

        let entries = match parse_idx(&text) {
            Ok(entries) => entries,
            Err(reason) => {
                warn!(key = %idx_key, reason = %reason, "Unparsable inventory, fetching whole file");
                return None;
            }
        };

        if let Some(offset) = offset_beyond(&entries, size) {
            warn!(
                key = %idx_key,
                offset,
                size,
                "Inventory offset past end of object, fetching whole file"
            );
            return None;
        }

        let ranges = select_ranges(&entries, size, |name| {
            self.variables.wants_inventory_entry(name)
        });
        if ranges.is_empty() {
            warn!(key = %idx_key, "Inventory lists no requested variable, fetching whole file");
            return None;
        }
        Some(ranges)
    }
}
