//! Run orchestration.
//!
//! Each planned file is staged, scanned, extracted and written on its own;
//! files run concurrently up to a limit and share the grid index cache.
//! A failure in one file is recorded in its [`FileReport`] and never stops
//! the others.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use projection::{GridFingerprint, GridIndex};
use storage::{FingerprintCache, GridIndexCache, UpsertOutcome};

use crate::decoder::{DecoderFactory, Grib2Decoder, MessageHeader, MessageSource};
use crate::error::{IngestionError, Result};
use crate::extract::{build_records, PointMapping};
use crate::points::TargetPoint;
use crate::run::ForecastRunKey;
use crate::sink::ForecastSink;
use crate::staging::{StagedFile, Stager};
use crate::variables::VariableResolver;

/// Tuning for a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Files processed at once
    pub concurrency: usize,
    /// Distance beyond which a point's nearest cell is flagged
    pub out_of_domain_km: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            out_of_domain_km: 50.0,
        }
    }
}

/// How processing of one file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Processed,
    NotAvailable,
    DownloadError,
    CorruptFile,
    StorageError,
    Cancelled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processed => "processed",
            FileStatus::NotAvailable => "not_available",
            FileStatus::DownloadError => "download_error",
            FileStatus::CorruptFile => "corrupt_file",
            FileStatus::StorageError => "storage_error",
            FileStatus::Cancelled => "cancelled",
        }
    }

    /// Status for a file whose processing stopped with `err`.
    pub fn from_error(err: &IngestionError) -> Self {
        match err {
            IngestionError::NotAvailable { .. } => FileStatus::NotAvailable,
            IngestionError::TransientIo { .. } | IngestionError::Io(_) => {
                FileStatus::DownloadError
            }
            IngestionError::Storage(_) | IngestionError::StorageConflict { .. } => {
                FileStatus::StorageError
            }
            IngestionError::Cancelled => FileStatus::Cancelled,
            IngestionError::CorruptFile { .. }
            | IngestionError::UnknownVariable(_)
            | IngestionError::OutOfDomain { .. }
            | IngestionError::InvalidConfig(_)
            | IngestionError::InvalidPoints(_)
            | IngestionError::Other(_) => FileStatus::CorruptFile,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileStatus::DownloadError | FileStatus::CorruptFile | FileStatus::StorageError
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one forecast file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub run_key: ForecastRunKey,
    /// Object key of the remote file
    pub source: String,
    pub status: FileStatus,
    pub staged_bytes: u64,
    pub messages_scanned: usize,
    pub messages_matched: usize,
    pub records: usize,
    pub outcome: UpsertOutcome,
    /// Records whose point lies beyond the out-of-domain threshold
    pub out_of_domain: usize,
    pub variables_found: Vec<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl FileReport {
    fn new(run_key: ForecastRunKey, source: String) -> Self {
        Self {
            run_key,
            source,
            status: FileStatus::Processed,
            staged_bytes: 0,
            messages_scanned: 0,
            messages_matched: 0,
            records: 0,
            outcome: UpsertOutcome::default(),
            out_of_domain: 0,
            variables_found: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }
}

/// Aggregate of all file reports of a run, in plan order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reports: Vec<FileReport>,
    pub requested: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn files_attempted(&self) -> usize {
        self.reports.len()
    }

    pub fn files_processed(&self) -> usize {
        self.count(FileStatus::Processed)
    }

    pub fn files_not_available(&self) -> usize {
        self.count(FileStatus::NotAvailable)
    }

    pub fn files_failed(&self) -> usize {
        self.reports.iter().filter(|r| r.status.is_failure()).count()
    }

    pub fn files_cancelled(&self) -> usize {
        self.count(FileStatus::Cancelled)
    }

    pub fn messages_scanned(&self) -> usize {
        self.reports.iter().map(|r| r.messages_scanned).sum()
    }

    pub fn messages_matched(&self) -> usize {
        self.reports.iter().map(|r| r.messages_matched).sum()
    }

    pub fn out_of_domain(&self) -> usize {
        self.reports.iter().map(|r| r.out_of_domain).sum()
    }

    /// Upsert outcomes of every file, merged.
    pub fn outcome(&self) -> UpsertOutcome {
        let mut total = UpsertOutcome::default();
        for report in &self.reports {
            total.merge(report.outcome.clone());
        }
        total
    }

    pub fn records_written(&self) -> usize {
        self.reports.iter().map(|r| r.outcome.written()).sum()
    }

    /// Requested variables seen in at least one file.
    pub fn variables_found(&self) -> BTreeSet<&str> {
        self.reports
            .iter()
            .flat_map(|r| r.variables_found.iter().map(String::as_str))
            .collect()
    }

    /// Requested variables no file contained, in request order.
    pub fn variables_missing(&self) -> Vec<&str> {
        let found = self.variables_found();
        self.requested
            .iter()
            .map(String::as_str)
            .filter(|name| !found.contains(name))
            .collect()
    }

    fn count(&self, status: FileStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }

    /// Human-readable summary with a found/missing checklist of variables.
    pub fn render(&self) -> String {
        let outcome = self.outcome();
        let found = self.variables_found();
        let mut out = String::new();

        let _ = writeln!(out, "Ingestion summary ({:.1}s)", self.elapsed.as_secs_f64());
        let _ = writeln!(
            out,
            "  Files:     {} attempted, {} processed, {} not available, {} failed",
            self.files_attempted(),
            self.files_processed(),
            self.files_not_available(),
            self.files_failed()
        );
        if self.files_cancelled() > 0 {
            let _ = writeln!(out, "  Cancelled: {}", self.files_cancelled());
        }
        let _ = writeln!(
            out,
            "  Messages:  {} scanned, {} matched",
            self.messages_scanned(),
            self.messages_matched()
        );
        let _ = writeln!(
            out,
            "  Records:   {} inserted, {} updated, {} unchanged, {} failed",
            outcome.inserted, outcome.updated, outcome.unchanged, outcome.failed
        );
        if self.out_of_domain() > 0 {
            let _ = writeln!(out, "  Out of domain: {} records", self.out_of_domain());
        }

        let _ = writeln!(
            out,
            "  Variables ({}/{} found):",
            self.requested
                .iter()
                .filter(|n| found.contains(n.as_str()))
                .count(),
            self.requested.len()
        );
        for name in &self.requested {
            let mark = if found.contains(name.as_str()) { "x" } else { " " };
            let _ = writeln!(out, "    [{}] {}", mark, name);
        }

        let problems: Vec<&FileReport> = self
            .reports
            .iter()
            .filter(|r| r.status != FileStatus::Processed)
            .collect();
        if !problems.is_empty() {
            let _ = writeln!(out, "  Skipped or failed:");
            for report in problems {
                let _ = writeln!(
                    out,
                    "    {} {}: {}",
                    report.run_key,
                    report.status,
                    report.error.as_deref().unwrap_or("")
                );
            }
        }
        out
    }
}

type SharedSource = Arc<Mutex<Box<dyn MessageSource>>>;

/// A message selected for extraction.
struct MatchedMessage {
    variable: String,
    header: MessageHeader,
}

struct Scan {
    source: SharedSource,
    scanned: usize,
    matched: Vec<MatchedMessage>,
}

/// Extraction pipeline over a plan of forecast files.
pub struct Pipeline {
    stager: Stager,
    sink: Arc<dyn ForecastSink>,
    variables: Arc<VariableResolver>,
    points: Arc<Vec<TargetPoint>>,
    decoders: Arc<dyn DecoderFactory>,
    grid_cache: Arc<GridIndexCache>,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        stager: Stager,
        sink: Arc<dyn ForecastSink>,
        variables: Arc<VariableResolver>,
        points: Vec<TargetPoint>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            stager,
            sink,
            variables,
            points: Arc::new(points),
            decoders: Arc::new(Grib2Decoder),
            grid_cache: Arc::new(GridIndexCache::new()),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Decode staged files with something other than the GRIB2 reader.
    pub fn with_decoders(mut self, decoders: Arc<dyn DecoderFactory>) -> Self {
        self.decoders = decoders;
        self
    }

    /// Share a grid index cache with other pipelines.
    pub fn with_grid_cache(mut self, cache: Arc<GridIndexCache>) -> Self {
        self.grid_cache = cache;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn grid_cache(&self) -> &Arc<GridIndexCache> {
        &self.grid_cache
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process every planned file and report on each.
    pub async fn run(&self, plan: &[ForecastRunKey]) -> RunSummary {
        let started = Instant::now();
        let mappings: FingerprintCache<PointMapping> = FingerprintCache::new();
        let concurrency = self.options.concurrency.max(1);

        info!(
            files = plan.len(),
            concurrency,
            variables = self.variables.len(),
            points = self.points.len(),
            "Starting ingestion run"
        );

        let mut reports: Vec<(usize, FileReport)> = stream::iter(plan.iter().copied().enumerate())
            .map(|(position, run_key)| {
                let mappings = &mappings;
                async move { (position, self.process_file(run_key, mappings).await) }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        reports.sort_by_key(|(position, _)| *position);

        let summary = RunSummary {
            reports: reports.into_iter().map(|(_, report)| report).collect(),
            requested: self.variables.names().map(str::to_string).collect(),
            elapsed: started.elapsed(),
        };

        let cache = self.grid_cache.stats();
        info!(
            attempted = summary.files_attempted(),
            processed = summary.files_processed(),
            not_available = summary.files_not_available(),
            failed = summary.files_failed(),
            records_written = summary.records_written(),
            grid_builds = cache.builds,
            grid_hit_rate = cache.hit_rate(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Ingestion run finished"
        );
        summary
    }

    #[instrument(skip(self, run_key, mappings), fields(run_key = %run_key))]
    async fn process_file(
        &self,
        run_key: ForecastRunKey,
        mappings: &FingerprintCache<PointMapping>,
    ) -> FileReport {
        let started = Instant::now();
        let mut report = FileReport::new(run_key, self.stager.object_key(&run_key));

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestionError::Cancelled),
            result = self.ingest_file(&run_key, mappings, &mut report) => result,
        };

        report.elapsed = started.elapsed();
        match result {
            Ok(()) => {
                info!(
                    key = %report.source,
                    scanned = report.messages_scanned,
                    matched = report.messages_matched,
                    inserted = report.outcome.inserted,
                    updated = report.outcome.updated,
                    unchanged = report.outcome.unchanged,
                    failed = report.outcome.failed,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Processed file"
                );
            }
            Err(e) => {
                report.status = FileStatus::from_error(&e);
                report.error = Some(e.to_string());
                match report.status {
                    FileStatus::NotAvailable | FileStatus::Cancelled => {
                        warn!(key = %report.source, error = %e, "Skipped file")
                    }
                    _ => error!(key = %report.source, kind = e.kind(), error = %e, "File failed"),
                }
            }
        }

        metrics::counter!("ingest_files_total", "status" => report.status.as_str()).increment(1);
        metrics::counter!("ingest_messages_scanned_total").increment(report.messages_scanned as u64);
        metrics::counter!("ingest_records_written_total").increment(report.outcome.written() as u64);
        metrics::histogram!("ingest_file_duration_seconds").record(report.elapsed.as_secs_f64());
        report
    }

    async fn ingest_file(
        &self,
        run_key: &ForecastRunKey,
        mappings: &FingerprintCache<PointMapping>,
        report: &mut FileReport,
    ) -> Result<()> {
        // Blocking tasks hold a reference, so the file outlives any decode
        // still running after cancellation and is removed right after.
        let staged = Arc::new(self.stager.stage(run_key).await?);
        report.staged_bytes = staged.bytes();
        let key = staged.source().to_string();

        let scan = {
            let staged = staged.clone();
            let decoders = self.decoders.clone();
            let variables = self.variables.clone();
            tokio::task::spawn_blocking(move || {
                scan_messages(decoders.as_ref(), &variables, &staged)
            })
            .await
            .map_err(join_error)??
        };
        report.messages_scanned = scan.scanned;
        report.messages_matched = scan.matched.len();
        report.variables_found = scan.matched.iter().map(|m| m.variable.clone()).collect();
        report.variables_found.sort();

        if scan.matched.is_empty() {
            warn!(key = %key, scanned = scan.scanned, "No requested variables in file");
            return Ok(());
        }

        let mut by_grid: HashMap<GridFingerprint, Arc<PointMapping>> = HashMap::new();
        for matched in &scan.matched {
            let fingerprint = matched.header.fingerprint;
            if by_grid.contains_key(&fingerprint) {
                continue;
            }
            let index = self.grid_index(&scan.source, &matched.header, &key).await?;
            let mapping = self.point_mapping(mappings, index).await?;
            by_grid.insert(fingerprint, mapping);
        }

        let records = {
            let source = scan.source.clone();
            let run_key = *run_key;
            let key = key.clone();
            let work: Vec<(MatchedMessage, Arc<PointMapping>)> = scan
                .matched
                .into_iter()
                .filter_map(|m| {
                    let mapping = by_grid.get(&m.header.fingerprint)?.clone();
                    Some((m, mapping))
                })
                .collect();
            tokio::task::spawn_blocking(move || {
                let mut decoder = lock(&source)?;
                let mut records = Vec::new();
                for (matched, mapping) in &work {
                    let values = decoder
                        .values(&matched.header)
                        .map_err(|e| IngestionError::corrupt(&key, e))?;
                    debug!(
                        variable = %matched.variable,
                        message = %matched.header,
                        points = mapping.len(),
                        "Extracted message"
                    );
                    records.extend(build_records(
                        &run_key,
                        &matched.variable,
                        &matched.header,
                        &values,
                        mapping,
                        &key,
                    ));
                }
                Ok::<_, IngestionError>(records)
            })
            .await
            .map_err(join_error)??
        };
        report.records = records.len();
        report.out_of_domain = records.iter().filter(|r| r.out_of_domain).count();

        let outcome = self.sink.upsert(&records).await?;
        for failure in &outcome.failures {
            let conflict = IngestionError::StorageConflict {
                key: failure.key.to_string(),
                reason: failure.reason.clone(),
            };
            warn!(
                key = %key,
                variable = %failure.key.variable_name,
                point_id = %failure.key.point_id,
                error = %conflict,
                "Record not written"
            );
        }
        report.outcome = outcome;

        drop(staged);
        Ok(())
    }

    /// Shared index for a message's grid. Coordinates are only read from
    /// the file when the cache has no entry for the fingerprint.
    async fn grid_index(
        &self,
        source: &SharedSource,
        header: &MessageHeader,
        key: &str,
    ) -> Result<Arc<GridIndex>> {
        let fingerprint = header.fingerprint;
        self.grid_cache
            .get_or_try_build(fingerprint, || {
                let source = source.clone();
                let header = header.clone();
                let key = key.to_string();
                async move {
                    info!(fingerprint = %fingerprint.short(), key = %key, "Building grid index");
                    let started = Instant::now();
                    let index = tokio::task::spawn_blocking(move || {
                        let coords = lock(&source)?
                            .coordinates(&header)
                            .map_err(|e| IngestionError::corrupt(&key, e))?;
                        GridIndex::build(fingerprint, coords.ni, coords.nj, coords.lats, coords.lons)
                            .map_err(|e| IngestionError::CorruptFile {
                                key: key.clone(),
                                reason: e.to_string(),
                            })
                    })
                    .await
                    .map_err(join_error)??;
                    metrics::histogram!("grid_index_build_seconds")
                        .record(started.elapsed().as_secs_f64());
                    Ok::<_, IngestionError>(index)
                }
            })
            .await
    }

    async fn point_mapping(
        &self,
        mappings: &FingerprintCache<PointMapping>,
        index: Arc<GridIndex>,
    ) -> Result<Arc<PointMapping>> {
        let points = self.points.clone();
        let threshold = self.options.out_of_domain_km;
        mappings
            .get_or_try_build(index.fingerprint(), || async move {
                tokio::task::spawn_blocking(move || PointMapping::build(&index, &points, threshold))
                    .await
                    .map_err(join_error)
            })
            .await
    }
}

/// Walk every header of a staged file, keeping the first message for each
/// requested variable. Any decode error fails the whole file.
fn scan_messages(
    decoders: &dyn DecoderFactory,
    variables: &VariableResolver,
    staged: &StagedFile,
) -> Result<Scan> {
    let key = staged.source();
    let mut source = decoders
        .open(staged.path(), key)
        .map_err(|e| IngestionError::corrupt(key, e))?;

    let mut scanned = 0;
    let mut matched = Vec::new();
    let mut seen = HashSet::new();
    while let Some(header) = source
        .next_message()
        .map_err(|e| IngestionError::corrupt(key, e))?
    {
        scanned += 1;
        let Some(spec) = variables.match_message(&header.parameter, header.level.as_ref()) else {
            continue;
        };
        if !seen.insert(spec.name.clone()) {
            debug!(variable = %spec.name, message = %header, "Ignoring repeated message");
            continue;
        }
        debug!(variable = %spec.name, message = %header, ordinal = header.ordinal, "Matched message");
        matched.push(MatchedMessage {
            variable: spec.name.clone(),
            header,
        });
    }

    Ok(Scan {
        source: Arc::new(Mutex::new(source)),
        scanned,
        matched,
    })
}

fn lock(source: &SharedSource) -> Result<MutexGuard<'_, Box<dyn MessageSource>>> {
    source
        .lock()
        .map_err(|_| IngestionError::Other(anyhow::anyhow!("decoder lock poisoned")))
}

fn join_error(err: JoinError) -> IngestionError {
    IngestionError::Other(anyhow::anyhow!("blocking task failed: {}", err))
}
