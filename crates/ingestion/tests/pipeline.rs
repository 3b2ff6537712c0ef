//! End-to-end runs: in-memory archive, staged files, SQLite sink.

mod common;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use ingestion::{
    FileStatus, ForecastRunKey, ForecastSink, MemoryDecoder, MemorySource, Pipeline,
    PipelineOptions, Stager, TargetPoint, VariableResolver,
};
use storage::{ForecastStore, NaturalKey, RemoteSource, DEFAULT_TABLE_NAME};
use test_utils::{assert_approx_eq, concat_messages, count_files, temp_dir, Grib2Builder};

use common::{dewpoint, reference_valid_time, resolver, run_key, staging_options, temperature};

fn object_key(hour: u32) -> String {
    format!("hrrr.20240101/conus/hrrr.t06z.wrfsfcf{:02}.grib2", hour)
}

fn points() -> Vec<TargetPoint> {
    vec![TargetPoint::new("A", 11.1, 20.9)]
}

struct Harness {
    source: RemoteSource,
    decoder: MemoryDecoder,
    store: ForecastStore,
    variables: Arc<VariableResolver>,
}

impl Harness {
    async fn new(variables: &[&str]) -> Self {
        Self {
            source: RemoteSource::in_memory(),
            decoder: MemoryDecoder::new(),
            store: ForecastStore::open_memory(DEFAULT_TABLE_NAME).await.unwrap(),
            variables: resolver(variables),
        }
    }

    /// Publish a forecast hour whose staged bytes decode to `source`.
    async fn publish(&mut self, hour: u32, source: MemorySource) {
        let key = object_key(hour);
        self.source
            .put(&key, Bytes::from(format!("GRIB {}", hour)))
            .await
            .unwrap();
        self.decoder = std::mem::take(&mut self.decoder).with_file(key, source);
    }

    fn pipeline(&self, staging_dir: &Path, points: Vec<TargetPoint>) -> Pipeline {
        let stager = Stager::new(
            self.source.clone(),
            staging_options(staging_dir, true),
            self.variables.clone(),
        );
        let sink: Arc<dyn ForecastSink> = Arc::new(self.store.clone());
        Pipeline::new(
            stager,
            sink,
            self.variables.clone(),
            points,
            PipelineOptions::default(),
        )
        .with_decoders(Arc::new(self.decoder.clone()))
    }
}

fn temperature_key() -> NaturalKey {
    NaturalKey {
        run_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        cycle: "06".to_string(),
        forecast_hour: 5,
        variable_name: "temperature_2m".to_string(),
        point_id: "A".to_string(),
    }
}

#[tokio::test]
async fn test_rerun_keeps_one_row_per_key() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;
    let pipeline = h.pipeline(dir.path(), points());

    let first = pipeline.run(&[run_key(5)]).await;
    assert_eq!(first.files_processed(), 1);
    assert_eq!(first.outcome().inserted, 1);

    let second = pipeline.run(&[run_key(5)]).await;
    assert_eq!(second.files_processed(), 1);
    assert_eq!(second.outcome().inserted, 0);
    assert_eq!(second.outcome().unchanged, 1);

    assert_eq!(h.store.count().await.unwrap(), 1);
    let stored = h.store.fetch(&temperature_key()).await.unwrap().unwrap();
    assert_eq!(stored.record.value, Some(104.0));
    assert_eq!(stored.record.valid_time, reference_valid_time(5));
    assert_eq!((stored.record.grid_latitude, stored.record.grid_longitude), (11.0, 21.0));
    assert!(!stored.record.out_of_domain);
    assert_eq!(stored.record.source, object_key(5));
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_changed_value_is_updated_in_place() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;
    h.pipeline(dir.path(), points()).run(&[run_key(5)]).await;

    let mut revised = temperature(0, 5);
    revised.values[4] = 290.5;
    h.publish(5, MemorySource::new(vec![revised])).await;
    let summary = h.pipeline(dir.path(), points()).run(&[run_key(5)]).await;

    assert_eq!(summary.outcome().updated, 1);
    assert_eq!(h.store.count().await.unwrap(), 1);
    let stored = h.store.fetch(&temperature_key()).await.unwrap().unwrap();
    assert_eq!(stored.record.value, Some(290.5));
}

#[tokio::test]
async fn test_missing_hour_is_skipped() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;

    let summary = h
        .pipeline(dir.path(), points())
        .run(&[run_key(5), run_key(99)])
        .await;

    assert_eq!(summary.files_attempted(), 2);
    assert_eq!(summary.files_processed(), 1);
    assert_eq!(summary.files_not_available(), 1);
    assert_eq!(summary.files_failed(), 0);

    let missing = &summary.reports[1];
    assert_eq!(missing.run_key.forecast_hour, 99);
    assert_eq!(missing.status, FileStatus::NotAvailable);
    assert_eq!(missing.records, 0);

    let rows = h.store.fetch_all().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows.iter().all(|r| r.record.key.forecast_hour == 5));
}

#[tokio::test]
async fn test_decode_failure_removes_staged_file() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m", "dewpoint_2m"]).await;
    h.publish(
        5,
        MemorySource::new(vec![temperature(0, 5), dewpoint(1, 5)]).failing_at(1),
    )
    .await;
    h.publish(6, MemorySource::new(vec![temperature(0, 6), dewpoint(1, 6)]))
        .await;

    let summary = h
        .pipeline(dir.path(), points())
        .run(&[run_key(5), run_key(6)])
        .await;

    assert_eq!(summary.reports[0].status, FileStatus::CorruptFile);
    assert!(summary.reports[0]
        .error
        .as_deref()
        .unwrap()
        .contains(&object_key(5)));
    assert_eq!(summary.reports[1].status, FileStatus::Processed);
    assert_eq!(summary.files_failed(), 1);

    // Nothing from the corrupt file is written, even the message before the failure
    let rows = h.store.fetch_all().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.record.key.forecast_hour == 6));
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_grid_index_shared_across_files() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m", "dewpoint_2m"]).await;
    for hour in 0..4 {
        h.publish(
            hour,
            MemorySource::new(vec![temperature(0, hour), dewpoint(1, hour)]),
        )
        .await;
    }
    let pipeline = h.pipeline(dir.path(), points());

    let plan: Vec<ForecastRunKey> = (0..4).map(run_key).collect();
    let summary = pipeline.run(&plan).await;

    assert_eq!(summary.files_processed(), 4);
    assert_eq!(summary.messages_matched(), 8);
    assert_eq!(summary.records_written(), 8);
    let stats = pipeline.grid_cache().stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.entries, 1);

    // Reports come back in plan order regardless of completion order
    let hours: Vec<u32> = summary.reports.iter().map(|r| r.run_key.forecast_hour).collect();
    assert_eq!(hours, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_far_point_is_stored_and_flagged() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;

    let points = vec![
        TargetPoint::new("A", 11.1, 20.9),
        TargetPoint::new("far", 40.0, -100.0),
    ];
    let summary = h.pipeline(dir.path(), points).run(&[run_key(5)]).await;

    assert_eq!(summary.out_of_domain(), 1);
    let mut key = temperature_key();
    key.point_id = "far".to_string();
    let far = h.store.fetch(&key).await.unwrap().unwrap();
    assert!(far.record.out_of_domain);
    assert!(far.record.distance_km > 50.0);
    assert!(far.record.value.is_some());
}

#[tokio::test]
async fn test_missing_data_is_stored_as_null() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    let mut message = temperature(0, 5);
    message.values[4] = f32::NAN;
    h.publish(5, MemorySource::new(vec![message])).await;

    h.pipeline(dir.path(), points()).run(&[run_key(5)]).await;

    let stored = h.store.fetch(&temperature_key()).await.unwrap().unwrap();
    assert_eq!(stored.record.value, None);
}

#[tokio::test]
async fn test_first_message_per_variable_wins() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    let mut later = temperature(1, 5);
    later.values[4] = 1.0;
    h.publish(5, MemorySource::new(vec![temperature(0, 5), later]))
        .await;

    let summary = h.pipeline(dir.path(), points()).run(&[run_key(5)]).await;

    assert_eq!(summary.messages_scanned(), 2);
    assert_eq!(summary.messages_matched(), 1);
    let stored = h.store.fetch(&temperature_key()).await.unwrap().unwrap();
    assert_eq!(stored.record.value, Some(104.0));
}

#[tokio::test]
async fn test_cancelled_run_leaves_no_files() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;

    let token = CancellationToken::new();
    token.cancel();
    let summary = h
        .pipeline(dir.path(), points())
        .with_cancellation(token)
        .run(&[run_key(5)])
        .await;

    assert_eq!(summary.reports[0].status, FileStatus::Cancelled);
    assert_eq!(summary.files_failed(), 0);
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_summary_lists_missing_variables() {
    let dir = temp_dir();
    let mut h = Harness::new(&["temperature_2m", "dewpoint_2m"]).await;
    h.publish(5, MemorySource::new(vec![temperature(0, 5)])).await;

    let summary = h
        .pipeline(dir.path(), points())
        .run(&[run_key(5), run_key(99)])
        .await;

    assert_eq!(summary.variables_missing(), vec!["dewpoint_2m"]);
    let text = summary.render();
    assert!(text.contains("[x] temperature_2m"), "{}", text);
    assert!(text.contains("[ ] dewpoint_2m"), "{}", text);
    assert!(text.contains("20240101/06z/f99 not_available"), "{}", text);
}

// Real GRIB2 bytes through the default decoder. None of these messages is
// requested, so the file is scanned end to end without decoding values.
#[tokio::test]
async fn test_grib2_file_without_requested_messages() {
    let dir = temp_dir();
    let h = Harness::new(&["temperature_2m"]).await;
    let file = concat_messages(&[
        Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
            .with_parameter(0, 0, 6)
            .with_forecast_hour(5)
            .build(),
        Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
            .with_parameter(0, 2, 2)
            .with_level(103, 10)
            .with_forecast_hour(5)
            .build(),
    ]);
    h.source
        .put(&object_key(5), Bytes::from(file))
        .await
        .unwrap();

    let summary = h
        .pipeline(dir.path(), points())
        .with_decoders(Arc::new(ingestion::Grib2Decoder))
        .run(&[run_key(5)])
        .await;

    let report = &summary.reports[0];
    assert_eq!(report.status, FileStatus::Processed);
    assert_eq!(report.messages_scanned, 2);
    assert_eq!(report.messages_matched, 0);
    assert_eq!(h.store.count().await.unwrap(), 0);
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_grib2_values_reach_the_store() {
    let dir = temp_dir();
    let h = Harness::new(&["temperature_2m", "dewpoint_2m"]).await;
    let file = concat_messages(&[
        Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
            .with_parameter(0, 3, 0)
            .with_level(1, 0)
            .with_forecast_hour(5)
            .build(),
        Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
            .with_parameter(0, 0, 6)
            .with_forecast_hour(5)
            .with_data((0..9).map(|i| 90.0 + i as f32).collect())
            .build(),
        Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
            .with_forecast_hour(5)
            .with_data((0..9).map(|i| 100.0 + i as f32).collect())
            .build(),
    ]);
    h.source
        .put(&object_key(5), Bytes::from(file))
        .await
        .unwrap();

    let summary = h
        .pipeline(dir.path(), points())
        .with_decoders(Arc::new(ingestion::Grib2Decoder))
        .run(&[run_key(5)])
        .await;

    let report = &summary.reports[0];
    assert_eq!(report.status, FileStatus::Processed, "{:?}", report.error);
    assert_eq!(report.messages_scanned, 3);
    assert_eq!(report.messages_matched, 2);
    assert_eq!(summary.outcome().inserted, 2);

    let rows: Vec<(String, Option<f64>)> = h
        .store
        .fetch_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.record.key.to_string(), r.record.value))
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "20240101/06z/f05/dewpoint_2m/A");
    assert_approx_eq!(rows[0].1.unwrap(), 94.0, 1e-3);
    assert_eq!(rows[1].0, "20240101/06z/f05/temperature_2m/A");
    assert_approx_eq!(rows[1].1.unwrap(), 104.0, 1e-3);

    let stored = h.store.fetch(&temperature_key()).await.unwrap().unwrap();
    assert_eq!(stored.record.valid_time, reference_valid_time(5));
    assert_approx_eq!(stored.record.grid_latitude, 11.0, 1e-9);
    assert_approx_eq!(stored.record.grid_longitude, 21.0, 1e-9);
    assert_eq!(count_files(dir.path()), 0);
}

#[tokio::test]
async fn test_truncated_grib2_file_is_corrupt() {
    let dir = temp_dir();
    let h = Harness::new(&["temperature_2m"]).await;
    let mut file = Grib2Builder::latlon(3, 3, 10.0, 20.0, 1.0)
        .with_forecast_hour(5)
        .build();
    file.truncate(file.len() / 2);
    h.source
        .put(&object_key(5), Bytes::from(file))
        .await
        .unwrap();

    let summary = h
        .pipeline(dir.path(), points())
        .with_decoders(Arc::new(ingestion::Grib2Decoder))
        .run(&[run_key(5)])
        .await;

    assert_eq!(summary.reports[0].status, FileStatus::CorruptFile);
    assert_eq!(count_files(dir.path()), 0);
}
