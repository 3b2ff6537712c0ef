#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use grib2_parser::{GridCoordinates, LevelDescriptor, ParameterId};
use ingestion::{
    ForecastRunKey, MemoryMessage, RetryConfig, StagingOptions, VariableCatalog, VariableResolver,
};
use test_utils::fixtures::grid_3x3;

pub fn run_key(hour: u32) -> ForecastRunKey {
    ForecastRunKey::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 6, hour)
}

pub fn resolver(names: &[&str]) -> Arc<VariableResolver> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    Arc::new(VariableCatalog::hrrr().select(&names).unwrap())
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 4,
    }
}

pub fn staging_options(dir: &std::path::Path, use_index: bool) -> StagingOptions {
    StagingOptions {
        staging_dir: Some(dir.to_path_buf()),
        use_index,
        retry: fast_retry(3),
        ..StagingOptions::default()
    }
}

/// A message on the 3x3 test grid with values `offset + 100 + flat_index`.
pub fn grid_message(
    ordinal: usize,
    parameter: (u8, u8, u8),
    level: (u8, f64),
    hour: u32,
    offset: f32,
) -> MemoryMessage {
    let grid = grid_3x3();
    let key = run_key(hour);
    MemoryMessage::new(
        ordinal,
        ParameterId::new(parameter.0, parameter.1, parameter.2),
        LevelDescriptor::new(level.0, Some(level.1)),
        key.reference_time(),
        key.valid_time(),
        GridCoordinates {
            ni: grid.ni,
            nj: grid.nj,
            lats: grid.lats,
            lons: grid.lons,
        },
        grid.values.iter().map(|v| v + offset).collect(),
    )
}

pub fn temperature(ordinal: usize, hour: u32) -> MemoryMessage {
    grid_message(ordinal, (0, 0, 0), (103, 2.0), hour, 0.0)
}

pub fn dewpoint(ordinal: usize, hour: u32) -> MemoryMessage {
    grid_message(ordinal, (0, 0, 6), (103, 2.0), hour, -10.0)
}

pub fn reference_valid_time(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap() + chrono::Duration::hours(hour as i64)
}
