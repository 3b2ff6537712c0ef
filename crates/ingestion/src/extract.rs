//! Point extraction.
//!
//! Target points are resolved against a grid once ([`PointMapping`]) and the
//! mapping is then applied to every message that shares that grid.

use projection::GridIndex;
use storage::{ExtractionRecord, NaturalKey};
use tracing::warn;

use crate::decoder::MessageHeader;
use crate::error::IngestionError;
use crate::points::TargetPoint;
use crate::run::ForecastRunKey;

/// The grid cell chosen for one target point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMatch {
    pub point_id: String,
    pub flat_index: usize,
    pub grid_latitude: f64,
    pub grid_longitude: f64,
    pub distance_km: f64,
    /// Nearest cell is farther than the configured threshold
    pub out_of_domain: bool,
}

/// Target points resolved against one grid.
#[derive(Debug, Clone, Default)]
pub struct PointMapping {
    matches: Vec<PointMatch>,
}

impl PointMapping {
    /// Resolve every point to its nearest cell. Points farther than
    /// `out_of_domain_km` from any cell keep their nearest cell but are
    /// flagged, with one warning each.
    pub fn build(index: &GridIndex, points: &[TargetPoint], out_of_domain_km: f64) -> Self {
        let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.latitude, p.longitude)).collect();
        let neighbors = index.nearest_all(&coords);

        let mut matches = Vec::with_capacity(points.len());
        for (point, neighbor) in points.iter().zip(neighbors) {
            let Some(neighbor) = neighbor else {
                warn!(point_id = %point.point_id, fingerprint = %index.fingerprint().short(), "No grid cell found for point");
                continue;
            };
            let Some((grid_latitude, grid_longitude)) = index.coordinate(neighbor.flat_index)
            else {
                continue;
            };

            let out_of_domain = neighbor.distance_km > out_of_domain_km;
            if out_of_domain {
                let flagged = IngestionError::OutOfDomain {
                    point_id: point.point_id.clone(),
                    distance_km: neighbor.distance_km,
                    limit_km: out_of_domain_km,
                };
                warn!(
                    point_id = %point.point_id,
                    fingerprint = %index.fingerprint().short(),
                    "{}",
                    flagged
                );
            }

            matches.push(PointMatch {
                point_id: point.point_id.clone(),
                flat_index: neighbor.flat_index,
                grid_latitude,
                grid_longitude,
                distance_km: neighbor.distance_km,
                out_of_domain,
            });
        }

        Self { matches }
    }

    pub fn matches(&self) -> &[PointMatch] {
        &self.matches
    }

    pub fn get(&self, point_id: &str) -> Option<&PointMatch> {
        self.matches.iter().find(|m| m.point_id == point_id)
    }

    pub fn out_of_domain_count(&self) -> usize {
        self.matches.iter().filter(|m| m.out_of_domain).count()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Resolve target points against a grid index.
pub fn extract(index: &GridIndex, points: &[TargetPoint], out_of_domain_km: f64) -> PointMapping {
    PointMapping::build(index, points, out_of_domain_km)
}

/// Value of one cell; `None` for missing data or an index past the array.
pub fn value_at(values: &[f32], flat_index: usize) -> Option<f64> {
    values
        .get(flat_index)
        .filter(|v| !v.is_nan())
        .map(|&v| v as f64)
}

/// One record per mapped point for a decoded message.
pub fn build_records(
    run_key: &ForecastRunKey,
    variable_name: &str,
    header: &MessageHeader,
    values: &[f32],
    mapping: &PointMapping,
    source: &str,
) -> Vec<ExtractionRecord> {
    mapping
        .matches()
        .iter()
        .map(|m| ExtractionRecord {
            key: NaturalKey {
                run_date: run_key.run_date,
                cycle: run_key.cycle_str(),
                forecast_hour: run_key.forecast_hour,
                variable_name: variable_name.to_string(),
                point_id: m.point_id.clone(),
            },
            valid_time: header.valid_time,
            value: value_at(values, m.flat_index),
            grid_latitude: m.grid_latitude,
            grid_longitude: m.grid_longitude,
            distance_km: m.distance_km,
            out_of_domain: m.out_of_domain,
            source: source.to_string(),
        })
        .collect()
}
