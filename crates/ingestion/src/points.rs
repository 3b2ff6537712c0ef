//! Target points file.
//!
//! A CSV of latitude/longitude pairs with an optional header and an
//! optional id column. Bad rows are skipped with a warning; a file that
//! yields no usable point, or repeats an explicit id, is rejected.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{info, warn};

use crate::error::{IngestionError, Result};

/// A location to extract values at.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPoint {
    pub point_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl TargetPoint {
    pub fn new(point_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            point_id: point_id.into(),
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    lat: usize,
    lon: usize,
    id: Option<usize>,
}

impl Columns {
    const POSITIONAL: Columns = Columns {
        lat: 0,
        lon: 1,
        id: Some(2),
    };

    fn from_header(header: &StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };

        let lat = find(&["lat", "latitude"]);
        let lon = find(&["lon", "longitude", "lng"]);
        let id = find(&["id", "point_id", "name"]);

        match (lat, lon) {
            (Some(lat), Some(lon)) => Ok(Columns { lat, lon, id }),
            // Unrecognised names: fall back to column order
            (None, None) => Ok(Columns {
                lat: 0,
                lon: 1,
                id,
            }),
            _ => Err(IngestionError::InvalidPoints(format!(
                "header {:?} names only one of latitude and longitude",
                header.iter().collect::<Vec<_>>()
            ))),
        }
    }
}

fn is_header(record: &StringRecord) -> bool {
    let numeric = |i: usize| record.get(i).map(|f| f.parse::<f64>().is_ok()).unwrap_or(false);
    !(numeric(0) && numeric(1))
}

/// Load points from a CSV file.
pub fn load_points(path: &Path) -> Result<Vec<TargetPoint>> {
    let file = File::open(path).map_err(|e| {
        IngestionError::InvalidPoints(format!("cannot read {}: {}", path.display(), e))
    })?;
    let points = parse_points(file)?;
    info!(path = %path.display(), count = points.len(), "Loaded target points");
    Ok(points)
}

/// Parse points from any CSV source.
pub fn parse_points<R: Read>(reader: R) -> Result<Vec<TargetPoint>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut columns = Columns::POSITIONAL;
    let mut points = Vec::new();
    let mut ids = HashSet::new();

    for (row, result) in reader.records().enumerate() {
        let line = row + 1;
        let record =
            result.map_err(|e| IngestionError::InvalidPoints(format!("line {}: {}", line, e)))?;

        if row == 0 && is_header(&record) {
            columns = Columns::from_header(&record)?;
            continue;
        }

        if record.len() < 2 {
            warn!(line, "Skipping row with fewer than two columns");
            continue;
        }

        let field = |i: usize| record.get(i).unwrap_or("");
        let (lat, lon) = match (field(columns.lat).parse::<f64>(), field(columns.lon).parse::<f64>()) {
            (Ok(lat), Ok(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
            _ => {
                warn!(
                    line,
                    lat = field(columns.lat),
                    lon = field(columns.lon),
                    "Skipping row with non-numeric coordinates"
                );
                continue;
            }
        };
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            warn!(line, lat, lon, "Skipping row with coordinates out of range");
            continue;
        }

        let point_id = match columns.id.and_then(|i| record.get(i)).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => format!("p{}", points.len() + 1),
        };
        if !ids.insert(point_id.clone()) {
            return Err(IngestionError::InvalidPoints(format!(
                "line {}: duplicate point id {:?}",
                line, point_id
            )));
        }

        points.push(TargetPoint::new(point_id, lat, lon));
    }

    if points.is_empty() {
        return Err(IngestionError::InvalidPoints(
            "no valid points found".to_string(),
        ));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::fixtures::points::{STATIONS_CSV, WITH_IDS_CSV};

    #[test]
    fn test_header_detected_and_default_ids() {
        let points = parse_points(STATIONS_CSV.as_bytes()).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], TargetPoint::new("p1", 31.0069, -88.0103));
        assert_eq!(points[4].point_id, "p5");
    }

    #[test]
    fn test_headerless_with_id_column() {
        let points = parse_points(WITH_IDS_CSV.as_bytes()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], TargetPoint::new("A", 11.1, 20.9));
        assert_eq!(points[1].point_id, "B");
    }

    #[test]
    fn test_named_columns_in_any_order() {
        let csv = "Name,Lng,Lat\nKC,-94.5,39.0\n";
        let points = parse_points(csv.as_bytes()).unwrap();
        assert_eq!(points, vec![TargetPoint::new("KC", 39.0, -94.5)]);
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let csv = "lat,lon\n10,20\nabc,20\n95,20\n10\n11,21\n";
        let points = parse_points(csv.as_bytes()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1], TargetPoint::new("p2", 11.0, 21.0));
    }

    #[test]
    fn test_duplicate_coordinates_get_distinct_ids() {
        let points = parse_points("10,20\n10,20\n".as_bytes()).unwrap();
        assert_eq!(points[0].point_id, "p1");
        assert_eq!(points[1].point_id, "p2");
    }

    #[test]
    fn test_duplicate_explicit_id_is_rejected() {
        let err = parse_points("10,20,A\n11,21,A\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IngestionError::InvalidPoints(_)));
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(matches!(
            parse_points("lat,lon\n".as_bytes()),
            Err(IngestionError::InvalidPoints(_))
        ));
        assert!(matches!(
            parse_points("".as_bytes()),
            Err(IngestionError::InvalidPoints(_))
        ));
    }

    #[test]
    fn test_load_points_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, STATIONS_CSV).unwrap();
        assert_eq!(load_points(&path).unwrap().len(), 5);

        let missing = load_points(&dir.path().join("nope.csv")).unwrap_err();
        assert_eq!(missing.kind(), "invalid_points");
    }
}
