//! Cell coordinates for supported grid templates.
//!
//! Coordinates come back flattened in the file's storage order, so flat
//! index `k` addresses both `lats[k]`/`lons[k]` and the `k`-th decoded value.

use projection::{wrap_longitude, LambertConformal, LambertParams};

use crate::sections::{GridDefinition, LambertGrid, LatLonGrid};
use crate::{Grib2Error, Result};

// Scanning mode flags, code table 3.4
const SCAN_NEGATIVE_I: u8 = 0x80;
const SCAN_POSITIVE_J: u8 = 0x40;
const SCAN_J_CONSECUTIVE: u8 = 0x20;
const SCAN_ALTERNATE_ROWS: u8 = 0x10;

/// Flattened cell coordinates in degrees, longitudes in [-180, 180].
#[derive(Debug, Clone, PartialEq)]
pub struct GridCoordinates {
    pub ni: usize,
    pub nj: usize,
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
}

impl GridCoordinates {
    pub fn len(&self) -> usize {
        self.lats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty()
    }
}

/// Compute every cell coordinate of a grid definition.
pub fn grid_coordinates(grid: &GridDefinition) -> Result<GridCoordinates> {
    match grid {
        GridDefinition::LatLon(g) => Ok(latlon_coordinates(g)),
        GridDefinition::Lambert(g) => Ok(lambert_coordinates(g)),
        GridDefinition::Unsupported { template, .. } => {
            Err(Grib2Error::UnsupportedTemplate(*template))
        }
    }
}

/// Map a storage position to (i, j) grid steps from the first point.
fn grid_position(k: usize, ni: usize, nj: usize, scanning_mode: u8) -> (usize, usize) {
    if scanning_mode & SCAN_J_CONSECUTIVE != 0 {
        (k / nj, k % nj)
    } else {
        let (j, i) = (k / ni, k % ni);
        if scanning_mode & SCAN_ALTERNATE_ROWS != 0 && j % 2 == 1 {
            (ni - 1 - i, j)
        } else {
            (i, j)
        }
    }
}

fn directions(scanning_mode: u8) -> (f64, f64) {
    let i_dir = if scanning_mode & SCAN_NEGATIVE_I != 0 { -1.0 } else { 1.0 };
    let j_dir = if scanning_mode & SCAN_POSITIVE_J != 0 { 1.0 } else { -1.0 };
    (i_dir, j_dir)
}

fn latlon_coordinates(g: &LatLonGrid) -> GridCoordinates {
    let n = g.ni * g.nj;
    let (i_dir, j_dir) = directions(g.scanning_mode);

    let mut lats = Vec::with_capacity(n);
    let mut lons = Vec::with_capacity(n);
    for k in 0..n {
        let (i, j) = grid_position(k, g.ni, g.nj, g.scanning_mode);
        lats.push(g.la1 + j_dir * j as f64 * g.dj);
        lons.push(wrap_longitude(g.lo1 + i_dir * i as f64 * g.di));
    }

    GridCoordinates {
        ni: g.ni,
        nj: g.nj,
        lats,
        lons,
    }
}

fn lambert_coordinates(g: &LambertGrid) -> GridCoordinates {
    let proj = LambertConformal::new(LambertParams {
        lat1: g.la1,
        lon1: g.lo1,
        lov: g.lov,
        latin1: g.latin1,
        latin2: g.latin2,
        dx: g.dx,
        dy: g.dy,
    });
    let n = g.nx * g.ny;
    let (i_dir, j_dir) = directions(g.scanning_mode);

    let mut lats = Vec::with_capacity(n);
    let mut lons = Vec::with_capacity(n);
    for k in 0..n {
        let (i, j) = grid_position(k, g.nx, g.ny, g.scanning_mode);
        let (lat, lon) = proj.grid_to_geo(i_dir * i as f64, j_dir * j as f64);
        lats.push(lat);
        lons.push(lon);
    }

    GridCoordinates {
        ni: g.nx,
        nj: g.ny,
        lats,
        lons,
    }
}
