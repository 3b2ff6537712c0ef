//! Common test fixtures.

/// A small grid with explicit coordinates and one data array.
#[derive(Debug, Clone)]
pub struct TestGrid {
    pub ni: usize,
    pub nj: usize,
    /// Row-major latitudes (row j, column i at `j * ni + i`)
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub values: Vec<f32>,
}

impl TestGrid {
    /// Regular lat/lon grid starting at (`lat0`, `lon0`) with `step` degrees
    /// between cells. Values are `100 + flat_index`.
    pub fn regular(ni: usize, nj: usize, lat0: f64, lon0: f64, step: f64) -> Self {
        let mut lats = Vec::with_capacity(ni * nj);
        let mut lons = Vec::with_capacity(ni * nj);
        for j in 0..nj {
            for i in 0..ni {
                lats.push(lat0 + j as f64 * step);
                lons.push(lon0 + i as f64 * step);
            }
        }
        let values = (0..ni * nj).map(|k| 100.0 + k as f32).collect();
        Self {
            ni,
            nj,
            lats,
            lons,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.ni * self.nj
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Latitudes {10, 11, 12} by longitudes {20, 21, 22}; cell (11, 21) is flat index 4.
pub fn grid_3x3() -> TestGrid {
    TestGrid::regular(3, 3, 10.0, 20.0, 1.0)
}

/// Reference run used across pipeline tests.
pub mod run {
    pub const RUN_DATE: &str = "20240101";
    pub const CYCLE: &str = "06";
    pub const FILE_TYPE: &str = "wrfsfc";
}

/// Sample points files.
pub mod points {
    /// Stations in the Southeast plus one in Alaska (outside HRRR CONUS).
    pub const STATIONS_CSV: &str = "\
latitude,longitude
31.006900,-88.010300
31.756900,-106.375000
32.583889,-86.283060
33.784500,-86.052400
55.339722,-160.497200
";

    /// Headerless file with an explicit id column.
    pub const WITH_IDS_CSV: &str = "\
11.1,20.9,A
12.0,22.0,B
";
}
