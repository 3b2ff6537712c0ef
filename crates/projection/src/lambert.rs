//! Lambert Conformal Conic projection.
//!
//! HRRR publishes its CONUS grid on a Lambert conformal cone (GRIB2 grid
//! template 3.30). Files only carry the first grid point, the cone
//! parameters and the grid spacing, so every cell coordinate has to be
//! synthesised from those numbers before a nearest-neighbour index can be
//! built.

use std::f64::consts::PI;

/// Radius of the spherical earth used by NCEP Lambert grids (shape of earth 6).
pub const EARTH_RADIUS_M: f64 = 6_371_229.0;

/// Raw cone parameters as they appear in a GRIB2 grid definition, in degrees and meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambertParams {
    pub lat1: f64,
    pub lon1: f64,
    pub lov: f64,
    pub latin1: f64,
    pub latin2: f64,
    pub dx: f64,
    pub dy: f64,
}

/// Lambert Conformal Conic projection anchored at the first grid point.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian (LoV) in radians
    lon0: f64,
    dx: f64,
    dy: f64,
    /// Cone constant
    n: f64,
    f: f64,
    /// Rho at first grid point
    rho0: f64,
    /// Projected position of the first grid point
    origin: (f64, f64),
}

impl LambertConformal {
    pub fn new(params: LambertParams) -> Self {
        let to_rad = PI / 180.0;

        let lat1 = params.lat1 * to_rad;
        let lon1 = wrap_longitude(params.lon1) * to_rad;
        let lon0 = wrap_longitude(params.lov) * to_rad;
        let latin1 = params.latin1 * to_rad;
        let latin2 = params.latin2 * to_rad;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho0 = EARTH_RADIUS_M * f / (PI / 4.0 + lat1 / 2.0).tan().powf(n);

        let theta0 = n * normalize_angle(lon1 - lon0);
        let origin = (rho0 * theta0.sin(), rho0 - rho0 * theta0.cos());

        Self {
            lon0,
            dx: params.dx,
            dy: params.dy,
            n,
            f,
            rho0,
            origin,
        }
    }

    /// Fractional grid indices to geographic degrees, longitude in [-180, 180].
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;

        let x = self.origin.0 + i * self.dx;
        let y = self.origin.1 + j * self.dy;

        let rho = (x * x + (self.rho0 - y) * (self.rho0 - y)).sqrt();
        let rho = if self.n < 0.0 { -rho } else { rho };
        let theta = (x / (self.rho0 - y)).atan();

        let lat = 2.0 * ((EARTH_RADIUS_M * self.f / rho).powf(1.0 / self.n)).atan() - PI / 2.0;
        let lon = self.lon0 + theta / self.n;

        (lat * to_deg, wrap_longitude(lon * to_deg))
    }
}

/// Wrap a longitude in degrees into [-180, 180].
pub fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0 * ((lon + 180.0) / 360.0).floor()
    } else if lon < -180.0 {
        lon + 360.0 * ((180.0 - lon) / 360.0).floor()
    } else {
        lon
    }
}

fn normalize_angle(mut a: f64) -> f64 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::assert_approx_eq;

    fn hrrr() -> LambertConformal {
        LambertConformal::new(LambertParams {
            lat1: 21.138123,
            lon1: 237.280472,
            lov: 262.5,
            latin1: 38.5,
            latin2: 38.5,
            dx: 3000.0,
            dy: 3000.0,
        })
    }

    fn distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
        let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
        let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
        let h = ((lat2 - lat1) / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * ((lon2 - lon1) / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().asin()
    }

    #[test]
    fn test_first_grid_point_is_anchor() {
        let (lat, lon) = hrrr().grid_to_geo(0.0, 0.0);
        assert_approx_eq!(lat, 21.138123, 1e-6);
        assert_approx_eq!(lon, -122.719528, 1e-6);
    }

    #[test]
    fn test_hrrr_far_corners() {
        let proj = hrrr();

        let (lat, lon) = proj.grid_to_geo(1798.0, 0.0);
        assert_approx_eq!(lat, 21.138, 0.05);
        assert_approx_eq!(lon, -72.281, 0.05);

        let (lat, lon) = proj.grid_to_geo(1798.0, 1058.0);
        assert_approx_eq!(lat, 47.842, 0.05);
        assert_approx_eq!(lon, -60.917, 0.05);
    }

    #[test]
    fn test_cell_spacing_near_true_latitude() {
        let proj = hrrr();
        let a = proj.grid_to_geo(899.0, 600.0);
        let b = proj.grid_to_geo(900.0, 600.0);
        let c = proj.grid_to_geo(899.0, 601.0);

        assert_approx_eq!(a.0, 38.5, 3.0);
        assert_approx_eq!(distance_m(a, b), 3000.0, 30.0);
        assert_approx_eq!(distance_m(a, c), 3000.0, 30.0);
    }

    #[test]
    fn test_secant_cone() {
        let proj = LambertConformal::new(LambertParams {
            lat1: 30.0,
            lon1: -100.0,
            lov: -95.0,
            latin1: 33.0,
            latin2: 45.0,
            dx: 5000.0,
            dy: 5000.0,
        });
        let (lat, lon) = proj.grid_to_geo(0.0, 0.0);
        assert_approx_eq!(lat, 30.0, 1e-6);
        assert_approx_eq!(lon, -100.0, 1e-6);

        let (lat, _) = proj.grid_to_geo(0.0, 100.0);
        assert!(lat > 30.0);
    }

    #[test]
    fn test_wrap_longitude() {
        assert_approx_eq!(wrap_longitude(237.280472), -122.719528, 1e-9);
        assert_approx_eq!(wrap_longitude(360.0), 0.0, 1e-9);
        assert_approx_eq!(wrap_longitude(-190.0), 170.0, 1e-9);
        assert_approx_eq!(wrap_longitude(-97.5), -97.5, 1e-9);
        assert_approx_eq!(wrap_longitude(180.0), 180.0, 1e-9);
    }
}
