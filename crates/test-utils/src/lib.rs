//! Test support for the hrrr-points workspace.
//!
//! - [`Grib2Builder`] writes small but valid GRIB2 messages
//! - [`fixtures`] holds the 3x3 grid and sample point files
//! - [`require_test_file!`] skips tests whose real HRRR sample is absent
//! - [`assert_approx_eq!`] and [`assert_coords_approx_eq!`] compare floats
//!
//! Crates pull it in as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use generators::*;
pub use paths::*;

/// Resolve a real HRRR sample through [`find_test_file`], or return from
/// the calling test when it is not on disk.
///
/// ```ignore
/// #[test]
/// fn test_real_surface_file() {
///     let path = test_utils::require_test_file!("hrrr.t06z.wrfsfcf00.grib2");
///     let file = grib2_parser::Grib2File::open(&path).unwrap();
/// }
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!("skipping: sample '{}' not found (set TEST_DATA_DIR)", $name);
                return;
            }
        }
    }};
}

/// Assert `|left - right| <= epsilon`, with both sides widened to `f64`.
/// NaN on either side always fails.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let (left, right, epsilon) = ($left as f64, $right as f64, $epsilon as f64);
        let diff = (left - right).abs();
        if !(diff <= epsilon) {
            panic!(
                "assertion failed: {} ≈ {} (diff {} exceeds {})",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert two `(lat, lon)` pairs agree component-wise.
#[macro_export]
macro_rules! assert_coords_approx_eq {
    (($lat1:expr, $lon1:expr), ($lat2:expr, $lon2:expr), $epsilon:expr) => {{
        $crate::assert_approx_eq!($lat1, $lat2, $epsilon);
        $crate::assert_approx_eq!($lon1, $lon2, $epsilon);
    }};
}
