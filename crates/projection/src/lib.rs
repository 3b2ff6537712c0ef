//! Grid geometry for point extraction.
//!
//! - [`LambertConformal`]: cell coordinates for HRRR-style Lambert grids
//! - [`GridFingerprint`]: identity of a concrete cell geometry
//! - [`GridIndex`]: kd-tree nearest-neighbour search over grid cells

pub mod fingerprint;
pub mod lambert;
pub mod spatial;

pub use fingerprint::GridFingerprint;
pub use lambert::{wrap_longitude, LambertConformal, LambertParams};
pub use spatial::{GridIndex, Neighbor, EARTH_RADIUS_KM};

use thiserror::Error;

/// Errors raised while building grid geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("coordinate arrays do not match grid shape: expected {expected} cells, got {lats} latitudes and {lons} longitudes")]
    ShapeMismatch {
        expected: usize,
        lats: usize,
        lons: usize,
    },

    #[error("grid has no cells with finite coordinates")]
    EmptyGrid,

    #[error("index construction aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
