//! GRIB2 reading for point extraction (WMO FM 92 GRIB Edition 2).
//!
//! [`Grib2File`] walks a local file message by message and exposes the
//! metadata needed to select a message (parameter, level, valid time) and to
//! identify its grid. Cell coordinates are synthesised from the grid
//! definition and values are decoded by the `grib` crate, both on demand.

pub mod grid;
pub mod reader;
pub mod sections;
pub mod tables;

pub use grid::{grid_coordinates, GridCoordinates};
pub use reader::{Grib2File, MessageMetadata};
pub use sections::{
    GridDefinition, LambertGrid, LatLonGrid, LevelDescriptor, ParameterId, ProductDefinition,
};
pub use tables::{level_description, parameter_short_name};

use thiserror::Error;

/// Errors raised while reading a GRIB2 file.
#[derive(Error, Debug)]
pub enum Grib2Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("File truncated at byte {offset}")]
    Truncated { offset: u64 },

    #[error("Unsupported grid definition template 3.{0}")]
    UnsupportedTemplate(u16),

    #[error("Failed to decode message {ordinal}: {reason}")]
    Decode { ordinal: usize, reason: String },

    #[error("Message {ordinal} decoded {actual} values, grid has {expected}")]
    SizeMismatch {
        ordinal: usize,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, Grib2Error>;
