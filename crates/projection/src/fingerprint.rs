//! Grid identity.
//!
//! A [`GridFingerprint`] names one concrete cell geometry. Messages that share
//! a fingerprint are assumed to share every cell coordinate, so the digest
//! covers the complete geometry and never just the grid shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// BLAKE3 digest of a grid's geometry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridFingerprint([u8; 32]);

impl GridFingerprint {
    /// Fingerprint a GRIB2 grid definition from its template number and the
    /// section 3 octets that follow the section header.
    pub fn from_definition(template: u16, definition: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"grib2-gds");
        hasher.update(&template.to_be_bytes());
        hasher.update(&(definition.len() as u64).to_be_bytes());
        hasher.update(definition);
        Self(*hasher.finalize().as_bytes())
    }

    /// Fingerprint explicit coordinate arrays. Every coordinate value
    /// contributes, so two grids of the same shape collide only if their
    /// coordinates are bit-identical.
    pub fn from_coordinates(ni: usize, nj: usize, lats: &[f64], lons: &[f64]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"coords");
        hasher.update(&(ni as u64).to_be_bytes());
        hasher.update(&(nj as u64).to_be_bytes());
        hasher.update(&(lats.len() as u64).to_be_bytes());
        for lat in lats {
            hasher.update(&lat.to_bits().to_be_bytes());
        }
        hasher.update(&(lons.len() as u64).to_be_bytes());
        for lon in lons {
            hasher.update(&lon.to_bits().to_be_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex characters, enough to tell grids apart in logs.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for GridFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for GridFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GridFingerprint({})", self.short())
    }
}
