//! Nearest-neighbour search over grid cells.
//!
//! Cells are placed on the unit sphere as XYZ vectors and stored in an
//! implicit kd-tree (a permutation of flat indices where every sub-range's
//! median is the splitting node). Chord distance on the unit sphere is
//! monotonic with great-circle distance, so the Euclidean nearest cell is
//! also the geographically nearest one, with no special casing at the
//! antimeridian or the poles.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::{GridFingerprint, ProjectionError, Result};

/// Mean earth radius used for reported distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// The cell chosen for a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the flattened coordinate (and data) arrays.
    pub flat_index: usize,
    /// Great-circle distance from the query point to the cell centre.
    pub distance_km: f64,
}

/// Read-only spatial index for one grid geometry.
#[derive(Debug)]
pub struct GridIndex {
    fingerprint: GridFingerprint,
    ni: usize,
    nj: usize,
    lats: Vec<f64>,
    lons: Vec<f64>,
    xyz: Vec<[f64; 3]>,
    tree: Vec<usize>,
}

impl GridIndex {
    /// Build the index from flattened coordinate arrays of `ni * nj` cells.
    ///
    /// Cells with non-finite coordinates stay addressable in the arrays but
    /// are never returned by a query.
    pub fn build(
        fingerprint: GridFingerprint,
        ni: usize,
        nj: usize,
        lats: Vec<f64>,
        lons: Vec<f64>,
    ) -> Result<Self> {
        if lats.len() != lons.len() || lats.len() != ni * nj {
            return Err(ProjectionError::ShapeMismatch {
                expected: ni * nj,
                lats: lats.len(),
                lons: lons.len(),
            });
        }

        let xyz: Vec<[f64; 3]> = lats
            .iter()
            .zip(&lons)
            .map(|(&lat, &lon)| to_unit_xyz(lat, lon))
            .collect();

        let mut tree: Vec<usize> = (0..xyz.len())
            .filter(|&k| lats[k].is_finite() && lons[k].is_finite())
            .collect();
        if tree.is_empty() {
            return Err(ProjectionError::EmptyGrid);
        }

        build_subtree(&xyz, &mut tree, 0);

        Ok(Self {
            fingerprint,
            ni,
            nj,
            lats,
            lons,
            xyz,
            tree,
        })
    }

    pub fn fingerprint(&self) -> GridFingerprint {
        self.fingerprint
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.ni, self.nj)
    }

    /// Number of cells, equal to the length of the coordinate arrays.
    pub fn len(&self) -> usize {
        self.lats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lats.is_empty()
    }

    /// Coordinates of a cell as (lat, lon) in degrees.
    pub fn coordinate(&self, flat_index: usize) -> Option<(f64, f64)> {
        Some((*self.lats.get(flat_index)?, *self.lons.get(flat_index)?))
    }

    /// Closest cell to a point. Among cells at exactly the same distance the
    /// lowest flat index wins. Returns `None` for non-finite input.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<Neighbor> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }

        let query = to_unit_xyz(lat, lon);
        let mut best = Best {
            dist2: f64::INFINITY,
            flat_index: usize::MAX,
        };
        self.search(&query, 0, self.tree.len(), 0, &mut best);

        if best.flat_index == usize::MAX {
            return None;
        }
        Some(Neighbor {
            flat_index: best.flat_index,
            distance_km: chord_to_km(best.dist2.sqrt()),
        })
    }

    /// Resolve many points at once, in input order.
    pub fn nearest_all(&self, points: &[(f64, f64)]) -> Vec<Option<Neighbor>> {
        points
            .par_iter()
            .map(|&(lat, lon)| self.nearest(lat, lon))
            .collect()
    }

    fn search(&self, query: &[f64; 3], lo: usize, hi: usize, depth: usize, best: &mut Best) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let node = self.tree[mid];
        best.offer(dist2(query, &self.xyz[node]), node);

        let axis = depth % 3;
        let diff = query[axis] - self.xyz[node][axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search(query, near.0, near.1, depth + 1, best);
        // Equal distances across the plane may still hold a lower index.
        if diff * diff <= best.dist2 {
            self.search(query, far.0, far.1, depth + 1, best);
        }
    }
}

struct Best {
    dist2: f64,
    flat_index: usize,
}

impl Best {
    fn offer(&mut self, dist2: f64, flat_index: usize) {
        if dist2 < self.dist2 || (dist2 == self.dist2 && flat_index < self.flat_index) {
            self.dist2 = dist2;
            self.flat_index = flat_index;
        }
    }
}

fn build_subtree(xyz: &[[f64; 3]], slice: &mut [usize], depth: usize) {
    if slice.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    let mid = slice.len() / 2;
    slice.select_nth_unstable_by(mid, |&a, &b| {
        xyz[a][axis]
            .partial_cmp(&xyz[b][axis])
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    let (left, rest) = slice.split_at_mut(mid);
    build_subtree(xyz, left, depth + 1);
    build_subtree(xyz, &mut rest[1..], depth + 1);
}

fn to_unit_xyz(lat: f64, lon: f64) -> [f64; 3] {
    let (lat, lon) = (lat.to_radians(), lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

fn dist2(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

fn chord_to_km(chord: f64) -> f64 {
    2.0 * EARTH_RADIUS_KM * (chord / 2.0).min(1.0).asin()
}
