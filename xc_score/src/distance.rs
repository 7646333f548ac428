//! Great-circle distances on the FAI sphere and the per-origin distance cache.

use std::sync::OnceLock;

use ndarray::Array1;
use rayon::prelude::*;

use crate::track::{Fix, Track};

/// FAI earth radius in meters.
pub const FAI_EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Fixes closer than this have no meaningful bearing.
const MIN_BEARING_DISTANCE_M: f64 = 2.5;

/// Great-circle distance between two fixes on the FAI sphere, in meters.
///
/// The deltas enter through `abs()` and the cosine product is commutative, so the result
/// is bit-for-bit symmetric in its arguments.
pub fn fai_distance(a: &Fix, b: &Fix) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let dlat = (lat_a - lat_b).abs();
    let dlon = (a.longitude.to_radians() - b.longitude.to_radians()).abs();

    let sin_lat = (dlat / 2.0).sin();
    let sin_lon = (dlon / 2.0).sin();
    let h = sin_lat * sin_lat + sin_lon * sin_lon * (lat_a.cos() * lat_b.cos());
    2.0 * FAI_EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial great-circle bearing from `a` to `b` in degrees, normalised to `[0, 360)`.
pub fn initial_bearing(a: &Fix, b: &Fix) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Lazily populated distance rows over one [`Track`].
///
/// Row `i` holds the distance from fix `i` to every fix of the track. A row is computed the
/// first time any lookup needs it and is kept for the lifetime of the index; the track is
/// immutable, so nothing is ever invalidated. Each row sits behind its own `OnceLock`, which
/// lets several rayon workers materialize different rows at the same time.
pub struct DistanceIndex<'a> {
    track: &'a Track,
    rows: Vec<OnceLock<Array1<f64>>>,
}

impl<'a> DistanceIndex<'a> {
    pub fn new(track: &'a Track) -> Self {
        let rows = (0..track.len()).map(|_| OnceLock::new()).collect();
        Self { track, rows }
    }

    pub fn track(&self) -> &'a Track {
        self.track
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distances from `origin` to every fix. Materializes the whole row on first use.
    ///
    /// Panics if `origin` is not an index of the backing track.
    pub fn row(&self, origin: usize) -> &Array1<f64> {
        self.rows[origin].get_or_init(|| self.compute_row(origin))
    }

    /// Distance between fixes `i` and `j` in meters.
    ///
    /// Answers from an already materialized row of either endpoint before computing a new one.
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        if let Some(row) = self.rows[i].get() {
            return row[j];
        }
        if let Some(row) = self.rows[j].get() {
            return row[i];
        }
        self.row(i)[j]
    }

    /// Summed leg distance along `indices`; fewer than two indices give 0.
    pub fn path_length(&self, indices: &[usize]) -> f64 {
        indices
            .windows(2)
            .map(|leg| self.distance(leg[0], leg[1]))
            .sum()
    }

    /// Materialize the rows of all `origins` in parallel.
    pub fn prefetch(&self, origins: &[usize]) {
        origins.par_iter().for_each(|&origin| {
            self.row(origin);
        });
    }

    pub fn is_materialized(&self, origin: usize) -> bool {
        self.rows
            .get(origin)
            .map(|cell| cell.get().is_some())
            .unwrap_or(false)
    }

    pub fn materialized_rows(&self) -> usize {
        self.rows.iter().filter(|cell| cell.get().is_some()).count()
    }

    /// Initial bearing from fix `i` to fix `j`, or `None` when the two fixes coincide.
    pub fn bearing(&self, i: usize, j: usize) -> Option<f64> {
        if i == j || self.distance(i, j) < MIN_BEARING_DISTANCE_M {
            return None;
        }
        let fixes = self.track.fixes();
        Some(initial_bearing(&fixes[i], &fixes[j]))
    }

    fn compute_row(&self, origin: usize) -> Array1<f64> {
        let fixes = self.track.fixes();
        let from = &fixes[origin];
        fixes
            .iter()
            .enumerate()
            .map(|(idx, to)| if idx == origin { 0.0 } else { fai_distance(from, to) })
            .collect()
    }
}
