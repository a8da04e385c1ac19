// SPDX-License-Identifier: AGPL-3.0-or-later
// SpatDB - On-Demand Spatial Omics Feature Platform
// Copyright (C) 2026 SpatDB Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Uniform-grid spatial index for fixed-radius and k-nearest queries.
//!
//! Cells of a sample live in integer pixel space, and every spatial metric
//! asks one of two questions: "who is within `r` of this point" or "who are
//! the `k` closest". Bucketing points into a square grid answers both with
//! a bounded ring scan, which is plenty for a few hundred thousand points
//! and avoids the construction cost of a tree per job.

use std::collections::HashMap;

/// Spatial bucket index over a fixed point set.
pub struct GridIndex {
    points: Vec<(f64, f64)>,
    bucket_size: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl GridIndex {
    /// Builds an index with the given bucket edge length. Callers size the
    /// bucket to their dominant query radius.
    pub fn build(points: Vec<(f64, f64)>, bucket_size: f64) -> Self {
        let bucket_size = if bucket_size > 0.0 { bucket_size } else { 1.0 };
        let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (index, &(x, y)) in points.iter().enumerate() {
            buckets
                .entry(Self::key(x, y, bucket_size))
                .or_default()
                .push(index);
        }
        Self {
            points,
            bucket_size,
            buckets,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> (f64, f64) {
        self.points[index]
    }

    fn key(x: f64, y: f64, bucket_size: f64) -> (i64, i64) {
        (
            (x / bucket_size).floor() as i64,
            (y / bucket_size).floor() as i64,
        )
    }

    /// Indices of points within Euclidean distance `radius` of `center`,
    /// excluding `exclude` when given.
    pub fn within_radius(
        &self,
        center: (f64, f64),
        radius: f64,
        exclude: Option<usize>,
    ) -> Vec<usize> {
        let mut found = Vec::new();
        let reach = (radius / self.bucket_size).ceil() as i64;
        let (cx, cy) = Self::key(center.0, center.1, self.bucket_size);
        let radius_squared = radius * radius;
        for bx in (cx - reach)..=(cx + reach) {
            for by in (cy - reach)..=(cy + reach) {
                let Some(bucket) = self.buckets.get(&(bx, by)) else {
                    continue;
                };
                for &index in bucket {
                    if Some(index) == exclude {
                        continue;
                    }
                    let (px, py) = self.points[index];
                    let dx = px - center.0;
                    let dy = py - center.1;
                    if dx * dx + dy * dy <= radius_squared {
                        found.push(index);
                    }
                }
            }
        }
        found
    }

    /// The `k` nearest neighbors of point `index`, self excluded, nearest
    /// first. Expands the ring scan until `k` candidates are confirmed or
    /// the whole grid is exhausted.
    pub fn k_nearest(&self, index: usize, k: usize) -> Vec<usize> {
        if k == 0 || self.points.len() <= 1 {
            return Vec::new();
        }
        let center = self.points[index];
        let mut reach = 1i64;
        loop {
            let radius = reach as f64 * self.bucket_size;
            let mut candidates = self.within_radius(center, radius, Some(index));
            let exhausted = radius * radius
                >= self
                    .points
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, &(x, y))| {
                        let dx = x - center.0;
                        let dy = y - center.1;
                        dx * dx + dy * dy
                    })
                    .fold(0.0f64, f64::max);
            if candidates.len() >= k || exhausted {
                candidates.sort_by(|&a, &b| {
                    let da = distance_squared(self.points[a], center);
                    let db = distance_squared(self.points[b], center);
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                });
                candidates.truncate(k);
                return candidates;
            }
            reach *= 2;
        }
    }
}

#[inline]
fn distance_squared(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_query_finds_exactly_the_close_points() {
        let points = vec![(0.0, 0.0), (3.0, 0.0), (0.0, 4.0), (10.0, 10.0)];
        let index = GridIndex::build(points, 5.0);
        let mut hits = index.within_radius((0.0, 0.0), 4.0, Some(0));
        hits.sort_unstable();
        assert_eq!(hits, vec![1, 2]);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let index = GridIndex::build(vec![(0.0, 0.0), (5.0, 0.0)], 2.0);
        assert_eq!(index.within_radius((0.0, 0.0), 5.0, Some(0)), vec![1]);
        assert!(index.within_radius((0.0, 0.0), 4.999, Some(0)).is_empty());
    }

    #[test]
    fn k_nearest_orders_by_distance() {
        let points = vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (9.0, 0.0)];
        let index = GridIndex::build(points, 1.5);
        assert_eq!(index.k_nearest(0, 2), vec![1, 2]);
        assert_eq!(index.k_nearest(0, 10), vec![1, 2, 3]);
    }

    #[test]
    fn single_point_has_no_neighbors() {
        let index = GridIndex::build(vec![(1.0, 1.0)], 1.0);
        assert!(index.k_nearest(0, 3).is_empty());
    }
}
