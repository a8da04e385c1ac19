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

//! Neighborhood statistics over a phenotype pair.
//!
//! Three summary statistics share the spatial machinery:
//!
//! - **Enrichment**: z-score of the observed P1-P2 adjacency count in a
//!   k-nearest-neighbor graph against a label-permutation null. Seeded, so
//!   a recomputation of the same sample reproduces the stored value.
//! - **Co-occurrence**: ratio of the conditional probability of finding P2
//!   within radius `r` of a P1 cell to the global P2 frequency.
//! - **Ripley cross-K**: area-normalized pair count at a support radius
//!   derived from the sample extent, reported as the L-transform residual.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::grid::GridIndex;

/// Neighbors per cell in the adjacency graph.
pub const KNN_NEIGHBORS: usize = 6;
/// Label permutations drawn for the enrichment null distribution.
pub const PERMUTATIONS: usize = 100;
const PERMUTATION_SEED: u64 = 0;

/// Directed adjacency list of the k-nearest-neighbor graph.
pub fn knn_graph(index: &GridIndex, k: usize) -> Vec<Vec<usize>> {
    (0..index.len()).map(|i| index.k_nearest(i, k)).collect()
}

fn adjacency_count(graph: &[Vec<usize>], p1: &[bool], p2: &[bool]) -> u64 {
    graph
        .iter()
        .enumerate()
        .filter(|(i, _)| p1[*i])
        .map(|(_, neighbors)| neighbors.iter().filter(|&&j| p2[j]).count() as u64)
        .sum()
}

/// Permutation z-score of the P1-P2 adjacency count in the k-NN graph.
/// Undefined when the permutation null is degenerate (zero variance) or a
/// phenotype is absent.
pub fn enrichment_zscore(index: &GridIndex, p1: &[bool], p2: &[bool]) -> Option<f64> {
    if !p1.iter().any(|&m| m) || !p2.iter().any(|&m| m) {
        return None;
    }
    let graph = knn_graph(index, KNN_NEIGHBORS);
    let observed = adjacency_count(&graph, p1, p2) as f64;

    // Permute joint labels: the (p1, p2) membership pair moves with the cell.
    let mut labels: Vec<(bool, bool)> = p1.iter().zip(p2).map(|(&a, &b)| (a, b)).collect();
    let mut rng = StdRng::seed_from_u64(PERMUTATION_SEED);
    let mut null_counts = Vec::with_capacity(PERMUTATIONS);
    for _ in 0..PERMUTATIONS {
        labels.shuffle(&mut rng);
        let shuffled_p1: Vec<bool> = labels.iter().map(|l| l.0).collect();
        let shuffled_p2: Vec<bool> = labels.iter().map(|l| l.1).collect();
        null_counts.push(adjacency_count(&graph, &shuffled_p1, &shuffled_p2) as f64);
    }
    let mean = null_counts.iter().sum::<f64>() / null_counts.len() as f64;
    let variance = null_counts
        .iter()
        .map(|c| (c - mean) * (c - mean))
        .sum::<f64>()
        / null_counts.len() as f64;
    if variance == 0.0 {
        return None;
    }
    Some((observed - mean) / variance.sqrt())
}

/// Conditional co-occurrence ratio at radius `r`:
/// `P(neighbor in P2 | neighbor of a P1 cell within r) / P(P2)`.
pub fn co_occurrence_ratio(
    index: &GridIndex,
    p1: &[bool],
    p2: &[bool],
    radius: f64,
) -> Option<f64> {
    let total = index.len();
    if total == 0 {
        return None;
    }
    let p2_count = p2.iter().filter(|&&m| m).count();
    if p2_count == 0 {
        return None;
    }
    let mut neighbor_total = 0u64;
    let mut neighbor_in_p2 = 0u64;
    for (cell, &is_source) in p1.iter().enumerate() {
        if !is_source {
            continue;
        }
        for neighbor in index.within_radius(index.point(cell), radius, Some(cell)) {
            neighbor_total += 1;
            if p2[neighbor] {
                neighbor_in_p2 += 1;
            }
        }
    }
    if neighbor_total == 0 {
        return None;
    }
    let conditional = neighbor_in_p2 as f64 / neighbor_total as f64;
    let global = p2_count as f64 / total as f64;
    Some(conditional / global)
}

/// Ripley cross-K summary for the pair, evaluated at a support radius of a
/// quarter of the shorter bounding-box side, reported as the L residual
/// `sqrt(K/pi) - r`. Undefined for degenerate extents or absent phenotypes.
pub fn ripley_cross_l(index: &GridIndex, p1: &[bool], p2: &[bool]) -> Option<f64> {
    let n1 = p1.iter().filter(|&&m| m).count();
    let n2 = p2.iter().filter(|&&m| m).count();
    if n1 == 0 || n2 == 0 {
        return None;
    }
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for i in 0..index.len() {
        let (x, y) = index.point(i);
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    let width = x_max - x_min;
    let height = y_max - y_min;
    let area = width * height;
    if area <= 0.0 {
        return None;
    }
    let radius = width.min(height) / 4.0;
    let mut pairs = 0u64;
    for (cell, &is_source) in p1.iter().enumerate() {
        if !is_source {
            continue;
        }
        pairs += index
            .within_radius(index.point(cell), radius, Some(cell))
            .into_iter()
            .filter(|&j| p2[j])
            .count() as u64;
    }
    let k_statistic = area * pairs as f64 / (n1 as f64 * n2 as f64);
    Some((k_statistic / std::f64::consts::PI).sqrt() - radius)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_sample() -> (GridIndex, Vec<bool>, Vec<bool>) {
        // Two tight blocks: P1 and P2 interleaved in the left block, a
        // neutral block far right. Adjacency between P1 and P2 is much
        // higher than a random relabeling would give.
        let mut points = Vec::new();
        let mut p1 = Vec::new();
        let mut p2 = Vec::new();
        for i in 0..10 {
            points.push((i as f64, 0.0));
            p1.push(i % 2 == 0);
            p2.push(i % 2 == 1);
        }
        for i in 0..10 {
            points.push((200.0 + i as f64, 100.0));
            p1.push(false);
            p2.push(false);
        }
        (GridIndex::build(points, 5.0), p1, p2)
    }

    #[test]
    fn interleaved_phenotypes_are_enriched() {
        let (index, p1, p2) = clustered_sample();
        let z = enrichment_zscore(&index, &p1, &p2).unwrap();
        assert!(z > 2.0, "expected strong enrichment, got {z}");
    }

    #[test]
    fn enrichment_is_deterministic() {
        let (index, p1, p2) = clustered_sample();
        let a = enrichment_zscore(&index, &p1, &p2).unwrap();
        let b = enrichment_zscore(&index, &p1, &p2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn enrichment_undefined_without_members() {
        let (index, p1, _) = clustered_sample();
        let empty = vec![false; index.len()];
        assert_eq!(enrichment_zscore(&index, &p1, &empty), None);
    }

    #[test]
    fn co_occurrence_exceeds_one_for_colocated_pair() {
        let (index, p1, p2) = clustered_sample();
        // Within radius 2 of the left block, every neighbor pool is rich in
        // P2 relative to its 25% global frequency.
        let ratio = co_occurrence_ratio(&index, &p1, &p2, 2.0).unwrap();
        assert!(ratio > 1.0, "expected ratio above 1, got {ratio}");
    }

    #[test]
    fn co_occurrence_undefined_with_no_neighbors() {
        let index = GridIndex::build(vec![(0.0, 0.0), (500.0, 500.0)], 5.0);
        let p1 = vec![true, false];
        let p2 = vec![false, true];
        assert_eq!(co_occurrence_ratio(&index, &p1, &p2, 1.0), None);
    }

    #[test]
    fn ripley_undefined_on_degenerate_extent() {
        let index = GridIndex::build(vec![(1.0, 1.0), (1.0, 1.0)], 1.0);
        let all = vec![true, true];
        assert_eq!(ripley_cross_l(&index, &all, &all), None);
    }

    #[test]
    fn ripley_defined_on_spread_sample() {
        let (index, p1, p2) = clustered_sample();
        assert!(ripley_cross_l(&index, &p1, &p2).is_some());
    }
}
