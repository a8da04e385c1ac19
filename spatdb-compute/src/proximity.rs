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

//! Pairwise proximity: average neighbor count within a radius.
//!
//! For phenotypes P1 and P2 and radius `r`, the metric is the mean, over
//! cells of P1, of the number of P2 cells strictly other than the source
//! within Euclidean distance `r`. A sample with no P1 cells has no defined
//! value; a P1 cell with no neighbors contributes 0 to the mean.

use crate::grid::GridIndex;

/// Computes the proximity metric. `p1` and `p2` are per-cell membership
/// masks aligned with the index's point order.
pub fn average_neighbors(
    index: &GridIndex,
    p1: &[bool],
    p2: &[bool],
    radius: f64,
) -> Option<f64> {
    let source_count = p1.iter().filter(|&&m| m).count();
    if source_count == 0 {
        return None;
    }
    let mut total_neighbors = 0u64;
    for (cell, &is_source) in p1.iter().enumerate() {
        if !is_source {
            continue;
        }
        total_neighbors += index
            .within_radius(index.point(cell), radius, Some(cell))
            .into_iter()
            .filter(|&neighbor| p2[neighbor])
            .count() as u64;
    }
    Some(total_neighbors as f64 / source_count as f64)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_neighbor_counts_over_sources() {
        // Four P1 cells with 2, 1, 1 and 0 P2 neighbors inside the radius:
        // the metric is (2 + 1 + 1 + 0) / 4 = 1.0.
        let points = vec![
            (0.0, 0.0),   // P1
            (10.0, 0.0),  // P1
            (20.0, 0.0),  // P1
            (90.0, 90.0), // P1, isolated
            (1.0, 0.0),   // P2: distance 1 from cell 0, 9 from cell 1
            (8.0, 0.0),   // P2: distance 8 from cell 0, 2 from cell 1
            (21.0, 0.0),  // P2: distance 1 from cell 2
        ];
        let p1 = vec![true, true, true, true, false, false, false];
        let p2 = vec![false, false, false, false, true, true, true];
        let index = GridIndex::build(points, 5.0);
        // radius 2: cells 0, 1, 2 see one P2 neighbor each; cell 3 none.
        let value = average_neighbors(&index, &p1, &p2, 2.0).unwrap();
        assert!((value - 3.0 / 4.0).abs() < 1e-12);
        // radius 8: cell 0 additionally sees 5, giving (2+1+1+0)/4 = 1.0.
        let value = average_neighbors(&index, &p1, &p2, 8.0).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_source_phenotype_is_undefined() {
        let index = GridIndex::build(vec![(0.0, 0.0), (1.0, 1.0)], 2.0);
        let p1 = vec![false, false];
        let p2 = vec![true, true];
        assert_eq!(average_neighbors(&index, &p1, &p2, 5.0), None);
    }

    #[test]
    fn source_cell_does_not_count_itself() {
        // One cell in both P1 and P2; it has no other neighbors.
        let index = GridIndex::build(vec![(0.0, 0.0)], 2.0);
        let both = vec![true];
        assert_eq!(average_neighbors(&index, &both, &both, 10.0), Some(0.0));
    }
}
