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

//! Representative subsample size allocation and seeded row selection.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Seed for the without-replacement draws, fixed so the stored subsample
/// is reproducible from the source matrices.
pub const SUBSAMPLE_SEED: u64 = 0;

/// Rescales per-sample cell counts so they sum to at most `maximum`.
///
/// Counts already summing to `maximum` or less are returned unchanged.
/// Otherwise each sample receives `floor(count * maximum / total)`, and the
/// remainder from flooring is handed out one cell at a time to samples that
/// still have spare cells, in name order, until the total reaches `maximum`.
pub fn allocate_sizes(counts: &BTreeMap<String, u64>, maximum: u64) -> BTreeMap<String, u64> {
    let total: u64 = counts.values().sum();
    if total <= maximum {
        return counts.clone();
    }
    let mut allocated: BTreeMap<String, u64> = counts
        .iter()
        .map(|(sample, &count)| {
            (
                sample.clone(),
                (count as u128 * maximum as u128 / total as u128) as u64,
            )
        })
        .collect();
    let mut allocated_total: u64 = allocated.values().sum();
    while allocated_total < maximum {
        let mut progressed = false;
        for (sample, &count) in counts {
            if allocated_total == maximum {
                break;
            }
            if let Some(slot) = allocated.get_mut(sample) {
                if *slot < count {
                    *slot += 1;
                    allocated_total += 1;
                    progressed = true;
                }
            }
        }
        if !progressed {
            break;
        }
    }
    allocated
}

/// Draws `take` distinct row indices out of `population` without
/// replacement, deterministically for a fixed seed, in ascending order.
pub fn draw_indices(population: usize, take: usize, seed: u64) -> Vec<usize> {
    let take = take.min(population);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = rand::seq::index::sample(&mut rng, population, take).into_vec();
    indices.sort_unstable();
    indices
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect()
    }

    #[test]
    fn under_budget_counts_are_unchanged() {
        let input = counts(&[("a", 10), ("b", 20)]);
        assert_eq!(allocate_sizes(&input, 100), input);
    }

    #[test]
    fn over_budget_counts_sum_to_exactly_the_maximum() {
        let input = counts(&[("a", 100), ("b", 250), ("c", 651)]);
        let allocated = allocate_sizes(&input, 300);
        assert_eq!(allocated.values().sum::<u64>(), 300);
        for (sample, &size) in &allocated {
            assert!(size <= input[sample]);
        }
    }

    #[test]
    fn floor_remainder_is_topped_up() {
        // floor allocation gives 3 + 3 = 6 of 7; one sample gets the spare.
        let input = counts(&[("a", 5), ("b", 5)]);
        let allocated = allocate_sizes(&input, 7);
        assert_eq!(allocated.values().sum::<u64>(), 7);
    }

    #[test]
    fn draws_are_deterministic_and_distinct() {
        let first = draw_indices(1000, 50, SUBSAMPLE_SEED);
        let second = draw_indices(1000, 50, SUBSAMPLE_SEED);
        assert_eq!(first, second);
        assert_eq!(first.len(), 50);
        let mut deduplicated = first.clone();
        deduplicated.dedup();
        assert_eq!(deduplicated.len(), 50);
        assert!(first.iter().all(|&i| i < 1000));
    }

    #[test]
    fn draw_is_capped_by_population() {
        assert_eq!(draw_indices(3, 10, 1), vec![0, 1, 2]);
    }
}
