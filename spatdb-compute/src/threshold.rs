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

//! Per-channel gating thresholds.
//!
//! Two independent facilities live here:
//!
//! 1. **Reconstruction** of a threshold from already-assigned mask bits:
//!    the split point between the "low" (bit clear) and "high" (bit set)
//!    intensity populations of one channel.
//! 2. **Calibration** of thresholds against known phenotype labels, by
//!    maximizing the mean Jaccard index between gate membership and the
//!    labels. Phase A treats each single-positive phenotype's channel in
//!    isolation with a 1D bounded minimizer; Phase B refines all channels
//!    jointly with seeded basin hopping around a coordinate-descent local
//!    search.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tracing::debug;

use spatdb_core::float8::Float8;
use spatdb_core::Result;

const GOLDEN_RATIO_COMPLEMENT: f64 = 0.381_966_011_250_105_2;
const GOLDEN_TOLERANCE: f64 = 1e-5;
const GOLDEN_MAX_ITERATIONS: usize = 200;
const BASIN_HOPS: usize = 25;
const BASIN_SEED: u64 = 7;
const PHASE_B_LOWER: f64 = 0.0;
const PHASE_B_UPPER: f64 = 100.0;

// ============================================================================
// Threshold reconstruction
// ============================================================================

/// Split point between the low and high populations of a channel:
/// max(low) when high is empty, min(high) when low is empty, else the
/// midpoint of the two. Undefined when both are empty.
pub fn reconstruct_threshold(low: &[f64], high: &[f64]) -> Option<f64> {
    let max_low = low.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.max(v)))
    });
    let min_high = high.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |a| a.min(v)))
    });
    match (max_low, min_high) {
        (None, None) => None,
        (Some(l), None) => Some(l),
        (None, Some(h)) => Some(h),
        (Some(l), Some(h)) => Some((l + h) / 2.0),
    }
}

/// Quantizes a threshold to the 8-bit float, promoting an exact-zero code
/// to the smallest nonzero one so a stored threshold is never mistaken for
/// "absent".
pub fn quantize_threshold(format: &Float8, threshold: f64) -> Result<u8> {
    let byte = format.encode(threshold.min(format.max_value()))?;
    Ok(if byte == 0 { 1 } else { byte })
}

// ============================================================================
// Calibration
// ============================================================================

/// Ground truth for one phenotype: which channels must be above (or at or
/// below) their gates, and the known per-cell membership.
pub struct PhenotypeLabels {
    pub positive_channels: Vec<usize>,
    pub negative_channels: Vec<usize>,
    pub membership: Vec<bool>,
}

impl PhenotypeLabels {
    fn is_single_positive(&self) -> bool {
        self.positive_channels.len() == 1 && self.negative_channels.is_empty()
    }
}

/// Calibration output for one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelThreshold {
    pub channel: usize,
    pub final_threshold: f64,
    pub phase_a_threshold: Option<f64>,
    pub original_mean: f64,
}

/// Jaccard distance between a predicted and a known membership vector.
/// Two empty sets are at distance 0.
pub fn jaccard_distance(predicted: &[bool], known: &[bool]) -> f64 {
    let mut intersection = 0usize;
    let mut union = 0usize;
    for (&p, &k) in predicted.iter().zip(known) {
        if p || k {
            union += 1;
            if p && k {
                intersection += 1;
            }
        }
    }
    if union == 0 {
        0.0
    } else {
        1.0 - intersection as f64 / union as f64
    }
}

/// Golden-section search for the minimum of `objective` on `[lower, upper]`.
/// Returns the best evaluated point, which on a plateau stays strictly
/// inside the optimal region instead of drifting to its boundary.
pub fn minimize_scalar<F: FnMut(f64) -> f64>(
    mut objective: F,
    lower: f64,
    upper: f64,
) -> f64 {
    let mut a = lower;
    let mut b = upper;
    let mut c = a + GOLDEN_RATIO_COMPLEMENT * (b - a);
    let mut d = b - GOLDEN_RATIO_COMPLEMENT * (b - a);
    let mut fc = objective(c);
    let mut fd = objective(d);
    let (mut best_x, mut best_f) = if fc <= fd { (c, fc) } else { (d, fd) };
    for _ in 0..GOLDEN_MAX_ITERATIONS {
        if (b - a).abs() < GOLDEN_TOLERANCE {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = a + GOLDEN_RATIO_COMPLEMENT * (b - a);
            fc = objective(c);
            if fc < best_f {
                best_f = fc;
                best_x = c;
            }
        } else {
            a = c;
            c = d;
            fc = fd;
            d = b - GOLDEN_RATIO_COMPLEMENT * (b - a);
            fd = objective(d);
            if fd < best_f {
                best_f = fd;
                best_x = d;
            }
        }
    }
    best_x
}

/// Calibrates gates for one sample.
///
/// `intensities` is column-major: one `Vec` of per-cell values per channel.
pub struct ThresholdCalibrator<'a> {
    intensities: &'a [Vec<f64>],
    phenotypes: &'a [PhenotypeLabels],
}

impl<'a> ThresholdCalibrator<'a> {
    pub fn new(intensities: &'a [Vec<f64>], phenotypes: &'a [PhenotypeLabels]) -> Self {
        Self {
            intensities,
            phenotypes,
        }
    }

    fn channel_mean(&self, channel: usize) -> f64 {
        let column = &self.intensities[channel];
        if column.is_empty() {
            0.0
        } else {
            column.iter().sum::<f64>() / column.len() as f64
        }
    }

    fn gate_membership(&self, labels: &PhenotypeLabels, thresholds: &[f64]) -> Vec<bool> {
        let cells = self.intensities.first().map_or(0, Vec::len);
        (0..cells)
            .map(|cell| {
                labels
                    .positive_channels
                    .iter()
                    .all(|&c| self.intensities[c][cell] > thresholds[c])
                    && labels
                        .negative_channels
                        .iter()
                        .all(|&c| self.intensities[c][cell] <= thresholds[c])
            })
            .collect()
    }

    /// Mean Jaccard distance across all phenotypes under the thresholds.
    fn joint_objective(&self, thresholds: &[f64]) -> f64 {
        if self.phenotypes.is_empty() {
            return 0.0;
        }
        self.phenotypes
            .iter()
            .map(|labels| {
                jaccard_distance(&self.gate_membership(labels, thresholds), &labels.membership)
            })
            .sum::<f64>()
            / self.phenotypes.len() as f64
    }

    fn phase_a(&self, means: &[f64]) -> Vec<Option<f64>> {
        let mut phase_a = vec![None; self.intensities.len()];
        for labels in self.phenotypes.iter().filter(|l| l.is_single_positive()) {
            let channel = labels.positive_channels[0];
            let mean = means[channel];
            let mut thresholds = means.to_vec();
            let best = minimize_scalar(
                |t| {
                    thresholds[channel] = t;
                    jaccard_distance(
                        &self.gate_membership(labels, &thresholds),
                        &labels.membership,
                    )
                },
                0.0,
                2.0 * mean,
            );
            phase_a[channel] = Some(best);
        }
        phase_a
    }

    fn coordinate_descent(&self, start: &[f64]) -> (Vec<f64>, f64) {
        let mut current = start.to_vec();
        let mut best = self.joint_objective(&current);
        for _ in 0..3 {
            for channel in 0..current.len() {
                let frozen = current.clone();
                let candidate = minimize_scalar(
                    |t| {
                        let mut probe = frozen.clone();
                        probe[channel] = t;
                        self.joint_objective(&probe)
                    },
                    PHASE_B_LOWER,
                    PHASE_B_UPPER,
                );
                let mut probe = current.clone();
                probe[channel] = candidate;
                let value = self.joint_objective(&probe);
                if value < best {
                    best = value;
                    current = probe;
                }
            }
        }
        (current, best)
    }

    /// Runs both phases and reports one row per channel.
    pub fn calibrate(&self) -> Vec<ChannelThreshold> {
        let means: Vec<f64> = (0..self.intensities.len())
            .map(|c| self.channel_mean(c))
            .collect();
        let phase_a = self.phase_a(&means);

        let start: Vec<f64> = means
            .iter()
            .zip(&phase_a)
            .map(|(&mean, a)| a.unwrap_or(mean).clamp(PHASE_B_LOWER, PHASE_B_UPPER))
            .collect();
        let (mut best_point, mut best_value) = self.coordinate_descent(&start);
        let mut rng = StdRng::seed_from_u64(BASIN_SEED);
        for hop in 0..BASIN_HOPS {
            let perturbed: Vec<f64> = best_point
                .iter()
                .map(|&t| {
                    (t + rng.gen_range(-10.0..10.0)).clamp(PHASE_B_LOWER, PHASE_B_UPPER)
                })
                .collect();
            let (point, value) = self.coordinate_descent(&perturbed);
            if value < best_value {
                debug!(hop, value, "basin hop improved gate objective");
                best_value = value;
                best_point = point;
            }
        }

        means
            .iter()
            .enumerate()
            .map(|(channel, &mean)| ChannelThreshold {
                channel,
                final_threshold: best_point[channel],
                phase_a_threshold: phase_a[channel],
                original_mean: mean,
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstruction_midpoint_rule() {
        assert_eq!(reconstruct_threshold(&[0.1, 0.3], &[0.5, 0.7]), Some(0.4));
        assert_eq!(reconstruct_threshold(&[0.1, 0.3], &[]), Some(0.3));
        assert_eq!(reconstruct_threshold(&[], &[0.5, 0.7]), Some(0.5));
        assert_eq!(reconstruct_threshold(&[], &[]), None);
    }

    #[test]
    fn quantized_zero_is_promoted() {
        let format = Float8::default();
        assert_eq!(quantize_threshold(&format, 0.0).unwrap(), 1);
        assert!(quantize_threshold(&format, 0.5).unwrap() > 1);
    }

    #[test]
    fn jaccard_distance_basics() {
        assert_eq!(jaccard_distance(&[true, true], &[true, true]), 0.0);
        assert_eq!(jaccard_distance(&[true, false], &[false, true]), 1.0);
        assert_eq!(jaccard_distance(&[false, false], &[false, false]), 0.0);
        let d = jaccard_distance(&[true, true, false], &[true, false, false]);
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn golden_section_finds_parabola_minimum() {
        let minimum = minimize_scalar(|x| (x - 3.0) * (x - 3.0), 0.0, 10.0);
        assert!((minimum - 3.0).abs() < 1e-3);
    }

    #[test]
    fn calibration_separates_clear_populations() {
        // One channel, bimodal at 10 and 50; cells above the gap are the
        // phenotype. Any threshold in (10, 50] is perfect.
        let intensities = vec![vec![10.0, 10.0, 10.0, 50.0, 50.0, 50.0]];
        let phenotypes = vec![PhenotypeLabels {
            positive_channels: vec![0],
            negative_channels: vec![],
            membership: vec![false, false, false, true, true, true],
        }];
        let calibrator = ThresholdCalibrator::new(&intensities, &phenotypes);
        let rows = calibrator.calibrate();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.final_threshold > 10.0 && row.final_threshold < 50.0);
        assert!(row.phase_a_threshold.is_some());
        assert!((row.original_mean - 30.0).abs() < 1e-12);
    }
}
