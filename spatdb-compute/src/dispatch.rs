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

//! Single dispatch point from a method descriptor and specifier list to
//! the metric families. This is the contract the worker drives: decoded
//! cell arrays in, optional finite float out, with NaN and infinities
//! collapsed to null before anything reaches the store.

use spatdb_core::cell_codec::CellDataArrays;
use spatdb_core::metrics::sanitize_value;
use spatdb_core::phenotype::{ChannelOrder, PhenotypeCriteria, SignaturePair};
use spatdb_core::study::FeatureMethod;
use spatdb_core::{Result, SpatDbError};

use crate::counts::{count_matching, membership};
use crate::grid::GridIndex;
use crate::neighborhood::{co_occurrence_ratio, enrichment_zscore, ripley_cross_l};
use crate::proximity::average_neighbors;

const DEFAULT_BUCKET_SIZE: f64 = 50.0;

/// Computes one metric value for one sample.
pub fn compute_metric(
    method: FeatureMethod,
    specifiers: &[String],
    arrays: &CellDataArrays,
    channel_order: &ChannelOrder,
) -> Result<Option<f64>> {
    let value = match method {
        FeatureMethod::PopulationFraction => {
            let signature = single_signature(specifiers, channel_order)?;
            Some(count_matching(&arrays.phenotype_words, signature) as f64)
        }
        FeatureMethod::Proximity => {
            let (p1, p2, radius) = pair_with_radius(specifiers, channel_order)?;
            let index = build_index(arrays, radius);
            average_neighbors(
                &index,
                &membership(&arrays.phenotype_words, p1),
                &membership(&arrays.phenotype_words, p2),
                radius,
            )
        }
        FeatureMethod::CoOccurrence => {
            let (p1, p2, radius) = pair_with_radius(specifiers, channel_order)?;
            let index = build_index(arrays, radius);
            co_occurrence_ratio(
                &index,
                &membership(&arrays.phenotype_words, p1),
                &membership(&arrays.phenotype_words, p2),
                radius,
            )
        }
        FeatureMethod::NeighborhoodEnrichment => {
            let (p1, p2) = pair(specifiers, channel_order)?;
            let index = build_index(arrays, DEFAULT_BUCKET_SIZE);
            enrichment_zscore(
                &index,
                &membership(&arrays.phenotype_words, p1),
                &membership(&arrays.phenotype_words, p2),
            )
        }
        FeatureMethod::RipleyStatistic => {
            let (p1, p2) = pair(specifiers, channel_order)?;
            let index = build_index(arrays, DEFAULT_BUCKET_SIZE);
            ripley_cross_l(
                &index,
                &membership(&arrays.phenotype_words, p1),
                &membership(&arrays.phenotype_words, p2),
            )
        }
        FeatureMethod::GnnImportanceScore => {
            return Err(SpatDbError::InvalidArgument(
                "gnn importance scores are uploaded, not computed in process".to_string(),
            ));
        }
    };
    Ok(value.and_then(sanitize_value))
}

fn build_index(arrays: &CellDataArrays, bucket_size: f64) -> GridIndex {
    let points = arrays
        .x
        .iter()
        .zip(&arrays.y)
        .map(|(&x, &y)| (x as f64, y as f64))
        .collect();
    GridIndex::build(points, bucket_size.max(1.0))
}

fn single_signature(specifiers: &[String], order: &ChannelOrder) -> Result<SignaturePair> {
    match specifiers {
        [phenotype] => PhenotypeCriteria::parse(phenotype).compile(order),
        _ => Err(SpatDbError::InvalidArgument(format!(
            "expected a single phenotype specifier, got {}",
            specifiers.len()
        ))),
    }
}

fn pair(
    specifiers: &[String],
    order: &ChannelOrder,
) -> Result<(SignaturePair, SignaturePair)> {
    match specifiers {
        [first, second] => Ok((
            PhenotypeCriteria::parse(first).compile(order)?,
            PhenotypeCriteria::parse(second).compile(order)?,
        )),
        _ => Err(SpatDbError::InvalidArgument(format!(
            "expected two phenotype specifiers, got {}",
            specifiers.len()
        ))),
    }
}

fn pair_with_radius(
    specifiers: &[String],
    order: &ChannelOrder,
) -> Result<(SignaturePair, SignaturePair, f64)> {
    match specifiers {
        [first, second, radius] => {
            let radius = radius
                .parse::<f64>()
                .map_err(|_| SpatDbError::InvalidArgument(format!("bad radius: {radius}")))?;
            if !(radius.is_finite() && radius > 0.0) {
                return Err(SpatDbError::InvalidArgument(format!("bad radius: {radius}")));
            }
            Ok((
                PhenotypeCriteria::parse(first).compile(order)?,
                PhenotypeCriteria::parse(second).compile(order)?,
                radius,
            ))
        }
        _ => Err(SpatDbError::InvalidArgument(format!(
            "expected two phenotypes and a radius, got {} specifiers",
            specifiers.len()
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (CellDataArrays, ChannelOrder) {
        let arrays = CellDataArrays {
            identifiers: vec![1, 2, 3, 4],
            x: vec![10, 12, 14, 400],
            y: vec![10, 10, 10, 400],
            phenotype_words: vec![0b01, 0b10, 0b11, 0b00],
        };
        let order = ChannelOrder::new(vec!["CD3".into(), "CD8".into()]).unwrap();
        (arrays, order)
    }

    #[test]
    fn population_count_via_dispatch() {
        let (arrays, order) = sample();
        let value = compute_metric(
            FeatureMethod::PopulationFraction,
            &["CD3".to_string()],
            &arrays,
            &order,
        )
        .unwrap();
        assert_eq!(value, Some(2.0));
    }

    #[test]
    fn proximity_via_dispatch() {
        let (arrays, order) = sample();
        // CD3 cells at x=10 and x=14; CD8 cells at x=12 and x=14. Radius 4:
        // cell 1 sees both CD8 cells, cell 3 sees cell 2. Average 3/2.
        let value = compute_metric(
            FeatureMethod::Proximity,
            &["CD3".to_string(), "CD8".to_string(), "4".to_string()],
            &arrays,
            &order,
        )
        .unwrap()
        .unwrap();
        assert!((value - 1.5).abs() < 1e-12);
    }

    #[test]
    fn proximity_without_sources_is_null() {
        let (arrays, order) = sample();
        let value = compute_metric(
            FeatureMethod::Proximity,
            &["CD3&CD8/CD3".to_string(), "CD8".to_string(), "3".to_string()],
            &arrays,
            &order,
        )
        .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn wrong_specifier_count_is_an_error() {
        let (arrays, order) = sample();
        assert!(compute_metric(
            FeatureMethod::Proximity,
            &["CD3".to_string()],
            &arrays,
            &order
        )
        .is_err());
    }

    #[test]
    fn importance_scores_are_not_computable() {
        let (arrays, order) = sample();
        assert!(compute_metric(FeatureMethod::GnnImportanceScore, &[], &arrays, &order).is_err());
    }
}
