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

//! On-demand scheduling.
//!
//! One generic scheduler serves every metric family; what differs per
//! family is captured in a [`FamilyStrategy`] value: the method
//! descriptor, the canonical specifier list, and an optional cell-set
//! restriction. The schedule flow is
//!
//! 1. resolve the analysis study of the request's primary study,
//! 2. get-or-create the feature specification (the cell set, when one is
//!    given, is part of its identity),
//! 3. if complete, return the stored values,
//! 4. if freshly created, enqueue one job per expected sample,
//! 5. otherwise return the partial values with `pending` set.

use tracing::warn;

use spatdb_core::metrics::MetricsResult;
use spatdb_core::phenotype::PhenotypeCriteria;
use spatdb_core::study::FeatureMethod;
use spatdb_core::SpatDbError;
use spatdb_storage::error::Result;
use spatdb_storage::{BlobIndex, FeatureRegistry, FeatureValues, JobQueue, QueuePolicy};

/// Everything family-specific about one feature request.
#[derive(Debug, Clone)]
pub struct FamilyStrategy {
    pub method: FeatureMethod,
    pub specifiers: Vec<String>,
    pub cell_restriction: Option<Vec<u32>>,
}

impl FamilyStrategy {
    /// Population counts for one phenotype, optionally restricted to an
    /// explicit cell set.
    pub fn counts(criteria: &PhenotypeCriteria, cells_selected: Option<Vec<u32>>) -> Self {
        Self {
            method: FeatureMethod::PopulationFraction,
            specifiers: vec![criteria.canonical_string()],
            cell_restriction: cells_selected,
        }
    }

    /// Proximity of a phenotype pair at a radius.
    pub fn proximity(p1: &PhenotypeCriteria, p2: &PhenotypeCriteria, radius: f64) -> Self {
        Self {
            method: FeatureMethod::Proximity,
            specifiers: vec![
                p1.canonical_string(),
                p2.canonical_string(),
                format_radius(radius),
            ],
            cell_restriction: None,
        }
    }

    /// One of the neighborhood statistics. Co-occurrence requires a
    /// radius; the others reject one. A single phenotype is paired with
    /// itself.
    pub fn neighborhood(
        feature_class: &str,
        phenotypes: &[PhenotypeCriteria],
        radius: Option<f64>,
    ) -> spatdb_core::Result<Self> {
        let method = match feature_class {
            "neighborhood enrichment" => FeatureMethod::NeighborhoodEnrichment,
            "co-occurrence" => FeatureMethod::CoOccurrence,
            "ripley" => FeatureMethod::RipleyStatistic,
            other => return Err(SpatDbError::UnknownFeatureClass(other.to_string())),
        };
        let (p1, p2) = match phenotypes {
            [only] => (only, only),
            [first, second] => (first, second),
            _ => {
                return Err(SpatDbError::InvalidArgument(format!(
                    "expected one or two phenotypes, got {}",
                    phenotypes.len()
                )))
            }
        };
        let mut specifiers = vec![p1.canonical_string(), p2.canonical_string()];
        match (method.takes_radius(), radius) {
            (true, Some(r)) => specifiers.push(format_radius(r)),
            (true, None) => {
                return Err(SpatDbError::InvalidArgument(
                    "co-occurrence requires a radius".to_string(),
                ))
            }
            (false, Some(_)) => {
                return Err(SpatDbError::InvalidArgument(format!(
                    "{} does not take a radius",
                    method.descriptor()
                )))
            }
            (false, None) => {}
        }
        Ok(Self {
            method,
            specifiers,
            cell_restriction: None,
        })
    }
}

/// Renders a radius the way it is stored as a specifier: integral values
/// without a fractional part.
pub fn format_radius(radius: f64) -> String {
    if radius.fract() == 0.0 {
        format!("{}", radius as i64)
    } else {
        format!("{radius}")
    }
}

pub struct OnDemandScheduler<'a> {
    client: &'a tokio_postgres::Client,
    policy: QueuePolicy,
}

impl<'a> OnDemandScheduler<'a> {
    pub fn new(client: &'a tokio_postgres::Client, policy: QueuePolicy) -> Self {
        Self { client, policy }
    }

    /// Returns current values and the specification id, scheduling the
    /// computation when the specification is new.
    pub async fn get_or_schedule(
        &self,
        primary_study: &str,
        strategy: &FamilyStrategy,
    ) -> Result<(MetricsResult, i32)> {
        let registry = FeatureRegistry::new(self.client);
        let values = FeatureValues::new(self.client);
        let blobs = BlobIndex::new(self.client);

        let analysis_study = registry.analysis_study_of(primary_study).await?;
        let (specification, is_new) = registry
            .get_or_create(
                &analysis_study,
                strategy.method,
                &strategy.specifiers,
                strategy.cell_restriction.as_deref(),
            )
            .await?;

        let expected = blobs.samples_of_study(primary_study).await?;
        let present = values.count(specification).await?;
        if present as usize > expected.len() {
            warn!(
                specification,
                present,
                expected = expected.len(),
                "more values than expected samples; treating as complete"
            );
        }
        if present as usize >= expected.len() {
            return Ok((
                MetricsResult::complete(values.values_map(specification).await?),
                specification,
            ));
        }

        if is_new {
            let queue = JobQueue::new(self.client, self.policy);
            queue.enqueue(specification, &expected).await?;
        }
        Ok((
            MetricsResult::pending(values.values_map(specification).await?),
            specification,
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn phenotype(s: &str) -> PhenotypeCriteria {
        PhenotypeCriteria::parse(s)
    }

    #[test]
    fn counts_strategy_uses_canonical_phenotype() {
        let strategy = FamilyStrategy::counts(&phenotype("CD8&CD3/"), None);
        assert_eq!(strategy.method, FeatureMethod::PopulationFraction);
        assert_eq!(strategy.specifiers, vec!["CD3&CD8/".to_string()]);
    }

    #[test]
    fn proximity_strategy_appends_radius() {
        let strategy = FamilyStrategy::proximity(&phenotype("CD3"), &phenotype("CD8"), 50.0);
        assert_eq!(
            strategy.specifiers,
            vec!["CD3".to_string(), "CD8".to_string(), "50".to_string()]
        );
    }

    #[test]
    fn neighborhood_radius_rules() {
        let pair = [phenotype("CD3"), phenotype("CD8")];
        assert!(FamilyStrategy::neighborhood("co-occurrence", &pair, None).is_err());
        assert!(FamilyStrategy::neighborhood("ripley", &pair, Some(10.0)).is_err());
        let ok = FamilyStrategy::neighborhood("co-occurrence", &pair, Some(25.5)).unwrap();
        assert_eq!(ok.specifiers[2], "25.5");
        assert!(FamilyStrategy::neighborhood("umap", &pair, None).is_err());
    }

    #[test]
    fn single_phenotype_is_paired_with_itself() {
        let one = [phenotype("CD3")];
        let strategy = FamilyStrategy::neighborhood("neighborhood enrichment", &one, None).unwrap();
        assert_eq!(strategy.specifiers, vec!["CD3".to_string(), "CD3".to_string()]);
    }

    #[test]
    fn radius_rendering() {
        assert_eq!(format_radius(30.0), "30");
        assert_eq!(format_radius(12.5), "12.5");
    }
}
