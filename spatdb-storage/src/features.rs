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

//! Feature specification registry.
//!
//! A specification is `(study scope, method descriptor, ordered specifier
//! list, optional cell set)`, and that tuple is unique: requesting the
//! same tuple twice yields the same identifier, while the same phenotype
//! over two different cell sets yields two. Uniqueness under concurrent
//! creation is enforced through an auxiliary hash row with a unique
//! constraint; the loser of a race re-queries and adopts the winner's
//! identifier.

use tracing::{info, warn};

use spatdb_core::study::FeatureMethod;

use crate::error::{Result, StorageError};

/// Field separator in the auxiliary hash key. Never appears in a study
/// name, method descriptor, or canonical specifier.
const HASH_SEPARATOR: char = '\u{1F}';

/// Thresholds for the bulk sweep of defective specifications.
#[derive(Debug, Clone, Copy)]
pub struct SweepThresholds {
    /// Delete when the fraction of null values exceeds this.
    pub max_null_fraction: f64,
    /// Delete when `values / expected` falls below this.
    pub min_completeness: f64,
}

impl Default for SweepThresholds {
    fn default() -> Self {
        Self {
            max_null_fraction: 0.0,
            min_completeness: 1.0,
        }
    }
}

pub struct FeatureRegistry<'a> {
    client: &'a tokio_postgres::Client,
}

impl<'a> FeatureRegistry<'a> {
    pub fn new(client: &'a tokio_postgres::Client) -> Self {
        Self { client }
    }

    /// Sorted, deduplicated form of a cell-set restriction; the order the
    /// hash key and `cell_set_cache` rows use.
    fn canonical_cells(cells: &[u32]) -> Vec<u32> {
        let mut cells = cells.to_vec();
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    fn hash_key(
        study: &str,
        method: FeatureMethod,
        specifiers: &[String],
        cells: Option<&[u32]>,
    ) -> String {
        let mut key = String::new();
        key.push_str(study);
        key.push(HASH_SEPARATOR);
        key.push_str(method.descriptor());
        for specifier in specifiers {
            key.push(HASH_SEPARATOR);
            key.push_str(specifier);
        }
        if let Some(cells) = cells {
            key.push(HASH_SEPARATOR);
            let rendered: Vec<String> = Self::canonical_cells(cells)
                .iter()
                .map(u32::to_string)
                .collect();
            key.push_str(&rendered.join(","));
        }
        key
    }

    /// Returns the identifier for the tuple, creating it if absent. The
    /// cell set is part of specification identity: the same specifiers
    /// over a different cell set resolve to a different identifier. The
    /// boolean is true when this call created the specification.
    pub async fn get_or_create(
        &self,
        study: &str,
        method: FeatureMethod,
        specifiers: &[String],
        cells: Option<&[u32]>,
    ) -> Result<(i32, bool)> {
        let key = Self::hash_key(study, method, specifiers, cells);
        if let Some(existing) = self.lookup_by_hash(&key).await? {
            return Ok((existing, false));
        }
        match self.create(study, method, specifiers, cells, &key).await {
            Ok(identifier) => Ok((identifier, true)),
            Err(err) if err.is_unique_violation() => {
                // Lost the creation race; the winner's row is now visible.
                match self.lookup_by_hash(&key).await? {
                    Some(identifier) => Ok((identifier, false)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn lookup_by_hash(&self, key: &str) -> Result<Option<i32>> {
        let row = self
            .client
            .query_opt(
                "SELECT feature_specification FROM feature_specification_hash WHERE hash = $1",
                &[&key],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn create(
        &self,
        study: &str,
        method: FeatureMethod,
        specifiers: &[String],
        cells: Option<&[u32]>,
        key: &str,
    ) -> Result<i32> {
        let row = self
            .client
            .query_one(
                "INSERT INTO feature_specification (study, derivation_method)
                 VALUES ($1, $2) RETURNING identifier",
                &[&study, &method.descriptor()],
            )
            .await?;
        let identifier: i32 = row.get(0);
        // The unique constraint on the hash serializes concurrent creators.
        self.client
            .execute(
                "INSERT INTO feature_specification_hash (hash, feature_specification)
                 VALUES ($1, $2)",
                &[&key, &identifier],
            )
            .await?;
        for (ordinality, specifier) in specifiers.iter().enumerate() {
            self.client
                .execute(
                    "INSERT INTO feature_specifier (feature_specification, specifier, ordinality)
                     VALUES ($1, $2, $3)",
                    &[&identifier, specifier, &((ordinality + 1) as i32)],
                )
                .await?;
        }
        if let Some(cells) = cells {
            self.store_cell_restriction(identifier, cells).await?;
        }
        info!(identifier, study, method = method.descriptor(), "feature specification created");
        Ok(identifier)
    }

    /// Ordered specifier list of a specification.
    pub async fn specifiers_of(&self, specification: i32) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT specifier FROM feature_specifier
                 WHERE feature_specification = $1 ORDER BY ordinality",
                &[&specification],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    pub async fn method_of(&self, specification: i32) -> Result<FeatureMethod> {
        let row = self
            .client
            .query_one(
                "SELECT derivation_method FROM feature_specification WHERE identifier = $1",
                &[&specification],
            )
            .await?;
        Ok(FeatureMethod::from_descriptor(&row.get::<_, String>(0))
            .map_err(StorageError::Core)?)
    }

    pub async fn study_of(&self, specification: i32) -> Result<String> {
        let row = self
            .client
            .query_one(
                "SELECT study FROM feature_specification WHERE identifier = $1",
                &[&specification],
            )
            .await?;
        Ok(row.get(0))
    }

    /// Resolves the analysis study under which features of a primary
    /// study are registered. A study without scope linkage is its own
    /// analysis study.
    pub async fn analysis_study_of(&self, primary_study: &str) -> Result<String> {
        let row = self
            .client
            .query_opt(
                "SELECT component_study FROM study_component WHERE primary_study = $1",
                &[&primary_study],
            )
            .await?;
        Ok(row.map_or_else(|| primary_study.to_string(), |r| r.get(0)))
    }

    /// Inverse of [`analysis_study_of`](Self::analysis_study_of): maps an
    /// analysis study back to the primary study that owns the blobs.
    pub async fn primary_study_of(&self, analysis_study: &str) -> Result<String> {
        let row = self
            .client
            .query_opt(
                "SELECT primary_study FROM study_component WHERE component_study = $1",
                &[&analysis_study],
            )
            .await?;
        Ok(row.map_or_else(|| analysis_study.to_string(), |r| r.get(0)))
    }

    // ========================================================================
    // Cell-set restriction (counts family)
    // ========================================================================

    /// One `cell_set_cache` row per cell, in canonical order.
    async fn store_cell_restriction(&self, specification: i32, cells: &[u32]) -> Result<()> {
        let structures: Vec<i64> = Self::canonical_cells(cells)
            .into_iter()
            .map(i64::from)
            .collect();
        self.client
            .execute(
                "INSERT INTO cell_set_cache (feature, histological_structure)
                 SELECT $1, unnest($2::bigint[])",
                &[&specification, &structures],
            )
            .await?;
        Ok(())
    }

    pub async fn cell_restriction(&self, specification: i32) -> Result<Option<Vec<u32>>> {
        let rows = self
            .client
            .query(
                "SELECT histological_structure FROM cell_set_cache
                 WHERE feature = $1 ORDER BY histological_structure",
                &[&specification],
            )
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            let structure: i64 = row.get(0);
            cells.push(u32::try_from(structure).map_err(|_| {
                StorageError::Core(spatdb_core::SpatDbError::Serialization(format!(
                    "cell identifier {structure} out of range in restriction"
                )))
            })?);
        }
        Ok(Some(cells))
    }

    pub async fn specifications_of_study(&self, study: &str) -> Result<Vec<i32>> {
        let rows = self
            .client
            .query(
                "SELECT identifier FROM feature_specification
                 WHERE study = $1 ORDER BY identifier",
                &[&study],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Removes a specification and everything hanging off it.
    pub async fn delete_specification(&self, specification: i32) -> Result<()> {
        for statement in [
            "DELETE FROM quantitative_feature_value WHERE feature = $1",
            "DELETE FROM quantitative_feature_value_queue WHERE feature = $1",
            "DELETE FROM feature_specifier WHERE feature_specification = $1",
            "DELETE FROM feature_specification_hash WHERE feature_specification = $1",
            "DELETE FROM cell_set_cache WHERE feature = $1",
            "DELETE FROM feature_specification WHERE identifier = $1",
        ] {
            self.client.execute(statement, &[&specification]).await?;
        }
        info!(specification, "feature specification deleted");
        Ok(())
    }

    /// Deletes every specification of a study whose values are defective
    /// under the thresholds. Returns the deleted identifiers.
    pub async fn sweep_defective(
        &self,
        study: &str,
        expected_samples: usize,
        thresholds: SweepThresholds,
    ) -> Result<Vec<i32>> {
        let rows = self
            .client
            .query(
                "SELECT fs.identifier,
                        count(v.value) AS present,
                        count(*) FILTER (WHERE v.subject IS NOT NULL) AS total
                 FROM feature_specification fs
                 LEFT JOIN quantitative_feature_value v ON v.feature = fs.identifier
                 WHERE fs.study = $1
                 GROUP BY fs.identifier",
                &[&study],
            )
            .await?;
        let mut deleted = Vec::new();
        for row in rows {
            let identifier: i32 = row.get(0);
            let present: i64 = row.get(1);
            let total: i64 = row.get(2);
            let nulls = total - present;
            let null_fraction = if total > 0 {
                nulls as f64 / total as f64
            } else {
                0.0
            };
            let completeness = if expected_samples > 0 {
                total as f64 / expected_samples as f64
            } else {
                1.0
            };
            if null_fraction > thresholds.max_null_fraction
                || completeness < thresholds.min_completeness
            {
                warn!(
                    identifier,
                    null_fraction, completeness, "sweeping defective feature specification"
                );
                self.delete_specification(identifier).await?;
                deleted.push(identifier);
            }
        }
        Ok(deleted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_order_sensitive() {
        let a = FeatureRegistry::hash_key(
            "Study 1",
            FeatureMethod::Proximity,
            &["A".into(), "B".into(), "50".into()],
            None,
        );
        let b = FeatureRegistry::hash_key(
            "Study 1",
            FeatureMethod::Proximity,
            &["B".into(), "A".into(), "50".into()],
            None,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn hash_key_distinguishes_methods_and_studies() {
        let base = FeatureRegistry::hash_key("S", FeatureMethod::Proximity, &["A".into()], None);
        assert_ne!(
            base,
            FeatureRegistry::hash_key("S", FeatureMethod::CoOccurrence, &["A".into()], None)
        );
        assert_ne!(
            base,
            FeatureRegistry::hash_key("T", FeatureMethod::Proximity, &["A".into()], None)
        );
    }

    #[test]
    fn hash_key_distinguishes_cell_sets() {
        let unrestricted =
            FeatureRegistry::hash_key("S", FeatureMethod::PopulationFraction, &["P".into()], None);
        let restricted = FeatureRegistry::hash_key(
            "S",
            FeatureMethod::PopulationFraction,
            &["P".into()],
            Some(&[1, 2]),
        );
        let other = FeatureRegistry::hash_key(
            "S",
            FeatureMethod::PopulationFraction,
            &["P".into()],
            Some(&[3, 4]),
        );
        assert_ne!(unrestricted, restricted);
        assert_ne!(restricted, other);
    }

    #[test]
    fn hash_key_is_insensitive_to_cell_order_and_duplicates() {
        let a = FeatureRegistry::hash_key(
            "S",
            FeatureMethod::PopulationFraction,
            &["P".into()],
            Some(&[2, 1, 2]),
        );
        let b = FeatureRegistry::hash_key(
            "S",
            FeatureMethod::PopulationFraction,
            &["P".into()],
            Some(&[1, 2]),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn default_sweep_thresholds_reject_any_defect() {
        let thresholds = SweepThresholds::default();
        assert_eq!(thresholds.max_null_fraction, 0.0);
        assert_eq!(thresholds.min_completeness, 1.0);
    }
}
