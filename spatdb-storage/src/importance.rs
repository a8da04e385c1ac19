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

//! Upload path for externally computed per-cell importance scores.
//!
//! Scores arrive as a plain `cell id -> score` table from a GNN run. They
//! are ranked per sample, the top `N` per sample keep their rank as the
//! stored value (1 is most important), every other cell stores 0, and the
//! whole set lands under one "gnn importance score" feature specification
//! whose specifiers identify the producing run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::info;

use spatdb_core::study::FeatureMethod;

use crate::error::{Result, StorageError};
use crate::features::FeatureRegistry;
use crate::values::FeatureValues;

pub const DEFAULT_TOP_COUNT: usize = 1000;

/// Identity of the run that produced the scores; becomes the specifier
/// list of the feature specification.
#[derive(Debug, Clone)]
pub struct ImportanceUpload {
    pub plugin_name: String,
    pub run_timestamp: DateTime<Utc>,
    pub plugin_version: Option<String>,
    pub cohort_stratifier: Option<String>,
    pub top_count: usize,
}

impl ImportanceUpload {
    pub fn specifiers(&self) -> Vec<String> {
        let mut specifiers = vec![
            self.plugin_name.clone(),
            self.run_timestamp.to_rfc3339(),
        ];
        if let Some(version) = &self.plugin_version {
            specifiers.push(version.clone());
        }
        if let Some(stratifier) = &self.cohort_stratifier {
            specifiers.push(stratifier.clone());
        }
        specifiers
    }
}

/// Per-sample descending rank; ranks above `top_count` collapse to 0.
pub fn rank_within_samples(
    scores: &BTreeMap<u64, f64>,
    cell_samples: &BTreeMap<u64, String>,
    top_count: usize,
) -> BTreeMap<u64, u64> {
    let mut by_sample: BTreeMap<&str, Vec<(u64, f64)>> = BTreeMap::new();
    for (&cell, &score) in scores {
        if let Some(sample) = cell_samples.get(&cell) {
            by_sample.entry(sample).or_default().push((cell, score));
        }
    }
    let mut orders = BTreeMap::new();
    for cells in by_sample.into_values() {
        let mut cells = cells;
        cells.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (position, (cell, _)) in cells.into_iter().enumerate() {
            let order = if position < top_count {
                (position + 1) as u64
            } else {
                0
            };
            orders.insert(cell, order);
        }
    }
    orders
}

pub struct ImportanceTranscriber<'a> {
    client: &'a tokio_postgres::Client,
}

impl<'a> ImportanceTranscriber<'a> {
    pub fn new(client: &'a tokio_postgres::Client) -> Self {
        Self { client }
    }

    /// Resolves the owning study from any one of the cells.
    pub async fn resolve_study(&self, cell: u64) -> Result<String> {
        let row = self
            .client
            .query_opt(
                "SELECT p.study
                 FROM histological_structure_identification h
                 JOIN specimen_data_measurement_process p ON p.specimen = h.specimen
                 WHERE h.histological_structure = $1",
                &[&(cell as i64)],
            )
            .await?;
        row.map(|r| r.get(0))
            .ok_or_else(|| StorageError::UnknownStudy(format!("no study owns cell {cell}")))
    }

    async fn cell_samples(&self, cells: &[u64]) -> Result<BTreeMap<u64, String>> {
        let cells_i64: Vec<i64> = cells.iter().map(|&c| c as i64).collect();
        let rows = self
            .client
            .query(
                "SELECT histological_structure, specimen
                 FROM histological_structure_identification
                 WHERE histological_structure = ANY($1)",
                &[&cells_i64],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<_, i64>(0) as u64, r.get::<_, String>(1)))
            .collect())
    }

    /// Transcribes one score table into feature values. Re-uploading to an
    /// existing, complete specification is a no-op.
    pub async fn transcribe(
        &self,
        scores: &BTreeMap<u64, f64>,
        upload: &ImportanceUpload,
    ) -> Result<i32> {
        let Some((&first_cell, _)) = scores.iter().next() else {
            return Err(StorageError::Core(spatdb_core::SpatDbError::InvalidArgument(
                "empty importance score table".to_string(),
            )));
        };
        let study = self.resolve_study(first_cell).await?;
        let cells: Vec<u64> = scores.keys().copied().collect();
        let cell_samples = self.cell_samples(&cells).await?;

        let registry = FeatureRegistry::new(self.client);
        let (specification, is_new) = registry
            .get_or_create(&study, FeatureMethod::GnnImportanceScore, &upload.specifiers(), None)
            .await?;
        let values = FeatureValues::new(self.client);
        if !is_new && values.count(specification).await? as usize >= scores.len() {
            info!(specification, "importance upload already transcribed");
            return Ok(specification);
        }

        let orders = rank_within_samples(scores, &cell_samples, upload.top_count);
        for (cell, order) in orders {
            values
                .insert(specification, &cell.to_string(), Some(order as f64))
                .await?;
        }
        info!(specification, study = %study, cells = scores.len(), "importance scores transcribed");
        Ok(specification)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(pairs: &[(u64, &str)]) -> BTreeMap<u64, String> {
        pairs.iter().map(|(c, s)| (*c, s.to_string())).collect()
    }

    #[test]
    fn top_ranks_are_assigned_per_sample() {
        let scores = BTreeMap::from([(1, 0.9), (2, 0.5), (3, 0.7), (10, 0.99), (11, 0.1)]);
        let cell_samples = samples(&[(1, "a"), (2, "a"), (3, "a"), (10, "b"), (11, "b")]);
        let orders = rank_within_samples(&scores, &cell_samples, 2);
        // Sample a: 1 (0.9) -> 1, 3 (0.7) -> 2, 2 (0.5) -> beyond top 2 -> 0.
        assert_eq!(orders[&1], 1);
        assert_eq!(orders[&3], 2);
        assert_eq!(orders[&2], 0);
        // Sample b ranks independently.
        assert_eq!(orders[&10], 1);
        assert_eq!(orders[&11], 2);
    }

    #[test]
    fn specifiers_include_optional_fields_in_order() {
        let upload = ImportanceUpload {
            plugin_name: "cg-gnn".to_string(),
            run_timestamp: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            plugin_version: Some("0.3.1".to_string()),
            cohort_stratifier: Some("responder".to_string()),
            top_count: DEFAULT_TOP_COUNT,
        };
        let specifiers = upload.specifiers();
        assert_eq!(specifiers.len(), 4);
        assert_eq!(specifiers[0], "cg-gnn");
        assert_eq!(specifiers[2], "0.3.1");
        assert_eq!(specifiers[3], "responder");

        let minimal = ImportanceUpload {
            plugin_version: None,
            cohort_stratifier: None,
            ..upload
        };
        assert_eq!(minimal.specifiers().len(), 2);
    }
}
