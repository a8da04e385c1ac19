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

//! Request entry points for the metric families.
//!
//! Each entry point translates its arguments into a [`FamilyStrategy`],
//! then either waits for completion (blocking) or takes a single snapshot
//! (non-blocking, returning whatever values exist plus a pending flag).
//!
//! Counts are a composite: the stored features are raw cell counts, one
//! for the requested phenotype and one for the unrestricted "all cells"
//! criterion, and the reported value is a percentage of the two. Samples
//! the study is expected to have but no feature value covers yet are
//! reported as nulls so callers always see the full sample roster.

use std::collections::BTreeMap;

use spatdb_core::config::EnvironmentConfig;
use spatdb_core::metrics::{percent_ratio, MetricsResult};
use spatdb_core::phenotype::PhenotypeCriteria;
use spatdb_storage::error::Result;
use spatdb_storage::{BlobIndex, ImportanceTranscriber, ImportanceUpload, QueuePolicy};

use crate::gateway::CompletionGateway;
use crate::scheduler::{FamilyStrategy, OnDemandScheduler};

/// One sample's counts outcome: the raw matching-cell count and the
/// percentage against all cells of the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleCounts {
    pub count: Option<f64>,
    pub percentage: Option<f64>,
}

/// Counts across the sample roster of a study.
#[derive(Debug, Clone)]
pub struct CountsResult {
    pub values: BTreeMap<String, SampleCounts>,
    pub pending: bool,
}

pub struct OnDemandRequester<'a> {
    config: &'a EnvironmentConfig,
    client: &'a tokio_postgres::Client,
}

impl<'a> OnDemandRequester<'a> {
    pub fn new(config: &'a EnvironmentConfig, client: &'a tokio_postgres::Client) -> Self {
        Self { config, client }
    }

    /// Per-sample percentage of cells matching the phenotype, optionally
    /// over an explicit cell subset.
    pub async fn get_counts_by_specimen(
        &self,
        criteria: &PhenotypeCriteria,
        primary_study: &str,
        cells_selected: Option<Vec<u32>>,
        blocking: bool,
    ) -> Result<CountsResult> {
        let numerator = FamilyStrategy::counts(criteria, cells_selected.clone());
        let denominator =
            FamilyStrategy::counts(&PhenotypeCriteria::new(Vec::<String>::new(), vec![]), cells_selected);

        let counts = self.resolve(primary_study, &numerator, blocking).await?;
        let totals = self.resolve(primary_study, &denominator, blocking).await?;

        let mut values = BTreeMap::new();
        for sample in self.expected_samples(primary_study).await? {
            let count = counts.values.get(&sample).copied().flatten();
            let total = totals.values.get(&sample).copied().flatten();
            values.insert(
                sample,
                SampleCounts {
                    count,
                    percentage: percent_ratio(count, total),
                },
            );
        }
        Ok(CountsResult {
            values,
            pending: counts.pending || totals.pending,
        })
    }

    /// Average number of phenotype-2 neighbors within the radius of each
    /// phenotype-1 cell, per sample.
    pub async fn get_proximity_metrics(
        &self,
        primary_study: &str,
        radius: f64,
        phenotypes: (&PhenotypeCriteria, &PhenotypeCriteria),
        blocking: bool,
    ) -> Result<MetricsResult> {
        let strategy = FamilyStrategy::proximity(phenotypes.0, phenotypes.1, radius);
        let result = self.resolve(primary_study, &strategy, blocking).await?;
        self.pad(primary_study, result).await
    }

    /// Neighborhood enrichment, co-occurrence, or the Ripley statistic,
    /// selected by descriptor.
    pub async fn get_neighborhood_metrics(
        &self,
        primary_study: &str,
        feature_class: &str,
        phenotypes: &[PhenotypeCriteria],
        radius: Option<f64>,
        blocking: bool,
    ) -> Result<MetricsResult> {
        let strategy = FamilyStrategy::neighborhood(feature_class, phenotypes, radius)?;
        let result = self.resolve(primary_study, &strategy, blocking).await?;
        self.pad(primary_study, result).await
    }

    /// Records externally computed per-cell importance ranks as feature
    /// values.
    pub async fn upload_importance_scores(
        &self,
        upload: &ImportanceUpload,
        scores: &BTreeMap<u64, f64>,
    ) -> Result<i32> {
        let transcriber = ImportanceTranscriber::new(self.client);
        transcriber.transcribe(scores, upload).await
    }

    async fn resolve(
        &self,
        primary_study: &str,
        strategy: &FamilyStrategy,
        blocking: bool,
    ) -> Result<MetricsResult> {
        if blocking {
            let gateway = CompletionGateway::new(self.config, self.client);
            gateway.wait_for_feature(primary_study, strategy).await
        } else {
            let scheduler = OnDemandScheduler::new(self.client, QueuePolicy::default());
            let (result, _) = scheduler.get_or_schedule(primary_study, strategy).await?;
            Ok(result)
        }
    }

    async fn expected_samples(&self, primary_study: &str) -> Result<Vec<String>> {
        let blobs = BlobIndex::new(self.client);
        blobs.samples_of_study(primary_study).await
    }

    /// Reindexes a result onto the full sample roster, nulling samples
    /// with no value yet.
    async fn pad(&self, primary_study: &str, result: MetricsResult) -> Result<MetricsResult> {
        let mut values = BTreeMap::new();
        for sample in self.expected_samples(primary_study).await? {
            values.insert(sample.clone(), result.values.get(&sample).copied().flatten());
        }
        Ok(MetricsResult {
            values,
            pending: result.pending,
        })
    }
}
