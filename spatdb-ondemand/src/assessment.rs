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

//! Blob inventory assessment and fast-cache recreation.
//!
//! A study is servable when its expressions index, per-sample centroids
//! and feature matrices, and the virtual whole-study blobs are all in
//! place. The precompressed `cell_data_brotli` blobs are an optimization
//! layer on top; they can be rebuilt from the source blobs, and the
//! assessor does so for any sample missing one unless recreation is
//! disabled in the environment.

use tracing::{info, warn};

use spatdb_core::config::EnvironmentConfig;
use spatdb_core::study::BlobType;
use spatdb_storage::compression::brotli_compress;
use spatdb_storage::error::Result;
use spatdb_storage::BlobIndex;

/// Outcome of assessing one study's blob inventory.
#[derive(Debug, Default)]
pub struct StudyAssessment {
    pub study: String,
    /// Study-level blob types that are absent.
    pub missing_study_blobs: Vec<BlobType>,
    /// `(sample, blob type)` pairs that are absent.
    pub missing_sample_blobs: Vec<(String, BlobType)>,
    /// Samples whose precompressed payload was rebuilt.
    pub recreated: Vec<String>,
}

impl StudyAssessment {
    /// True when every source blob needed to serve the study exists. The
    /// precompressed payloads are not required for this.
    pub fn servable(&self) -> bool {
        self.missing_study_blobs.is_empty()
            && self
                .missing_sample_blobs
                .iter()
                .all(|(_, blob_type)| *blob_type == BlobType::CellDataBrotli)
    }
}

pub struct CacheAssessor<'a> {
    config: &'a EnvironmentConfig,
    client: &'a tokio_postgres::Client,
}

impl<'a> CacheAssessor<'a> {
    pub fn new(config: &'a EnvironmentConfig, client: &'a tokio_postgres::Client) -> Self {
        Self { config, client }
    }

    /// Assesses one study, rebuilding missing precompressed payloads
    /// unless recreation is disabled.
    pub async fn assess(&self, study: &str) -> Result<StudyAssessment> {
        let blobs = BlobIndex::new(self.client);
        let mut assessment = StudyAssessment {
            study: study.to_string(),
            ..StudyAssessment::default()
        };

        if blobs.get(study, BlobType::ExpressionsIndex).await?.is_none() {
            assessment.missing_study_blobs.push(BlobType::ExpressionsIndex);
        }
        for blob_type in [
            BlobType::VirtualSampleCentroids,
            BlobType::VirtualSampleFeatureMatrix,
        ] {
            if blobs.get(study, blob_type).await?.is_none() {
                assessment.missing_study_blobs.push(blob_type);
            }
        }

        for sample in blobs.samples_of_study(study).await? {
            let mut sources_present = true;
            for blob_type in [BlobType::Centroids, BlobType::FeatureMatrix] {
                if blobs.get(&sample, blob_type).await?.is_none() {
                    sources_present = false;
                    assessment
                        .missing_sample_blobs
                        .push((sample.clone(), blob_type));
                }
            }
            if blobs.get(&sample, BlobType::CellDataBrotli).await?.is_some() {
                continue;
            }
            if !sources_present || self.config.disable_fast_cache_recreation {
                assessment
                    .missing_sample_blobs
                    .push((sample.clone(), BlobType::CellDataBrotli));
                continue;
            }
            let payload = blobs.assemble_payload(&sample).await?;
            let compressed = brotli_compress(&payload)?;
            blobs
                .upsert(&sample, BlobType::CellDataBrotli, &compressed)
                .await?;
            info!(
                study,
                sample = %sample,
                raw_bytes = payload.len(),
                compressed_bytes = compressed.len(),
                "recreated precompressed payload"
            );
            assessment.recreated.push(sample);
        }

        if !assessment.servable() {
            warn!(
                study,
                missing_study = assessment.missing_study_blobs.len(),
                missing_samples = assessment.missing_sample_blobs.len(),
                "study is not servable"
            );
        }
        Ok(assessment)
    }

    /// Assesses every listed study. With recreation enabled, blob rows of
    /// unrecognized types are dropped first.
    pub async fn assess_studies(&self, studies: &[String]) -> Result<Vec<StudyAssessment>> {
        if !self.config.disable_fast_cache_recreation {
            let blobs = BlobIndex::new(self.client);
            let dropped = blobs.delete_unrecognized_types().await?;
            if dropped > 0 {
                info!(dropped, "removed blobs of unrecognized types");
            }
        }
        let mut assessments = Vec::with_capacity(studies.len());
        for study in studies {
            assessments.push(self.assess(study).await?);
        }
        Ok(assessments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_precompressed_payloads_do_not_block_serving() {
        let assessment = StudyAssessment {
            study: "study".into(),
            missing_study_blobs: vec![],
            missing_sample_blobs: vec![("sample 1".into(), BlobType::CellDataBrotli)],
            recreated: vec![],
        };
        assert!(assessment.servable());
    }

    #[test]
    fn missing_source_blobs_block_serving() {
        let assessment = StudyAssessment {
            study: "study".into(),
            missing_study_blobs: vec![BlobType::ExpressionsIndex],
            missing_sample_blobs: vec![],
            recreated: vec![],
        };
        assert!(!assessment.servable());
    }
}
