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

//! Study vocabulary: blob types, metric families, the virtual sample.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatDbError};

/// Reserved sample name standing for all cells of a study at once.
pub const VIRTUAL_SAMPLE: &str = "virtual sample (whole study)";

/// Kinds of binary payloads stored in the per-study blob index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobType {
    Centroids,
    FeatureMatrix,
    FeatureMatrixWithIntensities,
    CellDataBrotli,
    ExpressionsIndex,
    VirtualSampleCentroids,
    VirtualSampleFeatureMatrix,
    RepresentativeSubsample,
}

impl BlobType {
    pub const ALL: [BlobType; 8] = [
        BlobType::Centroids,
        BlobType::FeatureMatrix,
        BlobType::FeatureMatrixWithIntensities,
        BlobType::CellDataBrotli,
        BlobType::ExpressionsIndex,
        BlobType::VirtualSampleCentroids,
        BlobType::VirtualSampleFeatureMatrix,
        BlobType::RepresentativeSubsample,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::Centroids => "centroids",
            BlobType::FeatureMatrix => "feature_matrix",
            BlobType::FeatureMatrixWithIntensities => "feature_matrix_with_intensities",
            BlobType::CellDataBrotli => "cell_data_brotli",
            BlobType::ExpressionsIndex => "expressions_index",
            BlobType::VirtualSampleCentroids => "virtual_sample_centroids",
            BlobType::VirtualSampleFeatureMatrix => "virtual_sample_feature_matrix",
            BlobType::RepresentativeSubsample => "representative_subsample",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == name)
            .ok_or_else(|| SpatDbError::InvalidArgument(format!("unknown blob type: {name}")))
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric families served by the on-demand subsystem. The descriptor string
/// is the stored method identity and must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureMethod {
    PopulationFraction,
    Proximity,
    NeighborhoodEnrichment,
    CoOccurrence,
    RipleyStatistic,
    GnnImportanceScore,
}

impl FeatureMethod {
    pub fn descriptor(&self) -> &'static str {
        match self {
            FeatureMethod::PopulationFraction => "population fraction",
            FeatureMethod::Proximity => "proximity",
            FeatureMethod::NeighborhoodEnrichment => "neighborhood enrichment",
            FeatureMethod::CoOccurrence => "co-occurrence",
            FeatureMethod::RipleyStatistic => "ripley",
            FeatureMethod::GnnImportanceScore => "gnn importance score",
        }
    }

    pub fn from_descriptor(descriptor: &str) -> Result<Self> {
        [
            FeatureMethod::PopulationFraction,
            FeatureMethod::Proximity,
            FeatureMethod::NeighborhoodEnrichment,
            FeatureMethod::CoOccurrence,
            FeatureMethod::RipleyStatistic,
            FeatureMethod::GnnImportanceScore,
        ]
        .into_iter()
        .find(|m| m.descriptor() == descriptor)
        .ok_or_else(|| SpatDbError::UnknownFeatureClass(descriptor.to_string()))
    }

    /// Families whose specifiers end in a numeric radius parameter.
    pub fn takes_radius(&self) -> bool {
        matches!(
            self,
            FeatureMethod::Proximity | FeatureMethod::CoOccurrence
        )
    }
}

impl fmt::Display for FeatureMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}

/// The ordered channel list of a study, as stored in the
/// `expressions_index` blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionsIndex {
    pub measurement_study: String,
    pub channels: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_type_names_round_trip() {
        for blob_type in BlobType::ALL {
            assert_eq!(BlobType::parse(blob_type.as_str()).unwrap(), blob_type);
        }
        assert!(BlobType::parse("no_such_blob").is_err());
    }

    #[test]
    fn method_descriptors_round_trip() {
        for descriptor in [
            "population fraction",
            "proximity",
            "neighborhood enrichment",
            "co-occurrence",
            "ripley",
            "gnn importance score",
        ] {
            let method = FeatureMethod::from_descriptor(descriptor).unwrap();
            assert_eq!(method.descriptor(), descriptor);
        }
        assert!(FeatureMethod::from_descriptor("umap").is_err());
    }

    #[test]
    fn radius_families() {
        assert!(FeatureMethod::Proximity.takes_radius());
        assert!(FeatureMethod::CoOccurrence.takes_radius());
        assert!(!FeatureMethod::PopulationFraction.takes_radius());
        assert!(!FeatureMethod::NeighborhoodEnrichment.takes_radius());
    }
}
