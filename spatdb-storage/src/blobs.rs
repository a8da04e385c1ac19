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

//! The per-study blob index (`ondemand_studies_index`).
//!
//! Binary payloads are keyed by `(specimen, blob_type)`. Sample-scoped
//! blobs use the specimen name; study-scoped blobs (the expressions index,
//! the virtual-sample forms, the representative subsample) use the study
//! name as the key. Cell payloads can be served raw, Brotli-precompressed,
//! or zstd-compressed on the fly.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use tokio_postgres::Client;
use tracing::debug;

use spatdb_core::cell_codec::encode_cells;
use spatdb_core::study::{BlobType, ExpressionsIndex};
use spatdb_core::SpatDbError;

use crate::compression::{brotli_compress, brotli_decompress, zstd_compress};
use crate::error::{Result, StorageError};

const FEATURE_MATRIX_ROW_SIZE: usize = 16;

/// Wire form requested for a cell payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellDataEncoding {
    Raw,
    Brotli,
    Zstd,
}

pub struct BlobIndex<'a> {
    client: &'a Client,
}

impl<'a> BlobIndex<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    pub async fn get(&self, specimen: &str, blob_type: BlobType) -> Result<Option<Vec<u8>>> {
        let row = self
            .client
            .query_opt(
                "SELECT blob_contents FROM ondemand_studies_index
                 WHERE specimen = $1 AND blob_type = $2",
                &[&specimen, &blob_type.as_str()],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, Vec<u8>>(0)))
    }

    async fn get_required(&self, specimen: &str, blob_type: BlobType) -> Result<Vec<u8>> {
        self.get(specimen, blob_type)
            .await?
            .ok_or_else(|| StorageError::MissingBlob {
                specimen: specimen.to_string(),
                blob_type: blob_type.as_str().to_string(),
            })
    }

    /// Inserts or replaces a blob.
    pub async fn upsert(
        &self,
        specimen: &str,
        blob_type: BlobType,
        contents: &[u8],
    ) -> Result<()> {
        self.client
            .execute(
                "DELETE FROM ondemand_studies_index WHERE specimen = $1 AND blob_type = $2",
                &[&specimen, &blob_type.as_str()],
            )
            .await?;
        self.client
            .execute(
                "INSERT INTO ondemand_studies_index (specimen, blob_type, blob_contents)
                 VALUES ($1, $2, $3)",
                &[&specimen, &blob_type.as_str(), &contents],
            )
            .await?;
        debug!(specimen, blob_type = blob_type.as_str(), bytes = contents.len(), "blob upserted");
        Ok(())
    }

    /// Deletes every blob stored under one specimen or study key.
    pub async fn delete_of_specimen(&self, specimen: &str) -> Result<u64> {
        Ok(self
            .client
            .execute(
                "DELETE FROM ondemand_studies_index WHERE specimen = $1",
                &[&specimen],
            )
            .await?)
    }

    /// Deletes rows whose blob type is not in the recognized vocabulary,
    /// left behind by older deployments. Returns the number removed.
    pub async fn delete_unrecognized_types(&self) -> Result<u64> {
        let recognized: Vec<&str> = BlobType::ALL.iter().map(BlobType::as_str).collect();
        Ok(self
            .client
            .execute(
                "DELETE FROM ondemand_studies_index WHERE NOT (blob_type = ANY($1))",
                &[&recognized],
            )
            .await?)
    }

    pub async fn counts_by_type(&self) -> Result<BTreeMap<String, u64>> {
        let rows = self
            .client
            .query(
                "SELECT blob_type, count(*) FROM ondemand_studies_index GROUP BY blob_type",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<_, String>(0), r.get::<_, i64>(1) as u64))
            .collect())
    }

    // ========================================================================
    // Study scope
    // ========================================================================

    pub async fn studies(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query("SELECT study FROM study_lookup ORDER BY study", &[])
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    pub async fn samples_of_study(&self, study: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT specimen FROM specimen_data_measurement_process
                 WHERE study = $1 ORDER BY specimen",
                &[&study],
            )
            .await?;
        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    /// The single expressions index of a study. More than one is data
    /// corruption and is reported as such.
    pub async fn expressions_index(&self, study: &str) -> Result<ExpressionsIndex> {
        let rows = self
            .client
            .query(
                "SELECT blob_contents FROM ondemand_studies_index
                 WHERE specimen = $1 AND blob_type = $2",
                &[&study, &BlobType::ExpressionsIndex.as_str()],
            )
            .await?;
        match rows.len() {
            0 => Err(StorageError::MissingBlob {
                specimen: study.to_string(),
                blob_type: BlobType::ExpressionsIndex.as_str().to_string(),
            }),
            1 => Ok(serde_json::from_slice(&rows[0].get::<_, Vec<u8>>(0))?),
            found => Err(StorageError::AmbiguousBlob {
                study: study.to_string(),
                blob_type: BlobType::ExpressionsIndex.as_str().to_string(),
                found: found as u64,
            }),
        }
    }

    // ========================================================================
    // Cell payload assembly
    // ========================================================================

    pub async fn centroids(&self, key: &str, blob_type: BlobType) -> Result<BTreeMap<u32, (i64, i64)>> {
        let raw = self.get_required(key, blob_type).await?;
        parse_centroids(&raw).map_err(Into::into)
    }

    pub async fn feature_matrix(&self, key: &str, blob_type: BlobType) -> Result<BTreeMap<u32, u64>> {
        let raw = self.get_required(key, blob_type).await?;
        parse_feature_matrix(&raw).map_err(Into::into)
    }

    /// Builds the binary cell payload for a sample from its source blobs.
    pub async fn assemble_payload(&self, specimen: &str) -> Result<Vec<u8>> {
        let centroids = self.centroids(specimen, BlobType::Centroids).await?;
        let matrix = self.feature_matrix(specimen, BlobType::FeatureMatrix).await?;
        Ok(encode_cells(&centroids, &matrix)?)
    }

    /// Builds the virtual whole-study payload from the study-keyed blobs.
    pub async fn assemble_virtual_payload(&self, study: &str) -> Result<Vec<u8>> {
        let centroids = self
            .centroids(study, BlobType::VirtualSampleCentroids)
            .await?;
        let matrix = self
            .feature_matrix(study, BlobType::VirtualSampleFeatureMatrix)
            .await?;
        Ok(encode_cells(&centroids, &matrix)?)
    }

    /// Serves a sample payload in the requested wire encoding, preferring
    /// the precompressed Brotli blob when one exists.
    pub async fn cells_payload(
        &self,
        specimen: &str,
        encoding: CellDataEncoding,
    ) -> Result<Vec<u8>> {
        let precompressed = self.get(specimen, BlobType::CellDataBrotli).await?;
        match (encoding, precompressed) {
            (CellDataEncoding::Brotli, Some(blob)) => Ok(blob),
            (CellDataEncoding::Brotli, None) => {
                brotli_compress(&self.assemble_payload(specimen).await?)
            }
            (CellDataEncoding::Raw, Some(blob)) => brotli_decompress(&blob),
            (CellDataEncoding::Raw, None) => self.assemble_payload(specimen).await,
            (CellDataEncoding::Zstd, Some(blob)) => zstd_compress(&brotli_decompress(&blob)?),
            (CellDataEncoding::Zstd, None) => {
                zstd_compress(&self.assemble_payload(specimen).await?)
            }
        }
    }
}

// ============================================================================
// Blob parsing
// ============================================================================

/// Centroids are a JSON map of cell id to `[x, y]`; coordinates are stored
/// as numbers and rounded to integer pixels here.
pub fn parse_centroids(raw: &[u8]) -> spatdb_core::Result<BTreeMap<u32, (i64, i64)>> {
    let parsed: BTreeMap<String, (f64, f64)> =
        serde_json::from_slice(raw).map_err(SpatDbError::from)?;
    let mut centroids = BTreeMap::new();
    for (key, (x, y)) in parsed {
        let identifier = key.parse::<u32>().map_err(|_| {
            SpatDbError::Serialization(format!("non-integer cell identifier in centroids: {key}"))
        })?;
        centroids.insert(identifier, (x.round() as i64, y.round() as i64));
    }
    Ok(centroids)
}

/// Feature matrix rows are 16 bytes: u64 LE cell identifier, 8-byte
/// phenotype mask.
pub fn parse_feature_matrix(raw: &[u8]) -> spatdb_core::Result<BTreeMap<u32, u64>> {
    if raw.len() % FEATURE_MATRIX_ROW_SIZE != 0 {
        return Err(SpatDbError::MalformedPayload {
            details: format!(
                "feature matrix of {} bytes is not a multiple of the {FEATURE_MATRIX_ROW_SIZE}-byte row",
                raw.len()
            ),
            offset: 0,
        });
    }
    let mut matrix = BTreeMap::new();
    for row in raw.chunks_exact(FEATURE_MATRIX_ROW_SIZE) {
        let identifier = LittleEndian::read_u64(&row[..8]);
        let identifier = u32::try_from(identifier).map_err(|_| SpatDbError::MalformedPayload {
            details: format!("cell identifier {identifier} exceeds u32 range"),
            offset: 0,
        })?;
        matrix.insert(identifier, LittleEndian::read_u64(&row[8..]));
    }
    Ok(matrix)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroids_parse_and_round() {
        let raw = br#"{"1": [10.4, 20.6], "2": [3.0, 4.0]}"#;
        let centroids = parse_centroids(raw).unwrap();
        assert_eq!(centroids[&1], (10, 21));
        assert_eq!(centroids[&2], (3, 4));
    }

    #[test]
    fn centroids_reject_non_integer_keys() {
        assert!(parse_centroids(br#"{"cell-1": [0.0, 0.0]}"#).is_err());
    }

    #[test]
    fn feature_matrix_rows_decode() {
        let mut raw = Vec::new();
        for (id, mask) in [(5u64, 0b1010u64), (6, u64::MAX)] {
            raw.extend_from_slice(&id.to_le_bytes());
            raw.extend_from_slice(&mask.to_le_bytes());
        }
        let matrix = parse_feature_matrix(&raw).unwrap();
        assert_eq!(matrix[&5], 0b1010);
        assert_eq!(matrix[&6], u64::MAX);
    }

    #[test]
    fn feature_matrix_rejects_ragged_input() {
        assert!(parse_feature_matrix(&[0u8; 17]).is_err());
    }
}
