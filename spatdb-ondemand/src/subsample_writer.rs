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

//! Representative subsample construction.
//!
//! A study's subsample is a single compressed blob:
//!
//! ```text
//!   JSON metadata header | 0x1C | sample 1 rows | sample 2 rows | ...
//! ```
//!
//! The header carries sample names, per-sample subsample sizes, channel
//! names, and per-(sample, channel) gating thresholds. Rows are drawn
//! without replacement per sample, deterministically, after rescaling the
//! per-sample cell counts to a fixed global total. Each row keeps the
//! intensity block layout (one byte per channel plus padding).
//!
//! Gating thresholds split each channel's intensity distribution at the
//! boundary between cells whose mask bit is clear and cells whose bit is
//! set, re-encoded to the 8-bit float so the header stays compact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use spatdb_compute::subsample::{allocate_sizes, draw_indices, SUBSAMPLE_SEED};
use spatdb_compute::threshold::{quantize_threshold, reconstruct_threshold};
use spatdb_core::cell_codec::{decode_intensity_block, encode_intensity_block};
use spatdb_core::study::BlobType;
use spatdb_core::{Float8, SpatDbError};
use spatdb_storage::compression::brotli_compress;
use spatdb_storage::error::Result;
use spatdb_storage::BlobIndex;

/// Total number of cells the subsample is rescaled to.
pub const SUBSAMPLE_TOTAL: u64 = 100_000;

const HEADER_SEPARATOR: u8 = 0x1C;

/// The JSON metadata header preceding the row data.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubsampleHeader {
    pub samples: Vec<String>,
    pub sizes: Vec<u64>,
    pub channels: Vec<String>,
    /// Per sample, one encoded threshold byte per channel; null when the
    /// sample has no cells on either side of the gate.
    pub thresholds: BTreeMap<String, Vec<Option<u8>>>,
}

pub struct SubsampleWriter<'a> {
    client: &'a tokio_postgres::Client,
}

impl<'a> SubsampleWriter<'a> {
    pub fn new(client: &'a tokio_postgres::Client) -> Self {
        Self { client }
    }

    /// Builds and stores the representative subsample blob for a study.
    pub async fn write(&self, study: &str) -> Result<()> {
        let blobs = BlobIndex::new(self.client);
        let index = blobs.expressions_index(study).await?;
        let channel_count = index.channels.len();
        let samples = blobs.samples_of_study(study).await?;
        let format = Float8::default();

        let mut counts = BTreeMap::new();
        let mut per_sample: BTreeMap<String, (Vec<u64>, Vec<Vec<u8>>)> = BTreeMap::new();
        for sample in &samples {
            let matrix = blobs.feature_matrix(sample, BlobType::FeatureMatrix).await?;
            let block = blobs
                .get(sample, BlobType::FeatureMatrixWithIntensities)
                .await?
                .ok_or_else(|| spatdb_storage::StorageError::MissingBlob {
                    specimen: sample.clone(),
                    blob_type: BlobType::FeatureMatrixWithIntensities.as_str().to_string(),
                })?;
            let rows = decode_intensity_block(&block, channel_count)?;
            if rows.len() != matrix.len() {
                return Err(SpatDbError::ShapeMismatch(format!(
                    "{sample}: {} intensity rows against {} mask rows",
                    rows.len(),
                    matrix.len()
                ))
                .into());
            }
            counts.insert(sample.clone(), matrix.len() as u64);
            // Mask rows and intensity rows are both in ascending cell
            // identifier order.
            let masks: Vec<u64> = matrix.into_values().collect();
            per_sample.insert(sample.clone(), (masks, rows));
        }

        let sizes = allocate_sizes(&counts, SUBSAMPLE_TOTAL);
        let mut header = SubsampleHeader {
            samples: samples.clone(),
            sizes: samples.iter().map(|s| sizes[s]).collect(),
            channels: index.channels.clone(),
            thresholds: BTreeMap::new(),
        };
        let mut body = Vec::new();
        for sample in &samples {
            let (masks, rows) = &per_sample[sample];
            header.thresholds.insert(
                sample.clone(),
                gating_thresholds(&format, masks, rows, channel_count)?,
            );
            let drawn = draw_indices(rows.len(), sizes[sample] as usize, SUBSAMPLE_SEED);
            let selected: Vec<Vec<u8>> = drawn.into_iter().map(|i| rows[i].clone()).collect();
            body.extend_from_slice(&encode_intensity_block(&selected, channel_count)?);
        }

        let mut payload = serde_json::to_vec(&header)?;
        payload.push(HEADER_SEPARATOR);
        payload.extend_from_slice(&body);
        let compressed = brotli_compress(&payload)?;
        blobs
            .upsert(study, BlobType::RepresentativeSubsample, &compressed)
            .await?;
        info!(
            study,
            samples = samples.len(),
            cells = header.sizes.iter().sum::<u64>(),
            compressed_bytes = compressed.len(),
            "representative subsample written"
        );
        Ok(())
    }
}

/// One encoded gating threshold per channel, from the split between the
/// bit-clear and bit-set intensity populations.
fn gating_thresholds(
    format: &Float8,
    masks: &[u64],
    rows: &[Vec<u8>],
    channel_count: usize,
) -> Result<Vec<Option<u8>>> {
    let mut thresholds = Vec::with_capacity(channel_count);
    for channel in 0..channel_count {
        let bit = 1u64 << channel;
        let mut low = Vec::new();
        let mut high = Vec::new();
        for (mask, row) in masks.iter().zip(rows) {
            let value = format.decode(row[channel]);
            if mask & bit == 0 {
                low.push(value);
            } else {
                high.push(value);
            }
        }
        match reconstruct_threshold(&low, &high) {
            Some(threshold) => thresholds.push(Some(quantize_threshold(format, threshold)?)),
            None => thresholds.push(None),
        }
    }
    Ok(thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_split_the_two_populations() {
        let format = Float8::default();
        let encode = |value: f64| format.encode(value).unwrap();
        // Two channels; channel 0 separates cleanly, channel 1 has no
        // bit-set cells.
        let masks = vec![0b01, 0b01, 0b00, 0b00];
        let rows = vec![
            vec![encode(0.6), encode(0.05)],
            vec![encode(0.8), encode(0.10)],
            vec![encode(0.1), encode(0.15)],
            vec![encode(0.2), encode(0.20)],
        ];
        let thresholds = gating_thresholds(&format, &masks, &rows, 2).unwrap();

        let split = format.decode(thresholds[0].unwrap());
        let max_low = format.decode(encode(0.2));
        let min_high = format.decode(encode(0.6));
        assert!(split > max_low && split < min_high);
        // Channel 1 threshold is max(low), encoded.
        assert!(thresholds[1].is_some());
    }

    #[test]
    fn empty_channel_yields_no_threshold() {
        let format = Float8::default();
        let thresholds = gating_thresholds(&format, &[], &[], 1).unwrap();
        assert_eq!(thresholds, vec![None]);
    }

    #[test]
    fn header_round_trips_through_json() {
        let header = SubsampleHeader {
            samples: vec!["sample 1".into()],
            sizes: vec![2],
            channels: vec!["CD3".into(), "CD8".into()],
            thresholds: BTreeMap::from([("sample 1".to_string(), vec![Some(17), None])]),
        };
        let encoded = serde_json::to_vec(&header).unwrap();
        let decoded: SubsampleHeader = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.samples, header.samples);
        assert_eq!(decoded.thresholds["sample 1"], vec![Some(17), None]);
    }
}
