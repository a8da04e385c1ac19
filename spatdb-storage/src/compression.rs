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

//! Compression for stored payloads.
//!
//! Precomputed blobs use Brotli at maximum quality: they are written once
//! per study and read many times. On-the-fly responses use zstd, which
//! compresses well enough at a fraction of the encode cost.

use std::io::{Read, Write};

use crate::error::Result;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_WINDOW: u32 = 24;
const ZSTD_LEVEL: i32 = 3;

pub fn brotli_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut compressed = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(
            &mut compressed,
            BROTLI_BUFFER,
            BROTLI_QUALITY,
            BROTLI_WINDOW,
        );
        writer.write_all(data)?;
        writer.flush()?;
    }
    Ok(compressed)
}

pub fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    brotli::Decompressor::new(data, BROTLI_BUFFER).read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

pub fn zstd_compress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(zstd::bulk::compress(data, ZSTD_LEVEL)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brotli_round_trip() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = brotli_compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(brotli_decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn zstd_output_is_nonempty() {
        let data = vec![7u8; 4096];
        let compressed = zstd_compress(&data).unwrap();
        assert!(!compressed.is_empty());
        assert!(compressed.len() < data.len());
    }
}
