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

//! Binary per-sample cell payload codec.
//!
//! Payload layout:
//!
//! ```text
//! +--------------------------- header, 20 bytes ---------------------------+
//! | cell_count | x_min | x_max | y_min | y_max        (big-endian u32 each)|
//! +--------------------- records, 20 bytes per cell -----------------------+
//! | identifier (BE u32) | x (BE u32) | y (BE u32) | phenotype mask (LE u64)|
//! +-------------------------------------------------------------------------+
//! ```
//!
//! Coordinates are normalized at encode time: when the minimum observed
//! value on an axis is at or below 1, the whole axis is shifted so that its
//! minimum becomes exactly 1. Header extrema are taken after shifting.
//!
//! A separate optional intensity block carries one row per cell of `N`
//! single-byte quantized intensities plus 4 alignment bytes, with no
//! header; `N` is the study's channel count.

use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::error::{Result, SpatDbError};

pub const HEADER_SIZE: usize = 20;
pub const RECORD_SIZE: usize = 20;
pub const INTENSITY_PADDING: usize = 4;

/// Decoded payload header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub cell_count: u32,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

/// Column-oriented decoded form of a sample's cells.
#[derive(Debug, Clone, Default)]
pub struct CellDataArrays {
    pub identifiers: Vec<u32>,
    pub x: Vec<u32>,
    pub y: Vec<u32>,
    pub phenotype_words: Vec<u64>,
}

impl CellDataArrays {
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Encodes location and phenotype maps into the binary payload.
///
/// The two maps must cover exactly the same identifiers; a mismatch means
/// the sample's sources disagree and is fatal. A non-consecutive
/// identifier run is tolerated but logged.
pub fn encode_cells(
    locations: &BTreeMap<u32, (i64, i64)>,
    phenotypes: &BTreeMap<u32, u64>,
) -> Result<Vec<u8>> {
    if locations.len() != phenotypes.len()
        || !locations.keys().eq(phenotypes.keys())
    {
        return Err(SpatDbError::ShapeMismatch(format!(
            "location source has {} identifiers, phenotype source has {}, and they must coincide",
            locations.len(),
            phenotypes.len()
        )));
    }
    check_consecutive(locations.keys().copied());

    let (dx, dy) = normalization_shift(locations.values().copied());
    let mut shifted: Vec<(u32, u32, u32, u64)> = Vec::with_capacity(locations.len());
    for ((&identifier, &(x, y)), &word) in locations.iter().zip(phenotypes.values()) {
        let x = shift_coordinate(x, dx, identifier, "x")?;
        let y = shift_coordinate(y, dy, identifier, "y")?;
        shifted.push((identifier, x, y, word));
    }

    let x_min = shifted.iter().map(|r| r.1).min().unwrap_or(0);
    let x_max = shifted.iter().map(|r| r.1).max().unwrap_or(0);
    let y_min = shifted.iter().map(|r| r.2).min().unwrap_or(0);
    let y_max = shifted.iter().map(|r| r.2).max().unwrap_or(0);

    let mut payload = Vec::with_capacity(HEADER_SIZE + RECORD_SIZE * shifted.len());
    payload.write_u32::<BigEndian>(shifted.len() as u32)?;
    payload.write_u32::<BigEndian>(x_min)?;
    payload.write_u32::<BigEndian>(x_max)?;
    payload.write_u32::<BigEndian>(y_min)?;
    payload.write_u32::<BigEndian>(y_max)?;
    for (identifier, x, y, word) in shifted {
        payload.write_u32::<BigEndian>(identifier)?;
        payload.write_u32::<BigEndian>(x)?;
        payload.write_u32::<BigEndian>(y)?;
        payload.write_u64::<LittleEndian>(word)?;
    }
    Ok(payload)
}

/// Decodes just the header of a payload.
pub fn decode_header(payload: &[u8]) -> Result<PayloadHeader> {
    if payload.len() < HEADER_SIZE {
        return Err(SpatDbError::MalformedPayload {
            details: format!("payload of {} bytes is shorter than the header", payload.len()),
            offset: 0,
        });
    }
    let mut cursor = Cursor::new(payload);
    Ok(PayloadHeader {
        cell_count: cursor.read_u32::<BigEndian>()?,
        x_min: cursor.read_u32::<BigEndian>()?,
        x_max: cursor.read_u32::<BigEndian>()?,
        y_min: cursor.read_u32::<BigEndian>()?,
        y_max: cursor.read_u32::<BigEndian>()?,
    })
}

/// Decodes a full payload into column arrays.
pub fn decode_cells(payload: &[u8]) -> Result<(PayloadHeader, CellDataArrays)> {
    let header = decode_header(payload)?;
    let expected = HEADER_SIZE + RECORD_SIZE * header.cell_count as usize;
    if payload.len() != expected {
        return Err(SpatDbError::MalformedPayload {
            details: format!(
                "header declares {} cells ({expected} bytes) but payload has {} bytes",
                header.cell_count,
                payload.len()
            ),
            offset: HEADER_SIZE,
        });
    }
    let mut arrays = CellDataArrays {
        identifiers: Vec::with_capacity(header.cell_count as usize),
        x: Vec::with_capacity(header.cell_count as usize),
        y: Vec::with_capacity(header.cell_count as usize),
        phenotype_words: Vec::with_capacity(header.cell_count as usize),
    };
    let mut cursor = Cursor::new(&payload[HEADER_SIZE..]);
    for _ in 0..header.cell_count {
        arrays.identifiers.push(cursor.read_u32::<BigEndian>()?);
        arrays.x.push(cursor.read_u32::<BigEndian>()?);
        arrays.y.push(cursor.read_u32::<BigEndian>()?);
        arrays.phenotype_words.push(cursor.read_u64::<LittleEndian>()?);
    }
    Ok((header, arrays))
}

/// Serializes quantized intensity rows, `N + 4` bytes per cell.
pub fn encode_intensity_block(rows: &[Vec<u8>], channel_count: usize) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(rows.len() * (channel_count + INTENSITY_PADDING));
    for (index, row) in rows.iter().enumerate() {
        if row.len() != channel_count {
            return Err(SpatDbError::ShapeMismatch(format!(
                "intensity row {index} has {} entries, expected {channel_count}",
                row.len()
            )));
        }
        block.extend_from_slice(row);
        block.extend_from_slice(&[0u8; INTENSITY_PADDING]);
    }
    Ok(block)
}

/// Splits an intensity block back into per-cell rows.
pub fn decode_intensity_block(block: &[u8], channel_count: usize) -> Result<Vec<Vec<u8>>> {
    let stride = channel_count + INTENSITY_PADDING;
    if stride == INTENSITY_PADDING || block.len() % stride != 0 {
        return Err(SpatDbError::MalformedPayload {
            details: format!(
                "intensity block of {} bytes is not a multiple of the {stride}-byte stride",
                block.len()
            ),
            offset: 0,
        });
    }
    Ok(block
        .chunks_exact(stride)
        .map(|chunk| chunk[..channel_count].to_vec())
        .collect())
}

fn check_consecutive(identifiers: impl Iterator<Item = u32>) {
    let mut previous: Option<u32> = None;
    for identifier in identifiers {
        if let Some(p) = previous {
            if identifier != p + 1 {
                warn!(
                    after = p,
                    found = identifier,
                    "non-consecutive cell identifier run in sample payload"
                );
                return;
            }
        }
        previous = Some(identifier);
    }
}

/// Per-axis shifts that bring a minimum at or below 1 up to exactly 1.
fn normalization_shift(points: impl Iterator<Item = (i64, i64)>) -> (i64, i64) {
    let mut x_min: Option<i64> = None;
    let mut y_min: Option<i64> = None;
    for (x, y) in points {
        x_min = Some(x_min.map_or(x, |m| m.min(x)));
        y_min = Some(y_min.map_or(y, |m| m.min(y)));
    }
    let axis = |min: Option<i64>| match min {
        Some(m) if m <= 1 => 1 - m,
        _ => 0,
    };
    (axis(x_min), axis(y_min))
}

fn shift_coordinate(value: i64, shift: i64, identifier: u32, axis: &str) -> Result<u32> {
    u32::try_from(value + shift).map_err(|_| {
        SpatDbError::MalformedPayload {
            details: format!("{axis} coordinate {value} of cell {identifier} exceeds u32 range"),
            offset: 0,
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_maps() -> (BTreeMap<u32, (i64, i64)>, BTreeMap<u32, u64>) {
        let locations = BTreeMap::from([
            (10, (5, 9)),
            (11, (3, 14)),
            (12, (8, 2)),
        ]);
        let phenotypes = BTreeMap::from([(10, 0b101u64), (11, 0), (12, u64::MAX)]);
        (locations, phenotypes)
    }

    #[test]
    fn payload_size_is_header_plus_records() {
        let (locations, phenotypes) = sample_maps();
        let payload = encode_cells(&locations, &phenotypes).unwrap();
        assert_eq!(payload.len(), HEADER_SIZE + 3 * RECORD_SIZE);
    }

    #[test]
    fn round_trip_preserves_columns() {
        let (locations, phenotypes) = sample_maps();
        let payload = encode_cells(&locations, &phenotypes).unwrap();
        let (header, arrays) = decode_cells(&payload).unwrap();
        assert_eq!(header.cell_count, 3);
        assert_eq!(arrays.identifiers, vec![10, 11, 12]);
        assert_eq!(arrays.x, vec![5, 3, 8]);
        assert_eq!(arrays.y, vec![9, 14, 2]);
        assert_eq!(arrays.phenotype_words, vec![0b101, 0, u64::MAX]);
        assert_eq!(header.x_min, 3);
        assert_eq!(header.x_max, 8);
        assert_eq!(header.y_min, 2);
        assert_eq!(header.y_max, 14);
    }

    #[test]
    fn low_coordinates_are_shifted_to_one() {
        let locations = BTreeMap::from([(1, (0, -3)), (2, (4, 6))]);
        let phenotypes = BTreeMap::from([(1, 1u64), (2, 2u64)]);
        let payload = encode_cells(&locations, &phenotypes).unwrap();
        let (header, arrays) = decode_cells(&payload).unwrap();
        // x shifted by +1, y shifted by +4
        assert_eq!(arrays.x, vec![1, 5]);
        assert_eq!(arrays.y, vec![1, 10]);
        assert_eq!(header.x_min, 1);
        assert_eq!(header.y_min, 1);
    }

    #[test]
    fn identifier_mismatch_is_fatal() {
        let locations = BTreeMap::from([(1, (2, 2))]);
        let phenotypes = BTreeMap::from([(2, 0u64)]);
        assert!(matches!(
            encode_cells(&locations, &phenotypes),
            Err(SpatDbError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let (locations, phenotypes) = sample_maps();
        let payload = encode_cells(&locations, &phenotypes).unwrap();
        assert!(decode_cells(&payload[..payload.len() - 1]).is_err());
        assert!(decode_header(&payload[..10]).is_err());
    }

    #[test]
    fn intensity_block_round_trip() {
        let rows = vec![vec![1u8, 2, 3], vec![4, 5, 6]];
        let block = encode_intensity_block(&rows, 3).unwrap();
        assert_eq!(block.len(), 2 * (3 + INTENSITY_PADDING));
        assert_eq!(decode_intensity_block(&block, 3).unwrap(), rows);
    }

    #[test]
    fn intensity_block_bad_stride_is_rejected() {
        assert!(decode_intensity_block(&[0u8; 10], 3).is_err());
    }
}
