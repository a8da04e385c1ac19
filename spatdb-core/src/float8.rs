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

//! Custom 8-bit floating point codec for quantized intensity values.
//!
//! One byte holds a fixed-point part `F` in the high bits and a shifted
//! exponent `E` in the low bits:
//!
//! ```text
//!   bit 7               bit 0
//!   [ F F F F F | E E E ]
//! ```
//!
//! The decoded value is
//!
//! ```text
//!   A * ( (F / 2^fixed_bits + 1) * 2^(E - shift)  -  2^(-shift) )
//! ```
//!
//! where the amplitude `A` is chosen so that `0xFF` decodes to exactly 1.0
//! and `0x00` to exactly 0.0. Encoding is exact on every decodable value,
//! so `encode(decode(b)) == b` for all 256 byte values. Negative inputs
//! and inputs above the top of the range are errors, never clamped.

use crate::error::{Result, SpatDbError};

/// Parameters of the 8-bit float format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Float8 {
    exponent_bits: u32,
    fixed_bits: u32,
    exponent_shift: i32,
    amplitude: f64,
}

impl Default for Float8 {
    fn default() -> Self {
        Self::new(3, 5, 2)
    }
}

impl Float8 {
    /// Builds a format with the given field widths and exponent shift. The
    /// amplitude is derived so the byte range maps onto [0, 1].
    pub fn new(exponent_bits: u32, fixed_bits: u32, exponent_shift: i32) -> Self {
        debug_assert_eq!(exponent_bits + fixed_bits, 8);
        let mut format = Self {
            exponent_bits,
            fixed_bits,
            exponent_shift,
            amplitude: 1.0,
        };
        format.amplitude = 1.0 / format.decode_unscaled(u8::MAX);
        format
    }

    fn mantissa_divisor(&self) -> f64 {
        (1u32 << self.fixed_bits) as f64
    }

    fn exponent_mask(&self) -> u8 {
        ((1u16 << self.exponent_bits) - 1) as u8
    }

    fn decode_unscaled(&self, byte: u8) -> f64 {
        let fixed = (byte >> self.exponent_bits) as f64;
        let exponent = (byte & self.exponent_mask()) as i32;
        let base = fixed / self.mantissa_divisor() + 1.0;
        base * f64::powi(2.0, exponent - self.exponent_shift)
            - f64::powi(2.0, -self.exponent_shift)
    }

    /// Decodes one byte to its value in [0, 1].
    pub fn decode(&self, byte: u8) -> f64 {
        self.amplitude * self.decode_unscaled(byte)
    }

    /// Largest encodable value; 1.0 for the default format.
    pub fn max_value(&self) -> f64 {
        self.decode(u8::MAX)
    }

    /// Encodes a value in [0, max_value] to its nearest-below byte.
    pub fn encode(&self, value: f64) -> Result<u8> {
        if !value.is_finite() || value < 0.0 {
            return Err(SpatDbError::FloatNegative { value });
        }
        if value > self.max_value() {
            return Err(SpatDbError::FloatOverflow { value });
        }
        let offset = f64::powi(2.0, -self.exponent_shift);
        let shifted = offset + value / self.amplitude;
        let mut exponent = shifted.log2().round() as i32;
        let mut base = shifted / f64::powi(2.0, exponent);
        while base < 1.0 {
            exponent -= 1;
            base = shifted / f64::powi(2.0, exponent);
        }
        let mut fixed = (self.mantissa_divisor() * (base - 1.0)).floor() as u32;
        let mut field = exponent + self.exponent_shift;
        // Floating point slop at bucket edges can land exactly on the next
        // exponent's first bucket.
        if fixed >= 1u32 << self.fixed_bits {
            fixed = 0;
            field += 1;
        }
        if field < 0 || field > self.exponent_mask() as i32 {
            return Err(SpatDbError::FloatOverflow { value });
        }
        Ok(((fixed as u8) << self.exponent_bits) | field as u8)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_endpoints() {
        let f = Float8::default();
        assert_eq!(f.decode(0x00), 0.0);
        assert!((f.decode(0xFF) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn encode_decode_identity_on_all_bytes() {
        let f = Float8::default();
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let value = f.decode(byte);
            assert_eq!(f.encode(value).unwrap(), byte, "byte {byte:#04x}");
        }
    }

    #[test]
    fn negative_values_error() {
        let f = Float8::default();
        assert!(matches!(
            f.encode(-0.001),
            Err(SpatDbError::FloatNegative { .. })
        ));
    }

    #[test]
    fn out_of_range_values_error() {
        let f = Float8::default();
        assert!(matches!(
            f.encode(2.0),
            Err(SpatDbError::FloatOverflow { .. })
        ));
    }

    #[test]
    fn nan_is_rejected() {
        let f = Float8::default();
        assert!(f.encode(f64::NAN).is_err());
    }

    #[test]
    fn encoding_is_floor_within_bucket() {
        let f = Float8::default();
        // A value strictly between two decodable points maps to the lower.
        let low = f.decode(0x80);
        let high = f.decode(0x88);
        assert!(low < high);
        let mid = low + (high - low) * 0.4;
        assert_eq!(f.encode(mid).unwrap(), 0x80);
    }
}
