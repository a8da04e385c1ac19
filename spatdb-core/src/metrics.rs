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

//! Result shapes and numeric policies shared by the metric families.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-sample values of one feature, as handed back to callers. A missing
/// value for a sample is "computed but undefined"; `pending` means the
/// worker pool has not finished the feature yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsResult {
    pub values: BTreeMap<String, Option<f64>>,
    pub pending: bool,
}

impl MetricsResult {
    pub fn complete(values: BTreeMap<String, Option<f64>>) -> Self {
        Self {
            values,
            pending: false,
        }
    }

    pub fn pending(values: BTreeMap<String, Option<f64>>) -> Self {
        Self {
            values,
            pending: true,
        }
    }
}

/// NaN and infinities are never stored as feature values.
pub fn sanitize_value(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Percentage composition of two counts, used for counts-by-signature
/// responses. Null propagates; a zero denominator is undefined; a zero
/// numerator is exactly 0. Otherwise the ratio is rounded to four decimal
/// places before scaling to percent.
pub fn percent_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (numerator, denominator) = match (numerator, denominator) {
        (Some(n), Some(d)) => (n, d),
        _ => return None,
    };
    if denominator == 0.0 {
        return None;
    }
    if numerator == 0.0 {
        return Some(0.0);
    }
    Some(100.0 * (numerator / denominator * 10_000.0).round() / 10_000.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_null_propagates() {
        assert_eq!(percent_ratio(None, Some(5.0)), None);
        assert_eq!(percent_ratio(Some(5.0), None), None);
    }

    #[test]
    fn ratio_zero_denominator_is_null() {
        assert_eq!(percent_ratio(Some(5.0), Some(0.0)), None);
    }

    #[test]
    fn ratio_zero_numerator_is_zero() {
        assert_eq!(percent_ratio(Some(0.0), Some(7.0)), Some(0.0));
    }

    #[test]
    fn ratio_rounds_to_four_places_before_percent() {
        // 1/3 = 0.333333... -> 0.3333 -> 33.33
        let value = percent_ratio(Some(1.0), Some(3.0)).unwrap();
        assert!((value - 33.33).abs() < 1e-9);
    }

    #[test]
    fn sanitize_rejects_non_finite() {
        assert_eq!(sanitize_value(f64::NAN), None);
        assert_eq!(sanitize_value(f64::INFINITY), None);
        assert_eq!(sanitize_value(1.5), Some(1.5));
    }
}
