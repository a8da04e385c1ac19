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

//! Population counts over phenotype bit masks.

use spatdb_core::phenotype::SignaturePair;

/// Number of cells whose phenotype word satisfies the signature.
pub fn count_matching(phenotype_words: &[u64], signature: SignaturePair) -> u64 {
    phenotype_words
        .iter()
        .filter(|&&word| signature.matches(word))
        .count() as u64
}

/// Membership mask for a signature over all cells, used by the spatial
/// families to intersect with neighbor sets.
pub fn membership(phenotype_words: &[u64], signature: SignaturePair) -> Vec<bool> {
    phenotype_words
        .iter()
        .map(|&word| signature.matches(word))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use spatdb_core::phenotype::{ChannelOrder, PhenotypeCriteria};

    #[test]
    fn counts_respect_positive_and_negative_bits() {
        let order = ChannelOrder::new(vec!["A".into(), "B".into(), "C".into()]).unwrap();
        let signature = PhenotypeCriteria::parse("A/C").compile(&order).unwrap();
        let words = [0b001, 0b011, 0b101, 0b111, 0b000];
        assert_eq!(count_matching(&words, signature), 2);
        assert_eq!(
            membership(&words, signature),
            vec![true, true, false, false, false]
        );
    }

    #[test]
    fn empty_positive_set_matches_everything_without_negatives() {
        let order = ChannelOrder::new(vec!["A".into()]).unwrap();
        let signature = PhenotypeCriteria::parse("/").compile(&order).unwrap();
        assert_eq!(count_matching(&[0, 1, 1], signature), 3);
    }
}
