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

//! Phenotype criteria and binary signature handling.
//!
//! A phenotype is a conjunction of positive and negative marker
//! requirements over a study's channel list. The canonical textual form is
//!
//! ```text
//! <positives sorted, '&'-joined>/<negatives sorted, '&'-joined>
//! ```
//!
//! e.g. `CD3&CD8/CD20`. A bare channel name (no `/`) denotes a single
//! positive requirement. Against a fixed channel ordering, criteria
//! compile down to a pair of 64-bit masks, and membership of a cell is two
//! AND operations on its phenotype word.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpatDbError};

/// Positive and negative marker requirements for one phenotype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhenotypeCriteria {
    pub positive_markers: Vec<String>,
    pub negative_markers: Vec<String>,
}

impl PhenotypeCriteria {
    /// Builds criteria from marker lists, dropping empty tokens and sorting.
    pub fn new<S: Into<String>>(positives: Vec<S>, negatives: Vec<S>) -> Self {
        let mut positive_markers: Vec<String> = positives
            .into_iter()
            .map(Into::into)
            .filter(|m| !m.is_empty())
            .collect();
        let mut negative_markers: Vec<String> = negatives
            .into_iter()
            .map(Into::into)
            .filter(|m| !m.is_empty())
            .collect();
        positive_markers.sort();
        negative_markers.sort();
        Self {
            positive_markers,
            negative_markers,
        }
    }

    /// Parses the canonical `pos&pos/neg&neg` form. A string without `/`
    /// is a single positive marker.
    pub fn parse(specifier: &str) -> Self {
        let (pos, neg) = match specifier.split_once('/') {
            Some((p, n)) => (p, n),
            None => (specifier, ""),
        };
        Self::new(
            pos.split('&').collect::<Vec<_>>(),
            neg.split('&').collect::<Vec<_>>(),
        )
    }

    /// Canonical string form. Stable under `parse` round trips.
    pub fn canonical_string(&self) -> String {
        if self.negative_markers.is_empty() && self.positive_markers.len() == 1 {
            return self.positive_markers[0].clone();
        }
        format!(
            "{}/{}",
            self.positive_markers.join("&"),
            self.negative_markers.join("&")
        )
    }

    /// Compiles the criteria into mask form against a channel ordering.
    pub fn compile(&self, channels: &ChannelOrder) -> Result<SignaturePair> {
        Ok(SignaturePair {
            positive: channels.signature(&self.positive_markers)?,
            negative: channels.signature(&self.negative_markers)?,
        })
    }
}

/// The bit position of each channel in a study's phenotype words.
#[derive(Debug, Clone, Default)]
pub struct ChannelOrder {
    names: Vec<String>,
    index: HashMap<String, u8>,
}

impl ChannelOrder {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.len() > 64 {
            return Err(SpatDbError::InvalidArgument(format!(
                "{} channels exceed the 64-bit phenotype word",
                names.len()
            )));
        }
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u8))
            .collect();
        Ok(Self { names, index })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn bit_of(&self, channel: &str) -> Result<u8> {
        self.index
            .get(channel)
            .copied()
            .ok_or_else(|| SpatDbError::UnknownChannel(channel.to_string()))
    }

    /// OR of the bits of the named channels.
    pub fn signature(&self, channels: &[String]) -> Result<u64> {
        let mut mask = 0u64;
        for channel in channels {
            mask |= 1u64 << self.bit_of(channel)?;
        }
        Ok(mask)
    }
}

/// Compiled membership test: a cell belongs iff all positive bits are set
/// and no negative bit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePair {
    pub positive: u64,
    pub negative: u64,
}

impl SignaturePair {
    #[inline]
    pub fn matches(&self, phenotype_word: u64) -> bool {
        (phenotype_word & self.positive) == self.positive
            && (phenotype_word & self.negative) == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> ChannelOrder {
        ChannelOrder::new(vec![
            "CD3".to_string(),
            "CD4".to_string(),
            "CD8".to_string(),
            "CD20".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn parse_full_form() {
        let c = PhenotypeCriteria::parse("CD8&CD3/CD20");
        assert_eq!(c.positive_markers, vec!["CD3", "CD8"]);
        assert_eq!(c.negative_markers, vec!["CD20"]);
        assert_eq!(c.canonical_string(), "CD3&CD8/CD20");
    }

    #[test]
    fn bare_channel_is_single_positive() {
        let c = PhenotypeCriteria::parse("CD4");
        assert_eq!(c.positive_markers, vec!["CD4"]);
        assert!(c.negative_markers.is_empty());
        assert_eq!(c.canonical_string(), "CD4");
    }

    #[test]
    fn empty_tokens_are_dropped() {
        let c = PhenotypeCriteria::parse("CD3&/");
        assert_eq!(c.positive_markers, vec!["CD3"]);
        assert!(c.negative_markers.is_empty());
    }

    #[test]
    fn membership_requires_all_positives_and_no_negatives() {
        let pair = PhenotypeCriteria::parse("CD3&CD8/CD20")
            .compile(&order())
            .unwrap();
        // bits: CD3=0, CD4=1, CD8=2, CD20=3
        assert!(pair.matches(0b0101));
        assert!(pair.matches(0b0111));
        assert!(!pair.matches(0b0001)); // missing CD8
        assert!(!pair.matches(0b1101)); // CD20 present
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let result = PhenotypeCriteria::parse("CD99").compile(&order());
        assert!(matches!(result, Err(SpatDbError::UnknownChannel(_))));
    }

    #[test]
    fn canonical_string_round_trips() {
        for s in ["CD3&CD8/CD20", "CD4", "CD20&CD3&CD4&CD8/"] {
            let c = PhenotypeCriteria::parse(s);
            assert_eq!(PhenotypeCriteria::parse(&c.canonical_string()), c);
        }
    }
}
