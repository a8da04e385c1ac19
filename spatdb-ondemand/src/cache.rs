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

//! Bounded in-process cache of decoded cell payloads.
//!
//! Maps `(study, sample)` to the raw payload bytes plus the study's
//! ordered channel names. Two limits apply, an entry count and a total
//! byte budget. Eviction order is by size bin first (larger payloads go
//! first), insertion order second (oldest first within a bin); a min-heap
//! over `(-bin, sequence)` realizes that priority.
//!
//! The cache is advisory. A miss is answered from the store, and
//! `consider_insertion` may decline nothing: it always inserts, evicting
//! as needed to restore both bounds.

use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use spatdb_core::config::CacheSettings;

/// One cached sample payload.
#[derive(Debug, Clone)]
pub struct CachedCells {
    pub payload: Arc<Vec<u8>>,
    pub channel_names: Arc<Vec<String>>,
}

struct CacheEntry {
    cells: CachedCells,
    size: usize,
    sequence: u64,
}

struct CacheState {
    entries: HashMap<(String, String), CacheEntry>,
    // Min-heap on (-bin, sequence): highest size bin first, then oldest.
    priorities: BinaryHeap<Reverse<(i64, u64, (String, String))>>,
    total_size: usize,
    next_sequence: u64,
}

pub struct CellDataCache {
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

/// Size bin of a payload: 1 + floor(log10(kB)), clamped at 0 for tiny
/// payloads.
fn size_bin(size: usize) -> i64 {
    let kilobytes = size as f64 / 1000.0;
    if kilobytes < 1.0 {
        0
    } else {
        1 + kilobytes.log10().floor() as i64
    }
}

impl CellDataCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                priorities: BinaryHeap::new(),
                total_size: 0,
                next_sequence: 0,
            }),
        }
    }

    pub fn has(&self, study: &str, sample: &str) -> bool {
        self.state
            .lock()
            .entries
            .contains_key(&(study.to_string(), sample.to_string()))
    }

    pub fn retrieve(&self, study: &str, sample: &str) -> Option<CachedCells> {
        self.state
            .lock()
            .entries
            .get(&(study.to_string(), sample.to_string()))
            .map(|entry| entry.cells.clone())
    }

    /// The `(study, sample)` keys currently resident, for pop preference.
    pub fn resident_keys(&self) -> Vec<(String, String)> {
        self.state.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.state.lock().total_size
    }

    /// Inserts the payload, evicting to stay within bounds. The byte
    /// budget is restored first, then the entry count. Returns a handle
    /// to the inserted cells so a caller about to use them does not have
    /// to race a subsequent eviction.
    pub fn consider_insertion(
        &self,
        study: &str,
        sample: &str,
        payload: Vec<u8>,
        channel_names: Vec<String>,
    ) -> CachedCells {
        let key = (study.to_string(), sample.to_string());
        let size = payload.len();
        let mut state = self.state.lock();
        let state = &mut *state;

        if let Entry::Occupied(existing) = state.entries.entry(key.clone()) {
            let stale = existing.remove();
            state.total_size -= stale.size;
        }

        while state.total_size + size > self.settings.size_limit_bytes
            && !state.entries.is_empty()
        {
            Self::evict_one(state);
        }
        while state.entries.len() >= self.settings.sample_limit && !state.entries.is_empty() {
            Self::evict_one(state);
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state
            .priorities
            .push(Reverse((-size_bin(size), sequence, key.clone())));
        state.total_size += size;
        let cells = CachedCells {
            payload: Arc::new(payload),
            channel_names: Arc::new(channel_names),
        };
        state.entries.insert(
            key,
            CacheEntry {
                cells: cells.clone(),
                size,
                sequence,
            },
        );
        cells
    }

    fn evict_one(state: &mut CacheState) {
        while let Some(Reverse((_, sequence, key))) = state.priorities.pop() {
            // Skip stale heap entries from overwrites.
            let current = state.entries.get(&key).map(|e| e.sequence);
            if current == Some(sequence) {
                if let Some(entry) = state.entries.remove(&key) {
                    state.total_size -= entry.size;
                    debug!(study = %key.0, sample = %key.1, bytes = entry.size, "cache entry evicted");
                }
                return;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(samples: usize, megabytes: usize) -> CacheSettings {
        CacheSettings {
            sample_limit: samples,
            size_limit_bytes: megabytes * 1_000_000,
        }
    }

    #[test]
    fn read_through_round_trip() {
        let cache = CellDataCache::new(settings(10, 10));
        assert!(!cache.has("s", "a"));
        cache.consider_insertion("s", "a", vec![1, 2, 3], vec!["CD3".into()]);
        assert!(cache.has("s", "a"));
        let cells = cache.retrieve("s", "a").unwrap();
        assert_eq!(*cells.payload, vec![1, 2, 3]);
        assert_eq!(*cells.channel_names, vec!["CD3".to_string()]);
    }

    #[test]
    fn largest_entries_are_evicted_first() {
        // 1 MB budget; 3 MB of entries of varying sizes. The two largest
        // must go first and the rest stays within budget.
        let cache = CellDataCache::new(settings(100, 1));
        cache.consider_insertion("s", "big", vec![0; 1_500_000], vec![]);
        cache.consider_insertion("s", "medium", vec![0; 900_000], vec![]);
        cache.consider_insertion("s", "small", vec![0; 600_000], vec![]);
        assert!(!cache.has("s", "big"));
        assert!(!cache.has("s", "medium"));
        assert!(cache.has("s", "small"));
        assert!(cache.total_size() <= 1_000_000);
    }

    #[test]
    fn oldest_goes_first_within_a_size_bin() {
        let cache = CellDataCache::new(settings(2, 100));
        cache.consider_insertion("s", "first", vec![0; 5_000], vec![]);
        cache.consider_insertion("s", "second", vec![0; 5_000], vec![]);
        cache.consider_insertion("s", "third", vec![0; 5_000], vec![]);
        assert!(!cache.has("s", "first"));
        assert!(cache.has("s", "second"));
        assert!(cache.has("s", "third"));
    }

    #[test]
    fn count_limit_is_enforced() {
        let cache = CellDataCache::new(settings(3, 100));
        for name in ["a", "b", "c", "d", "e"] {
            cache.consider_insertion("s", name, vec![0; 100], vec![]);
        }
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn reinsertion_replaces_without_double_counting() {
        let cache = CellDataCache::new(settings(10, 10));
        cache.consider_insertion("s", "a", vec![0; 1000], vec![]);
        cache.consider_insertion("s", "a", vec![0; 2000], vec![]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_size(), 2000);
    }

    #[test]
    fn size_bins() {
        assert_eq!(size_bin(500), 0);
        assert_eq!(size_bin(1_000), 1);
        assert_eq!(size_bin(9_999), 1);
        assert_eq!(size_bin(10_000), 2);
        assert_eq!(size_bin(1_000_000), 4);
    }
}
