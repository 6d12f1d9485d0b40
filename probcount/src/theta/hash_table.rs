// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::hash::Hash;

use crate::common::ResizeFactor;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;
use crate::theta::hash_ops;

/// Maximum theta value (signed max for a well-defined hash range)
pub(crate) const MAX_THETA: u64 = i64::MAX as u64;

/// Minimum log2 of K
pub(crate) const MIN_LG_K: u8 = 5;

/// Maximum log2 of K
pub(crate) const MAX_LG_K: u8 = 26;

/// Default log2 of K
pub(crate) const DEFAULT_LG_K: u8 = 12;

/// Resize threshold (0.5 = 50% load factor)
const RESIZE_THRESHOLD: f64 = 0.5;

/// Rebuild threshold (15/16 = 93.75% load factor)
pub(crate) const REBUILD_THRESHOLD: f64 = 15.0 / 16.0;

/// The hash table behind an updatable Theta sketch.
///
/// It maintains an array capacity up to 2^lg_max_size:
/// * Before it reaches the max capacity, it extends the array based on the
///   resize factor.
/// * Once at max capacity, every time the number of entries exceeds the
///   rebuild threshold it keeps the smallest 2^lg_nom_size entries and
///   lowers theta to the k-th smallest entry.
#[derive(Debug)]
pub(crate) struct ThetaHashTable {
    lg_cur_size: u8,
    lg_nom_size: u8,
    lg_max_size: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    hash_seed: u64,

    // Logical emptiness of the source set. This can be false even when
    // `num_retained` is 0 (e.g. all updates screened by theta).
    is_empty: bool,

    theta: u64,

    entries: Vec<u64>,

    // Number of retained non-zero hashes currently stored in `entries`.
    num_retained: usize,
}

impl ThetaHashTable {
    /// Create a new hash table
    pub fn new(
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        hash_seed: u64,
    ) -> Self {
        let lg_max_size = lg_nom_size + 1;
        let lg_cur_size = starting_sub_multiple(lg_max_size, MIN_LG_K, resize_factor.lg_value());
        Self::new_with_state(
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            starting_theta_from_sampling_probability(sampling_probability),
            hash_seed,
            true,
        )
    }

    /// Create a table with explicit state.
    ///
    /// # Panics
    ///
    /// Panics if `lg_cur_size > lg_nom_size + 1`.
    pub fn new_with_state(
        lg_cur_size: u8,
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        theta: u64,
        hash_seed: u64,
        is_empty: bool,
    ) -> Self {
        let lg_max_size = lg_nom_size + 1;
        assert!(
            lg_cur_size <= lg_max_size,
            "lg_cur_size must be <= lg_nom_size + 1, got lg_cur_size={lg_cur_size}, lg_nom_size={lg_nom_size}"
        );
        Self {
            lg_cur_size,
            lg_nom_size,
            lg_max_size,
            resize_factor,
            sampling_probability,
            hash_seed,
            is_empty,
            theta,
            entries: vec![0u64; 1 << lg_cur_size],
            num_retained: 0,
        }
    }

    /// Rebuild a table from the retained entries of a deserialized image.
    ///
    /// All entries must already be below `theta`; the table is sized so no
    /// resize or rebuild triggers while re-inserting them.
    pub fn from_entries(
        lg_nom_size: u8,
        hash_seed: u64,
        theta: u64,
        is_empty: bool,
        entries: Vec<u64>,
    ) -> Self {
        let lg_max_size = lg_nom_size + 1;
        let lg_cur_size =
            lg_size_from_count(entries.len(), RESIZE_THRESHOLD).min(lg_max_size);
        let mut table = Self::new_with_state(
            lg_cur_size,
            lg_nom_size,
            ResizeFactor::X8,
            1.0,
            theta,
            hash_seed,
            is_empty,
        );
        for hash in entries {
            table.try_insert_hash(hash);
        }
        table.is_empty = is_empty;
        table
    }

    /// Hash a value with the table seed and return the hash.
    pub fn hash<T: Hash>(&self, value: T) -> u64 {
        let mut hasher = MurmurHash3X64128::with_seed(self.hash_seed);
        value.hash(&mut hasher);
        let (h1, _) = hasher.finish128();
        h1 >> 1 // keep the hash in the non-negative range theta is defined over
    }

    /// Inserts a pre-hashed value into the table.
    ///
    /// Returns true if the value was inserted (new), false otherwise.
    pub fn try_insert_hash(&mut self, hash: u64) -> bool {
        self.is_empty = false;

        if hash_ops::continue_condition(self.theta, hash) {
            return false;
        }

        let Some(index) = hash_ops::find_in_slice(&self.entries, self.lg_cur_size, hash) else {
            unreachable!("resize or rebuild keeps the table below full");
        };

        if self.entries[index] == hash {
            return false;
        }

        debug_assert_eq!(self.entries[index], 0);
        self.entries[index] = hash;
        self.num_retained += 1;

        if self.num_retained > self.capacity() {
            if self.lg_cur_size <= self.lg_nom_size {
                self.resize();
            } else {
                self.rebuild();
            }
        }
        true
    }

    /// Number of entries the current array may hold before growing or
    /// rebuilding.
    fn capacity(&self) -> usize {
        let fraction = if self.lg_cur_size <= self.lg_nom_size {
            RESIZE_THRESHOLD
        } else {
            REBUILD_THRESHOLD
        };
        (fraction * self.entries.len() as f64) as usize
    }

    /// Grow the array by the resize factor and rehash.
    fn resize(&mut self) {
        let new_lg_size = std::cmp::min(
            self.lg_cur_size + self.resize_factor.lg_value(),
            self.lg_max_size,
        );

        let mut new_entries = vec![0u64; 1 << new_lg_size];
        for &entry in &self.entries {
            if entry != 0 {
                let Some(idx) = hash_ops::find_in_slice(&new_entries, new_lg_size, entry) else {
                    unreachable!("the grown table has room for every old entry");
                };
                new_entries[idx] = entry;
            }
        }

        self.entries = new_entries;
        self.lg_cur_size = new_lg_size;
    }

    /// Rebuild the hash table, reducing the number of entries to the nominal
    /// size k and lowering theta to the k-th smallest entry.
    fn rebuild(&mut self) {
        self.entries.retain(|&e| e != 0);
        let k = 1usize << self.lg_nom_size;
        let (lesser, kth, _) = self.entries.select_nth_unstable(k);
        self.theta = *kth;

        let mut new_entries = vec![0u64; 1 << self.lg_cur_size];
        let mut num_inserted = 0;
        for entry in lesser {
            let Some(idx) = hash_ops::find_in_slice(&new_entries, self.lg_cur_size, *entry) else {
                unreachable!("the rebuilt table has room for k entries");
            };
            new_entries[idx] = *entry;
            num_inserted += 1;
        }

        debug_assert_eq!(num_inserted, k);
        self.num_retained = num_inserted;
        self.entries = new_entries;
    }

    /// Trim the table to nominal size k
    pub fn trim(&mut self) {
        if self.num_retained > (1 << self.lg_nom_size) {
            self.rebuild();
        }
    }

    /// Reset the table to empty state
    pub fn reset(&mut self) {
        let init_theta = starting_theta_from_sampling_probability(self.sampling_probability);
        let init_lg_cur = starting_sub_multiple(
            self.lg_nom_size + 1,
            MIN_LG_K,
            self.resize_factor.lg_value(),
        );

        if self.entries.len() != 1 << init_lg_cur {
            self.entries.resize(1 << init_lg_cur, 0);
        }
        self.entries.fill(0);
        self.num_retained = 0;
        self.theta = init_theta;
        self.is_empty = true;
        self.lg_cur_size = init_lg_cur;
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.num_retained
    }

    /// Get theta
    pub fn theta(&self) -> u64 {
        self.theta
    }

    /// Check the logical emptiness of the source set
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// Get iterator over entries
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied().filter(|&e| e != 0)
    }

    /// Get log2 of nominal size
    pub fn lg_nom_size(&self) -> u8 {
        self.lg_nom_size
    }

    /// Get the seed that is used to hash the input.
    pub fn seed(&self) -> u64 {
        self.hash_seed
    }

    /// Get the hash of the seed that is used to hash the input.
    pub fn seed_hash(&self) -> u16 {
        compute_seed_hash(self.hash_seed)
    }
}

/// The smallest lg table size whose load threshold accommodates `count`
/// entries.
pub(crate) fn lg_size_from_count(count: usize, threshold: f64) -> u8 {
    let required = (count as f64 / threshold).ceil() as u64;
    let arr_longs = required.next_power_of_two().max(1 << MIN_LG_K);
    arr_longs.trailing_zeros() as u8
}

/// Compute initial lg_size for a hash table based on target lg_size, minimum
/// lg_size, and resize factor. Keeps `lg_target = lg_init + n *
/// lg_resize_factor` for an integral `n` with `lg_init >= lg_min`.
fn starting_sub_multiple(lg_target: u8, lg_min: u8, lg_resize_factor: u8) -> u8 {
    if lg_target <= lg_min {
        lg_min
    } else if lg_resize_factor == 0 {
        lg_target
    } else {
        ((lg_target - lg_min) % lg_resize_factor) + lg_min
    }
}

/// Compute initial theta for a hash table from its sampling probability.
fn starting_theta_from_sampling_probability(sampling_probability: f32) -> u64 {
    if sampling_probability < 1.0 {
        (MAX_THETA as f64 * sampling_probability as f64) as u64
    } else {
        MAX_THETA
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DEFAULT_UPDATE_SEED;

    fn populate(table: &mut ThetaHashTable, count: usize) -> usize {
        let mut inserted = 0;
        for i in 0..count {
            let hash = table.hash(format!("value_{i}"));
            if table.try_insert_hash(hash) {
                inserted += 1;
            }
        }
        inserted
    }

    #[test]
    fn test_new_hash_table() {
        let table = ThetaHashTable::new(8, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        assert_eq!(table.theta(), MAX_THETA);
        assert_eq!(table.num_retained(), 0);
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_theta_screen() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        table.theta = 1;
        let hash = table.hash("screened");
        assert!(!table.try_insert_hash(hash));
        assert_eq!(table.num_retained(), 0);
        // The update still marks the source set non-empty.
        assert!(!table.is_empty());
    }

    #[test]
    fn test_insert_and_duplicates() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        let hash = table.hash("test_value");
        assert!(table.try_insert_hash(hash));
        assert_eq!(table.num_retained(), 1);
        assert!(!table.try_insert_hash(hash));
        assert_eq!(table.num_retained(), 1);
    }

    #[test]
    fn test_resize_by_factor() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X2, 1.0, DEFAULT_UPDATE_SEED);
        assert_eq!(table.entries.len(), 32);

        // Pass the 50% threshold of the 32-entry array.
        let inserted = populate(&mut table, 20);
        assert_eq!(table.num_retained(), inserted);
        assert_eq!(table.entries.len(), 64);

        let mut table = ThetaHashTable::new(8, ResizeFactor::X4, 1.0, DEFAULT_UPDATE_SEED);
        assert_eq!(table.entries.len(), 32);
        populate(&mut table, 20);
        assert_eq!(table.entries.len(), 128);
    }

    #[test]
    fn test_rebuild_reduces_theta() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        populate(&mut table, 100);
        let theta_after_first = table.theta();
        assert!(theta_after_first < MAX_THETA);

        populate(&mut table, 200);
        assert!(table.theta() < theta_after_first);

        // Every retained entry respects the invariant 0 < h < theta.
        assert!(table.iter().all(|e| e > 0 && e < table.theta()));
    }

    #[test]
    fn test_trim() {
        let mut table = ThetaHashTable::new(5, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);

        populate(&mut table, 100);
        assert!(table.num_retained() > 32);

        table.trim();
        assert!(table.num_retained() <= 32);
        assert!(table.theta() < MAX_THETA);
    }

    #[test]
    fn test_reset() {
        let mut table = ThetaHashTable::new(8, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        let init_theta = table.theta();
        let init_entries = table.entries.len();

        populate(&mut table, 10);
        assert!(!table.is_empty());

        table.reset();
        assert!(table.is_empty());
        assert_eq!(table.num_retained(), 0);
        assert_eq!(table.theta(), init_theta);
        assert_eq!(table.entries.len(), init_entries);
    }

    #[test]
    fn test_sampling_probability_sets_theta() {
        let table = ThetaHashTable::new(8, ResizeFactor::X8, 0.5, DEFAULT_UPDATE_SEED);
        assert_eq!(table.theta(), (MAX_THETA as f64 * 0.5) as u64);
    }

    #[test]
    fn test_from_entries_round_trip() {
        let mut table = ThetaHashTable::new(6, ResizeFactor::X8, 1.0, DEFAULT_UPDATE_SEED);
        populate(&mut table, 50);

        let mut entries: Vec<u64> = table.iter().collect();
        entries.sort_unstable();
        let rebuilt = ThetaHashTable::from_entries(
            6,
            DEFAULT_UPDATE_SEED,
            table.theta(),
            false,
            entries.clone(),
        );

        assert_eq!(rebuilt.num_retained(), entries.len());
        assert_eq!(rebuilt.theta(), table.theta());
        let mut back: Vec<u64> = rebuilt.iter().collect();
        back.sort_unstable();
        assert_eq!(back, entries);
    }

    #[test]
    fn test_lg_size_from_count() {
        assert_eq!(lg_size_from_count(0, REBUILD_THRESHOLD), MIN_LG_K);
        assert_eq!(lg_size_from_count(30, REBUILD_THRESHOLD), MIN_LG_K);
        assert_eq!(lg_size_from_count(31, REBUILD_THRESHOLD), 6);
        assert_eq!(lg_size_from_count(60, REBUILD_THRESHOLD), 6);
        assert_eq!(lg_size_from_count(61, REBUILD_THRESHOLD), 7);
    }
}
