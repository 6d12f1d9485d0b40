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

//! Auxiliary hash map for Array4 exceptions.
//!
//! Stores slot-value pairs for values that do not fit in the 4-bit main
//! array. Uses open addressing with stride-based probing for collision
//! resolution. The table lives in a [`Storage`] buffer; when the load factor
//! is exceeded the map requests a larger buffer, rehashes into it, and
//! rebinds.

use crate::error::Error;
use crate::hll::RESIZE_DENOMINATOR;
use crate::hll::RESIZE_NUMERATOR;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::pack_coupon;
use crate::memory::Storage;

const ENTRY_EMPTY: u32 = 0;
const ENTRY_BYTES: usize = 4;

/// Initial lg of the table size for a given lg_config_k.
///
/// Exceptions only appear once the 4-bit window has saturated, which takes
/// more updates for larger sketches, hence the dependence on the sketch size.
fn lg_aux_arr_ints(lg_config_k: u8) -> u8 {
    const LG_AUX_ARR_INTS: &[u8] = &[
        0, 2, 2, 2, 2, 2, 2, 3, 3, 3, // 0-9
        4, 4, 5, 5, 6, 7, 8, 9, 10, 11, // 10-19
        12, 13, 14, 15, 16, 17, 18, // 20-26
    ];

    LG_AUX_ARR_INTS[lg_config_k as usize]
}

/// Open-addressing hash table for exception values.
///
/// Each entry is an u32 packed as `[value (upper 6 bits) | slot (lower 26
/// bits)]`; only the low `lg_config_k` bits of the slot field are
/// significant for lookup. Empty entries are the all-zero pattern, which is
/// unambiguous because a real exception always has a nonzero value field.
#[derive(Debug, Clone)]
pub struct AuxMap {
    lg_size: u8,
    lg_config_k: u8,
    entries: Storage,
    count: u32,
}

impl PartialEq for AuxMap {
    fn eq(&self, other: &Self) -> bool {
        // Two aux maps are equal if they have the same lg_config_k and the
        // same non-empty entries, regardless of internal placement.
        if self.lg_config_k != other.lg_config_k || self.count != other.count {
            return false;
        }

        let mut entries1: Vec<u32> = self.raw_entries().filter(|&e| e != ENTRY_EMPTY).collect();
        let mut entries2: Vec<u32> = other.raw_entries().filter(|&e| e != ENTRY_EMPTY).collect();
        entries1.sort_unstable();
        entries2.sort_unstable();
        entries1 == entries2
    }
}

/// Result of a find operation
enum FindResult {
    Found(usize),
    Empty(usize),
}

impl AuxMap {
    /// Create a new map sized for the given sketch configuration.
    pub fn new(lg_config_k: u8) -> Self {
        let lg_size = lg_aux_arr_ints(lg_config_k);
        Self {
            lg_size,
            lg_config_k,
            entries: Storage::with_capacity(ENTRY_BYTES << lg_size),
            count: 0,
        }
    }

    /// Number of stored exception pairs.
    pub fn count(&self) -> u32 {
        self.count
    }

    #[inline]
    fn entry(&self, idx: usize) -> u32 {
        self.entries.get_u32(idx * ENTRY_BYTES)
    }

    #[inline]
    fn set_entry(&mut self, idx: usize, entry: u32) {
        self.entries.put_u32(idx * ENTRY_BYTES, entry);
    }

    fn raw_entries(&self) -> impl Iterator<Item = u32> + '_ {
        (0..1usize << self.lg_size).map(|i| self.entry(i))
    }

    /// Insert a new slot-value pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the slot already holds an exception. A
    /// well-formed caller checks existence first, but the pairs of a wire
    /// image are untrusted and may collide.
    pub fn must_add(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        match self.find(slot)? {
            FindResult::Found(_) => Err(Error::invalid_state(format!(
                "slot {slot} already exists in aux map"
            ))),
            FindResult::Empty(idx) => {
                self.set_entry(idx, pack_coupon(slot, value));
                self.count += 1;
                self.check_grow()
            }
        }
    }

    /// Get the value for a slot, or `None` if the slot has no exception.
    pub fn get(&self, slot: u32) -> Option<u8> {
        match self.find(slot) {
            Ok(FindResult::Found(idx)) => Some(get_value(self.entry(idx))),
            _ => None,
        }
    }

    /// Get the value for a slot that must exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the slot is absent; a 4-bit register
    /// holding the overflow marker always has a matching aux entry.
    pub fn must_find_value_for(&self, slot: u32) -> Result<u8, Error> {
        match self.find(slot)? {
            FindResult::Found(idx) => Ok(get_value(self.entry(idx))),
            FindResult::Empty(_) => Err(Error::invalid_state(format!(
                "slot {slot} not found in aux map"
            ))),
        }
    }

    /// Replace the value for an existing slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the slot is absent.
    pub fn must_replace(&mut self, slot: u32, value: u8) -> Result<(), Error> {
        match self.find(slot)? {
            FindResult::Found(idx) => {
                self.set_entry(idx, pack_coupon(slot, value));
                Ok(())
            }
            FindResult::Empty(_) => Err(Error::invalid_state(format!(
                "slot {slot} not found in aux map"
            ))),
        }
    }

    /// Find a slot in the hash table using open addressing with stride.
    ///
    /// Returns either the index where the slot was found, or the index of
    /// the empty slot where it could be inserted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the probe cycles without hitting the slot
    /// or an empty entry; `must_add` grows the table before it can fill, so
    /// a full cycle means a sizing invariant was broken.
    fn find(&self, slot: u32) -> Result<FindResult, Error> {
        let mask = (1u32 << self.lg_size) - 1;
        let config_k_mask = (1u32 << self.lg_config_k) - 1;
        let mut probe = slot & mask;
        let start = probe;

        loop {
            let entry = self.entry(probe as usize);

            if entry == ENTRY_EMPTY {
                return Ok(FindResult::Empty(probe as usize));
            }

            if get_slot(entry) & config_k_mask == slot {
                return Ok(FindResult::Found(probe as usize));
            }

            // Odd stride guarantees full coverage of the power-of-two table.
            let stride = (slot >> self.lg_size) | 1;
            probe = (probe + stride) & mask;

            if probe == start {
                return Err(Error::invalid_state("aux map full; no empty slots"));
            }
        }
    }

    /// Grow when an insert pushed past the 75% load factor.
    fn check_grow(&mut self) -> Result<(), Error> {
        let size = 1u32 << self.lg_size;
        if RESIZE_DENOMINATOR * self.count > RESIZE_NUMERATOR * size {
            self.grow()?;
        }
        Ok(())
    }

    /// Double the table and rehash all entries into a fresh buffer.
    fn grow(&mut self) -> Result<(), Error> {
        let old: Vec<u32> = self.raw_entries().collect();

        let new_lg_size = self.lg_size + 1;
        let required = ENTRY_BYTES << new_lg_size;
        if required > self.entries.capacity() {
            self.entries = self.entries.grow(required);
        }
        self.entries.clear(0, required);
        self.lg_size = new_lg_size;

        let config_k_mask = (1u32 << self.lg_config_k) - 1;
        for entry in old {
            if entry != ENTRY_EMPTY {
                match self.find(get_slot(entry) & config_k_mask)? {
                    FindResult::Empty(idx) => self.set_entry(idx, entry),
                    FindResult::Found(_) => {
                        return Err(Error::invalid_state(
                            "duplicate slot while rehashing aux map",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Iterate over (slot, value) pairs without consuming the map.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        let config_k_mask = (1u32 << self.lg_config_k) - 1;
        self.raw_entries().filter_map(move |entry| {
            if entry != ENTRY_EMPTY {
                Some((get_slot(entry) & config_k_mask, get_value(entry)))
            } else {
                None
            }
        })
    }

    /// Drain into (slot, value) pairs.
    pub fn into_pairs(self) -> Vec<(u32, u8)> {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_basic_operations() {
        let mut map = AuxMap::new(10);

        map.must_add(10, 20).unwrap();
        map.must_add(50, 30).unwrap();
        map.must_add(100, 40).unwrap();

        assert_eq!(map.get(10), Some(20));
        assert_eq!(map.get(50), Some(30));
        assert_eq!(map.get(100), Some(40));
        assert_eq!(map.get(999), None);
        assert_eq!(map.must_find_value_for(50).unwrap(), 30);

        map.must_replace(50, 35).unwrap();
        assert_eq!(map.get(50), Some(35));
        assert_eq!(map.count(), 3);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut map = AuxMap::new(8);
        let initial_capacity = 1u32 << lg_aux_arr_ints(8);

        // Push well past the 75% load factor of the initial table.
        let n = initial_capacity * 4;
        for slot in 0..n {
            map.must_add(slot, 16 + (slot % 40) as u8).unwrap();
        }

        for slot in 0..n {
            assert_eq!(map.get(slot), Some(16 + (slot % 40) as u8));
        }
        assert_eq!(map.count(), n);
        assert_eq!(map.iter().count() as u32, n);
    }

    #[test]
    fn test_duplicate_add_is_state_error() {
        let mut map = AuxMap::new(10);
        map.must_add(10, 20).unwrap();

        let err = map.must_add(10, 30).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        // The failed insert left the original pair in place.
        assert_eq!(map.get(10), Some(20));
        assert_eq!(map.count(), 1);
    }

    #[test]
    fn test_missing_slot_is_state_error() {
        let mut map = AuxMap::new(10);
        assert_eq!(
            map.must_replace(999, 20).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            map.must_find_value_for(999).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }
}
