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

//! Shared open-addressing operations for Theta hash tables.
//!
//! Every Theta table, heap or embedded in host memory, probes the same way:
//! the starting slot comes from the low bits of the hash, the stride from
//! the next bits above the table size, forced odd so the probe sequence
//! cycles through the whole power-of-two table. Zero is the empty sentinel;
//! callers must never insert a zero hash.

use crate::error::Error;
use crate::memory::Storage;

/// Bits of the hash used for the stride.
const STRIDE_HASH_BITS: u8 = 7;

/// Stride mask
const STRIDE_MASK: u64 = (1 << STRIDE_HASH_BITS) - 1;

/// Double-hashing stride for `hash` in a table of `1 << lg_size` slots.
#[inline]
pub(crate) fn stride(hash: u64, lg_size: u8) -> usize {
    (2 * ((hash >> lg_size) & STRIDE_MASK) + 1) as usize
}

/// Whether `hash` is excluded from a table with threshold `theta`.
#[inline]
pub(crate) fn continue_condition(theta: u64, hash: u64) -> bool {
    hash == 0 || hash >= theta
}

/// Search a slice-backed table for `key`.
///
/// Returns the index holding `key`, or the index of the empty slot where it
/// would be inserted, or `None` if the probe cycled without finding either.
pub(crate) fn find_in_slice(entries: &[u64], lg_size: u8, key: u64) -> Option<usize> {
    if entries.is_empty() {
        return None;
    }

    let mask = entries.len() - 1;
    let stride = stride(key, lg_size);
    let mut index = (key as usize) & mask;
    let loop_index = index;

    loop {
        let probe = entries[index];
        if probe == 0 || probe == key {
            return Some(index);
        }
        index = (index + stride) & mask;
        if index == loop_index {
            return None;
        }
    }
}

/// Search a table embedded in `mem` at `table_offset` for `hash`.
///
/// Returns `Some(slot_index)` only if the hash is present.
pub(crate) fn search(mem: &Storage, table_offset: usize, lg_size: u8, hash: u64) -> Option<usize> {
    let mask = (1usize << lg_size) - 1;
    let stride = stride(hash, lg_size);
    let mut index = (hash as usize) & mask;
    let loop_index = index;

    loop {
        let probe = mem.get_u64(table_offset + index * 8);
        if probe == 0 {
            return None;
        }
        if probe == hash {
            return Some(index);
        }
        index = (index + stride) & mask;
        if index == loop_index {
            return None;
        }
    }
}

/// Insert `hash` into a table embedded in `mem` at `table_offset`.
///
/// Returns `Ok(true)` if the hash was inserted, `Ok(false)` if it was
/// already present. A full probe cycle without an empty slot means a sizing
/// invariant was broken upstream.
pub(crate) fn insert(
    mem: &mut Storage,
    table_offset: usize,
    lg_size: u8,
    hash: u64,
) -> Result<bool, Error> {
    debug_assert_ne!(hash, 0, "zero is the empty sentinel");

    let mask = (1usize << lg_size) - 1;
    let stride = stride(hash, lg_size);
    let mut index = (hash as usize) & mask;
    let loop_index = index;

    loop {
        let probe = mem.get_u64(table_offset + index * 8);
        if probe == 0 {
            mem.put_u64(table_offset + index * 8, hash);
            return Ok(true);
        }
        if probe == hash {
            return Ok(false);
        }
        index = (index + stride) & mask;
        if index == loop_index {
            return Err(Error::invalid_state(
                "hash table has no empty slots; table was sized below its contents",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_is_odd() {
        for hash in [1u64, 2, 1 << 20, u64::MAX >> 1] {
            for lg in [5u8, 10, 20] {
                assert_eq!(stride(hash, lg) % 2, 1);
            }
        }
    }

    #[test]
    fn test_storage_insert_and_search() {
        let lg = 5u8;
        let mut mem = Storage::with_capacity(8 << lg);

        for hash in 1..=12u64 {
            assert!(insert(&mut mem, 0, lg, hash * 7919).unwrap());
        }
        // Duplicates are detected.
        assert!(!insert(&mut mem, 0, lg, 7919).unwrap());

        for hash in 1..=12u64 {
            assert!(search(&mem, 0, lg, hash * 7919).is_some());
        }
        assert!(search(&mem, 0, lg, 13 * 7919).is_none());
    }

    #[test]
    fn test_full_table_reports_state_error() {
        let lg = 5u8;
        let size = 1usize << lg;
        let mut mem = Storage::with_capacity(8 * size);

        let mut inserted = 0u64;
        let mut hash = 1u64;
        while inserted < size as u64 {
            if insert(&mut mem, 0, lg, hash).unwrap() {
                inserted += 1;
            }
            hash += 1;
        }

        let err = insert(&mut mem, 0, lg, hash + 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }

    #[test]
    fn test_continue_condition() {
        assert!(continue_condition(100, 0));
        assert!(continue_condition(100, 100));
        assert!(continue_condition(100, 101));
        assert!(!continue_condition(100, 99));
    }
}
