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

//! Stateful intersection operator for Theta sketches, direct to host memory.
//!
//! The operator keeps its entire state, preamble and hash table, inside a
//! single [`Storage`] buffer, so it can be handed a caller-owned region,
//! serialized by copying that region, and re-attached later with
//! [`wrap`](ThetaIntersection::wrap). The buffer's capacity fixes the
//! maximum table size up front; an input needing a larger table is rejected
//! with `CapacityExceeded` before any state changes.
//!
//! Conceptually the operator starts at the universal set. Each
//! [`update`](ThetaIntersection::update) narrows the current result to the
//! overlap with the incoming sketch:
//!
//! - While virgin, a nonempty input is copied in wholesale.
//! - A null or empty input collapses the result to the empty set (theta may
//!   still shrink, and a null input keeps it unchanged).
//! - Once the result is empty it stays empty; only theta keeps narrowing.
//! - Otherwise each incoming hash below theta is probed against the table,
//!   the matches are collected, and the table is rebuilt from them.
//!
//! The on-wire count field uses -1 for the virgin state; in memory that is
//! the [`IntersectionState::Virgin`] variant.

use crate::codec::family::Family;
use crate::codec::preamble::*;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::memory::Storage;
use crate::theta::CompactThetaSketch;
use crate::theta::ThetaSketchView;
use crate::theta::hash_ops;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::REBUILD_THRESHOLD;
use crate::theta::hash_table::lg_size_from_count;

/// Smallest hash table the operator will allocate, in lg longs.
const MIN_LG_ARR_LONGS: u8 = 5;

/// Byte offset of the embedded hash table, just past the 3-long preamble.
const TABLE_OFFSET: usize = (CONST_PREAMBLE_LONGS as usize) * 8;

/// Result progress of the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntersectionState {
    /// No update has been seen; the notional result is the universal set.
    Virgin,
    /// At least one update applied; the result holds this many hashes.
    HasResult(usize),
}

/// Intersection operator over a caller-supplied memory buffer.
///
/// # Examples
///
/// ```
/// use probcount::theta::ThetaIntersection;
/// use probcount::theta::ThetaSketch;
///
/// let mut a = ThetaSketch::builder().build();
/// let mut b = ThetaSketch::builder().build();
/// for i in 0..1000 {
///     a.update(i);
///     b.update(i + 500);
/// }
///
/// let mut intersection = ThetaIntersection::new_with_default_seed(12);
/// intersection.update(Some(&a)).unwrap();
/// intersection.update(Some(&b)).unwrap();
///
/// let result = intersection.result(true).unwrap();
/// assert_eq!(result.estimate(), 500.0);
/// ```
#[derive(Debug)]
pub struct ThetaIntersection {
    seed_hash: u16,
    state: IntersectionState,
    lg_arr_longs: u8,
    max_lg_arr_longs: u8,
    theta: u64,
    empty: bool,
    mem: Storage,
}

impl ThetaIntersection {
    /// Create an intersection with its own buffer, sized so inputs built at
    /// nominal `lg_k` always fit.
    pub fn new(lg_k: u8, seed: u64) -> Self {
        let max_lg_arr_longs = lg_k + 1;
        let mem = Storage::with_capacity(TABLE_OFFSET + (8usize << max_lg_arr_longs));
        Self::init(mem, seed, max_lg_arr_longs)
    }

    /// Create an intersection with its own buffer and the default seed.
    pub fn new_with_default_seed(lg_k: u8) -> Self {
        Self::new(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Create an intersection direct to the given destination buffer.
    ///
    /// The buffer capacity fixes the maximum hash table size for the life of
    /// the operator.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the buffer cannot hold the preamble and
    /// a minimum-sized table.
    pub fn with_storage(mem: Storage, seed: u64) -> Result<Self, Error> {
        let max_lg_arr_longs = check_max_lg_arr_longs(&mem)?;
        Ok(Self::init(mem, seed, max_lg_arr_longs))
    }

    fn init(mut mem: Storage, seed: u64, max_lg_arr_longs: u8) -> Self {
        let seed_hash = compute_seed_hash(seed);
        let preamble = ThetaPreamble {
            preamble_longs: CONST_PREAMBLE_LONGS,
            ser_ver: THETA_SERIAL_VERSION,
            family_id: Family::INTERSECTION.id,
            lg_nom_longs: 0,
            lg_arr_longs: MIN_LG_ARR_LONGS,
            flags: 0,
            seed_hash,
            retained_entries: -1,
            p: 1.0,
            theta_long: MAX_THETA,
        };
        preamble.write(&mut mem);

        Self {
            seed_hash,
            state: IntersectionState::Virgin,
            lg_arr_longs: MIN_LG_ARR_LONGS,
            max_lg_arr_longs,
            theta: MAX_THETA,
            empty: false,
            mem,
        }
    }

    /// Re-attach an intersection to a buffer holding a previous image.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown family, wrong serialization version,
    /// inconsistent preamble fields, or a seed hash that does not match
    /// `seed`.
    pub fn wrap(mem: Storage, seed: u64) -> Result<Self, Error> {
        let preamble = ThetaPreamble::read(&mem)?;
        preamble.validate(&Family::INTERSECTION)?;

        let seed_hash = compute_seed_hash(seed);
        if preamble.seed_hash != seed_hash {
            return Err(Error::seed_hash_mismatch(seed_hash, preamble.seed_hash));
        }

        let max_lg_arr_longs = check_max_lg_arr_longs(&mem)?;
        let lg_arr_longs = preamble.lg_arr_longs;

        let state = match preamble.retained_entries {
            -1 => IntersectionState::Virgin,
            count if count >= 0 => {
                if count > 0 {
                    if lg_arr_longs > max_lg_arr_longs {
                        return Err(Error::malformed(format!(
                            "table of {} longs does not fit the buffer",
                            1u64 << lg_arr_longs
                        )));
                    }
                    if (count as u64) > (1u64 << lg_arr_longs) {
                        return Err(Error::malformed(format!(
                            "retained entries {count} exceed the table size"
                        )));
                    }
                }
                IntersectionState::HasResult(count as usize)
            }
            count => {
                return Err(Error::malformed(format!(
                    "retained entries must be -1 or non-negative, got {count}"
                )));
            }
        };

        Ok(Self {
            seed_hash,
            state,
            lg_arr_longs,
            max_lg_arr_longs,
            theta: preamble.theta_long,
            empty: preamble.is_empty(),
            mem,
        })
    }

    /// Intersect the current result with a sketch.
    ///
    /// `None` stands for an absent input: it collapses the result to the
    /// empty set without touching theta.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a nonempty input's seed hash differs, or the
    ///   input looks corrupted.
    /// - `CapacityExceeded` if copying a first input would need a table
    ///   larger than the host buffer allows.
    ///
    /// A failed update leaves the operator state unchanged.
    pub fn update<S: ThetaSketchView>(&mut self, sketch: Option<&S>) -> Result<(), Error> {
        let valid_nonzero = sketch.is_some_and(|s| s.num_retained() > 0);
        let result_is_empty_set = matches!(self.state, IntersectionState::HasResult(0));

        if result_is_empty_set || !valid_nonzero {
            // The result set is (or becomes) empty. Theta can still narrow
            // and the empty flag can still latch; no table is needed.
            match sketch {
                Some(s) => {
                    self.check_seed_hash(s)?;
                    self.set_theta(self.theta.min(s.theta64()));
                    self.set_empty(self.empty || s.is_empty());
                }
                None => {
                    self.set_empty(true);
                }
            }
            self.set_state(IntersectionState::HasResult(0));
            return Ok(());
        }

        let Some(sketch) = sketch else {
            unreachable!("a missing input was handled by the degenerate case");
        };

        match self.state {
            IntersectionState::Virgin => self.adopt_first(sketch),
            IntersectionState::HasResult(count) => self.intersect(sketch, count),
        }
    }

    /// First nonempty input: copy its retained set into the table.
    fn adopt_first<S: ThetaSketchView>(&mut self, sketch: &S) -> Result<(), Error> {
        self.check_seed_hash(sketch)?;

        let count = sketch.num_retained();
        let new_lg = lg_size_from_count(count, REBUILD_THRESHOLD);
        if new_lg > self.max_lg_arr_longs {
            return Err(Error::capacity_exceeded(format!(
                "first input needs a table of {} longs; the host buffer holds at most {}",
                1u64 << new_lg,
                1u64 << self.max_lg_arr_longs
            )));
        }

        // Validation done; mutate.
        self.set_theta(self.theta.min(sketch.theta64()));
        self.set_empty(self.empty || sketch.is_empty());
        self.set_lg_arr_longs(new_lg);
        self.mem.clear(TABLE_OFFSET, 8usize << new_lg);

        let mut inserted = 0usize;
        for hash in sketch.iter() {
            if hash_ops::continue_condition(self.theta, hash) {
                continue;
            }
            if hash_ops::insert(&mut self.mem, TABLE_OFFSET, new_lg, hash)? {
                inserted += 1;
            }
        }

        if inserted != count {
            return Err(Error::invalid_argument(format!(
                "inserted {inserted} of {count} entries, possibly corrupted input sketch"
            )));
        }

        self.set_state(IntersectionState::HasResult(inserted));
        Ok(())
    }

    /// Full intersect of a nonempty input against a nonempty result.
    fn intersect<S: ThetaSketchView>(&mut self, sketch: &S, count: usize) -> Result<(), Error> {
        self.check_seed_hash(sketch)?;
        self.set_theta(self.theta.min(sketch.theta64()));
        self.set_empty(self.empty || sketch.is_empty());

        let max_matches = count.min(sketch.num_retained());
        let mut matched = Vec::with_capacity(max_matches);

        for hash in sketch.iter() {
            if hash == 0 {
                continue;
            }
            if hash >= self.theta {
                if sketch.is_ordered() {
                    break; // early stop assumes ascending input
                }
                continue;
            }
            if hash_ops::search(&self.mem, TABLE_OFFSET, self.lg_arr_longs, hash).is_some() {
                if matched.len() == max_matches {
                    return Err(Error::invalid_argument(
                        "max matches exceeded, possibly corrupted input sketch",
                    ));
                }
                matched.push(hash);
            }
        }

        // Rebuild the table at the minimum sufficient size. Sizing by the
        // previous count keeps this within the already-validated bound.
        let new_lg = lg_size_from_count(count, REBUILD_THRESHOLD).min(self.max_lg_arr_longs);
        self.set_lg_arr_longs(new_lg);
        self.mem.clear(TABLE_OFFSET, 8usize << new_lg);
        for &hash in &matched {
            hash_ops::insert(&mut self.mem, TABLE_OFFSET, new_lg, hash)?;
        }

        self.set_state(IntersectionState::HasResult(matched.len()));
        Ok(())
    }

    /// Returns whether this operator has received at least one update.
    pub fn has_result(&self) -> bool {
        self.state != IntersectionState::Virgin
    }

    /// Returns the intersection result as a compact theta sketch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if called before the first
    /// [`update`](Self::update).
    pub fn result(&self, ordered: bool) -> Result<CompactThetaSketch, Error> {
        let count = match self.state {
            IntersectionState::Virgin => {
                return Err(Error::invalid_state(
                    "result() called with no intervening update()",
                ));
            }
            IntersectionState::HasResult(count) => count,
        };

        if count == 0 {
            return Ok(CompactThetaSketch::from_parts(
                Vec::new(),
                self.theta,
                self.seed_hash,
                ordered,
                self.empty,
            ));
        }

        let table_len = 1usize << self.lg_arr_longs;
        let mut hashes = Vec::with_capacity(count);
        for i in 0..table_len {
            let hash = self.mem.get_u64(TABLE_OFFSET + i * 8);
            if hash != 0 {
                hashes.push(hash);
            }
        }
        if ordered {
            hashes.sort_unstable();
        }

        Ok(CompactThetaSketch::from_parts(
            hashes,
            self.theta,
            self.seed_hash,
            ordered,
            self.empty,
        ))
    }

    /// Restore the universal-set state.
    pub fn reset(&mut self) {
        self.set_state(IntersectionState::Virgin);
        self.set_theta(MAX_THETA);
        self.set_empty(false);
        self.set_lg_arr_longs(MIN_LG_ARR_LONGS);
        self.mem.clear(TABLE_OFFSET, 8usize << MIN_LG_ARR_LONGS);
    }

    /// Copy out the preamble-plus-table image.
    ///
    /// The result can be handed back to [`wrap`](Self::wrap), provided the
    /// receiving buffer is at least as large as this one.
    pub fn to_byte_array(&self) -> Vec<u8> {
        let data_bytes = match self.state {
            IntersectionState::HasResult(count) if count > 0 => 8usize << self.lg_arr_longs,
            _ => 0,
        };
        self.mem.as_bytes()[..TABLE_OFFSET + data_bytes].to_vec()
    }

    // Every present input is seed-checked, empty or not; only a missing
    // input (`None` in update) bypasses the comparison.
    fn check_seed_hash<S: ThetaSketchView>(&self, sketch: &S) -> Result<(), Error> {
        if sketch.seed_hash() != self.seed_hash {
            return Err(Error::seed_hash_mismatch(self.seed_hash, sketch.seed_hash()));
        }
        Ok(())
    }

    // State setters mirror every change into the preamble, so the buffer
    // image is consistent at all times.

    fn set_state(&mut self, state: IntersectionState) {
        self.state = state;
        let wire = match state {
            IntersectionState::Virgin => -1,
            IntersectionState::HasResult(count) => count as i32,
        };
        self.mem.put_i32(RETAINED_ENTRIES_INT, wire);
    }

    fn set_theta(&mut self, theta: u64) {
        self.theta = theta;
        self.mem.put_u64(THETA_LONG, theta);
    }

    fn set_empty(&mut self, empty: bool) {
        self.empty = empty;
        let mut flags = self.mem.get_u8(FLAGS_BYTE);
        if empty {
            flags |= FLAG_IS_EMPTY;
        } else {
            flags &= !FLAG_IS_EMPTY;
        }
        self.mem.put_u8(FLAGS_BYTE, flags);
    }

    fn set_lg_arr_longs(&mut self, lg_arr_longs: u8) {
        self.lg_arr_longs = lg_arr_longs;
        self.mem.put_u8(LG_ARR_LONGS_BYTE, lg_arr_longs);
    }
}

/// The largest power-of-two table (in lg longs) that fits the buffer after
/// the preamble.
fn check_max_lg_arr_longs(mem: &Storage) -> Result<u8, Error> {
    let min_bytes = TABLE_OFFSET + (8usize << MIN_LG_ARR_LONGS);
    if mem.capacity() < min_bytes {
        return Err(Error::capacity_exceeded(format!(
            "buffer of {} bytes cannot hold the minimum table; need at least {min_bytes}",
            mem.capacity()
        )));
    }
    let table_longs = ((mem.capacity() - TABLE_OFFSET) / 8) as u64;
    Ok((63 - table_longs.leading_zeros()) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::ThetaSketch;

    fn sketch_with_range(start: u64, count: u64) -> ThetaSketch {
        let mut sketch = ThetaSketch::builder().build();
        for i in 0..count {
            sketch.update(start + i);
        }
        sketch
    }

    #[test]
    fn test_virgin_result_is_state_error() {
        let intersection = ThetaIntersection::new_with_default_seed(10);
        assert!(!intersection.has_result());

        let err = intersection.result(true).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
    }

    #[test]
    fn test_null_update_produces_empty_result() {
        let mut intersection = ThetaIntersection::new_with_default_seed(10);
        intersection
            .update(None::<&CompactThetaSketch>)
            .unwrap();
        assert!(intersection.has_result());

        let result = intersection.result(true).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.num_retained(), 0);
        assert_eq!(result.theta64(), MAX_THETA);
    }

    #[test]
    fn test_capacity_rejection_is_atomic() {
        // Room for a 2^5 table only.
        let mem = Storage::with_capacity(TABLE_OFFSET + (8 << 5));
        let mut intersection =
            ThetaIntersection::with_storage(mem, DEFAULT_UPDATE_SEED).unwrap();

        let big = sketch_with_range(0, 500);
        let err = intersection.update(Some(&big)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CapacityExceeded);

        // The failed update left the operator virgin.
        assert!(!intersection.has_result());
        assert!(intersection.result(true).is_err());

        // A small input still works afterwards.
        let small = sketch_with_range(0, 10);
        intersection.update(Some(&small)).unwrap();
        assert_eq!(intersection.result(true).unwrap().num_retained(), 10);
    }

    #[test]
    fn test_wrap_round_trip() {
        let mut intersection = ThetaIntersection::new_with_default_seed(10);
        let a = sketch_with_range(0, 300);
        let b = sketch_with_range(100, 300);
        intersection.update(Some(&a)).unwrap();
        intersection.update(Some(&b)).unwrap();
        let expected = intersection.result(true).unwrap();

        let image = intersection.to_byte_array();
        let wrapped =
            ThetaIntersection::wrap(Storage::from_bytes(image), DEFAULT_UPDATE_SEED).unwrap();
        let restored = wrapped.result(true).unwrap();

        assert_eq!(expected.num_retained(), restored.num_retained());
        assert_eq!(expected.theta64(), restored.theta64());
        let lhs: Vec<u64> = expected.iter().collect();
        let rhs: Vec<u64> = restored.iter().collect();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_wrap_rejects_wrong_seed() {
        let intersection = ThetaIntersection::new_with_default_seed(10);
        let image = intersection.to_byte_array();
        assert!(ThetaIntersection::wrap(Storage::from_bytes(image), 1234).is_err());
    }

    #[test]
    fn test_wrap_rejects_foreign_family() {
        let mut intersection = ThetaIntersection::new_with_default_seed(10);
        intersection.update(None::<&CompactThetaSketch>).unwrap();
        let mut image = intersection.to_byte_array();
        image[FAMILY_BYTE] = Family::HLL.id;
        assert!(
            ThetaIntersection::wrap(Storage::from_bytes(image), DEFAULT_UPDATE_SEED).is_err()
        );
    }

    #[test]
    fn test_reset_restores_virgin_state() {
        let mut intersection = ThetaIntersection::new_with_default_seed(10);
        intersection.update(Some(&sketch_with_range(0, 50))).unwrap();
        assert!(intersection.has_result());

        intersection.reset();
        assert!(!intersection.has_result());
        assert!(intersection.result(true).is_err());

        intersection.update(Some(&sketch_with_range(0, 20))).unwrap();
        assert_eq!(intersection.result(true).unwrap().num_retained(), 20);
    }
}
