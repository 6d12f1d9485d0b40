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

//! The merging logic is somewhat involved, so it will be summarized here.
//!
//! First, we compare the K values of the union and the source sketch.
//!
//! If `source.K < union.K`, we reduce the union's K to match, which requires
//! downsampling the union's internal state.
//!
//! If the union holds a sparse accumulator sketch, downsampling walks the old
//! accumulator updating a new one (with the row taken modulo the smaller K).
//! If the result is no longer sparse, it is immediately converted to a bit
//! matrix. A bit matrix downsizes by row-wise ORing.
//!
//! At this point `source.K >= union.K`, and the source's rows are used
//! modulo union.K while updating:
//!
//! - Case A: union is sparse and source is sparse. Walk the source's table
//!   updating the accumulator; convert to a bit matrix if it leaves sparse.
//! - Case B: union is a bit matrix and source is sparse. Walk the source's
//!   table setting bits.
//! - Case C: union is a bit matrix and source is Hybrid or Pinned. OR the
//!   source's sliding window into the matrix, then walk its table.
//! - Case D: union is a bit matrix and source is Sliding. Convert the source
//!   to a bit matrix and OR it in. Merely walking the source would be wrong
//!   because of the partially inverted logic in the Sliding flavor, where
//!   the presence of coupons is sometimes indicated by the ABSENCE of pairs
//!   in the surprises table.
//!
//! [`CpcUnion::get_result`] either copies the accumulator (marking it
//! merged), or converts the bit matrix back into a sketch, recomputing
//! num_coupons, the window offset and first_interesting_column.

use crate::cpc::CpcSketch;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::Flavor;
use crate::cpc::count_bits_set_in_matrix;
use crate::cpc::determine_correct_offset;
use crate::cpc::pair_table::PairTable;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;

/// The union (merge) operation for CPC sketches.
#[derive(Debug, Clone)]
pub struct CpcUnion {
    // immutable config variables
    lg_k: u8,
    seed: u64,

    // union state
    state: UnionState,
}

/// The internal state of the union operation.
///
/// The accumulator is a sketch object, employed until it graduates out of
/// the sparse flavor. At that point it is converted into a full-sized bit
/// matrix, which is mathematically a sketch but doesn't maintain any of the
/// "extra" fields of a sketch object.
#[derive(Debug, Clone)]
enum UnionState {
    Accumulator(CpcSketch),
    BitMatrix(Vec<u64>),
}

impl Default for CpcUnion {
    fn default() -> Self {
        Self::new(DEFAULT_LG_K)
    }
}

impl CpcUnion {
    /// Creates a new `CpcUnion` with the given `lg_k` and default seed.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in the range `[4, 26]`.
    pub fn new(lg_k: u8) -> Self {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a new `CpcUnion` with the given `lg_k` and `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in the range `[4, 26]`.
    pub fn with_seed(lg_k: u8, seed: u64) -> Self {
        // Begin with the accumulator holding an empty sketch object.
        let sketch = CpcSketch::with_seed(lg_k, seed);
        let state = UnionState::Accumulator(sketch);
        Self { lg_k, seed, state }
    }

    /// Return the parameter lg_k.
    ///
    /// Due to merging with source sketches that may have a lower lg_k, this
    /// value can be less than what the union object was configured with.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Update this union with a sketch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the sketch was built with a different
    /// hash seed than this union.
    pub fn update(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        if sketch.seed() != self.seed {
            return Err(Error::seed_hash_mismatch(
                crate::hash::compute_seed_hash(self.seed),
                sketch.seed_hash(),
            ));
        }

        let flavor = sketch.flavor();
        if flavor == Flavor::Empty {
            return Ok(());
        }

        if sketch.lg_k() < self.lg_k {
            self.reduce_k(sketch.lg_k());
        }

        // If the source is past the sparse flavor, the union must be a bit
        // matrix.
        if flavor > Flavor::Sparse {
            if let UnionState::Accumulator(old_sketch) = &self.state {
                let bit_matrix = old_sketch.build_bit_matrix();
                self.state = UnionState::BitMatrix(bit_matrix);
            }
        }

        match &mut self.state {
            UnionState::Accumulator(old_sketch) => {
                // [Case A] both the union and the source are sparse
                debug_assert_eq!(flavor, Flavor::Sparse);
                let old_flavor = old_sketch.flavor();
                debug_assert!(matches!(old_flavor, Flavor::Empty | Flavor::Sparse));

                // Adopting the first input wholesale partially avoids the
                // snowplow effect, provided the K's are equal.
                if old_flavor == Flavor::Empty && self.lg_k == sketch.lg_k() {
                    *old_sketch = sketch.clone();
                    return Ok(());
                }

                walk_table_updating_sketch(old_sketch, sketch.surprising_value_table());

                // If the accumulator graduated beyond sparse, switch to a
                // bit matrix representation.
                if old_sketch.flavor() > Flavor::Sparse {
                    let bit_matrix = old_sketch.build_bit_matrix();
                    self.state = UnionState::BitMatrix(bit_matrix);
                }
            }
            UnionState::BitMatrix(old_matrix) => match flavor {
                // [Case B] union is a bit matrix, source is sparse
                Flavor::Sparse => {
                    or_table_into_matrix(old_matrix, self.lg_k, sketch.surprising_value_table());
                }
                // [Case C] union is a bit matrix, source is windowed
                Flavor::Hybrid | Flavor::Pinned => {
                    or_window_into_matrix(
                        old_matrix,
                        self.lg_k,
                        &sketch.sliding_window,
                        sketch.window_offset,
                        sketch.lg_k(),
                    );
                    or_table_into_matrix(old_matrix, self.lg_k, sketch.surprising_value_table());
                }
                // [Case D] union is a bit matrix, source is sliding
                Flavor::Sliding => {
                    let src_matrix = sketch.build_bit_matrix();
                    or_matrix_into_matrix(old_matrix, self.lg_k, &src_matrix, sketch.lg_k());
                }
                Flavor::Empty => unreachable!("empty sources return early"),
            },
        }
        Ok(())
    }

    /// Get the union result as a new sketch.
    ///
    /// # Examples
    ///
    /// ```
    /// # use probcount::cpc::CpcSketch;
    /// # use probcount::cpc::CpcUnion;
    /// let mut s1 = CpcSketch::new(12);
    /// s1.update("apple");
    ///
    /// let mut s2 = CpcSketch::new(12);
    /// s2.update("apple");
    /// s2.update("banana");
    ///
    /// let mut union = CpcUnion::new(12);
    /// union.update(&s1).unwrap();
    /// union.update(&s2).unwrap();
    ///
    /// assert_eq!(union.get_result().estimate().round(), 2.0);
    /// ```
    pub fn get_result(&self) -> CpcSketch {
        match &self.state {
            UnionState::Accumulator(sketch) => {
                if sketch.is_empty() {
                    CpcSketch::with_seed(self.lg_k, self.seed)
                } else {
                    debug_assert_eq!(sketch.flavor(), Flavor::Sparse);
                    let mut sketch = sketch.clone();
                    sketch.merge_flag = true;
                    sketch
                }
            }
            UnionState::BitMatrix(matrix) => {
                let lg_k = self.lg_k;

                let mut sketch = CpcSketch::with_seed(lg_k, self.seed);
                let num_coupons = count_bits_set_in_matrix(matrix);
                sketch.num_coupons = num_coupons;
                let offset = determine_correct_offset(lg_k, num_coupons);
                sketch.window_offset = offset;

                let k = 1usize << lg_k;
                let mut sliding_window = vec![0u8; k];

                // lg size = K/16; in some cases this will end up being
                // oversized
                let new_table_lg_size = (lg_k.saturating_sub(4)).max(2);
                let mut table = PairTable::new(new_table_lg_size, 6 + lg_k);

                // The following works even when the offset is zero.
                let mask_for_clearing_window = (0xFFu64 << offset) ^ u64::MAX;
                let mask_for_flipping_early_zone = (1u64 << offset) - 1;
                let mut all_surprises_ored = 0u64;

                for (i, window_byte) in sliding_window.iter_mut().enumerate() {
                    let mut pattern = matrix[i];
                    *window_byte = ((pattern >> offset) & 0xFF) as u8;
                    pattern &= mask_for_clearing_window;
                    // This flipping converts surprising 0's to 1's.
                    pattern ^= mask_for_flipping_early_zone;
                    all_surprises_ored |= pattern;
                    while pattern != 0 {
                        let col = pattern.trailing_zeros();
                        pattern ^= 1u64 << col; // erase the 1
                        let row_col = ((i as u32) << 6) | col;
                        let is_novel = table.maybe_insert(row_col);
                        debug_assert!(is_novel);
                    }
                }

                // At this point an oversized table could be shrunk, but the
                // relative waste isn't very big.
                sketch.first_interesting_column = all_surprises_ored.trailing_zeros() as u8;
                if sketch.first_interesting_column > offset {
                    sketch.first_interesting_column = offset; // corner case
                }

                // The HIP fields stay zero; with merge_flag set the HIP
                // estimator is never consulted.
                sketch.sliding_window = sliding_window;
                sketch.surprising_value_table = Some(table);
                sketch.merge_flag = true;

                sketch
            }
        }
    }

    fn reduce_k(&mut self, new_lg_k: u8) {
        match &mut self.state {
            UnionState::Accumulator(sketch) => {
                if sketch.is_empty() {
                    self.lg_k = new_lg_k;
                    self.state =
                        UnionState::Accumulator(CpcSketch::with_seed(new_lg_k, self.seed));
                    return;
                }

                let mut new_sketch = CpcSketch::with_seed(new_lg_k, self.seed);
                walk_table_updating_sketch(&mut new_sketch, sketch.surprising_value_table());

                let final_new_flavor = new_sketch.flavor();
                // the table had to have something in it
                debug_assert_ne!(final_new_flavor, Flavor::Empty);
                if final_new_flavor == Flavor::Sparse {
                    self.lg_k = new_lg_k;
                    self.state = UnionState::Accumulator(new_sketch);
                    return;
                }

                // the new sketch graduated beyond sparse
                self.lg_k = new_lg_k;
                self.state = UnionState::BitMatrix(new_sketch.build_bit_matrix());
            }
            UnionState::BitMatrix(matrix) => {
                let new_k = 1usize << new_lg_k;
                let mut new_matrix = vec![0u64; new_k];
                or_matrix_into_matrix(&mut new_matrix, new_lg_k, matrix, self.lg_k);
                self.lg_k = new_lg_k;
                self.state = UnionState::BitMatrix(new_matrix);
            }
        }
    }
}

// testing methods
impl CpcUnion {
    /// Returns the number of coupons in the union.
    ///
    /// This is primarily for testing and validation purposes.
    pub fn num_coupons(&self) -> u32 {
        match &self.state {
            UnionState::Accumulator(sketch) => sketch.num_coupons,
            UnionState::BitMatrix(matrix) => count_bits_set_in_matrix(matrix),
        }
    }
}

fn or_window_into_matrix(
    dst_matrix: &mut [u64],
    dst_lg_k: u8,
    src_window: &[u8],
    src_offset: u8,
    src_lg_k: u8,
) {
    debug_assert!(dst_lg_k <= src_lg_k);
    let dst_mask = (1usize << dst_lg_k) - 1; // downsamples when dst_lg_k < src_lg_k
    let src_k = 1usize << src_lg_k;
    for src_row in 0..src_k {
        dst_matrix[src_row & dst_mask] |= (src_window[src_row] as u64) << src_offset;
    }
}

fn or_table_into_matrix(dst_matrix: &mut [u64], dst_lg_k: u8, src_table: &PairTable) {
    let dst_mask = (1usize << dst_lg_k) - 1; // downsamples when dst_lg_k < src_lg_k
    for &row_col in src_table.slots() {
        if row_col != u32::MAX {
            let src_row = (row_col >> 6) as usize;
            let src_col = row_col & 63;
            dst_matrix[src_row & dst_mask] |= 1u64 << src_col;
        }
    }
}

fn or_matrix_into_matrix(dst_matrix: &mut [u64], dst_lg_k: u8, src_matrix: &[u64], src_lg_k: u8) {
    debug_assert!(dst_lg_k <= src_lg_k);
    let dst_mask = (1usize << dst_lg_k) - 1; // downsamples when dst_lg_k < src_lg_k
    let src_k = 1usize << src_lg_k;
    for src_row in 0..src_k {
        dst_matrix[src_row & dst_mask] |= src_matrix[src_row];
    }
}

fn walk_table_updating_sketch(sketch: &mut CpcSketch, table: &PairTable) {
    let slots = table.slots();
    let num_slots = slots.len() as u32;
    debug_assert!(num_slots >= 4);

    // Downsamples when the destination lg_k is smaller than the source's.
    let dst_mask: u32 = ((((1u64 << sketch.lg_k()) - 1) << 6) | 63) as u32;

    // Using a golden ratio stride fixes the snowplow effect.
    let mut stride = (0.6180339887498949 * (num_slots as f64)) as u32;
    if stride == (stride >> 1) << 1 {
        stride += 1; // force the stride to be odd
    }
    debug_assert!((1..num_slots).contains(&stride));

    let mut j = 0u32;
    for _ in 0..num_slots {
        j &= num_slots - 1;
        let row_col = slots[j as usize];
        if row_col != u32::MAX {
            sketch.row_col_update(row_col & dst_mask);
        }
        j += stride;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_union() {
        let union = CpcUnion::new(11);
        let sketch = union.get_result();
        assert!(sketch.is_empty());
        assert_eq!(sketch.estimate(), 0.0);
    }

    #[test]
    fn test_merged_result_uses_icon() {
        let mut sketch = CpcSketch::new(11);
        sketch.update(1u64);

        let mut union = CpcUnion::new(11);
        union.update(&sketch).unwrap();

        let result = union.get_result();
        assert!(result.merge_flag);
        assert_eq!(result.estimate().round(), 1.0);
    }

    #[test]
    fn test_seed_mismatch_is_rejected() {
        let sketch = CpcSketch::with_seed(11, 123);
        let mut union = CpcUnion::new(11);
        // Empty sketches still carry their seed.
        let mut sketch = sketch;
        sketch.update(1u64);
        assert!(union.update(&sketch).is_err());
    }

    #[test]
    fn test_union_of_disjoint_windowed_sketches() {
        let lg_k = 10u8;
        let n = 50_000u64;
        let mut s1 = CpcSketch::new(lg_k);
        let mut s2 = CpcSketch::new(lg_k);
        for i in 0..n {
            s1.update(i);
            s2.update(i + n);
        }
        assert!(s1.flavor() > Flavor::Sparse);

        let mut union = CpcUnion::new(lg_k);
        union.update(&s1).unwrap();
        union.update(&s2).unwrap();

        let result = union.get_result();
        assert!(result.validate());
        let est = result.estimate();
        let expected = (2 * n) as f64;
        assert!(
            (est - expected).abs() < 0.1 * expected,
            "estimate {est} too far from {expected}"
        );
    }

    #[test]
    fn test_union_downsamples_to_smaller_k() {
        let mut big = CpcSketch::new(12);
        let mut small = CpcSketch::new(8);
        for i in 0..10_000u64 {
            big.update(i);
            small.update(i + 5_000);
        }

        let mut union = CpcUnion::new(12);
        union.update(&big).unwrap();
        union.update(&small).unwrap();
        assert_eq!(union.lg_k(), 8);

        let result = union.get_result();
        assert!(result.validate());
        let est = result.estimate();
        assert!(
            (est - 15_000.0).abs() < 0.2 * 15_000.0,
            "estimate {est} too far from 15000"
        );
    }
}
