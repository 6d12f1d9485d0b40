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
use std::hash::Hasher;

use crate::common::NumStdDev;
use crate::common::canonical_double;
use crate::common::inv_pow2;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::Flavor;
use crate::cpc::Format;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::cpc::count_bits_set_in_matrix;
use crate::cpc::determine_correct_offset;
use crate::cpc::determine_flavor;
use crate::cpc::estimator::hip_confidence_lb;
use crate::cpc::estimator::hip_confidence_ub;
use crate::cpc::estimator::icon_confidence_lb;
use crate::cpc::estimator::icon_confidence_ub;
use crate::cpc::estimator::icon_estimate;
use crate::cpc::pair_table::PairTable;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;

/// A Compressed Probabilistic Counting sketch.
///
/// See the [module level documentation](super) for more.
#[derive(Debug, Clone)]
pub struct CpcSketch {
    // immutable config variables
    lg_k: u8,
    seed: u64,
    seed_hash: u16,

    // sketch state
    /// Part of a speed optimization.
    pub(super) first_interesting_column: u8,
    /// The number of coupons collected so far.
    pub(super) num_coupons: u32,
    /// Sparse and surprising values.
    pub(super) surprising_value_table: Option<PairTable>,
    /// Derivable from num_coupons, but made explicit for speed.
    pub(super) window_offset: u8,
    /// Size K bytes in dense mode (flavor >= HYBRID).
    pub(super) sliding_window: Vec<u8>,

    // estimator state
    /// Whether the sketch is a result of merging.
    ///
    /// If `false`, the HIP (Historical Inverse Probability) estimator is
    /// used. If `true`, the ICON estimator is the fallback in use.
    pub(super) merge_flag: bool,
    // the following variables are only valid in the HIP estimator
    /// A pre-calculated probability factor (`k * p`) used to compute the
    /// increment delta.
    kxp: f64,
    /// The accumulated cardinality estimate.
    hip_est_accum: f64,
}

impl Default for CpcSketch {
    fn default() -> Self {
        Self::new(DEFAULT_LG_K)
    }
}

impl CpcSketch {
    /// Creates a new `CpcSketch` with the given `lg_k` and default seed.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in the range `[4, 26]`.
    pub fn new(lg_k: u8) -> Self {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a new `CpcSketch` with the given `lg_k` and `seed`.
    ///
    /// # Panics
    ///
    /// Panics if `lg_k` is not in the range `[4, 26]`, or the computed seed
    /// hash is zero.
    pub fn with_seed(lg_k: u8, seed: u64) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k out of range; got {lg_k}",
        );

        Self {
            lg_k,
            seed,
            seed_hash: compute_seed_hash(seed),
            first_interesting_column: 0,
            num_coupons: 0,
            surprising_value_table: None,
            window_offset: 0,
            sliding_window: vec![],
            merge_flag: false,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        }
    }

    /// Return the parameter lg_k.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Returns the best estimate of the cardinality of the sketch.
    pub fn estimate(&self) -> f64 {
        if !self.merge_flag {
            self.hip_est_accum
        } else {
            icon_estimate(self.lg_k, self.num_coupons)
        }
    }

    /// Returns the best estimate of the lower bound of the confidence
    /// interval given `kappa`.
    pub fn lower_bound(&self, kappa: NumStdDev) -> f64 {
        if !self.merge_flag {
            hip_confidence_lb(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        } else {
            icon_confidence_lb(self.lg_k, self.num_coupons, kappa)
        }
    }

    /// Returns the best estimate of the upper bound of the confidence
    /// interval given `kappa`.
    pub fn upper_bound(&self, kappa: NumStdDev) -> f64 {
        if !self.merge_flag {
            hip_confidence_ub(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        } else {
            icon_confidence_ub(self.lg_k, self.num_coupons, kappa)
        }
    }

    /// Returns true if the sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    /// The current compression regime.
    pub fn flavor(&self) -> Flavor {
        determine_flavor(self.lg_k, self.num_coupons)
    }

    /// The current storage format: the flavor refined by whether the HIP
    /// accumulator is still valid and a surprising-value table is present.
    pub fn format(&self) -> Format {
        let has_hip = !self.merge_flag;
        let has_table = self
            .surprising_value_table
            .as_ref()
            .is_some_and(|t| t.num_items() > 0);

        match self.flavor() {
            Flavor::Empty => {
                if has_hip {
                    Format::EmptyHip
                } else {
                    Format::EmptyMerged
                }
            }
            Flavor::Sparse | Flavor::Hybrid => {
                if has_hip {
                    Format::SparseHybridHip
                } else {
                    Format::SparseHybridMerged
                }
            }
            Flavor::Pinned | Flavor::Sliding => match (has_hip, has_table) {
                (true, true) => Format::PinnedSlidingHip,
                (true, false) => Format::PinnedSlidingHipNoSv,
                (false, true) => Format::PinnedSlidingMerged,
                (false, false) => Format::PinnedSlidingMergedNoSv,
            },
        }
    }

    /// Update the sketch with a hashable value.
    ///
    /// For `f32`/`f64` values, use `update_f32`/`update_f64` instead so that
    /// signed zeros and NaN payloads canonicalize.
    pub fn update<T: Hash>(&mut self, value: T) {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        value.hash(&mut hasher);
        let (h1, h2) = hasher.finish128();
        self.hash_update(h1, h2);
    }

    /// Update the sketch with a f64 value.
    ///
    /// `+0.0` and `-0.0` count as the same item, as do all NaN payloads.
    pub fn update_f64(&mut self, value: f64) {
        self.update(canonical_double(value));
    }

    /// Update the sketch with a f32 value.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    /// Update the sketch with a string, hashed over its UTF-8 bytes.
    ///
    /// An empty string is a no-op.
    pub fn update_str(&mut self, value: &str) {
        self.update_bytes(value.as_bytes());
    }

    /// Update the sketch with a byte sequence. An empty slice is a no-op.
    pub fn update_bytes(&mut self, values: &[u8]) {
        if values.is_empty() {
            return;
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        hasher.write(values);
        let (h1, h2) = hasher.finish128();
        self.hash_update(h1, h2);
    }

    /// Update the sketch with a sequence of 16-bit values. An empty slice is
    /// a no-op.
    pub fn update_u16s(&mut self, values: &[u16]) {
        if values.is_empty() {
            return;
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        for v in values {
            hasher.write(&v.to_le_bytes());
        }
        let (h1, h2) = hasher.finish128();
        self.hash_update(h1, h2);
    }

    /// Update the sketch with a sequence of 32-bit values. An empty slice is
    /// a no-op.
    pub fn update_i32s(&mut self, values: &[i32]) {
        if values.is_empty() {
            return;
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        for v in values {
            hasher.write(&v.to_le_bytes());
        }
        let (h1, h2) = hasher.finish128();
        self.hash_update(h1, h2);
    }

    /// Update the sketch with a sequence of 64-bit values. An empty slice is
    /// a no-op.
    pub fn update_i64s(&mut self, values: &[i64]) {
        if values.is_empty() {
            return;
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        for v in values {
            hasher.write(&v.to_le_bytes());
        }
        let (h1, h2) = hasher.finish128();
        self.hash_update(h1, h2);
    }

    /// Convert a 128-bit hash into a coupon and route it to the current
    /// regime.
    fn hash_update(&mut self, h1: u64, h2: u64) {
        let k = 1u64 << self.lg_k;
        let col = h2.leading_zeros(); // 0 <= col <= 64
        let col = if col > 63 { 63 } else { col as u8 }; // clip so that 0 <= col <= 63
        let row = (h1 & (k - 1)) as u32;
        let mut row_col = (row << 6) | (col as u32);
        // To avoid the hash table's "empty" value, we change the row of the
        // following pair. This case is extremely unlikely, but we might as
        // well handle it.
        if row_col == u32::MAX {
            row_col ^= 1 << 6;
        }
        self.row_col_update(row_col);
    }

    pub(super) fn row_col_update(&mut self, row_col: u32) {
        let col = (row_col & 63) as u8;
        if col < self.first_interesting_column {
            // important speed optimization
            return;
        }

        if self.num_coupons == 0 {
            // promote EMPTY to SPARSE
            self.surprising_value_table = Some(PairTable::new(2, 6 + self.lg_k));
        }

        if self.sliding_window.is_empty() {
            self.update_sparse(row_col);
        } else {
            self.update_windowed(row_col);
        }
    }

    pub(super) fn seed(&self) -> u64 {
        self.seed
    }

    pub(super) fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    pub(super) fn surprising_value_table(&self) -> &PairTable {
        self.surprising_value_table
            .as_ref()
            .expect("surprising value table must be initialized")
    }

    fn mut_surprising_value_table(&mut self) -> &mut PairTable {
        self.surprising_value_table
            .as_mut()
            .expect("surprising value table must be initialized")
    }

    fn update_hip(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let col = (row_col & 63) as u32;
        let one_over_p = (k as f64) / self.kxp;
        self.hip_est_accum += one_over_p;
        self.kxp -= inv_pow2(col + 1); // notice the "+1"
    }

    fn update_sparse(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let c32pre = (self.num_coupons as u64) << 5;
        debug_assert!(c32pre < 3 * k); // C < 3K/32, in other words, flavor == SPARSE
        let is_novel = self.mut_surprising_value_table().maybe_insert(row_col);
        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c32post = (self.num_coupons as u64) << 5;
            if c32post >= 3 * k {
                self.promote_sparse_to_windowed();
            }
        }
    }

    fn promote_sparse_to_windowed(&mut self) {
        debug_assert_eq!(self.window_offset, 0);

        let k = 1u64 << self.lg_k;
        let c32 = (self.num_coupons as u64) << 5;
        debug_assert!((c32 == (3 * k)) || ((self.lg_k == 4) && (c32 > (3 * k))));

        self.sliding_window.resize(k as usize, 0);

        let old_table = self
            .surprising_value_table
            .replace(PairTable::new(2, 6 + self.lg_k))
            .expect("surprising value table must be initialized");
        for &row_col in old_table.slots() {
            if row_col != u32::MAX {
                let col = (row_col & 63) as u8;
                if col < 8 {
                    let row = (row_col >> 6) as usize;
                    self.sliding_window[row] |= 1 << col;
                } else {
                    // cannot use an unconditional insert, because it doesn't
                    // provide for growth
                    let is_novel = self.mut_surprising_value_table().maybe_insert(row_col);
                    debug_assert!(is_novel);
                }
            }
        }
    }

    fn update_windowed(&mut self, row_col: u32) {
        debug_assert!(self.window_offset <= 56);
        let k = 1u64 << self.lg_k;
        let c32pre = (self.num_coupons as u64) << 5;
        debug_assert!(c32pre >= 3 * k); // C >= 3K/32, in other words flavor >= HYBRID
        let c8pre = (self.num_coupons as u64) << 3;
        let w8pre = (self.window_offset as u64) << 3;
        debug_assert!(c8pre < (27 + w8pre) * k); // C < (K * 27/8) + (K * windowOffset)

        let is_novel; // novel if new coupon
        let col = (row_col & 63) as u8;
        if col < self.window_offset {
            // track the surprising 0's "before" the window
            is_novel = self.mut_surprising_value_table().maybe_delete(row_col); // inverted logic
        } else if col < self.window_offset + 8 {
            // track the 8 bits inside the window
            let row = (row_col >> 6) as usize;
            let old_bits = self.sliding_window[row];
            let new_bits = old_bits | (1 << (col - self.window_offset));
            is_novel = old_bits != new_bits;
            self.sliding_window[row] = new_bits;
        } else {
            // track the surprising 1's "after" the window
            is_novel = self.mut_surprising_value_table().maybe_insert(row_col); // normal logic
        }

        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c8post = (self.num_coupons as u64) << 3;
            if c8post >= (27 + w8pre) * k {
                self.move_window();
                debug_assert!((1..=56).contains(&self.window_offset));
                let w8post = (self.window_offset as u64) << 3;
                debug_assert!(c8post < ((27 + w8post) * k));
            }
        }
    }

    fn move_window(&mut self) {
        let new_offset = self.window_offset + 1;
        debug_assert!(new_offset <= 56);
        debug_assert_eq!(
            new_offset,
            determine_correct_offset(self.lg_k, self.num_coupons)
        );

        let k = 1usize << self.lg_k;

        // Construct the full-sized bit matrix that corresponds to the sketch
        let bit_matrix = self.build_bit_matrix();

        // Refresh the KXP register on every 8th window shift.
        if (new_offset & 0x7) == 0 {
            self.refresh_kxp(&bit_matrix);
        }

        // The new number of surprises will be about the same.
        self.mut_surprising_value_table().clear();

        let mask_for_clearing_window = (0xFFu64 << new_offset) ^ u64::MAX;
        let mask_for_flipping_early_zone = (1u64 << new_offset) - 1;

        let mut all_surprises_ored = 0u64;
        for i in 0..k {
            let mut pattern = bit_matrix[i];
            self.sliding_window[i] = ((pattern >> new_offset) & 0xFF) as u8;
            pattern &= mask_for_clearing_window;
            // The following line converts surprising 0's to 1's in the
            // "early zone" (and vice versa, which is essential for this
            // procedure's O(k) time cost).
            pattern ^= mask_for_flipping_early_zone;
            all_surprises_ored |= pattern; // a cheap way to recalculate first_interesting_column
            while pattern != 0 {
                let col = pattern.trailing_zeros();
                pattern ^= 1u64 << col; // erase the 1
                let row_col = ((i as u32) << 6) | col;
                let is_novel = self.mut_surprising_value_table().maybe_insert(row_col);
                debug_assert!(is_novel);
            }
        }

        self.window_offset = new_offset;
        self.first_interesting_column = all_surprises_ored.trailing_zeros() as u8;
        if self.first_interesting_column > new_offset {
            self.first_interesting_column = new_offset; // corner case
        }
    }

    /// The KXP register is a double with roughly 50 bits of precision, but
    /// it might need roughly 90 bits to track the value with perfect
    /// accuracy. Therefore, we recalculate KXP occasionally from the
    /// sketch's full bit matrix so that it reflects changes that were
    /// previously outside the mantissa.
    fn refresh_kxp(&mut self, bit_matrix: &[u64]) {
        // For improved numerical accuracy, we separately sum the bytes of
        // the u64's.
        let mut byte_sums = [0.0f64; 8];
        for &word in bit_matrix {
            let mut word = word;
            for sum in byte_sums.iter_mut() {
                *sum += kxp_byte_contribution((word & 0xFF) as u8);
                word >>= 8;
            }
        }

        let mut total = 0.0;
        for i in (0..8).rev() {
            // the reverse order is important
            let factor = inv_pow2((i as u32) * 8); // 256^-i
            total += factor * byte_sums[i];
        }

        self.kxp = total;
    }

    pub(super) fn build_bit_matrix(&self) -> Vec<u64> {
        let k = 1usize << self.lg_k;
        let offset = self.window_offset;
        debug_assert!(offset <= 56);

        // Fill the matrix with default rows in which the "early zone" is
        // filled with ones. This is essential for the routine's O(k) time
        // cost (as opposed to O(C)).
        let default_row = (1u64 << offset) - 1;

        let mut matrix = vec![default_row; k];
        if self.num_coupons == 0 {
            return matrix;
        }

        if !self.sliding_window.is_empty() {
            // in window mode, not sparse mode
            for (i, row) in matrix.iter_mut().enumerate() {
                *row |= (self.sliding_window[i] as u64) << offset;
            }
        }

        for &row_col in self.surprising_value_table().slots() {
            if row_col != u32::MAX {
                let col = (row_col & 63) as u8;
                let row = (row_col >> 6) as usize;
                // Flip the specified matrix bit from its default value.
                // In the "early" zone the bit changes from 1 to 0.
                // In the "late" zone the bit changes from 0 to 1.
                matrix[row] ^= 1u64 << col;
            }
        }

        matrix
    }
}

/// Sum of `2^-(col+1)` over the zero bits of one window byte. Used when
/// recomputing KXP from a bit matrix.
fn kxp_byte_contribution(byte: u8) -> f64 {
    let mut sum = 0.0;
    for col in 0..8u32 {
        if byte & (1 << col) == 0 {
            sum += inv_pow2(col + 1);
        }
    }
    sum
}

// testing methods
impl CpcSketch {
    /// Validate that the bit matrix agrees with the coupon count.
    ///
    /// This is primarily for testing and validation purposes.
    pub fn validate(&self) -> bool {
        let bit_matrix = self.build_bit_matrix();
        let num_bits_set = count_bits_set_in_matrix(&bit_matrix);
        num_bits_set == self.num_coupons
    }

    /// Returns the number of coupons in the sketch.
    ///
    /// This is primarily for testing and validation purposes.
    pub fn num_coupons(&self) -> u32 {
        self.num_coupons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sketch() {
        let sketch = CpcSketch::new(10);
        assert!(sketch.is_empty());
        assert_eq!(sketch.estimate(), 0.0);
        assert_eq!(sketch.flavor(), Flavor::Empty);
        assert_eq!(sketch.format(), Format::EmptyHip);
        assert!(sketch.validate());
    }

    #[test]
    fn test_duplicate_updates_are_no_ops() {
        let mut sketch = CpcSketch::new(10);
        sketch.update(42u64);
        let coupons = sketch.num_coupons();
        for _ in 0..100 {
            sketch.update(42u64);
        }
        assert_eq!(sketch.num_coupons(), coupons);
        assert_eq!(sketch.estimate().round(), 1.0);
    }

    #[test]
    fn test_signed_zero_canonicalization() {
        let mut sketch = CpcSketch::new(4);
        sketch.update_f64(0.0);
        sketch.update_f64(-0.0);
        assert_eq!(sketch.estimate().round(), 1.0);
    }

    #[test]
    fn test_empty_sequences_are_no_ops() {
        let mut sketch = CpcSketch::new(4);
        sketch.update_f64(0.0);

        sketch.update_str("");
        sketch.update_bytes(&[]);
        sketch.update_u16s(&[]);
        sketch.update_i32s(&[]);
        sketch.update_i64s(&[]);

        assert_eq!(sketch.estimate().round(), 1.0);
    }

    #[test]
    fn test_flavor_progression() {
        let mut sketch = CpcSketch::new(10);
        let mut seen = vec![sketch.flavor()];
        for i in 0..200_000u64 {
            sketch.update(i);
            let flavor = sketch.flavor();
            if *seen.last().unwrap() != flavor {
                seen.push(flavor);
            }
        }
        assert_eq!(
            seen,
            vec![
                Flavor::Empty,
                Flavor::Sparse,
                Flavor::Hybrid,
                Flavor::Pinned,
                Flavor::Sliding
            ]
        );
        assert!(sketch.validate());
    }

    #[test]
    fn test_estimate_accuracy_through_regimes() {
        let mut sketch = CpcSketch::new(11);
        let mut fed = 0u64;
        for &n in &[100u64, 1_000, 10_000, 100_000] {
            while fed < n {
                sketch.update(fed);
                fed += 1;
            }
            let est = sketch.estimate();
            assert!(
                (est - n as f64).abs() < 0.05 * n as f64,
                "estimate {est} too far from {n}"
            );
        }
        assert!(sketch.validate());
    }

    #[test]
    fn test_validate_through_window_moves() {
        let mut sketch = CpcSketch::new(4);
        for i in 0..100_000u64 {
            sketch.update(i);
        }
        assert_eq!(sketch.flavor(), Flavor::Sliding);
        assert!(sketch.validate());
    }
}
