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

//! HIP (Historical Inverse Probability) estimator for the dense HLL arrays.
//!
//! The HIP estimator accumulates the inverse probability of each register
//! change as it happens, which is more accurate than reading the register
//! array after the fact. It is only valid while updates arrive through this
//! sketch instance; after a merge or a deserialization the history is gone
//! and the estimator falls back to a composite of the classical HLL formula
//! and linear counting.

use crate::common::NumStdDev;
use crate::common::inv_pow2;
use crate::hll::harmonic_numbers;

/// Relative standard error of the HIP estimator, as a multiple of 1/sqrt(k).
const HIP_RSE_FACTOR: f64 = 0.8326;

/// Relative standard error of the composite estimator, as a multiple of
/// 1/sqrt(k).
const COMPOSITE_RSE_FACTOR: f64 = 1.04;

/// HIP estimator with KxQ registers for improved cardinality estimation.
///
/// This struct encapsulates all estimation-related state and logic, allowing
/// it to be composed into Array4, Array6, and Array8.
///
/// The estimator supports two modes:
/// - **In-order mode**: the HIP accumulator tracks the exact update history
/// - **Out-of-order mode**: after deserialization or merging the composite
///   estimator (raw HLL + linear counting) is used instead
#[derive(Debug, Clone)]
pub struct HipEstimator {
    /// HIP estimator accumulator
    hip_accum: f64,
    /// KxQ register for values < 32 (larger inverse powers)
    kxq0: f64,
    /// KxQ register for values >= 32 (tiny inverse powers)
    kxq1: f64,
    /// Out-of-order flag: when true, HIP updates are skipped
    out_of_order: bool,
}

impl PartialEq for HipEstimator {
    fn eq(&self, other: &Self) -> bool {
        // For serialization round-trip tests, f64 values should be
        // bit-identical after going through binary serialization.
        self.hip_accum == other.hip_accum
            && self.kxq0 == other.kxq0
            && self.kxq1 == other.kxq1
            && self.out_of_order == other.out_of_order
    }
}

impl HipEstimator {
    /// Create a new HIP estimator for a sketch with 2^lg_config_k registers.
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u64 << lg_config_k;
        Self {
            hip_accum: 0.0,
            kxq0: k as f64, // All registers start at 0, so kxq0 = k * (1/2^0) = k
            kxq1: 0.0,
            out_of_order: false,
        }
    }

    /// Update the estimator when a register changes from `old_value` to
    /// `new_value`.
    ///
    /// This must be called BEFORE the register itself is rewritten, so the
    /// accumulated probability reflects the state the update was drawn from.
    pub fn update(&mut self, lg_config_k: u8, old_value: u8, new_value: u8) {
        let k = (1u64 << lg_config_k) as f64;

        // When out-of-order (from deserialization or merge), HIP is invalid.
        if !self.out_of_order {
            self.hip_accum += k / (self.kxq0 + self.kxq1);
        }

        // The KxQ registers track the register array regardless of the flag.
        self.update_kxq(old_value, new_value);
    }

    fn update_kxq(&mut self, old_value: u8, new_value: u8) {
        if old_value < 32 {
            self.kxq0 -= inv_pow2(old_value as u32);
        } else {
            self.kxq1 -= inv_pow2(old_value as u32);
        }

        if new_value < 32 {
            self.kxq0 += inv_pow2(new_value as u32);
        } else {
            self.kxq1 += inv_pow2(new_value as u32);
        }
    }

    /// Get the current cardinality estimate.
    ///
    /// Dispatches to either HIP or the composite estimator based on the
    /// out-of-order flag.
    ///
    /// # Arguments
    /// * `lg_config_k` - Log2 of number of registers (k)
    /// * `cur_min` - Current minimum register value (for Array4, 0 for Array6/8)
    /// * `num_at_cur_min` - Number of registers at cur_min value
    pub fn estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        if self.out_of_order {
            self.composite_estimate(lg_config_k, cur_min, num_at_cur_min)
        } else {
            self.hip_accum
        }
    }

    /// Get upper confidence bound for the cardinality estimate.
    pub fn upper_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let est = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        let eps = (num_std_dev.as_u8() as f64) * self.rel_err(lg_config_k);
        est / (1.0 - eps)
    }

    /// Get lower confidence bound for the cardinality estimate.
    pub fn lower_bound(
        &self,
        lg_config_k: u8,
        cur_min: u8,
        num_at_cur_min: u32,
        num_std_dev: NumStdDev,
    ) -> f64 {
        let est = self.estimate(lg_config_k, cur_min, num_at_cur_min);
        let eps = (num_std_dev.as_u8() as f64) * self.rel_err(lg_config_k);
        est / (1.0 + eps)
    }

    fn rel_err(&self, lg_config_k: u8) -> f64 {
        let k = (1u64 << lg_config_k) as f64;
        let factor = if self.out_of_order {
            COMPOSITE_RSE_FACTOR
        } else {
            HIP_RSE_FACTOR
        };
        factor / k.sqrt()
    }

    /// Raw estimate using the classical HyperLogLog formula
    /// `alpha * k^2 / (kxq0 + kxq1)`, with the small-k alpha corrections.
    fn raw_estimate(&self, lg_config_k: u8) -> f64 {
        let k = (1u64 << lg_config_k) as f64;

        let correction_factor = match lg_config_k {
            4 => 0.673,
            5 => 0.697,
            6 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / k),
        };

        (correction_factor * k * k) / (self.kxq0 + self.kxq1)
    }

    /// Linear counting estimate for small cardinalities, based on the number
    /// of registers still at zero.
    fn bitmap_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        let k = 1u32 << lg_config_k;

        // Registers are unhit only while cur_min is still zero.
        let num_unhit = if cur_min == 0 { num_at_cur_min } else { 0 };

        if num_unhit == 0 {
            // Every register hit: linear counting saturates.
            return (k as f64) * (k as f64 / 0.5).ln();
        }

        let num_hit = k - num_unhit;
        harmonic_numbers::bitmap_estimate(k, num_hit)
    }

    /// Composite estimate blending the raw HLL formula with linear counting.
    ///
    /// Above 3k the raw estimator is in its asymptotic regime and is used
    /// directly. Below that, linear counting is the better warmup estimator;
    /// the crossover is decided on the average of the two so a single noisy
    /// reading cannot flip the decision.
    fn composite_estimate(&self, lg_config_k: u8, cur_min: u8, num_at_cur_min: u32) -> f64 {
        let raw_est = self.raw_estimate(lg_config_k);

        let k = 1u64 << lg_config_k;
        if raw_est > (3 * k) as f64 {
            return raw_est;
        }

        let lin_est = self.bitmap_estimate(lg_config_k, cur_min, num_at_cur_min);
        let avg_est = (raw_est + lin_est) / 2.0;

        // Crossover thresholds (empirically determined)
        let crossover = match lg_config_k {
            4 => 0.718,
            5 => 0.672,
            _ => 0.64,
        };
        let threshold = crossover * (k as f64);

        if avg_est > threshold { raw_est } else { lin_est }
    }

    /// Get the HIP accumulator value
    pub fn hip_accum(&self) -> f64 {
        self.hip_accum
    }

    /// Get the kxq0 register value
    pub fn kxq0(&self) -> f64 {
        self.kxq0
    }

    /// Get the kxq1 register value
    pub fn kxq1(&self) -> f64 {
        self.kxq1
    }

    /// Check if this estimator is in out-of-order mode
    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Set the out-of-order flag.
    ///
    /// Set to true when deserializing a sketch or after a merge; the HIP
    /// accumulator is invalidated because the update history is unknown.
    pub fn set_out_of_order(&mut self, ooo: bool) {
        self.out_of_order = ooo;
        if ooo {
            self.hip_accum = 0.0;
        }
    }

    /// Set the HIP accumulator directly
    pub fn set_hip_accum(&mut self, value: f64) {
        self.hip_accum = value;
    }

    /// Set the kxq0 register directly
    pub fn set_kxq0(&mut self, value: f64) {
        self.kxq0 = value;
    }

    /// Set the kxq1 register directly
    pub fn set_kxq1(&mut self, value: f64) {
        self.kxq1 = value;
    }
}
