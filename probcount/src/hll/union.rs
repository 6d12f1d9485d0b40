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

//! Union of HLL sketches.
//!
//! The union maintains an internal "gadget" sketch in the Hll8 packing,
//! which can absorb any input mode without loss. Register merging is
//! element-wise maximum, which makes the union commutative and idempotent.
//!
//! Inputs with differing `lg_config_k` are allowed: when a coarser input
//! arrives, the gadget is down-sampled to the coarser configuration by
//! folding register indices modulo the smaller K. The union can therefore
//! end up coarser than it was configured, never finer.
//!
//! A merged result has no usable HIP history, so results are flagged
//! out-of-order and estimated with the composite estimator.

use crate::common::NumStdDev;
use crate::hll::HllSketch;
use crate::hll::HllType;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::mode::Mode;
use crate::hll::pack_coupon;

/// The union (merge) operation for HLL sketches.
#[derive(Debug, Clone)]
pub struct HllUnion {
    gadget: HllSketch,
}

impl HllUnion {
    /// Creates a new union with the given maximum `lg_config_k`.
    ///
    /// # Panics
    ///
    /// Panics if `lg_max_k` is not in the range [4, 21].
    pub fn new(lg_max_k: u8) -> Self {
        Self {
            gadget: HllSketch::new(lg_max_k, HllType::Hll8),
        }
    }

    /// The current `lg_config_k` of the union.
    ///
    /// This starts at the configured maximum and can only decrease, when a
    /// coarser input sketch forces a down-sample.
    pub fn lg_config_k(&self) -> u8 {
        self.gadget.lg_config_k()
    }

    /// Merge a sketch into this union.
    pub fn update(&mut self, sketch: &HllSketch) {
        if sketch.is_empty() {
            return;
        }

        if sketch.lg_config_k() < self.gadget.lg_config_k() {
            self.downsample(sketch.lg_config_k());
        }

        for coupon in sketch.coupons() {
            self.gadget.update_with_coupon(coupon);
        }

        // Merged registers carry no usable update history.
        self.gadget.set_out_of_order(true);
    }

    /// Current cardinality estimate of the union.
    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }

    /// Upper confidence bound for the union estimate.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.gadget.upper_bound(num_std_dev)
    }

    /// Lower confidence bound for the union estimate.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.gadget.lower_bound(num_std_dev)
    }

    /// Project the union contents into a sketch of the requested packing.
    pub fn get_result(&self, tgt_hll_type: HllType) -> HllSketch {
        let mut result = HllSketch::new(self.gadget.lg_config_k(), tgt_hll_type);
        for coupon in self.gadget.coupons() {
            result.update_with_coupon(coupon);
        }
        result.set_out_of_order(true);
        result
    }

    /// Rebuild the gadget at a coarser configuration.
    ///
    /// Register indices of a dense gadget fold modulo the smaller K. Coupons
    /// from the warmup modes keep their full 26-bit address; they are folded
    /// by the dense array when the rebuilt gadget escalates.
    fn downsample(&mut self, new_lg_k: u8) {
        let dense = matches!(
            self.gadget.mode(),
            Mode::Array4(_) | Mode::Array6(_) | Mode::Array8(_)
        );
        let mask = (1u32 << new_lg_k) - 1;

        let mut new_gadget = HllSketch::new(new_lg_k, HllType::Hll8);
        for coupon in self.gadget.coupons() {
            let coupon = if dense {
                pack_coupon(get_slot(coupon) & mask, get_value(coupon))
            } else {
                coupon
            };
            new_gadget.update_with_coupon(coupon);
        }
        new_gadget.set_out_of_order(true);
        self.gadget = new_gadget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_union() {
        let union = HllUnion::new(11);
        let result = union.get_result(HllType::Hll8);
        assert!(result.is_empty());
        assert_eq!(union.estimate(), 0.0);
    }

    #[test]
    fn test_union_is_idempotent() {
        let mut sketch = HllSketch::new(11, HllType::Hll8);
        for i in 0..5000u32 {
            sketch.update(i);
        }

        let mut union = HllUnion::new(11);
        union.update(&sketch);
        let once = union.estimate();

        union.update(&sketch);
        let twice = union.estimate();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_downsample_to_coarser_input() {
        let mut fine = HllSketch::new(12, HllType::Hll8);
        let mut coarse = HllSketch::new(8, HllType::Hll8);
        for i in 0..3000u32 {
            fine.update(i);
            coarse.update(i + 100_000);
        }

        let mut union = HllUnion::new(12);
        union.update(&fine);
        assert_eq!(union.lg_config_k(), 12);
        union.update(&coarse);
        assert_eq!(union.lg_config_k(), 8);

        let est = union.estimate();
        assert!((est - 6000.0).abs() < 6000.0 * 0.3, "estimate {est}");
    }
}
