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

//! The main [`HllSketch`] type.
//!
//! A sketch starts in LIST mode, escalates to SET when the list fills, and
//! to a dense register array once the set carries about K/8 coupons. Small
//! configurations (`lg_config_k < 8`) skip SET entirely because the dense
//! array is already tiny.

use std::hash::Hash;

use crate::codec::family::Family;
use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::HllType;
use crate::hll::RESIZE_DENOMINATOR;
use crate::hll::RESIZE_NUMERATOR;
use crate::hll::array4::Array4;
use crate::hll::array6::Array6;
use crate::hll::array8::Array8;
use crate::hll::container::Container;
use crate::hll::coupon;
use crate::hll::hash_set::HashSet;
use crate::hll::list::List;
use crate::hll::mode::Mode;
use crate::hll::pack_coupon;
use crate::hll::serialization::*;

/// A HyperLogLog sketch.
///
/// See the [hll module level documentation](crate::hll) for more.
#[derive(Debug, Clone, PartialEq)]
pub struct HllSketch {
    lg_config_k: u8,
    mode: Mode,
}

impl HllSketch {
    /// Create a new HLL sketch.
    ///
    /// # Arguments
    ///
    /// * `lg_config_k` - Log2 of the number of registers (K). Must be in [4, 21].
    ///   - lg_k=4: 16 registers, ~26% relative error
    ///   - lg_k=12: 4096 registers, ~1.6% relative error (common choice)
    ///   - lg_k=21: 2M registers, ~0.06% relative error
    /// * `hll_type` - Target register packing (Hll4, Hll6, or Hll8)
    ///
    /// # Panics
    ///
    /// If lg_config_k is not in range [4, 21]
    pub fn new(lg_config_k: u8, hll_type: HllType) -> Self {
        assert!(
            (4..=21).contains(&lg_config_k),
            "lg_config_k must be in [4, 21], got {}",
            lg_config_k
        );

        Self {
            lg_config_k,
            mode: Mode::List {
                list: List::default(),
                hll_type,
            },
        }
    }

    pub(super) fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Check if the sketch is empty (no values have been added)
    pub fn is_empty(&self) -> bool {
        match &self.mode {
            Mode::List { list, .. } => list.container().is_empty(),
            Mode::Set { set, .. } => set.container().is_empty(),
            Mode::Array4(arr) => arr.is_empty(),
            Mode::Array6(arr) => arr.is_empty(),
            Mode::Array8(arr) => arr.is_empty(),
        }
    }

    /// Get the target register packing for this sketch
    pub fn target_type(&self) -> HllType {
        match &self.mode {
            Mode::List { hll_type, .. } => *hll_type,
            Mode::Set { hll_type, .. } => *hll_type,
            Mode::Array4(_) => HllType::Hll4,
            Mode::Array6(_) => HllType::Hll6,
            Mode::Array8(_) => HllType::Hll8,
        }
    }

    /// Get the configured lg_config_k
    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// Update the sketch with a value.
    ///
    /// Accepts any type that implements `Hash`. The value is hashed and
    /// converted to a coupon, which is then routed to the current mode.
    pub fn update<T: Hash>(&mut self, value: T) {
        let coupon = coupon(value);
        self.update_with_coupon(coupon);
    }

    /// Update the sketch with a raw coupon, performing mode escalation
    /// when the current storage is exhausted.
    pub(super) fn update_with_coupon(&mut self, coupon: u32) {
        match &mut self.mode {
            Mode::List { list, hll_type } => {
                list.update(coupon);
                if list.container().is_full() {
                    self.mode = if self.lg_config_k < 8 {
                        promote_container_to_array(list.container(), *hll_type, self.lg_config_k)
                    } else {
                        promote_container_to_set(list.container(), *hll_type)
                    }
                }
            }
            Mode::Set { set, hll_type } => {
                set.update(coupon);
                let over_load = RESIZE_DENOMINATOR as usize * set.container().len()
                    > RESIZE_NUMERATOR as usize * set.container().capacity();
                if over_load {
                    self.mode = if set.container().lg_size() == self.lg_config_k as usize - 3 {
                        promote_container_to_array(set.container(), *hll_type, self.lg_config_k)
                    } else {
                        grow_set(set, *hll_type)
                    }
                }
            }
            Mode::Array4(arr) => arr.update(coupon),
            Mode::Array6(arr) => arr.update(coupon),
            Mode::Array8(arr) => arr.update(coupon),
        }
    }

    /// Get the current cardinality estimate
    pub fn estimate(&self) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => list.container().estimate(),
            Mode::Set { set, .. } => set.container().estimate(),
            Mode::Array4(arr) => arr.estimate(),
            Mode::Array6(arr) => arr.estimate(),
            Mode::Array8(arr) => arr.estimate(),
        }
    }

    /// Upper confidence bound for the cardinality estimate
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => list.container().upper_bound(num_std_dev),
            Mode::Set { set, .. } => set.container().upper_bound(num_std_dev),
            Mode::Array4(arr) => arr.upper_bound(num_std_dev),
            Mode::Array6(arr) => arr.upper_bound(num_std_dev),
            Mode::Array8(arr) => arr.upper_bound(num_std_dev),
        }
    }

    /// Lower confidence bound for the cardinality estimate
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        match &self.mode {
            Mode::List { list, .. } => list.container().lower_bound(num_std_dev),
            Mode::Set { set, .. } => set.container().lower_bound(num_std_dev),
            Mode::Array4(arr) => arr.lower_bound(num_std_dev),
            Mode::Array6(arr) => arr.lower_bound(num_std_dev),
            Mode::Array8(arr) => arr.lower_bound(num_std_dev),
        }
    }

    /// Collect the sketch contents as coupons, whatever the current mode.
    pub(super) fn coupons(&self) -> Vec<u32> {
        match &self.mode {
            Mode::List { list, .. } => list.container().iter().collect(),
            Mode::Set { set, .. } => set.container().iter().collect(),
            Mode::Array4(arr) => dense_coupons(arr.num_registers(), |slot| arr.get(slot)),
            Mode::Array6(arr) => dense_coupons(arr.num_registers(), |slot| arr.get(slot)),
            Mode::Array8(arr) => dense_coupons(arr.num_registers(), |slot| arr.get(slot)),
        }
    }

    /// Mark a dense sketch as out of order, invalidating its HIP history.
    /// No-op in coupon modes, whose estimator is order-free anyway.
    pub(super) fn set_out_of_order(&mut self, ooo: bool) {
        match &mut self.mode {
            Mode::List { .. } | Mode::Set { .. } => {}
            Mode::Array4(arr) => arr.set_out_of_order(ooo),
            Mode::Array6(arr) => arr.set_out_of_order(ooo),
            Mode::Array8(arr) => arr.set_out_of_order(ooo),
        }
    }

    /// Deserializes an HLL sketch from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<HllSketch, Error> {
        if bytes.len() < 8 {
            return Err(Error::insufficient_data("sketch data too short (< 8 bytes)"));
        }

        let preamble_ints = bytes[PREAMBLE_INTS_BYTE];
        let ser_ver = bytes[SER_VER_BYTE];
        let family_id = bytes[FAMILY_BYTE];
        let lg_config_k = bytes[LG_K_BYTE];
        let flags = bytes[FLAGS_BYTE];
        let mode_byte = bytes[MODE_BYTE];

        Family::HLL.validate_id(family_id)?;

        if ser_ver != SER_VER {
            return Err(Error::unsupported_serial_version(SER_VER, ser_ver));
        }

        if !(4..=21).contains(&lg_config_k) {
            return Err(Error::invalid_argument(format!(
                "lg_config_k must be in [4, 21], got {lg_config_k}"
            )));
        }

        let hll_type = match extract_tgt_hll_type(mode_byte) {
            TGT_HLL4 => HllType::Hll4,
            TGT_HLL6 => HllType::Hll6,
            TGT_HLL8 => HllType::Hll8,
            tag => {
                return Err(Error::malformed(format!("invalid HLL type tag: {tag}")));
            }
        };

        let empty = (flags & EMPTY_FLAG_MASK) != 0;
        let compact = (flags & COMPACT_FLAG_MASK) != 0;
        let ooo = (flags & OUT_OF_ORDER_FLAG_MASK) != 0;

        let mode = match extract_cur_mode(mode_byte) {
            CUR_MODE_LIST => {
                if preamble_ints != LIST_PREINTS {
                    return Err(Error::malformed(format!(
                        "LIST mode preamble: expected {LIST_PREINTS} ints, got {preamble_ints}"
                    )));
                }
                let list = List::deserialize(bytes, empty, compact)?;
                Mode::List { list, hll_type }
            }
            CUR_MODE_SET => {
                if preamble_ints != HASH_SET_PREINTS {
                    return Err(Error::malformed(format!(
                        "SET mode preamble: expected {HASH_SET_PREINTS} ints, got {preamble_ints}"
                    )));
                }
                let set = HashSet::deserialize(bytes, compact)?;
                Mode::Set { set, hll_type }
            }
            CUR_MODE_HLL => {
                if preamble_ints != HLL_PREINTS {
                    return Err(Error::malformed(format!(
                        "HLL mode preamble: expected {HLL_PREINTS} ints, got {preamble_ints}"
                    )));
                }
                match hll_type {
                    HllType::Hll4 => {
                        Array4::deserialize(bytes, lg_config_k, compact, ooo).map(Mode::Array4)?
                    }
                    HllType::Hll6 => {
                        Array6::deserialize(bytes, lg_config_k, compact, ooo).map(Mode::Array6)?
                    }
                    HllType::Hll8 => {
                        Array8::deserialize(bytes, lg_config_k, compact, ooo).map(Mode::Array8)?
                    }
                }
            }
            tag => return Err(Error::malformed(format!("invalid mode tag: {tag}"))),
        };

        Ok(HllSketch { lg_config_k, mode })
    }

    /// Serializes the HLL sketch to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        match &self.mode {
            Mode::List { list, hll_type } => list.serialize(self.lg_config_k, *hll_type),
            Mode::Set { set, hll_type } => set.serialize(self.lg_config_k, *hll_type),
            Mode::Array4(arr) => arr.serialize(self.lg_config_k),
            Mode::Array6(arr) => arr.serialize(self.lg_config_k),
            Mode::Array8(arr) => arr.serialize(self.lg_config_k),
        }
    }
}

fn dense_coupons(num_registers: usize, get: impl Fn(u32) -> u8) -> Vec<u32> {
    (0..num_registers as u32)
        .filter_map(|slot| {
            let value = get(slot);
            (value > 0).then(|| pack_coupon(slot, value))
        })
        .collect()
}

fn promote_container_to_set(container: &Container, hll_type: HllType) -> Mode {
    let mut set = HashSet::default();
    for coupon in container.iter() {
        set.update(coupon);
    }

    Mode::Set { set, hll_type }
}

fn grow_set(old_set: &HashSet, hll_type: HllType) -> Mode {
    let new_lg_size = old_set.container().lg_size() + 1;
    let mut new_set = HashSet::new(new_lg_size);
    for coupon in old_set.container().iter() {
        new_set.update(coupon);
    }

    Mode::Set {
        set: new_set,
        hll_type,
    }
}

fn promote_container_to_array(container: &Container, hll_type: HllType, lg_config_k: u8) -> Mode {
    // The coupon-mode estimate seeds the HIP accumulator so the estimator
    // does not restart from zero after the promotion.
    match hll_type {
        HllType::Hll4 => {
            let mut array = Array4::new(lg_config_k);
            for coupon in container.iter() {
                array.update(coupon);
            }
            array.set_hip_accum(container.estimate());
            Mode::Array4(array)
        }
        HllType::Hll6 => {
            let mut array = Array6::new(lg_config_k);
            for coupon in container.iter() {
                array.update(coupon);
            }
            array.set_hip_accum(container.estimate());
            Mode::Array6(array)
        }
        HllType::Hll8 => {
            let mut array = Array8::new(lg_config_k);
            for coupon in container.iter() {
                array.update(coupon);
            }
            array.set_hip_accum(container.estimate());
            Mode::Array8(array)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::get_value;

    #[test]
    fn test_starts_in_list_mode() {
        let sketch = HllSketch::new(12, HllType::Hll6);
        assert!(matches!(sketch.mode(), Mode::List { .. }));
        assert!(sketch.is_empty());
        assert_eq!(sketch.target_type(), HllType::Hll6);
    }

    #[test]
    fn test_list_escalates_to_set_at_threshold() {
        let mut sketch = HllSketch::new(12, HllType::Hll8);

        for i in 0..7u32 {
            sketch.update_with_coupon(pack_coupon(i, 1));
        }
        assert!(matches!(sketch.mode(), Mode::List { .. }));

        // The eighth distinct coupon fills the list and the sketch escalates.
        sketch.update_with_coupon(pack_coupon(7, 1));
        assert!(matches!(sketch.mode(), Mode::Set { .. }));
        assert_eq!(sketch.coupons().len(), 8);
    }

    #[test]
    fn test_small_k_skips_set_mode() {
        let mut sketch = HllSketch::new(5, HllType::Hll8);
        for i in 0..100u32 {
            sketch.update(i);
        }
        assert!(matches!(sketch.mode(), Mode::Array8(_)));
    }

    #[test]
    fn test_set_escalates_to_dense() {
        let mut sketch = HllSketch::new(10, HllType::Hll4);
        for i in 0..1000u32 {
            sketch.update(i);
        }
        assert!(matches!(sketch.mode(), Mode::Array4(_)));
    }

    #[test]
    fn test_coupon_values_capped_at_six_bits() {
        let mut sketch = HllSketch::new(10, HllType::Hll8);
        for i in 0..100u32 {
            sketch.update(i);
        }
        for c in sketch.coupons() {
            assert!(get_value(c) > 0 && get_value(c) <= 63);
        }
    }
}
