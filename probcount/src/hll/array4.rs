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

//! HLL Array4 mode - 4-bit packed registers with exception handling.
//!
//! Array4 stores register values using 4 bits per slot (2 slots per byte) as
//! an offset from `cur_min`, the minimum register value across the sketch.
//! A stored nibble of 15 marks an overflow; the true value then lives in the
//! auxiliary hash map. As the sketch warms, `cur_min` rises and the window
//! slides up with it, so 4 bits remain sufficient for all but rare outliers.

use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::aux_map::AuxMap;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::pack_coupon;
use crate::hll::serialization::*;

const AUX_TOKEN: u8 = 15;

/// 4-bit packed register array.
///
/// Even slots use the low nibble, odd slots the high nibble.
#[derive(Debug, Clone, PartialEq)]
pub struct Array4 {
    lg_config_k: u8,
    /// Packed 4-bit values: 2 values per byte
    bytes: Box<[u8]>,
    /// Window offset: all stored nibbles are relative to this value
    cur_min: u8,
    /// Count of slots at exactly cur_min (when 0, cur_min can advance)
    num_at_cur_min: u32,
    /// Exception table for values >= 15 after the cur_min offset
    aux_map: Option<AuxMap>,
    /// HIP estimator for cardinality estimation
    estimator: HipEstimator,
}

impl Array4 {
    pub fn new(lg_config_k: u8) -> Self {
        let num_bytes = 1 << (lg_config_k - 1);
        let num_at_cur_min = 1 << lg_config_k;
        Self {
            lg_config_k,
            bytes: vec![0u8; num_bytes].into_boxed_slice(),
            cur_min: 0,
            num_at_cur_min,
            aux_map: None,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    /// Get the raw 4-bit nibble for a slot (not adjusted for cur_min)
    #[inline]
    fn get_raw(&self, slot: u32) -> u8 {
        debug_assert!((slot >> 1) < self.bytes.len() as u32);

        let byte = self.bytes[(slot >> 1) as usize];
        if slot & 1 == 0 {
            byte & 0x0F // low nibble for even slots
        } else {
            byte >> 4 // high nibble for odd slots
        }
    }

    /// Set the raw 4-bit nibble for a slot, preserving its neighbor
    #[inline]
    fn put_raw(&mut self, slot: u32, value: u8) {
        debug_assert!(value <= AUX_TOKEN);
        debug_assert!((slot >> 1) < self.bytes.len() as u32);

        let byte_idx = (slot >> 1) as usize;
        let old_byte = self.bytes[byte_idx];
        self.bytes[byte_idx] = if slot & 1 == 0 {
            (old_byte & 0xF0) | (value & 0x0F) // set low nibble
        } else {
            (old_byte & 0x0F) | (value << 4) // set high nibble
        };
    }

    /// The actual register value at a slot.
    ///
    /// A nibble below 15 decodes as `cur_min + nibble`; the overflow marker
    /// redirects to the auxiliary map.
    pub(super) fn get(&self, slot: u32) -> u8 {
        let raw = self.get_raw(slot);

        if raw < AUX_TOKEN {
            self.cur_min + raw
        } else {
            self.aux_map
                .as_ref()
                .expect("aux map must exist while a register holds the overflow marker")
                .must_find_value_for(slot)
                .expect("an overflow register always has an aux entry")
        }
    }

    /// Number of registers (K = 2^lg_config_k)
    pub(super) fn num_registers(&self) -> usize {
        1 << self.lg_config_k
    }

    pub fn update(&mut self, coupon: u32) {
        let mask = (1 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);

        // Quick rejection: nothing below or at the window floor can win.
        if new_value <= self.cur_min {
            return;
        }

        let raw_stored = self.get_raw(slot);
        let lower_bound = raw_stored + self.cur_min;

        if new_value <= lower_bound {
            return;
        }

        let old_value = if raw_stored < AUX_TOKEN {
            lower_bound
        } else {
            self.aux_map
                .as_ref()
                .expect("aux map must exist while a register holds the overflow marker")
                .must_find_value_for(slot)
                .expect("an overflow register always has an aux entry")
        };

        if new_value <= old_value {
            return;
        }

        // The estimator must see the state the update was drawn from.
        self.estimator.update(self.lg_config_k, old_value, new_value);

        let shifted_new = new_value - self.cur_min;

        // Four cases based on old/new exception status
        match (raw_stored, shifted_new) {
            // Both old and new are exceptions
            (AUX_TOKEN, shifted) if shifted >= AUX_TOKEN => {
                self.aux_map
                    .as_mut()
                    .expect("aux map must exist while a register holds the overflow marker")
                    .must_replace(slot, new_value)
                    .expect("an overflow register always has an aux entry");
            }
            // Old is an exception, new is not: impossible without a cur_min change
            (AUX_TOKEN, _) => {
                unreachable!("overflow marker present with in-window new value");
            }
            // Old in window, new overflows
            (_, shifted) if shifted >= AUX_TOKEN => {
                self.put_raw(slot, AUX_TOKEN);
                let aux = self
                    .aux_map
                    .get_or_insert_with(|| AuxMap::new(self.lg_config_k));
                aux.must_add(slot, new_value)
                    .expect("an in-window register cannot already have an aux entry");
            }
            // Both in window
            _ => {
                self.put_raw(slot, shifted_new);
            }
        }

        if old_value == self.cur_min {
            self.num_at_cur_min -= 1;
            while self.num_at_cur_min == 0 {
                self.shift_to_bigger_cur_min();
            }
        }
    }

    /// Advance cur_min by one and renormalize every register.
    ///
    /// Called when no slots remain at cur_min. Every stored nibble is
    /// decremented, and exceptions that fall back into the 4-bit window are
    /// re-homed out of the auxiliary map.
    fn shift_to_bigger_cur_min(&mut self) {
        let new_cur_min = self.cur_min + 1;
        let k = 1u32 << self.lg_config_k;
        let mut num_at_new = 0;

        for slot in 0..k {
            let raw = self.get_raw(slot);
            debug_assert_ne!(raw, 0, "no register can sit at cur_min when shifting");
            if raw < AUX_TOKEN {
                let decremented = raw - 1;
                self.put_raw(slot, decremented);
                if decremented == 0 {
                    num_at_new += 1;
                }
            }
        }

        // Rebuild the aux map: some exceptions may now fit in the window.
        if let Some(old_aux) = self.aux_map.take() {
            let mut new_aux = None;

            for (slot, old_actual_val) in old_aux.into_pairs() {
                debug_assert_eq!(self.get_raw(slot), AUX_TOKEN);

                let new_shifted = old_actual_val - new_cur_min;
                if new_shifted < AUX_TOKEN {
                    self.put_raw(slot, new_shifted);
                } else {
                    // Still an exception
                    let aux = new_aux.get_or_insert_with(|| AuxMap::new(self.lg_config_k));
                    aux.must_add(slot, old_actual_val)
                        .expect("re-homed exception slots are distinct");
                }
            }
            self.aux_map = new_aux;
        }

        self.cur_min = new_cur_min;
        self.num_at_cur_min = num_at_new;
    }

    /// Current cardinality estimate
    pub fn estimate(&self) -> f64 {
        self.estimator
            .estimate(self.lg_config_k, self.cur_min, self.num_at_cur_min)
    }

    /// Upper bound for the cardinality estimate
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator.upper_bound(
            self.lg_config_k,
            self.cur_min,
            self.num_at_cur_min,
            num_std_dev,
        )
    }

    /// Lower bound for the cardinality estimate
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator.lower_bound(
            self.lg_config_k,
            self.cur_min,
            self.num_at_cur_min,
            num_std_dev,
        )
    }

    /// Seed the HIP accumulator when promoting from a coupon mode.
    pub fn set_hip_accum(&mut self, value: f64) {
        self.estimator.set_hip_accum(value);
    }

    pub(super) fn set_out_of_order(&mut self, ooo: bool) {
        self.estimator.set_out_of_order(ooo);
    }

    pub(super) fn is_out_of_order(&self) -> bool {
        self.estimator.is_out_of_order()
    }

    /// True when no update has ever raised a register.
    pub fn is_empty(&self) -> bool {
        self.cur_min == 0 && self.num_at_cur_min == (1 << self.lg_config_k)
    }

    /// Deserialize Array4 from HLL mode bytes.
    ///
    /// Expects the full 40-byte HLL preamble followed by the packed nibble
    /// array and the aux pairs, if any.
    pub fn deserialize(
        bytes: &[u8],
        lg_config_k: u8,
        compact: bool,
        ooo: bool,
    ) -> Result<Self, Error> {
        if bytes.len() < HLL_PREAMBLE_SIZE {
            return Err(Error::insufficient_data(format!(
                "HLL preamble: expected at least {HLL_PREAMBLE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let num_bytes = 1usize << (lg_config_k - 1); // k/2 bytes of nibbles

        let cur_min = bytes[HLL_CUR_MIN_BYTE];
        let hip_accum = read_f64_le(bytes, HIP_ACCUM_DOUBLE);
        let kxq0 = read_f64_le(bytes, KXQ0_DOUBLE);
        let kxq1 = read_f64_le(bytes, KXQ1_DOUBLE);
        let num_at_cur_min = read_u32_le(bytes, CUR_MIN_COUNT_INT);
        let aux_count = read_u32_le(bytes, AUX_COUNT_INT);

        let expected_len = if compact {
            HLL_PREAMBLE_SIZE
        } else {
            HLL_PREAMBLE_SIZE + num_bytes + (aux_count as usize * COUPON_SIZE_BYTES)
        };
        if bytes.len() < expected_len {
            return Err(Error::insufficient_data(format!(
                "HLL4 image: expected {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let mut data = vec![0u8; num_bytes];
        if !compact {
            data.copy_from_slice(&bytes[HLL_BYTE_ARR_START..HLL_BYTE_ARR_START + num_bytes]);
        }

        let mut aux_map = None;
        if aux_count > 0 {
            let mut aux = AuxMap::new(lg_config_k);
            let aux_start = HLL_BYTE_ARR_START + num_bytes;

            for i in 0..aux_count {
                let offset = aux_start + (i as usize * COUPON_SIZE_BYTES);
                let pair = read_u32_le(bytes, offset);
                let slot = get_slot(pair) & ((1 << lg_config_k) - 1);
                let value = get_value(pair);
                // The pairs are untrusted wire content; colliding slots make
                // the image malformed rather than a crash.
                aux.must_add(slot, value).map_err(|err| {
                    Error::malformed(format!("invalid aux entry for slot {slot}")).set_source(err)
                })?;
            }
            debug_assert_eq!(aux.count(), aux_count);
            aux_map = Some(aux);
        }

        let mut estimator = HipEstimator::new(lg_config_k);
        estimator.set_hip_accum(hip_accum);
        estimator.set_kxq0(kxq0);
        estimator.set_kxq1(kxq1);
        estimator.set_out_of_order(ooo);

        Ok(Self {
            lg_config_k,
            bytes: data.into_boxed_slice(),
            cur_min,
            num_at_cur_min,
            aux_map,
            estimator,
        })
    }

    /// Serialize Array4 to the full HLL mode image.
    pub fn serialize(&self, lg_config_k: u8) -> Vec<u8> {
        let num_bytes = 1usize << (lg_config_k - 1);

        let aux_entries: Vec<(u32, u8)> = match &self.aux_map {
            Some(aux) => aux.iter().collect(),
            None => vec![],
        };

        let aux_count = aux_entries.len() as u32;
        let total_size = HLL_PREAMBLE_SIZE + num_bytes + (aux_count as usize * COUPON_SIZE_BYTES);
        let mut bytes = vec![0u8; total_size];

        bytes[PREAMBLE_INTS_BYTE] = HLL_PREINTS;
        bytes[SER_VER_BYTE] = SER_VER;
        bytes[FAMILY_BYTE] = crate::codec::family::Family::HLL.id;
        bytes[LG_K_BYTE] = lg_config_k;
        bytes[LG_ARR_BYTE] = 0; // not used in HLL mode

        let mut flags = 0u8;
        if self.is_out_of_order() {
            flags |= OUT_OF_ORDER_FLAG_MASK;
        }
        bytes[FLAGS_BYTE] = flags;

        bytes[HLL_CUR_MIN_BYTE] = self.cur_min;
        bytes[MODE_BYTE] = encode_mode_byte(CUR_MODE_HLL, TGT_HLL4);

        write_f64_le(&mut bytes, HIP_ACCUM_DOUBLE, self.estimator.hip_accum());
        write_f64_le(&mut bytes, KXQ0_DOUBLE, self.estimator.kxq0());
        write_f64_le(&mut bytes, KXQ1_DOUBLE, self.estimator.kxq1());
        write_u32_le(&mut bytes, CUR_MIN_COUNT_INT, self.num_at_cur_min);
        write_u32_le(&mut bytes, AUX_COUNT_INT, aux_count);

        bytes[HLL_BYTE_ARR_START..HLL_BYTE_ARR_START + num_bytes].copy_from_slice(&self.bytes);

        let aux_start = HLL_BYTE_ARR_START + num_bytes;
        for (i, (slot, value)) in aux_entries.iter().enumerate() {
            write_u32_le(
                &mut bytes,
                aux_start + i * COUPON_SIZE_BYTES,
                pack_coupon(*slot, *value),
            );
        }

        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::coupon;

    #[test]
    fn test_get_set_raw_nibbles() {
        let mut arr = Array4::new(4); // 16 registers

        arr.put_raw(0, 5);
        assert_eq!(arr.get_raw(0), 5);

        arr.put_raw(1, 7);
        assert_eq!(arr.get_raw(1), 7);

        // Both nibbles share the first byte.
        assert_eq!(arr.bytes[0], 0x75);

        arr.put_raw(2, 15);
        arr.put_raw(3, 3);
        assert_eq!(arr.get_raw(2), 15);
        assert_eq!(arr.get_raw(3), 3);
        // Earlier values untouched by neighboring writes.
        assert_eq!(arr.get_raw(0), 5);
        assert_eq!(arr.get_raw(1), 7);
    }

    #[test]
    fn test_register_monotonic() {
        let mut arr = Array4::new(8);

        arr.update(pack_coupon(3, 9));
        assert_eq!(arr.get(3), 9);

        // A smaller value never lowers a register.
        arr.update(pack_coupon(3, 4));
        assert_eq!(arr.get(3), 9);

        arr.update(pack_coupon(3, 12));
        assert_eq!(arr.get(3), 12);
    }

    #[test]
    fn test_exception_goes_to_aux_map() {
        let mut arr = Array4::new(7);

        // cur_min is 0, so 20 exceeds the window and must be an exception.
        arr.update(pack_coupon(11, 20));

        assert_eq!(arr.get_raw(11), AUX_TOKEN);
        let aux = arr.aux_map.as_ref().expect("aux map should exist");
        assert_eq!(aux.get(11), Some(20));
        assert_eq!(arr.get(11), 20);

        // Raising an exception further replaces it in place.
        arr.update(pack_coupon(11, 33));
        assert_eq!(arr.get(11), 33);
        assert_eq!(arr.aux_map.as_ref().unwrap().count(), 1);
    }

    #[test]
    fn test_cur_min_shift_rehomes_exceptions() {
        let lg_k = 4u8;
        let k = 1u32 << lg_k;
        let mut arr = Array4::new(lg_k);

        // One big outlier while cur_min is still 0.
        arr.update(pack_coupon(0, 16));
        assert_eq!(arr.get_raw(0), AUX_TOKEN);

        // Raising every other register off zero exhausts cur_min 0, so the
        // window slides up and the outlier drops back into the nibble range.
        for slot in 1..k {
            arr.update(pack_coupon(slot, 2));
        }
        assert!(arr.cur_min > 0, "cur_min should have advanced");
        assert!(arr.aux_map.is_none());

        assert_eq!(arr.get(0), 16);
        for slot in 1..k {
            assert_eq!(arr.get(slot), 2);
        }
    }

    #[test]
    fn test_hip_estimate_tracks_cardinality() {
        let mut arr = Array4::new(10); // 1024 registers

        assert_eq!(arr.estimate(), 0.0);
        for i in 0..10_000u32 {
            arr.update(coupon(i));
        }

        let estimate = arr.estimate();
        assert!(estimate.is_finite());
        assert!(
            (estimate - 10_000.0).abs() < 1_000.0,
            "estimate {estimate} too far from 10000"
        );
    }

    #[test]
    fn test_serialize_round_trip_with_aux() {
        let lg_k = 8u8;
        let mut arr = Array4::new(lg_k);
        for i in 0..5000u32 {
            arr.update(coupon(i));
        }
        arr.update(pack_coupon(17, 40)); // force an exception

        let bytes = arr.serialize(lg_k);
        let back = Array4::deserialize(&bytes, lg_k, false, arr.is_out_of_order()).unwrap();

        assert_eq!(arr, back);
        assert_eq!(back.get(17), 40);
    }

    #[test]
    fn test_deserialize_rejects_colliding_aux_pairs() {
        let lg_k = 7u8;
        let mut arr = Array4::new(lg_k);
        arr.update(pack_coupon(11, 20)); // one real exception
        let mut bytes = arr.serialize(lg_k);

        // Claim a second aux pair for the same slot.
        write_u32_le(&mut bytes, AUX_COUNT_INT, 2);
        bytes.extend_from_slice(&pack_coupon(11, 21).to_le_bytes());

        let err = Array4::deserialize(&bytes, lg_k, false, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedData);
    }
}
