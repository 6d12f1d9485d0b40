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

//! HLL Array6 mode - 6-bit packed registers.
//!
//! Array6 stores register values using 6 bits per slot, which covers the
//! full register range (0-63) without the exception handling or cur_min
//! bookkeeping of Array4. Slots straddle byte boundaries, so reads and
//! writes go through a 16-bit window.

use crate::common::NumStdDev;
use crate::error::Error;
use crate::hll::estimator::HipEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;
use crate::hll::serialization::*;

const VAL_MASK_6: u16 = 0x3F;

/// 6-bit packed register array with cross-byte packing
#[derive(Debug, Clone, PartialEq)]
pub struct Array6 {
    lg_config_k: u8,
    /// Packed 6-bit values, may cross byte boundaries
    bytes: Box<[u8]>,
    /// Count of slots with value 0
    num_zeros: u32,
    /// HIP estimator for cardinality estimation
    estimator: HipEstimator,
}

impl Array6 {
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;
        Self {
            lg_config_k,
            bytes: vec![0u8; num_bytes_for_k(k)].into_boxed_slice(),
            num_zeros: k,
            estimator: HipEstimator::new(lg_config_k),
        }
    }

    /// Read the 6-bit field of a slot.
    ///
    /// `bit_pos = 6 * slot`; two bytes are combined so a field that crosses
    /// a byte boundary still reads in one step.
    #[inline]
    fn get_raw(&self, slot: u32) -> u8 {
        let start_bit = slot * 6;
        let byte_idx = (start_bit >> 3) as usize;
        let shift = (start_bit & 7) as u8;

        let two_bytes = u16::from_le_bytes([self.bytes[byte_idx], self.bytes[byte_idx + 1]]);
        ((two_bytes >> shift) & VAL_MASK_6) as u8
    }

    /// Write the 6-bit field of a slot with a read-modify-write that
    /// preserves the surrounding bits.
    #[inline]
    fn put_raw(&mut self, slot: u32, value: u8) {
        debug_assert!(value <= 63, "6-bit value must be 0-63");

        let start_bit = slot * 6;
        let byte_idx = (start_bit >> 3) as usize;
        let shift = (start_bit & 7) as u8;

        let mut two_bytes = u16::from_le_bytes([self.bytes[byte_idx], self.bytes[byte_idx + 1]]);
        two_bytes &= !(VAL_MASK_6 << shift);
        two_bytes |= ((value as u16) & VAL_MASK_6) << shift;

        let bytes_out = two_bytes.to_le_bytes();
        self.bytes[byte_idx] = bytes_out[0];
        self.bytes[byte_idx + 1] = bytes_out[1];
    }

    /// The register value at a slot
    pub(super) fn get(&self, slot: u32) -> u8 {
        self.get_raw(slot)
    }

    pub(super) fn num_registers(&self) -> usize {
        1 << self.lg_config_k
    }

    /// Update with a coupon
    pub fn update(&mut self, coupon: u32) {
        let mask = (1 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask;
        let new_value = get_value(coupon);

        let old_value = self.get_raw(slot);

        if new_value > old_value {
            self.estimator.update(self.lg_config_k, old_value, new_value);
            self.put_raw(slot, new_value);
            if old_value == 0 {
                self.num_zeros -= 1;
            }
        }
    }

    /// Current cardinality estimate
    pub fn estimate(&self) -> f64 {
        // cur_min is always 0 for Array6, so num_at_cur_min is num_zeros.
        self.estimator.estimate(self.lg_config_k, 0, self.num_zeros)
    }

    /// Upper bound for the cardinality estimate
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .upper_bound(self.lg_config_k, 0, self.num_zeros, num_std_dev)
    }

    /// Lower bound for the cardinality estimate
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        self.estimator
            .lower_bound(self.lg_config_k, 0, self.num_zeros, num_std_dev)
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

    pub fn is_empty(&self) -> bool {
        self.num_zeros == (1 << self.lg_config_k)
    }

    /// Deserialize Array6 from HLL mode bytes.
    pub fn deserialize(
        bytes: &[u8],
        lg_config_k: u8,
        compact: bool,
        ooo: bool,
    ) -> Result<Self, Error> {
        let k = 1u32 << lg_config_k;
        let num_bytes = num_bytes_for_k(k);
        let expected_len = if compact {
            HLL_PREAMBLE_SIZE
        } else {
            HLL_PREAMBLE_SIZE + num_bytes
        };

        if bytes.len() < expected_len {
            return Err(Error::insufficient_data(format!(
                "HLL6 image: expected {expected_len} bytes, got {}",
                bytes.len()
            )));
        }

        let hip_accum = read_f64_le(bytes, HIP_ACCUM_DOUBLE);
        let kxq0 = read_f64_le(bytes, KXQ0_DOUBLE);
        let kxq1 = read_f64_le(bytes, KXQ1_DOUBLE);
        let num_zeros = read_u32_le(bytes, CUR_MIN_COUNT_INT);

        let mut data = vec![0u8; num_bytes];
        if !compact {
            data.copy_from_slice(&bytes[HLL_BYTE_ARR_START..HLL_BYTE_ARR_START + num_bytes]);
        }

        let mut estimator = HipEstimator::new(lg_config_k);
        estimator.set_hip_accum(hip_accum);
        estimator.set_kxq0(kxq0);
        estimator.set_kxq1(kxq1);
        estimator.set_out_of_order(ooo);

        Ok(Self {
            lg_config_k,
            bytes: data.into_boxed_slice(),
            num_zeros,
            estimator,
        })
    }

    /// Serialize Array6 to the full HLL mode image.
    pub fn serialize(&self, lg_config_k: u8) -> Vec<u8> {
        let k = 1u32 << lg_config_k;
        let num_bytes = num_bytes_for_k(k);
        let mut bytes = vec![0u8; HLL_PREAMBLE_SIZE + num_bytes];

        bytes[PREAMBLE_INTS_BYTE] = HLL_PREINTS;
        bytes[SER_VER_BYTE] = SER_VER;
        bytes[FAMILY_BYTE] = crate::codec::family::Family::HLL.id;
        bytes[LG_K_BYTE] = lg_config_k;
        bytes[LG_ARR_BYTE] = 0;

        let mut flags = 0u8;
        if self.is_out_of_order() {
            flags |= OUT_OF_ORDER_FLAG_MASK;
        }
        bytes[FLAGS_BYTE] = flags;

        bytes[HLL_CUR_MIN_BYTE] = 0; // cur_min is always 0 for Array6
        bytes[MODE_BYTE] = encode_mode_byte(CUR_MODE_HLL, TGT_HLL6);

        write_f64_le(&mut bytes, HIP_ACCUM_DOUBLE, self.estimator.hip_accum());
        write_f64_le(&mut bytes, KXQ0_DOUBLE, self.estimator.kxq0());
        write_f64_le(&mut bytes, KXQ1_DOUBLE, self.estimator.kxq1());
        write_u32_le(&mut bytes, CUR_MIN_COUNT_INT, self.num_zeros);
        write_u32_le(&mut bytes, AUX_COUNT_INT, 0);

        bytes[HLL_BYTE_ARR_START..].copy_from_slice(&self.bytes);
        bytes
    }
}

/// Bytes needed for k slots of 6 bits, plus one byte so the final slot's
/// 16-bit window read stays in bounds.
fn num_bytes_for_k(k: u32) -> usize {
    (((k * 3) >> 2) + 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::coupon;
    use crate::hll::pack_coupon;

    #[test]
    fn test_all_slots_independent() {
        let mut arr = Array6::new(4); // 16 slots

        for slot in 0..16u32 {
            arr.put_raw(slot, ((slot * 7) % 64) as u8);
        }
        for slot in 0..16u32 {
            assert_eq!(arr.get_raw(slot), ((slot * 7) % 64) as u8);
        }
    }

    #[test]
    fn test_boundary_crossing() {
        let mut arr = Array6::new(8);

        // Slot 1 starts at bit 6 and crosses the byte 0/1 boundary.
        arr.put_raw(1, 0b111111);
        assert_eq!(arr.get_raw(1), 63);

        arr.put_raw(2, 0b101010);
        assert_eq!(arr.get_raw(2), 42);

        // Slot 3 starts at bit 18 and crosses the byte 2/3 boundary.
        arr.put_raw(3, 0b110011);
        assert_eq!(arr.get_raw(3), 51);

        assert_eq!(arr.get_raw(1), 63);
        assert_eq!(arr.get_raw(2), 42);
    }

    #[test]
    fn test_update_is_monotone() {
        let mut arr = Array6::new(4);

        arr.update(pack_coupon(0, 5));
        assert_eq!(arr.get(0), 5);

        arr.update(pack_coupon(0, 3));
        assert_eq!(arr.get(0), 5);

        arr.update(pack_coupon(0, 8));
        assert_eq!(arr.get(0), 8);
    }

    #[test]
    fn test_num_zeros_tracking() {
        let mut arr = Array6::new(4);
        assert_eq!(arr.num_zeros, 16);
        assert!(arr.is_empty());

        arr.update(pack_coupon(0, 5));
        assert_eq!(arr.num_zeros, 15);
        assert!(!arr.is_empty());

        arr.update(pack_coupon(0, 10));
        assert_eq!(arr.num_zeros, 15);
    }

    #[test]
    fn test_serialize_round_trip() {
        let lg_k = 8u8;
        let mut arr = Array6::new(lg_k);
        for i in 0..2000u32 {
            arr.update(coupon(i));
        }

        let bytes = arr.serialize(lg_k);
        let back = Array6::deserialize(&bytes, lg_k, false, arr.is_out_of_order()).unwrap();
        assert_eq!(arr, back);
    }
}
