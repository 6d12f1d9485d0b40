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

//! Open-addressed hash set for unique coupons.
//!
//! Collisions are resolved with an odd stride derived from the coupon's own
//! bits, so the probe sequence covers every slot of the power-of-two table.

use crate::codec::SketchBytes;
use crate::codec::family::Family;
use crate::error::Error;
use crate::hll::HllType;
use crate::hll::KEY_MASK_26;
use crate::hll::RESIZE_DENOMINATOR;
use crate::hll::RESIZE_NUMERATOR;
use crate::hll::container::COUPON_EMPTY;
use crate::hll::container::Container;
use crate::hll::serialization::*;

const LG_INIT_SET_SIZE: usize = 5;

/// Hash set for coupon storage with collision handling
#[derive(Debug, Clone, PartialEq)]
pub struct HashSet {
    container: Container,
}

impl Default for HashSet {
    fn default() -> Self {
        Self::new(LG_INIT_SET_SIZE)
    }
}

impl HashSet {
    pub fn new(lg_size: usize) -> Self {
        Self {
            container: Container::new(lg_size),
        }
    }

    /// Insert coupon into hash set, ignoring duplicates
    pub fn update(&mut self, coupon: u32) {
        let mask = (1 << self.container.lg_size()) - 1;

        // Initial probe position from low bits of coupon
        let mut probe = coupon & mask;
        let starting_position = probe;

        loop {
            let value = &mut self.container.coupons[probe as usize];
            if value == &COUPON_EMPTY {
                *value = coupon;
                self.container.len += 1;
                break;
            } else if value == &coupon {
                // Duplicate found, nothing to do
                break;
            }

            // Collision: the stride is always odd so every slot is visited.
            let stride = ((coupon & KEY_MASK_26) >> self.container.lg_size()) | 1;
            probe = (probe + stride) & mask;
            if probe == starting_position {
                // Invariant: the owning sketch grows or promotes the set
                // before its load factor lets it fill completely.
                unreachable!("HashSet full; no empty slots");
            }
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Deserialize a HashSet from a full sketch image
    pub fn deserialize(bytes: &[u8], compact: bool) -> Result<Self, Error> {
        if bytes.len() < SET_PREAMBLE_SIZE {
            return Err(Error::insufficient_data("SET preamble"));
        }

        // The array size byte is untrusted wire content; reject anything
        // beyond the register count before it can size a shift or an
        // allocation. The caller has already validated lg_config_k.
        let lg_config_k = bytes[LG_K_BYTE];
        if bytes[LG_ARR_BYTE] > lg_config_k {
            return Err(Error::malformed(format!(
                "SET lg_arr {} exceeds lg_config_k {lg_config_k}",
                bytes[LG_ARR_BYTE]
            )));
        }
        let lg_arr = (bytes[LG_ARR_BYTE] as usize).max(LG_INIT_SET_SIZE);
        let coupon_count = read_u32_le(bytes, HASH_SET_COUNT_INT) as usize;

        // A live set never exceeds its load factor, so neither can an image;
        // this also keeps the re-insertion loop below away from a full table.
        if (RESIZE_DENOMINATOR as u64) * (coupon_count as u64)
            > (RESIZE_NUMERATOR as u64) * (1u64 << lg_arr)
        {
            return Err(Error::malformed(format!(
                "SET coupon count {coupon_count} overfills a table of {} slots",
                1u64 << lg_arr
            )));
        }

        let stored = if compact { coupon_count } else { 1 << lg_arr };
        let needed = HASH_SET_INT_ARR_START + stored * COUPON_SIZE_BYTES;
        if bytes.len() < needed {
            return Err(Error::insufficient_data(format!(
                "SET coupons: expected {needed} bytes, got {}",
                bytes.len()
            )));
        }

        let mut set = HashSet::new(lg_arr);
        for i in 0..stored {
            let coupon = read_u32_le(bytes, HASH_SET_INT_ARR_START + i * COUPON_SIZE_BYTES);
            if coupon != COUPON_EMPTY {
                set.update(coupon);
            }
        }

        if set.container.len() != coupon_count {
            return Err(Error::malformed(format!(
                "SET coupon count mismatch: header says {coupon_count}, image holds {}",
                set.container.len()
            )));
        }

        Ok(set)
    }

    /// Serialize a HashSet to bytes in compact form
    pub fn serialize(&self, lg_config_k: u8, hll_type: HllType) -> Vec<u8> {
        let coupon_count = self.container.len();
        let lg_arr = self.container.lg_size();

        let total_size = SET_PREAMBLE_SIZE + coupon_count * COUPON_SIZE_BYTES;
        let mut bytes = SketchBytes::with_capacity(total_size);

        bytes.write_u8(HASH_SET_PREINTS);
        bytes.write_u8(SER_VER);
        bytes.write_u8(Family::HLL.id);
        bytes.write_u8(lg_config_k);
        bytes.write_u8(lg_arr as u8);
        bytes.write_u8(COMPACT_FLAG_MASK);
        bytes.write_u8(0); // unused
        bytes.write_u8(encode_mode_byte(CUR_MODE_SET, hll_type as u8));
        bytes.write_u32_le(coupon_count as u32);

        // Sort the retained coupons for deterministic output.
        let mut coupons: Vec<u32> = self.container.iter().collect();
        coupons.sort_unstable();
        for coupon in coupons {
            bytes.write_u32_le(coupon);
        }

        bytes.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::pack_coupon;

    #[test]
    fn test_insert_and_duplicates() {
        let mut set = HashSet::default();
        for i in 0..20u32 {
            set.update(pack_coupon(i, 1));
            set.update(pack_coupon(i, 1));
        }
        assert_eq!(set.container().len(), 20);
    }

    #[test]
    fn test_colliding_low_bits() {
        let mut set = HashSet::default();
        // All of these coupons share the same low 5 bits, forcing probing.
        for i in 0..8u32 {
            set.update(pack_coupon(i << 5, 1));
        }
        assert_eq!(set.container().len(), 8);
    }
}
