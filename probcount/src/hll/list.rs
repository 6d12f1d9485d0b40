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

//! Simple list for storing unique coupons in arrival order.
//!
//! Provides sequential storage with linear search for duplicates. Efficient
//! for the handful of coupons a sketch holds before transitioning to the
//! hash set.

use crate::codec::SketchBytes;
use crate::codec::family::Family;
use crate::error::Error;
use crate::hll::HllType;
use crate::hll::container::COUPON_EMPTY;
use crate::hll::container::Container;
use crate::hll::serialization::*;

const LG_INIT_LIST_SIZE: usize = 3;

/// List for sequential coupon storage with duplicate detection
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    container: Container,
}

impl Default for List {
    fn default() -> Self {
        Self::new(LG_INIT_LIST_SIZE)
    }
}

impl List {
    pub fn new(lg_size: usize) -> Self {
        Self {
            container: Container::new(lg_size),
        }
    }

    /// Insert coupon into list, ignoring duplicates
    pub fn update(&mut self, coupon: u32) {
        for value in self.container.coupons.iter_mut() {
            if value == &COUPON_EMPTY {
                // Found empty slot, insert new coupon
                *value = coupon;
                self.container.len += 1;
                break;
            } else if value == &coupon {
                // Duplicate found, nothing to do
                break;
            }
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Deserialize a List from a full sketch image
    pub fn deserialize(bytes: &[u8], empty: bool, compact: bool) -> Result<Self, Error> {
        // The array size byte is untrusted wire content; reject anything
        // beyond the register count before it can size a shift or an
        // allocation. The caller has already validated lg_config_k.
        let lg_config_k = bytes[LG_K_BYTE];
        if bytes[LG_ARR_BYTE] > lg_config_k {
            return Err(Error::malformed(format!(
                "LIST lg_arr {} exceeds lg_config_k {lg_config_k}",
                bytes[LG_ARR_BYTE]
            )));
        }
        let lg_arr = (bytes[LG_ARR_BYTE] as usize).max(LG_INIT_LIST_SIZE);
        let coupon_count = bytes[LIST_COUNT_BYTE] as usize;

        if empty {
            return Ok(List::new(lg_arr));
        }

        let stored = if compact { coupon_count } else { 1 << lg_arr };
        let needed = LIST_INT_ARR_START + stored * COUPON_SIZE_BYTES;
        if bytes.len() < needed {
            return Err(Error::insufficient_data(format!(
                "LIST coupons: expected {needed} bytes, got {}",
                bytes.len()
            )));
        }

        let mut list = List::new(lg_arr);
        for i in 0..stored {
            let coupon = read_u32_le(bytes, LIST_INT_ARR_START + i * COUPON_SIZE_BYTES);
            if coupon != COUPON_EMPTY {
                list.update(coupon);
            }
        }

        if list.container.len() != coupon_count {
            return Err(Error::malformed(format!(
                "LIST coupon count mismatch: header says {coupon_count}, image holds {}",
                list.container.len()
            )));
        }

        Ok(list)
    }

    /// Serialize a List to bytes in compact form
    pub fn serialize(&self, lg_config_k: u8, hll_type: HllType) -> Vec<u8> {
        let empty = self.container.is_empty();
        let coupon_count = self.container.len();
        let lg_arr = self.container.lg_size();

        let total_size = LIST_PREAMBLE_SIZE + coupon_count * COUPON_SIZE_BYTES;
        let mut bytes = SketchBytes::with_capacity(total_size);

        bytes.write_u8(LIST_PREINTS);
        bytes.write_u8(SER_VER);
        bytes.write_u8(Family::HLL.id);
        bytes.write_u8(lg_config_k);
        bytes.write_u8(lg_arr as u8);

        let mut flags = COMPACT_FLAG_MASK;
        if empty {
            flags |= EMPTY_FLAG_MASK;
        }
        bytes.write_u8(flags);

        bytes.write_u8(coupon_count as u8);
        bytes.write_u8(encode_mode_byte(CUR_MODE_LIST, hll_type as u8));

        for coupon in self.container.iter() {
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
    fn test_duplicates_ignored() {
        let mut list = List::default();
        let coupon = pack_coupon(5, 3);
        list.update(coupon);
        list.update(coupon);
        assert_eq!(list.container().len(), 1);
    }

    #[test]
    fn test_fills_in_order() {
        let mut list = List::default();
        for i in 0..8u32 {
            list.update(pack_coupon(i, 1));
        }
        assert!(list.container().is_full());
        let collected: Vec<u32> = list.container().iter().collect();
        assert_eq!(collected.len(), 8);
    }
}
