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

//! HyperLogLog sketch implementation for cardinality estimation.
//!
//! This module provides a probabilistic data structure for estimating the
//! cardinality (number of distinct elements) of large datasets with high
//! accuracy and low memory usage.
//!
//! # Overview
//!
//! HyperLogLog (HLL) sketches use hash functions to estimate cardinality in
//! logarithmic space. This implementation supports multiple storage modes
//! that automatically adapt based on cardinality:
//!
//! - **List mode**: Stores individual coupons for small cardinalities
//! - **Set mode**: Uses a hash set of coupons for medium cardinalities
//! - **HLL mode**: Uses dense register arrays for large cardinalities
//!
//! Mode transitions are automatic and transparent to the user. Each
//! promotion preserves all previously observed values and maintains
//! estimation accuracy.
//!
//! # HLL Types
//!
//! Three target HLL types are supported, trading update speed for memory:
//!
//! - [`HllType::Hll4`]: 4 bits per register (most compact)
//! - [`HllType::Hll6`]: 6 bits per register (balanced)
//! - [`HllType::Hll8`]: 8 bits per register (fastest)
//!
//! # Coupons
//!
//! A coupon is a 32-bit value encoding both a slot number (26 bits) and a
//! value (6 bits). The slot identifies which register to update, and the
//! value is the number of leading zeros in the hash suffix plus one. Zero is
//! reserved as the empty sentinel, which is why valid coupon values are
//! always greater than zero.
//!
//! # Usage
//!
//! ```rust
//! # use probcount::hll::HllSketch;
//! # use probcount::hll::HllType;
//! # use probcount::common::NumStdDev;
//! let mut sketch = HllSketch::new(12, HllType::Hll8);
//! sketch.update("apple");
//! let upper = sketch.upper_bound(NumStdDev::Two);
//! assert!(upper >= sketch.estimate());
//! ```

use std::hash::Hash;

use crate::hash::MurmurHash3X64128;

mod array4;
mod array6;
mod array8;
mod aux_map;
mod container;
mod coupon_mapping;
mod cubic_interpolation;
mod estimator;
mod harmonic_numbers;
mod hash_set;
mod list;
mod mode;
mod serialization;
mod sketch;
mod union;

pub use self::sketch::HllSketch;
pub use self::union::HllUnion;

/// Target HLL register packing.
///
/// See the [module level documentation](self) for more details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HllType {
    /// Uses a 4-bit field per HLL register and for large counts may require
    /// a small internal auxiliary map for storing statistical exceptions,
    /// which are rare. It is generally the slowest in terms of update time,
    /// but has the smallest storage footprint of about K/2 bytes.
    Hll4,
    /// Uses a 6-bit field per HLL register. The next fastest in terms of
    /// update time with a storage footprint of about 3/4 * K bytes.
    Hll6,
    /// Uses one byte per HLL register. Generally the fastest in terms of
    /// update time but has the largest storage footprint of about K bytes.
    Hll8,
}

const KEY_BITS_26: u32 = 26;
const KEY_MASK_26: u32 = (1 << KEY_BITS_26) - 1;

const COUPON_RSE_FACTOR: f64 = 0.409; // At transition point not the asymptote
const COUPON_RSE: f64 = COUPON_RSE_FACTOR / (1 << 13) as f64;

const RESIZE_NUMERATOR: u32 = 3; // Resize at 3/4 = 75% load factor
const RESIZE_DENOMINATOR: u32 = 4;

/// Extract slot number (low 26 bits) from coupon
#[inline]
fn get_slot(coupon: u32) -> u32 {
    coupon & KEY_MASK_26
}

/// Extract value (upper 6 bits) from coupon
#[inline]
fn get_value(coupon: u32) -> u8 {
    (coupon >> KEY_BITS_26) as u8
}

/// Pack slot number and value into a coupon
///
/// Format: [value (6 bits) << 26] | [slot (26 bits)]
#[inline]
fn pack_coupon(slot: u32, value: u8) -> u32 {
    ((value as u32) << KEY_BITS_26) | (slot & KEY_MASK_26)
}

/// Generate a coupon from a hashable value.
fn coupon<H: Hash>(v: H) -> u32 {
    let mut hasher = MurmurHash3X64128::default();
    v.hash(&mut hasher);
    let (lo, hi) = hasher.finish128();

    let addr26 = lo as u32 & KEY_MASK_26;
    let lz = hi.leading_zeros();
    let capped = lz.min(62);
    let value = capped + 1;

    (value << KEY_BITS_26) | addr26
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_coupon() {
        let slot = 12345u32;
        let value = 42u8;
        let coupon = pack_coupon(slot, value);
        assert_eq!(get_slot(coupon), slot);
        assert_eq!(get_value(coupon), value);
    }

    #[test]
    fn test_coupon_value_is_nonzero() {
        for i in 0..1000u32 {
            let c = coupon(i);
            assert!(get_value(c) > 0, "coupon value must exceed the empty sentinel");
            assert!(get_value(c) <= 63);
        }
    }
}
