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

//! Compact Theta sketch.
//!
//! A [`CompactThetaSketch`] is the immutable form of a Theta sketch: theta,
//! the retained hashes (optionally sorted), and the seed hash needed to
//! validate set operations. It is both the result type of set operations and
//! the wire form.

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::codec::family::Family;
use crate::codec::preamble::*;
use crate::common::NumStdDev;
use crate::common::binomial_bounds;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::ThetaSketchView;
use crate::theta::hash_table::MAX_THETA;

/// A compact, immutable Theta sketch.
///
/// Unlike [`ThetaSketch`](super::ThetaSketch), this sketch cannot be updated
/// with new values.
///
/// # Example
///
/// ```
/// use probcount::theta::CompactThetaSketch;
/// use probcount::theta::ThetaSketch;
///
/// let mut sketch = ThetaSketch::builder().build();
/// sketch.update("apple");
/// sketch.update("banana");
///
/// let compact = sketch.compact(true);
/// let bytes = compact.serialize();
///
/// let restored = CompactThetaSketch::deserialize(&bytes).unwrap();
/// assert_eq!(compact.estimate(), restored.estimate());
/// ```
#[derive(Debug, Clone)]
pub struct CompactThetaSketch {
    theta: u64,
    entries: Vec<u64>,
    seed_hash: u16,
    ordered: bool,
    is_empty: bool,
}

impl CompactThetaSketch {
    /// Create a compact sketch from components.
    pub(crate) fn from_parts(
        entries: Vec<u64>,
        theta: u64,
        seed_hash: u16,
        ordered: bool,
        is_empty: bool,
    ) -> Self {
        Self {
            theta,
            entries,
            seed_hash,
            ordered,
            is_empty,
        }
    }

    /// Get the cardinality estimate.
    pub fn estimate(&self) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        let num_retained = self.entries.len() as f64;
        num_retained / self.theta()
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Check if the sketch is empty
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// Whether the retained hashes are sorted ascending
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.entries.len()
    }

    /// Return iterator over the retained hash values
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }

    /// Get the seed hash
    pub fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Approximate lower error bound at the given number of standard
    /// deviations.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .unwrap_or_else(|_| self.num_retained() as f64)
    }

    /// Approximate upper error bound at the given number of standard
    /// deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty,
        )
        .unwrap_or_else(|_| self.estimate())
    }

    /// Serialize the compact sketch to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let is_estimation_mode = self.is_estimation_mode();
        let num_entries = self.entries.len();

        let preamble_longs = if self.is_empty {
            PREAMBLE_LONGS_EMPTY
        } else if is_estimation_mode {
            PREAMBLE_LONGS_ESTIMATION
        } else {
            PREAMBLE_LONGS_EXACT
        };

        let total_size = (preamble_longs as usize) * 8 + num_entries * HASH_SIZE_BYTES;
        let mut bytes = SketchBytes::with_capacity(total_size);

        bytes.write_u8(preamble_longs);
        bytes.write_u8(THETA_SERIAL_VERSION);
        bytes.write_u8(Family::THETA.id);
        bytes.write_u8(0);
        bytes.write_u8(0);

        let mut flags = FLAG_IS_READ_ONLY | FLAG_IS_COMPACT;
        if self.ordered {
            flags |= FLAG_IS_ORDERED;
        }
        if self.is_empty {
            flags |= FLAG_IS_EMPTY;
        }
        bytes.write_u8(flags);
        bytes.write_u16_le(self.seed_hash);

        if preamble_longs >= PREAMBLE_LONGS_EXACT {
            bytes.write_u32_le(num_entries as u32);
            bytes.write_u32_le(1.0f32.to_bits());
        }

        if preamble_longs >= PREAMBLE_LONGS_ESTIMATION {
            bytes.write_u64_le(self.theta);
        }

        for hash in &self.entries {
            bytes.write_u64_le(*hash);
        }

        bytes.into_bytes()
    }

    /// Deserialize a compact sketch from bytes with the default seed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserialize a compact sketch from bytes with a specific seed.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too short, the family id or serial
    /// version does not match, or the seed hash does not match.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        fn make_error(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |_| Error::insufficient_data(tag)
        }

        let mut cursor = SketchSlice::new(bytes);

        let preamble_longs = cursor.read_u8().map_err(make_error("preamble_longs"))?;
        let serial_version = cursor.read_u8().map_err(make_error("serial_version"))?;
        let family_id = cursor.read_u8().map_err(make_error("family_id"))?;
        let _lg_k = cursor.read_u8().map_err(make_error("lg_k"))?;
        let _lg_arr = cursor.read_u8().map_err(make_error("lg_arr"))?;
        let flags = cursor.read_u8().map_err(make_error("flags"))?;
        let stored_seed_hash = cursor.read_u16_le().map_err(make_error("seed_hash"))?;

        Family::THETA.validate_id(family_id)?;
        if serial_version != THETA_SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                THETA_SERIAL_VERSION,
                serial_version,
            ));
        }
        if flags & FLAG_IS_BIG_ENDIAN != 0 {
            return Err(Error::malformed("big-endian images are not supported"));
        }
        if flags & FLAG_IS_COMPACT == 0 {
            return Err(Error::malformed("only compact images are supported"));
        }

        // A zero stored hash means a legacy image without seed validation.
        let expected_seed_hash = compute_seed_hash(seed);
        if stored_seed_hash != 0 && stored_seed_hash != expected_seed_hash {
            return Err(Error::seed_hash_mismatch(expected_seed_hash, stored_seed_hash));
        }
        let seed_hash = if stored_seed_hash == 0 {
            expected_seed_hash
        } else {
            stored_seed_hash
        };

        let ordered = (flags & FLAG_IS_ORDERED) != 0;

        if flags & FLAG_IS_EMPTY != 0 {
            return Ok(Self {
                theta: MAX_THETA,
                entries: Vec::new(),
                seed_hash,
                ordered,
                is_empty: true,
            });
        }

        // Single-item form: one preamble long followed by exactly one hash.
        if preamble_longs == PREAMBLE_LONGS_EMPTY && (flags & FLAG_HAS_SINGLE_ITEM) != 0 {
            let hash = cursor.read_u64_le().map_err(make_error("single_item_hash"))?;
            return Ok(Self {
                theta: MAX_THETA,
                entries: vec![hash],
                seed_hash,
                ordered,
                is_empty: false,
            });
        }

        if preamble_longs < PREAMBLE_LONGS_EXACT {
            return Err(Error::malformed(format!(
                "non-empty sketch requires at least {PREAMBLE_LONGS_EXACT} preamble longs, got {preamble_longs}"
            )));
        }

        let num_entries = cursor.read_u32_le().map_err(make_error("num_entries"))? as usize;
        let _p = cursor.read_f32_le().map_err(make_error("p"))?;

        let theta = if preamble_longs >= PREAMBLE_LONGS_ESTIMATION {
            cursor.read_u64_le().map_err(make_error("theta"))?
        } else {
            MAX_THETA
        };

        let mut entries = Vec::with_capacity(num_entries);
        for i in 0..num_entries {
            let hash = cursor.read_u64_le().map_err(|_| {
                Error::insufficient_data(format!(
                    "expected {num_entries} entries, failed at index {i}"
                ))
            })?;
            entries.push(hash);
        }

        Ok(Self {
            theta,
            entries,
            seed_hash,
            ordered,
            is_empty: false,
        })
    }
}

impl ThetaSketchView for CompactThetaSketch {
    fn num_retained(&self) -> usize {
        self.entries.len()
    }

    fn theta64(&self) -> u64 {
        self.theta
    }

    fn is_empty(&self) -> bool {
        self.is_empty
    }

    fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_seed_hash() -> u16 {
        compute_seed_hash(DEFAULT_UPDATE_SEED)
    }

    #[test]
    fn test_empty_compact_sketch() {
        let sketch =
            CompactThetaSketch::from_parts(Vec::new(), MAX_THETA, default_seed_hash(), true, true);
        assert!(sketch.is_empty());
        assert_eq!(sketch.estimate(), 0.0);
        assert_eq!(sketch.num_retained(), 0);
        assert!(!sketch.is_estimation_mode());
    }

    #[test]
    fn test_exact_mode_estimate() {
        let sketch = CompactThetaSketch::from_parts(
            vec![100, 200, 300],
            MAX_THETA,
            default_seed_hash(),
            true,
            false,
        );
        assert!(!sketch.is_empty());
        assert_eq!(sketch.num_retained(), 3);
        assert_eq!(sketch.estimate(), 3.0);
        assert!(!sketch.is_estimation_mode());
    }

    #[test]
    fn test_estimation_mode_scales_by_theta() {
        let sketch = CompactThetaSketch::from_parts(
            vec![100, 200, 300],
            MAX_THETA / 2,
            default_seed_hash(),
            true,
            false,
        );
        assert!(sketch.is_estimation_mode());
        assert!((sketch.estimate() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_serialize_round_trip_all_modes() {
        let cases = [
            CompactThetaSketch::from_parts(vec![], MAX_THETA, default_seed_hash(), true, true),
            CompactThetaSketch::from_parts(
                vec![100, 200, 300, 400, 500],
                MAX_THETA,
                default_seed_hash(),
                true,
                false,
            ),
            CompactThetaSketch::from_parts(
                vec![100, 200, 300],
                MAX_THETA / 2,
                default_seed_hash(),
                false,
                false,
            ),
        ];

        for sketch in cases {
            let bytes = sketch.serialize();
            let restored = CompactThetaSketch::deserialize(&bytes).unwrap();

            assert_eq!(sketch.is_empty(), restored.is_empty());
            assert_eq!(sketch.is_ordered(), restored.is_ordered());
            assert_eq!(sketch.num_retained(), restored.num_retained());
            assert_eq!(sketch.theta64(), restored.theta64());
            assert_eq!(sketch.estimate(), restored.estimate());
            let a: Vec<u64> = sketch.iter().collect();
            let b: Vec<u64> = restored.iter().collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_deserialize_invalid_family() {
        let mut bytes = vec![
            1,
            THETA_SERIAL_VERSION,
            99,
            0,
            0,
            FLAG_IS_EMPTY | FLAG_IS_COMPACT | FLAG_IS_ORDERED,
        ];
        bytes.extend_from_slice(&default_seed_hash().to_le_bytes());

        assert!(CompactThetaSketch::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_deserialize_seed_mismatch() {
        let mut bytes = vec![
            1,
            THETA_SERIAL_VERSION,
            Family::THETA.id,
            0,
            0,
            FLAG_IS_EMPTY | FLAG_IS_COMPACT | FLAG_IS_ORDERED,
        ];
        bytes.extend_from_slice(&9999u16.to_le_bytes());

        assert!(CompactThetaSketch::deserialize(&bytes).is_err());
    }
}
