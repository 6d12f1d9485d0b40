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

//! The fixed preamble shared by Theta sketch and set operation images.
//!
//! Byte layout (little-endian):
//!
//! ```text
//! byte  0      preamble_longs
//! byte  1      ser_ver
//! byte  2      family_id
//! byte  3      lg_nom_longs
//! byte  4      lg_arr_longs
//! byte  5      flags
//! bytes 6-7    seed_hash (u16)
//! bytes 8-11   retained_entries (i32; -1 encodes "no result yet")
//! bytes 12-15  p (f32 sampling probability)
//! bytes 16-23  theta_long (u64)
//! ```
//!
//! The flags byte: bit 0 big-endian (always 0 here and rejected if set),
//! bit 1 read-only, bit 2 empty, bit 3 compact, bit 4 ordered, bit 5
//! single-item.

use crate::error::Error;
use crate::memory::Storage;

// Byte offsets of the preamble fields.
pub(crate) const PREAMBLE_LONGS_BYTE: usize = 0;
pub(crate) const SER_VER_BYTE: usize = 1;
pub(crate) const FAMILY_BYTE: usize = 2;
pub(crate) const LG_NOM_LONGS_BYTE: usize = 3;
pub(crate) const LG_ARR_LONGS_BYTE: usize = 4;
pub(crate) const FLAGS_BYTE: usize = 5;
pub(crate) const SEED_HASH_SHORT: usize = 6;
pub(crate) const RETAINED_ENTRIES_INT: usize = 8;
pub(crate) const P_FLOAT: usize = 12;
pub(crate) const THETA_LONG: usize = 16;

// Flags byte bit masks.
pub(crate) const FLAG_IS_BIG_ENDIAN: u8 = 1 << 0;
pub(crate) const FLAG_IS_READ_ONLY: u8 = 1 << 1;
pub(crate) const FLAG_IS_EMPTY: u8 = 1 << 2;
pub(crate) const FLAG_IS_COMPACT: u8 = 1 << 3;
pub(crate) const FLAG_IS_ORDERED: u8 = 1 << 4;
pub(crate) const FLAG_HAS_SINGLE_ITEM: u8 = 1 << 5;

/// Current Theta serialization version.
pub(crate) const THETA_SERIAL_VERSION: u8 = 3;

/// Preamble size for empty sketch (8 bytes = 1 long).
pub(crate) const PREAMBLE_LONGS_EMPTY: u8 = 1;

/// Preamble size for exact/single-item sketch (16 bytes = 2 longs).
pub(crate) const PREAMBLE_LONGS_EXACT: u8 = 2;

/// Preamble size for estimation mode sketch (24 bytes = 3 longs).
pub(crate) const PREAMBLE_LONGS_ESTIMATION: u8 = 3;

/// Fixed preamble size of set operation images (24 bytes = 3 longs).
pub(crate) const CONST_PREAMBLE_LONGS: u8 = 3;

/// Size of a single hash entry in bytes (u64).
pub(crate) const HASH_SIZE_BYTES: usize = 8;

/// In-memory form of the fixed 3-long preamble used by set operations.
///
/// [`read`](Self::read) performs the parse-time validation for a given
/// family; [`write`](Self::write) lays the fields down into a [`Storage`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThetaPreamble {
    pub preamble_longs: u8,
    pub ser_ver: u8,
    pub family_id: u8,
    pub lg_nom_longs: u8,
    pub lg_arr_longs: u8,
    pub flags: u8,
    pub seed_hash: u16,
    pub retained_entries: i32,
    pub p: f32,
    pub theta_long: u64,
}

impl ThetaPreamble {
    pub fn read(mem: &Storage) -> Result<Self, Error> {
        if mem.capacity() < (CONST_PREAMBLE_LONGS as usize) * 8 {
            return Err(Error::insufficient_data("preamble"));
        }
        Ok(Self {
            preamble_longs: mem.get_u8(PREAMBLE_LONGS_BYTE) & 0x3F,
            ser_ver: mem.get_u8(SER_VER_BYTE),
            family_id: mem.get_u8(FAMILY_BYTE),
            lg_nom_longs: mem.get_u8(LG_NOM_LONGS_BYTE),
            lg_arr_longs: mem.get_u8(LG_ARR_LONGS_BYTE),
            flags: mem.get_u8(FLAGS_BYTE),
            seed_hash: mem.get_u16(SEED_HASH_SHORT),
            retained_entries: mem.get_i32(RETAINED_ENTRIES_INT),
            p: mem.get_f32(P_FLOAT),
            theta_long: mem.get_u64(THETA_LONG),
        })
    }

    pub fn write(&self, mem: &mut Storage) {
        mem.put_u8(PREAMBLE_LONGS_BYTE, self.preamble_longs);
        mem.put_u8(SER_VER_BYTE, self.ser_ver);
        mem.put_u8(FAMILY_BYTE, self.family_id);
        mem.put_u8(LG_NOM_LONGS_BYTE, self.lg_nom_longs);
        mem.put_u8(LG_ARR_LONGS_BYTE, self.lg_arr_longs);
        mem.put_u8(FLAGS_BYTE, self.flags);
        mem.put_u16(SEED_HASH_SHORT, self.seed_hash);
        mem.put_i32(RETAINED_ENTRIES_INT, self.retained_entries);
        mem.put_f32(P_FLOAT, self.p);
        mem.put_u64(THETA_LONG, self.theta_long);
    }

    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_IS_EMPTY != 0
    }

    /// Validation common to all set operation images.
    pub fn validate(&self, family: &crate::codec::family::Family) -> Result<(), Error> {
        if self.flags & FLAG_IS_BIG_ENDIAN != 0 {
            return Err(Error::malformed("big-endian images are not supported"));
        }
        if self.preamble_longs != CONST_PREAMBLE_LONGS {
            return Err(Error::malformed(format!(
                "preamble longs must be {CONST_PREAMBLE_LONGS}, got {}",
                self.preamble_longs
            )));
        }
        if self.ser_ver != THETA_SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                THETA_SERIAL_VERSION,
                self.ser_ver,
            ));
        }
        family.validate_id(self.family_id)?;
        if self.is_empty() && self.retained_entries != 0 {
            return Err(Error::malformed(format!(
                "empty flag inconsistent with retained entries: {}",
                self.retained_entries
            )));
        }
        Ok(())
    }
}
