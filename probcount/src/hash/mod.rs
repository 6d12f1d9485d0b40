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

use std::hash::Hasher;

mod murmurhash;

pub(crate) use self::murmurhash::MurmurHash3X64128;

/// The seed 9001 used in the sketch update methods is a prime number that was
/// chosen very early on in experimental testing.
///
/// In order to perform set operations on two sketches it is critical that the
/// same hash function and seed are used for both sketches, otherwise the
/// assumed 1:1 relationship between the original source key value and the
/// hashed bit string would be violated. Once you have developed a history of
/// stored sketches you are stuck with it.
pub(crate) const DEFAULT_UPDATE_SEED: u64 = 9001;

/// Computes the 16-bit seed hash stored in sketch images and compared on
/// set operations to detect incompatible inputs.
///
/// # Panics
///
/// Panics if the seed hashes to zero, since zero is reserved to mean "no
/// seed hash present" in legacy images. The default seed does not.
pub(crate) fn compute_seed_hash(seed: u64) -> u16 {
    let mut hasher = MurmurHash3X64128::with_seed(0);
    hasher.write(&seed.to_le_bytes());
    let (h1, _) = hasher.finish128();
    let seed_hash = (h1 & 0xFFFF) as u16;
    assert!(
        seed_hash != 0,
        "the provided seed {seed} hashes to zero; use a different seed"
    );
    seed_hash
}
