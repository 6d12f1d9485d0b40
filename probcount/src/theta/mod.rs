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

//! Theta sketches and set operations.
//!
//! A Theta sketch retains the set of hashes below a moving threshold
//! `theta`. Because every retained hash is a uniform sample of the input,
//! the retained count divided by `theta` (as a fraction of the hash range)
//! estimates the number of distinct inputs, and set operations on sketches
//! reduce to set operations on the retained hashes.
//!
//! - [`ThetaSketch`] is the updatable, heap-resident form.
//! - [`CompactThetaSketch`] is the immutable result and wire form.
//! - [`ThetaIntersection`] intersects any number of sketches; its hash table
//!   lives inside a caller-supplied [`Storage`](crate::memory::Storage)
//!   buffer whose capacity bounds the table size.
//!
//! Hashes are 64-bit and strictly positive; zero is the table's empty
//! sentinel and `MAX_THETA` is `i64::MAX`.

mod compact;
mod hash_ops;
mod hash_table;
mod intersection;
mod sketch;

pub use self::compact::CompactThetaSketch;
pub use self::intersection::ThetaIntersection;
pub use self::sketch::ThetaSketch;
pub use self::sketch::ThetaSketchBuilder;

/// Read access common to every Theta sketch form.
///
/// Set operations accept any implementor, so an intersection can consume
/// updatable and compact sketches interchangeably.
pub trait ThetaSketchView {
    /// Number of retained hashes.
    fn num_retained(&self) -> usize;

    /// The raw 64-bit theta threshold.
    fn theta64(&self) -> u64;

    /// Whether the source set is logically empty. This can be false even
    /// with zero retained hashes, when every update was screened by theta.
    fn is_empty(&self) -> bool;

    /// Whether [`iter`](Self::iter) yields hashes in ascending order.
    fn is_ordered(&self) -> bool;

    /// 16-bit digest of the hash seed, compared to detect incompatible inputs.
    fn seed_hash(&self) -> u16;

    /// Iterate over the retained hashes.
    fn iter(&self) -> impl Iterator<Item = u64> + '_;
}
