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

//! Probabilistic cardinality sketches.
//!
//! This crate provides three sketch families for estimating the number of
//! distinct items in a stream using a small, bounded amount of memory:
//!
//! - [`hll`] — HyperLogLog sketches with 4-, 6-, and 8-bit register
//!   packings, automatic `LIST -> SET -> HLL` mode promotion, and a HIP
//!   accumulator for improved accuracy.
//! - [`theta`] — Theta sketches with set operations. The
//!   [`ThetaIntersection`](theta::ThetaIntersection) operator keeps its hash
//!   table embedded in a caller-supplied [`memory::Storage`] buffer.
//! - [`cpc`] — Compressed Probabilistic Counting sketches (the FM85
//!   algorithm) with union support across differing `lg_k` configurations.
//!
//! All families hash their input with the same 128-bit MurmurHash3 and a
//! configurable seed. Sketches built with different seeds cannot be combined;
//! set operations verify a 16-bit seed hash and fail on mismatch.
//!
//! Sketch instances are single-threaded: no method is re-entrant and no
//! method blocks. Callers that share a sketch across threads must serialize
//! access themselves.

pub mod codec;
pub mod common;
pub mod cpc;
pub mod error;
pub mod hll;
pub mod memory;
pub mod theta;

mod hash;
