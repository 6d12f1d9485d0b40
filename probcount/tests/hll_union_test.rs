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

use googletest::assert_that;
use googletest::prelude::near;
use probcount::common::NumStdDev;
use probcount::hll::HllSketch;
use probcount::hll::HllType;
use probcount::hll::HllUnion;

#[test]
fn test_union_of_disjoint_sketches() {
    let mut left = HllSketch::new(11, HllType::Hll8);
    let mut right = HllSketch::new(11, HllType::Hll8);
    for i in 0..10_000u64 {
        left.update(i);
        right.update(i + 10_000);
    }

    let mut union = HllUnion::new(11);
    union.update(&left);
    union.update(&right);

    assert_that!(union.estimate(), near(20_000.0, 20_000.0 * 0.1));
}

#[test]
fn test_union_of_overlapping_sketches() {
    let mut left = HllSketch::new(11, HllType::Hll6);
    let mut right = HllSketch::new(11, HllType::Hll4);
    for i in 0..10_000u64 {
        left.update(i);
        right.update(i + 5_000);
    }

    let mut union = HllUnion::new(11);
    union.update(&left);
    union.update(&right);

    assert_that!(union.estimate(), near(15_000.0, 15_000.0 * 0.1));
}

#[test]
fn test_union_result_projections() {
    let mut sketch = HllSketch::new(10, HllType::Hll8);
    for i in 0..5_000u64 {
        sketch.update(i);
    }

    let mut union = HllUnion::new(10);
    union.update(&sketch);

    for tgt in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
        let result = union.get_result(tgt);
        assert_eq!(result.target_type(), tgt);
        assert_that!(result.estimate(), near(5_000.0, 5_000.0 * 0.15));
    }
}

#[test]
fn test_union_with_mismatched_lg_k_downsamples() {
    let mut fine = HllSketch::new(14, HllType::Hll8);
    let mut coarse = HllSketch::new(9, HllType::Hll8);
    for i in 0..20_000u64 {
        fine.update(i);
        coarse.update(i + 1_000_000);
    }

    let mut union = HllUnion::new(14);
    union.update(&fine);
    union.update(&coarse);
    assert_eq!(union.lg_config_k(), 9);

    assert_that!(union.estimate(), near(40_000.0, 40_000.0 * 0.2));
}

#[test]
fn test_union_of_coupon_mode_sketches_is_exact() {
    let mut a = HllSketch::new(12, HllType::Hll8);
    let mut b = HllSketch::new(12, HllType::Hll8);
    a.update("apple");
    a.update("banana");
    b.update("banana");
    b.update("cherry");

    let mut union = HllUnion::new(12);
    union.update(&a);
    union.update(&b);

    assert_eq!(union.estimate().round(), 3.0);
}

#[test]
fn test_union_bounds_bracket_estimate() {
    let mut a = HllSketch::new(10, HllType::Hll8);
    let mut b = HllSketch::new(10, HllType::Hll8);
    for i in 0..8_000u64 {
        a.update(i);
        b.update(i + 4_000);
    }

    let mut union = HllUnion::new(10);
    union.update(&a);
    union.update(&b);

    let estimate = union.estimate();
    for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert!(union.lower_bound(kappa) <= estimate);
        assert!(estimate <= union.upper_bound(kappa));
    }
}
