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

use probcount::common::NumStdDev;
use probcount::hll::HllSketch;
use probcount::hll::HllType;
use rand::seq::SliceRandom;

#[test]
fn test_basic_update() {
    let mut sketch = HllSketch::new(12, HllType::Hll8);

    assert_eq!(sketch.estimate(), 0.0);
    assert!(sketch.is_empty());

    for i in 0..100 {
        sketch.update(i);
    }

    assert!(!sketch.is_empty());
    let estimate = sketch.estimate();
    assert!(
        (estimate - 100.0).abs() < 20.0,
        "estimate should be reasonably close to 100, got {estimate}"
    );
}

#[test]
fn test_duplicates_do_not_inflate() {
    let mut sketch = HllSketch::new(12, HllType::Hll8);

    for _ in 0..10 {
        for i in 0..100 {
            sketch.update(i);
        }
    }

    let estimate = sketch.estimate();
    assert!(
        (estimate - 100.0).abs() < 20.0,
        "duplicates should not inflate the estimate, got {estimate}"
    );
}

#[test]
fn test_idempotent_state() {
    // Replaying the same inputs leaves the sketch bit-for-bit unchanged.
    let mut sketch = HllSketch::new(10, HllType::Hll8);
    for i in 0..5000u32 {
        sketch.update(i);
    }
    let before = sketch.serialize();

    for i in 0..5000u32 {
        sketch.update(i);
    }
    assert_eq!(before, sketch.serialize());
}

#[test]
fn test_register_state_is_order_independent() {
    let mut values: Vec<u32> = (0..3000).collect();

    let mut in_order = HllSketch::new(10, HllType::Hll8);
    for &v in &values {
        in_order.update(v);
    }

    values.shuffle(&mut rand::rng());
    let mut shuffled = HllSketch::new(10, HllType::Hll8);
    for &v in &values {
        shuffled.update(v);
    }

    // The register array (the payload after the 40-byte preamble) must be
    // identical regardless of update order. The HIP doubles in the preamble
    // depend on the update history, so only the estimates are compared
    // approximately.
    let bytes_in_order = in_order.serialize();
    let bytes_shuffled = shuffled.serialize();
    assert_eq!(
        bytes_in_order[40..],
        bytes_shuffled[40..],
        "register arrays differ between update orders"
    );

    let diff = (in_order.estimate() - shuffled.estimate()).abs();
    assert!(diff < in_order.estimate() * 0.05);
}

#[test]
fn test_full_promotion_chain_all_types() {
    for hll_type in [HllType::Hll4, HllType::Hll6, HllType::Hll8] {
        let mut sketch = HllSketch::new(10, hll_type);
        for i in 0..2000 {
            sketch.update(i);
        }
        let estimate = sketch.estimate();
        assert!(
            (estimate - 2000.0).abs() < 300.0,
            "{hll_type:?}: estimate {estimate} too far from 2000"
        );
    }
}

#[test]
fn test_mixed_input_types() {
    let mut sketch = HllSketch::new(10, HllType::Hll8);

    sketch.update(42i32);
    sketch.update("hello");
    sketch.update(100u64);
    sketch.update(true);
    sketch.update(vec![1, 2, 3]);

    assert!(sketch.estimate() >= 5.0);
}

#[test]
fn test_bounds_bracket_estimate() {
    for n in [10u32, 1000, 50_000] {
        let mut sketch = HllSketch::new(11, HllType::Hll4);
        for i in 0..n {
            sketch.update(i);
        }

        let estimate = sketch.estimate();
        for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            let lb = sketch.lower_bound(kappa);
            let ub = sketch.upper_bound(kappa);
            assert!(lb >= 0.0);
            assert!(lb <= estimate, "n={n}: lb {lb} > estimate {estimate}");
            assert!(estimate <= ub, "n={n}: estimate {estimate} > ub {ub}");
        }
    }
}

#[test]
fn test_hll4_exception_path_under_load() {
    // Enough distinct values that some register exceeds the 4-bit window
    // and the auxiliary map is exercised, then read back through estimate.
    let mut sketch = HllSketch::new(7, HllType::Hll4);
    for i in 0..1_000_000u32 {
        sketch.update(i);
    }

    let estimate = sketch.estimate();
    assert!(
        (estimate - 1_000_000.0).abs() < 0.3 * 1_000_000.0,
        "estimate {estimate} too far from 1e6"
    );
}
