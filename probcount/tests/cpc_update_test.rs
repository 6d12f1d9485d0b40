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
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use probcount::common::NumStdDev;
use probcount::cpc::CpcSketch;
use probcount::cpc::Flavor;
use probcount::cpc::Format;

const RELATIVE_ERROR_FOR_LG_K_11: f64 = 0.02;

#[test]
fn test_empty() {
    let sketch = CpcSketch::new(11);
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.flavor(), Flavor::Empty);
    assert_eq!(sketch.format(), Format::EmptyHip);
    assert!(sketch.validate());
}

#[test]
fn test_one_value() {
    let mut sketch = CpcSketch::new(11);
    sketch.update(1);
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 1.0);
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
    assert!(sketch.validate());
}

#[test]
fn test_many_values() {
    let mut sketch = CpcSketch::new(11);
    for i in 0..10000 {
        sketch.update(i);
    }
    assert!(!sketch.is_empty());
    assert_that!(
        sketch.estimate(),
        near(10000.0, RELATIVE_ERROR_FOR_LG_K_11 * 10000.0)
    );
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
    assert!(sketch.validate());
}

#[test]
fn test_heterogeneous_item_kinds() {
    let mut sketch = CpcSketch::new(10);
    sketch.update(1i64);
    sketch.update_f64(2.0);
    sketch.update_str("3");
    sketch.update_bytes(&[4]);
    sketch.update_u16s(&[5]);
    sketch.update_i32s(&[6]);
    sketch.update_i64s(&[7]);

    let est = sketch.estimate();
    let lb = sketch.lower_bound(NumStdDev::Two);
    let ub = sketch.upper_bound(NumStdDev::Two);
    assert_that!(lb, ge(0.0));
    assert_that!(lb, le(est));
    assert_that!(est, le(ub));
    assert_eq!(sketch.flavor(), Flavor::Sparse);
    assert_eq!(sketch.format(), Format::SparseHybridHip);
    assert!(sketch.validate());
}

#[test]
fn test_corner_case_updates() {
    let mut sketch = CpcSketch::new(4);
    sketch.update_f64(0.0);
    sketch.update_f64(-0.0);
    assert_eq!(sketch.estimate().round(), 1.0);

    sketch.update_str("");
    assert_eq!(sketch.estimate().round(), 1.0);

    sketch.update_bytes(&[]);
    assert_eq!(sketch.estimate().round(), 1.0);

    sketch.update_u16s(&[]);
    assert_eq!(sketch.estimate().round(), 1.0);

    sketch.update_i32s(&[]);
    assert_eq!(sketch.estimate().round(), 1.0);

    sketch.update_i64s(&[]);
    assert_eq!(sketch.estimate().round(), 1.0);
}

#[test]
fn test_nan_payloads_collapse() {
    let mut sketch = CpcSketch::new(10);
    sketch.update_f64(f64::NAN);
    sketch.update_f64(-f64::NAN);
    sketch.update_f64(f64::from_bits(0x7ff8dead_beef0000));
    assert_eq!(sketch.estimate().round(), 1.0);
}

#[test]
fn test_bounds_at_every_flavor() {
    let mut sketch = CpcSketch::new(8);
    let checkpoints = [1u64, 20, 100, 500, 5_000, 50_000];
    let mut fed = 0u64;
    for &n in &checkpoints {
        while fed < n {
            sketch.update(fed);
            fed += 1;
        }
        let est = sketch.estimate();
        for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            assert_that!(est, ge(sketch.lower_bound(kappa)));
            assert_that!(est, le(sketch.upper_bound(kappa)));
        }
        assert!(sketch.validate(), "invalid at n={n}");
    }
    assert_eq!(sketch.flavor(), Flavor::Sliding);
}

#[test]
fn test_small_k_accuracy() {
    let mut sketch = CpcSketch::new(4);
    for i in 0..32u64 {
        sketch.update(i);
    }
    // K = 16 is very coarse; just require the right ballpark.
    assert_that!(sketch.estimate(), near(32.0, 32.0 * 0.5));
    assert!(sketch.validate());
}
