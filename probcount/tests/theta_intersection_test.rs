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

use std::collections::HashSet;

use probcount::error::ErrorKind;
use probcount::theta::CompactThetaSketch;
use probcount::theta::ThetaIntersection;
use probcount::theta::ThetaSketch;

fn sketch_with_range(start: u64, count: u64) -> ThetaSketch {
    let mut sketch = ThetaSketch::builder().build();
    for i in 0..count {
        sketch.update(start + i);
    }
    sketch
}

#[test]
fn test_virgin_state_machine() {
    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    assert!(!intersection.has_result());

    let err = intersection.result(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let mut a = ThetaSketch::builder().build();
    a.update("x");
    intersection.update(Some(&a)).unwrap();
    assert!(intersection.has_result());
    assert_eq!(intersection.result(true).unwrap().estimate(), 1.0);
}

#[test]
fn test_null_then_result_is_empty_sketch() {
    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(None::<&CompactThetaSketch>).unwrap();

    let result = intersection.result(true).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.num_retained(), 0);
    assert_eq!(result.estimate(), 0.0);
}

#[test]
fn test_empty_input_is_terminal() {
    let empty = ThetaSketch::builder().build();
    let mut nonempty = ThetaSketch::builder().build();
    nonempty.update("x");

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&empty)).unwrap();
    intersection.update(Some(&nonempty)).unwrap();

    let result = intersection.result(true).unwrap();
    assert!(result.is_empty());
    assert_eq!(result.num_retained(), 0);
}

#[test]
fn test_exact_overlap_matches_ground_truth() {
    // A = {1..100}, B = {50..150} => |A ∩ B| = 51 in exact mode.
    let a = sketch_with_range(1, 100); // 1..=100
    let b = sketch_with_range(50, 101); // 50..=150

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a)).unwrap();
    intersection.update(Some(&b)).unwrap();

    let result = intersection.result(true).unwrap();
    assert!(!result.is_empty());
    assert_eq!(result.estimate(), 51.0);
}

#[test]
fn test_retained_set_is_hash_intersection_below_theta() {
    let a = sketch_with_range(0, 60_000);
    let b = sketch_with_range(30_000, 60_000);

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a)).unwrap();
    intersection.update(Some(&b)).unwrap();
    let result = intersection.result(true).unwrap();

    let theta = a.theta64().min(b.theta64());
    let hashes_a: HashSet<u64> = a.iter().collect();
    let hashes_b: HashSet<u64> = b.iter().collect();
    let expected: HashSet<u64> = hashes_a
        .intersection(&hashes_b)
        .copied()
        .filter(|&h| h < theta)
        .collect();

    let retained: HashSet<u64> = result.iter().collect();
    assert_eq!(retained, expected);
}

#[test]
fn test_estimation_mode_half_overlap() {
    let a = sketch_with_range(0, 100_000);
    let b = sketch_with_range(50_000, 100_000);

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a.compact(true))).unwrap();
    intersection.update(Some(&b.compact(true))).unwrap();

    let result = intersection.result(true).unwrap();
    assert!(result.is_estimation_mode());
    let estimate = result.estimate();
    assert!(
        (estimate - 50_000.0).abs() < 50_000.0 * 0.05,
        "estimate {estimate} too far from 50000"
    );
}

#[test]
fn test_disjoint_inputs_produce_zero() {
    let a = sketch_with_range(0, 10_000);
    let b = sketch_with_range(10_000, 10_000);

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a)).unwrap();
    intersection.update(Some(&b)).unwrap();

    let result = intersection.result(true).unwrap();
    assert_eq!(result.estimate(), 0.0);
    assert_eq!(result.num_retained(), 0);
}

#[test]
fn test_mixed_compact_and_updatable_inputs() {
    let a = sketch_with_range(0, 2_000);
    let b = sketch_with_range(1_000, 2_000);
    let c = sketch_with_range(1_500, 2_000);

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a.compact(true))).unwrap();
    intersection.update(Some(&b)).unwrap();
    intersection.update(Some(&c.compact(false))).unwrap();

    // 1500..2000 survives all three.
    let result = intersection.result(true).unwrap();
    assert_eq!(result.estimate(), 500.0);
}

#[test]
fn test_seed_mismatch_rejected_for_any_present_input() {
    let mut other_seed = ThetaSketch::builder().seed(2).build();
    other_seed.update("value");

    let mut intersection = ThetaIntersection::new(12, 1);
    let err = intersection.update(Some(&other_seed)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Even an empty sketch carries its seed hash and is checked.
    let empty_other_seed = ThetaSketch::builder().seed(2).build();
    let err = intersection.update(Some(&empty_other_seed)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // The failed updates left the operator virgin; only a genuinely missing
    // input bypasses the comparison.
    assert!(!intersection.has_result());
    intersection.update(None::<&CompactThetaSketch>).unwrap();
    assert!(intersection.result(true).unwrap().is_empty());
}

#[test]
fn test_ordered_input_early_stop_agrees_with_unordered() {
    let a = sketch_with_range(0, 80_000);
    let b = sketch_with_range(40_000, 80_000);

    let mut ordered = ThetaIntersection::new_with_default_seed(12);
    ordered.update(Some(&a.compact(true))).unwrap();
    ordered.update(Some(&b.compact(true))).unwrap();

    let mut unordered = ThetaIntersection::new_with_default_seed(12);
    unordered.update(Some(&a)).unwrap();
    unordered.update(Some(&b)).unwrap();

    let lhs: Vec<u64> = ordered.result(true).unwrap().iter().collect();
    let rhs: Vec<u64> = unordered.result(true).unwrap().iter().collect();
    assert_eq!(lhs, rhs);
}

#[test]
fn test_result_ordering_flag() {
    let a = sketch_with_range(0, 1_000);
    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a)).unwrap();

    let ordered = intersection.result(true).unwrap();
    assert!(ordered.is_ordered());
    let hashes: Vec<u64> = ordered.iter().collect();
    assert!(hashes.windows(2).all(|w| w[0] < w[1]));

    let unordered = intersection.result(false).unwrap();
    assert!(!unordered.is_ordered());
    assert_eq!(unordered.num_retained(), ordered.num_retained());
}

#[test]
fn test_theta_collapse_with_empty_after_result() {
    // A nonempty result collapses to zero when intersected with an empty
    // sketch, while theta keeps the minimum seen.
    let a = sketch_with_range(0, 100_000);
    let empty = ThetaSketch::builder().build();

    let mut intersection = ThetaIntersection::new_with_default_seed(12);
    intersection.update(Some(&a)).unwrap();
    assert!(intersection.result(true).unwrap().num_retained() > 0);

    intersection.update(Some(&empty)).unwrap();
    let result = intersection.result(true).unwrap();
    assert_eq!(result.num_retained(), 0);
    assert_eq!(result.theta64(), a.theta64());
}
