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

//! Confidence bounds for Theta sketches.
//!
//! A Theta sketch retains each distinct hash independently with probability
//! `theta`, so the retained count is binomially distributed around
//! `n * theta`. The bounds below invert that distribution with a normal
//! approximation, which is accurate for the retained counts a sketch in
//! estimation mode actually has (hundreds to thousands).

use crate::common::NumStdDev;
use crate::error::Error;

fn check_theta(theta: f64) -> Result<(), Error> {
    if !(theta > 0.0 && theta <= 1.0) {
        return Err(Error::invalid_argument(format!(
            "theta must be in (0, 1], got {theta}"
        )));
    }
    Ok(())
}

/// Approximate lower bound on the number of distinct items, given
/// `num_samples` retained hashes at sampling probability `theta`.
pub(crate) fn lower_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
) -> Result<f64, Error> {
    check_theta(theta)?;
    if num_samples == 0 {
        return Ok(0.0);
    }

    let n = num_samples as f64;
    let estimate = n / theta;
    let std_dev = (n * (1.0 - theta)).sqrt() / theta;
    let bound = estimate - (num_std_dev.as_u8() as f64) * std_dev;

    // The true count can never be below the retained count.
    Ok(bound.max(n))
}

/// Approximate upper bound on the number of distinct items, given
/// `num_samples` retained hashes at sampling probability `theta`.
pub(crate) fn upper_bound(
    num_samples: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    empty: bool,
) -> Result<f64, Error> {
    check_theta(theta)?;
    if empty {
        return Ok(0.0);
    }
    if num_samples == 0 {
        // Zero retained but not empty: every update was screened by theta.
        // The exact one-sided bound is the n where (1 - theta)^n equals the
        // tail probability.
        let delta = num_std_dev.tail_probability();
        return Ok((-delta.ln() / theta).ceil());
    }

    let n = num_samples as f64;
    let estimate = n / theta;
    let std_dev = (n * (1.0 - theta)).sqrt() / theta;
    Ok((estimate + (num_std_dev.as_u8() as f64) * std_dev).ceil())
}
