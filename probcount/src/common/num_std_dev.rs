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

//! Standard deviation selector for confidence bounds.

// Gaussian tail probabilities 0.5 * (1 + erf(-kappa / sqrt(2))) for
// kappa = 0..3.
#[allow(clippy::excessive_precision)]
static DELTA_OF_NUM_STD_DEVS: [f64; 4] = [
    0.5000000000000000000,
    0.1586553191586026479,
    0.0227502618904135701,
    0.0013498126861731796,
];

/// Number of standard deviations used when computing the upper and lower
/// confidence bounds of a cardinality estimate.
///
/// Wider intervals give greater certainty that the true cardinality falls
/// inside the bounds: one standard deviation corresponds to roughly a 68%
/// confidence interval, two to 95%, three to 99.7%.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumStdDev {
    /// One standard deviation (~68% confidence interval)
    One = 1,
    /// Two standard deviations (~95% confidence interval)
    Two = 2,
    /// Three standard deviations (~99.7% confidence interval)
    Three = 3,
}

impl NumStdDev {
    /// Returns the one-sided tail probability (delta) for this confidence level.
    pub const fn tail_probability(&self) -> f64 {
        DELTA_OF_NUM_STD_DEVS[*self as usize]
    }

    /// Returns the number of standard deviations as an `u8`.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_probability_decreases() {
        assert!(NumStdDev::One.tail_probability() > NumStdDev::Two.tail_probability());
        assert!(NumStdDev::Two.tail_probability() > NumStdDev::Three.tail_probability());
    }

    #[test]
    fn test_as_u8() {
        assert_eq!(NumStdDev::One.as_u8(), 1);
        assert_eq!(NumStdDev::Two.as_u8(), 2);
        assert_eq!(NumStdDev::Three.as_u8(), 3);
    }
}
