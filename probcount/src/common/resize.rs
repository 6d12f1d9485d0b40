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

/// Controls how fast a sketch's internal hash table grows when more space is
/// required.
///
/// The resize factor is a speed versus memory tradeoff. A sketch configured
/// with a factor greater than `X1` starts out with the smallest hash table
/// that is a submultiple of the target nominal size, and multiplies the table
/// size by the factor on each resize until the target is reached. `X1`
/// disables resizing: the sketch is allocated at full size up front.
///
/// # Examples
///
/// ```
/// # use probcount::common::ResizeFactor;
/// assert_eq!(ResizeFactor::X4.value(), 4);
/// assert_eq!(ResizeFactor::X4.lg_value(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFactor {
    /// Do not resize. The sketch is configured at full size.
    X1,
    /// Resize by factor of 2
    X2,
    /// Resize by factor of 4
    X4,
    /// Resize by factor of 8
    X8,
}

impl ResizeFactor {
    /// Returns the Log-base 2 of the resize factor.
    pub fn lg_value(self) -> u8 {
        match self {
            ResizeFactor::X1 => 0,
            ResizeFactor::X2 => 1,
            ResizeFactor::X4 => 2,
            ResizeFactor::X8 => 3,
        }
    }

    /// Returns the resize factor.
    pub fn value(self) -> usize {
        1 << self.lg_value()
    }
}
