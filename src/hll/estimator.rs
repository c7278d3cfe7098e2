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

/// Running sums of inverse register powers used by the HLL estimator.
///
/// The sum `Σ 1/2^v` over all registers is split in two accumulators for numerical
/// precision:
/// - kxq0: sum of 1/2^v for v < 32
/// - kxq1: sum of 1/2^v for v >= 32
#[derive(Debug, Clone, PartialEq)]
pub(super) struct KxqEstimator {
    kxq0: f64,
    kxq1: f64,
}

impl KxqEstimator {
    /// Create an estimator for 2^lg_config_k registers that are all zero
    pub fn new(lg_config_k: u8) -> Self {
        let k = 1u32 << lg_config_k;
        Self {
            kxq0: k as f64,
            kxq1: 0.0,
        }
    }

    /// Rebuild the accumulators from a full register array
    pub fn from_registers(registers: &[u8]) -> Self {
        let mut kxq0 = 0.0;
        let mut kxq1 = 0.0;
        for &v in registers {
            if v < 32 {
                kxq0 += inv_pow2(v);
            } else {
                kxq1 += inv_pow2(v);
            }
        }
        Self { kxq0, kxq1 }
    }

    /// Update the accumulators when a register changes from old_value to new_value
    pub fn update(&mut self, old_value: u8, new_value: u8) {
        if old_value < 32 {
            self.kxq0 -= inv_pow2(old_value);
        } else {
            self.kxq1 -= inv_pow2(old_value);
        }

        if new_value < 32 {
            self.kxq0 += inv_pow2(new_value);
        } else {
            self.kxq1 += inv_pow2(new_value);
        }
    }

    /// Get raw HLL estimate using standard HyperLogLog formula
    ///
    /// Formula: correctionFactor * k^2 / (kxq0 + kxq1)
    fn raw_estimate(&self, lg_config_k: u8) -> f64 {
        let k = (1u32 << lg_config_k) as f64;

        let correction_factor = match lg_config_k {
            4 => 0.673,
            5 => 0.697,
            6 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / k),
        };

        (correction_factor * k * k) / (self.kxq0 + self.kxq1)
    }

    /// Cardinality estimate with linear counting in the small range.
    ///
    /// Returns exactly 0 when every register is still zero.
    pub fn estimate(&self, lg_config_k: u8, num_zeros: u32) -> f64 {
        let k = (1u32 << lg_config_k) as f64;
        if num_zeros as f64 >= k {
            return 0.0;
        }

        let raw = self.raw_estimate(lg_config_k);
        if raw <= 2.5 * k && num_zeros > 0 {
            k * (k / num_zeros as f64).ln()
        } else {
            raw
        }
    }
}

/// Compute 1 / 2^value (inverse power of 2)
#[inline]
fn inv_pow2(value: u8) -> f64 {
    if value == 0 {
        1.0
    } else if value <= 63 {
        1.0 / (1u64 << value) as f64
    } else {
        f64::exp2(-(value as f64))
    }
}
