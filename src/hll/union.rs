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

//! HyperLogLog union for combining the sketches of several inputs.
//!
//! The union maintains an internal "gadget" sketch whose registers are the
//! element-wise maximum of every sketch merged so far. Sketches with a larger `lg_k`
//! than the gadget are folded down; a sketch with a smaller `lg_k` shrinks the gadget
//! first, so the result always lives at the smallest precision seen.
//!
//! # Example
//!
//! ```
//! use hibf_layout::hll::{HllSketch, HllUnion};
//!
//! let a = HllSketch::from_hashes(12, 0..1_000u64);
//! let b = HllSketch::from_hashes(12, 500..1_500u64);
//!
//! let mut union = HllUnion::new(12);
//! union.update(&a);
//! union.update(&b);
//! assert!((union.estimate() - 1_500.0).abs() < 100.0);
//! ```

use crate::hll::HllSketch;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;

/// An HLL Union for combining multiple HLL sketches.
#[derive(Debug, Clone)]
pub struct HllUnion {
    /// Maximum lg_k that this union can handle
    lg_max_k: u8,
    /// Internal sketch that accumulates the union
    gadget: HllSketch,
}

impl HllUnion {
    /// Create a new HLL Union
    ///
    /// # Panics
    ///
    /// Panics if `lg_max_k` is not in the range [4, 21].
    pub fn new(lg_max_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_max_k),
            "lg_max_k must be in [4, 21], got {}",
            lg_max_k
        );
        Self {
            lg_max_k,
            gadget: HllSketch::new(lg_max_k),
        }
    }

    /// Update the union with another sketch
    pub fn update(&mut self, sketch: &HllSketch) {
        if sketch.is_empty() {
            return;
        }

        let src_lg_k = sketch.lg_config_k();
        let dst_lg_k = self.gadget.lg_config_k();

        if src_lg_k < dst_lg_k {
            // Source has lower precision: the gadget must be downsized first
            let folded = fold_registers(self.gadget.registers(), src_lg_k);
            self.gadget = HllSketch::from_registers(src_lg_k, folded);
        }

        let mask = (1usize << self.gadget.lg_config_k()) - 1;
        for (slot, &value) in sketch.registers().iter().enumerate() {
            if value > 0 {
                self.gadget.raise(slot & mask, value);
            }
        }
    }

    /// Get the union result as a new sketch
    pub fn get_result(&self) -> HllSketch {
        self.gadget.clone()
    }

    /// Reset the union to its initial empty state
    pub fn reset(&mut self) {
        self.gadget = HllSketch::new(self.lg_max_k);
    }

    /// Check if the union is empty (no non-empty sketches have been added)
    pub fn is_empty(&self) -> bool {
        self.gadget.is_empty()
    }

    /// Get the current cardinality estimate of the union
    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }
}

/// Folds a register array down to `2^lg_target` registers by slot masking.
fn fold_registers(registers: &[u8], lg_target: u8) -> Box<[u8]> {
    let mask = (1usize << lg_target) - 1;
    let mut folded = vec![0u8; 1 << lg_target];
    for (slot, &value) in registers.iter().enumerate() {
        let dst = &mut folded[slot & mask];
        if value > *dst {
            *dst = value;
        }
    }
    folded.into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_of_disjoint_sets() {
        let a = HllSketch::from_hashes(12, 0..2_000u64);
        let b = HllSketch::from_hashes(12, 2_000..4_000u64);
        let mut union = HllUnion::new(12);
        union.update(&a);
        union.update(&b);
        let estimate = union.estimate();
        assert!((estimate - 4_000.0).abs() < 300.0, "estimate {estimate}");
    }

    #[test]
    fn test_union_with_itself_is_idempotent() {
        let a = HllSketch::from_hashes(12, 0..3_000u64);
        let mut union = HllUnion::new(12);
        union.update(&a);
        union.update(&a);
        assert_eq!(union.get_result(), a);
    }

    #[test]
    fn test_empty_sketch_is_ignored() {
        let mut union = HllUnion::new(10);
        union.update(&HllSketch::new(6));
        assert!(union.is_empty());
        assert_eq!(union.get_result().lg_config_k(), 10);
    }

    #[test]
    fn test_lower_precision_source_downsizes_gadget() {
        let fine = HllSketch::from_hashes(12, 0..1_000u64);
        let coarse = HllSketch::from_hashes(8, 1_000..2_000u64);
        let mut union = HllUnion::new(12);
        union.update(&fine);
        union.update(&coarse);
        assert_eq!(union.get_result().lg_config_k(), 8);
        let estimate = union.estimate();
        assert!((estimate - 2_000.0).abs() < 400.0, "estimate {estimate}");
    }

    #[test]
    fn test_reset() {
        let mut union = HllUnion::new(12);
        union.update(&HllSketch::from_hashes(12, 0..100u64));
        assert!(!union.is_empty());
        union.reset();
        assert!(union.is_empty());
        assert_eq!(union.estimate(), 0.0);
    }

    #[test]
    fn test_fold_registers_takes_maximum() {
        let registers = [1u8, 7, 3, 2, 5, 0, 9, 4];
        assert_eq!(&*fold_registers(&registers, 2), &[5, 7, 9, 4]);
    }
}
