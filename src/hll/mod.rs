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

//! HyperLogLog sketch implementation for cardinality estimation.
//!
//! Every input set of the layout is summarised by one [`HllSketch`]. The layout engine
//! only ever asks two questions of these summaries: how many distinct hashes an input
//! holds, and how many distinct hashes the union of several inputs holds. The second
//! question is answered by [`HllUnion`] without materialising the union.
//!
//! # Registers
//!
//! Sketches keep one byte per register (the datasketches `Hll8` layout). With the
//! default `lg_k = 12` a sketch holds 4096 registers and estimates with a relative
//! standard error of about 1.6%.
//!
//! # Coupons
//!
//! A coupon is a 32-bit value encoding both a slot number (26 bits) and a value (6 bits).
//! The slot identifies which register to update, and the value represents the number of
//! leading zeros in the hash plus one.

mod estimator;
mod sketch;
mod union;

pub use sketch::HllSketch;
pub use union::HllUnion;

use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::hash_u64;

/// Smallest supported `lg_k`.
pub const MIN_LG_K: u8 = 4;
/// Largest supported `lg_k`.
pub const MAX_LG_K: u8 = 21;
/// `lg_k` used for input sketches unless configured otherwise.
pub const DEFAULT_LG_K: u8 = 12;

const KEY_BITS_26: u32 = 26;
const KEY_MASK_26: u32 = (1 << KEY_BITS_26) - 1;

/// Extract slot number (low 26 bits) from coupon
#[inline]
fn get_slot(coupon: u32) -> u32 {
    coupon & KEY_MASK_26
}

/// Extract value (upper 6 bits) from coupon
#[inline]
fn get_value(coupon: u32) -> u8 {
    (coupon >> KEY_BITS_26) as u8
}

/// Pack slot number and value into a coupon
///
/// Format: [value (6 bits) << 26] | [slot (26 bits)]
#[inline]
fn pack_coupon(slot: u32, value: u8) -> u32 {
    ((value as u32) << KEY_BITS_26) | (slot & KEY_MASK_26)
}

/// Turns one input hash value into a coupon.
fn coupon(hash: u64) -> u32 {
    let (lo, hi) = hash_u64(hash, DEFAULT_UPDATE_SEED);

    let addr26 = lo as u32 & KEY_MASK_26;
    let lz = hi.leading_zeros();
    let capped = lz.min(62);
    let value = capped + 1;

    pack_coupon(addr26, value as u8)
}

/// Estimates the cardinality of the union of `sketches`.
///
/// Returns 0 for an empty slice. The union is computed at the smallest `lg_k` among
/// the inputs.
pub fn estimate_union(sketches: &[&HllSketch]) -> f64 {
    let Some(lg_max_k) = sketches.iter().map(|s| s.lg_config_k()).max() else {
        return 0.0;
    };
    let mut union = HllUnion::new(lg_max_k);
    for sketch in sketches {
        union.update(sketch);
    }
    union.estimate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_coupon() {
        let slot = 12345u32;
        let value = 42u8;
        let coupon = pack_coupon(slot, value);
        assert_eq!(get_slot(coupon), slot);
        assert_eq!(get_value(coupon), value);
    }

    #[test]
    fn test_coupon_value_range() {
        for h in 0..10_000u64 {
            let value = get_value(coupon(h));
            assert!((1..=63).contains(&value), "value {value} out of range");
        }
    }

    #[test]
    fn test_estimate_union_of_nothing_is_zero() {
        assert_eq!(estimate_union(&[]), 0.0);
    }
}
