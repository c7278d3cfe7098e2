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

//! MurmurHash3 helpers for re-hashing input hash values.
//!
//! Inputs arrive as already-hashed `u64` values. Both the HyperLogLog coupons and the
//! Bloom filter bit positions re-hash those values with MurmurHash3 x64/128 so that a
//! poorly mixed upstream hash does not bias register or bit selection.

/// Seed used for HLL coupons, matching the datasketches default update seed.
pub const DEFAULT_UPDATE_SEED: u32 = 9001;

/// Hashes one 64-bit value into a 128-bit MurmurHash3 digest `(h1, h2)`.
#[inline]
pub fn hash_u64(value: u64, seed: u32) -> (u64, u64) {
    mur3::murmurhash3_x64_128(&value.to_le_bytes(), seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_u64(42, DEFAULT_UPDATE_SEED), hash_u64(42, DEFAULT_UPDATE_SEED));
    }

    #[test]
    fn test_seed_and_value_change_digest() {
        let base = hash_u64(42, DEFAULT_UPDATE_SEED);
        assert_ne!(base, hash_u64(43, DEFAULT_UPDATE_SEED));
        assert_ne!(base, hash_u64(42, 0));
    }

    #[test]
    fn test_matches_byte_level_murmur() {
        let value = 0x0123_4567_89ab_cdefu64;
        let expected = mur3::murmurhash3_x64_128(&value.to_le_bytes(), 7);
        assert_eq!(hash_u64(value, 7), expected);
    }
}
