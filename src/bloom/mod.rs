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

//! Bloom filters over 64-bit element hashes.
//!
//! Every technical bin of the index is one filter. Bit positions come from double
//! hashing (Kirsch-Mitzenmacher) of a MurmurHash3 digest of the element hash.
//!
//! # Usage
//!
//! ```rust
//! use hibf_layout::bloom::BloomFilterBuilder;
//!
//! let mut filter = BloomFilterBuilder::with_size(4096, 4).build();
//! filter.insert_hash(0x9e37_79b9_7f4a_7c15);
//! assert!(filter.contains_hash(0x9e37_79b9_7f4a_7c15));
//! ```

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::hash_u64;

const PREAMBLE_LONGS_EMPTY: u8 = 3;
const PREAMBLE_LONGS_STANDARD: u8 = 4;
const FAMILY_ID: u8 = 21;
const SERIAL_VERSION: u8 = 1;
const EMPTY_FLAG_MASK: u8 = 1 << 2;

/// Smallest filter, in bits.
pub const MIN_NUM_BITS: u64 = 64;
/// Largest filter, in bits.
pub const MAX_NUM_BITS: u64 = (1u64 << 35) - 64;
/// Largest supported number of hash functions.
pub const MAX_NUM_HASHES: u16 = 100;

/// A Bloom filter for probabilistic set membership testing.
///
/// Inserted hashes are always reported present; absent hashes are reported present
/// with the filter's false positive probability.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    seed: u32,
    num_hashes: u16,
    capacity_bits: u64,
    num_bits_set: u64,
    /// Bits packed into words, `ceil(capacity_bits / 64)` long.
    bit_array: Vec<u64>,
}

impl BloomFilter {
    /// Tests whether `hash` was possibly inserted.
    pub fn contains_hash(&self, hash: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        let (h1, h2) = hash_u64(hash, self.seed);
        self.check_bits(h1, h2)
    }

    /// Inserts one element hash.
    pub fn insert_hash(&mut self, hash: u64) {
        let (h1, h2) = hash_u64(hash, self.seed);
        self.set_bits(h1, h2);
    }

    pub fn is_empty(&self) -> bool {
        self.num_bits_set == 0
    }

    /// Returns the number of bits set to 1.
    pub fn bits_used(&self) -> u64 {
        self.num_bits_set
    }

    /// Returns the total number of bits in the filter.
    pub fn capacity(&self) -> u64 {
        self.capacity_bits
    }

    pub fn num_hashes(&self) -> u16 {
        self.num_hashes
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Fraction of bits set.
    pub fn load_factor(&self) -> f64 {
        self.num_bits_set as f64 / self.capacity_bits as f64
    }

    /// Approximates the false positive probability from the fraction of set bits.
    pub fn estimated_fpp(&self) -> f64 {
        self.load_factor().powf(self.num_hashes as f64)
    }

    /// Serializes the filter to a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let is_empty = self.is_empty();
        let preamble_longs = if is_empty {
            PREAMBLE_LONGS_EMPTY
        } else {
            PREAMBLE_LONGS_STANDARD
        };

        let capacity = 8 * preamble_longs as usize
            + if is_empty {
                0
            } else {
                self.bit_array.len() * 8
            };
        let mut bytes = SketchBytes::with_capacity(capacity);

        bytes.write_u8(preamble_longs);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(FAMILY_ID);
        bytes.write_u8(0); // reserved
        bytes.write_u8(0); // reserved
        bytes.write_u8(if is_empty { EMPTY_FLAG_MASK } else { 0 });
        bytes.write_u16_le(self.num_hashes);

        bytes.write_u64_le(u64::from(self.seed));
        bytes.write_u64_le(self.capacity_bits);

        if !is_empty {
            bytes.write_u64_le(self.num_bits_set);
            for &word in &self.bit_array {
                bytes.write_u64_le(word);
            }
        }

        bytes.into_bytes()
    }

    /// Deserializes a filter written by [`BloomFilter::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let preamble_longs = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("preamble_longs"))?;
        let serial_version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        let family_id = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("family_id"))?;

        if family_id != FAMILY_ID {
            return Err(Error::invalid_family(FAMILY_ID, family_id, "BloomFilter"));
        }
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        if preamble_longs != PREAMBLE_LONGS_EMPTY && preamble_longs != PREAMBLE_LONGS_STANDARD {
            return Err(Error::malformed("invalid preamble longs")
                .with_context("preamble_longs", preamble_longs));
        }

        cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("reserved1"))?;
        cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("reserved2"))?;

        let flags = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("flags"))?;
        let is_empty = (flags & EMPTY_FLAG_MASK) != 0;

        let num_hashes = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("num_hashes"))?;
        let seed = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("seed"))?;
        let capacity_bits = cursor
            .read_u64_le()
            .map_err(|_| Error::insufficient_data("capacity_bits"))?;

        let seed = u32::try_from(seed)
            .map_err(|_| Error::malformed("seed out of range").with_context("seed", seed))?;
        if !(MIN_NUM_BITS..=MAX_NUM_BITS).contains(&capacity_bits) {
            return Err(Error::malformed("filter size out of range")
                .with_context("capacity_bits", capacity_bits));
        }
        if num_hashes == 0 || num_hashes > MAX_NUM_HASHES {
            return Err(Error::malformed("invalid number of hash functions")
                .with_context("num_hashes", num_hashes));
        }

        let num_words = capacity_bits.div_ceil(64) as usize;
        let num_bits_set;
        let bit_array = if is_empty {
            num_bits_set = 0;
            vec![0u64; num_words]
        } else {
            num_bits_set = cursor
                .read_u64_le()
                .map_err(|_| Error::insufficient_data("num_bits_set"))?;
            if cursor.remaining() < num_words * 8 {
                return Err(Error::insufficient_data("bit_array"));
            }
            let mut bit_array = vec![0u64; num_words];
            for word in &mut bit_array {
                *word = cursor
                    .read_u64_le()
                    .map_err(|_| Error::insufficient_data("bit_array"))?;
            }
            bit_array
        };

        Ok(BloomFilter {
            seed,
            num_hashes,
            capacity_bits,
            num_bits_set,
            bit_array,
        })
    }

    /// Checks if all k bits are set for the given hash values.
    fn check_bits(&self, h1: u64, h2: u64) -> bool {
        (0..self.num_hashes).all(|i| self.get_bit(self.compute_bit_index(h1, h2, i)))
    }

    fn set_bits(&mut self, h1: u64, h2: u64) {
        for i in 0..self.num_hashes {
            let bit_index = self.compute_bit_index(h1, h2, i);
            self.set_bit(bit_index);
        }
    }

    /// `(h1 + i * h2) mod capacity_bits`
    fn compute_bit_index(&self, h1: u64, h2: u64, i: u16) -> u64 {
        let hash = h1.wrapping_add(u64::from(i).wrapping_mul(h2));
        hash % self.capacity_bits
    }

    fn get_bit(&self, bit_index: u64) -> bool {
        let word_index = (bit_index / 64) as usize;
        let mask = 1u64 << (bit_index % 64);
        (self.bit_array[word_index] & mask) != 0
    }

    fn set_bit(&mut self, bit_index: u64) {
        let word_index = (bit_index / 64) as usize;
        let mask = 1u64 << (bit_index % 64);
        if (self.bit_array[word_index] & mask) == 0 {
            self.bit_array[word_index] |= mask;
            self.num_bits_set += 1;
        }
    }
}

/// Builder for [`BloomFilter`] instances of a given size.
#[derive(Debug, Clone)]
pub struct BloomFilterBuilder {
    num_bits: u64,
    num_hashes: u16,
    seed: u32,
}

impl BloomFilterBuilder {
    /// Creates a builder for a filter of `num_bits` bits and `num_hashes` hash functions.
    ///
    /// # Panics
    ///
    /// Panics if `num_bits` is not in `[MIN_NUM_BITS, MAX_NUM_BITS]` or `num_hashes`
    /// is not in `[1, MAX_NUM_HASHES]`.
    pub fn with_size(num_bits: u64, num_hashes: u16) -> Self {
        assert!(
            (MIN_NUM_BITS..=MAX_NUM_BITS).contains(&num_bits),
            "num_bits must be in [{MIN_NUM_BITS}, {MAX_NUM_BITS}], got {num_bits}"
        );
        assert!(
            (1..=MAX_NUM_HASHES).contains(&num_hashes),
            "num_hashes must be in [1, {MAX_NUM_HASHES}], got {num_hashes}"
        );
        BloomFilterBuilder {
            num_bits,
            num_hashes,
            seed: DEFAULT_UPDATE_SEED,
        }
    }

    /// Sets a custom hash seed (default: 9001).
    pub fn seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> BloomFilter {
        BloomFilter {
            seed: self.seed,
            num_hashes: self.num_hashes,
            capacity_bits: self.num_bits,
            num_bits_set: 0,
            bit_array: vec![0u64; self.num_bits.div_ceil(64) as usize],
        }
    }
}
