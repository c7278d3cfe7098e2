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

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hll::KEY_MASK_26;
use crate::hll::MAX_LG_K;
use crate::hll::MIN_LG_K;
use crate::hll::coupon;
use crate::hll::estimator::KxqEstimator;
use crate::hll::get_slot;
use crate::hll::get_value;

const HLL_FAMILY_ID: u8 = 7;
const SERIAL_VERSION: u8 = 1;
const PREAMBLE_BYTES: usize = 8;
const EMPTY_FLAG_MASK: u8 = 1 << 2;

/// A HyperLogLog sketch over the hash values of one input set.
#[derive(Debug, Clone)]
pub struct HllSketch {
    lg_config_k: u8,
    registers: Box<[u8]>,
    num_zeros: u32,
    estimator: KxqEstimator,
}

impl PartialEq for HllSketch {
    // The accumulators depend on update order; registers alone define the sketch.
    fn eq(&self, other: &Self) -> bool {
        self.lg_config_k == other.lg_config_k && self.registers == other.registers
    }
}

impl HllSketch {
    /// Creates an empty sketch with `2^lg_config_k` registers.
    ///
    /// # Panics
    ///
    /// Panics if `lg_config_k` is not in `[4, 21]`.
    pub fn new(lg_config_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_config_k),
            "lg_config_k must be in [4, 21], got {}",
            lg_config_k
        );
        let k = 1u32 << lg_config_k;
        Self {
            lg_config_k,
            registers: vec![0u8; k as usize].into_boxed_slice(),
            num_zeros: k,
            estimator: KxqEstimator::new(lg_config_k),
        }
    }

    /// Builds a sketch from an iterator of hash values.
    pub fn from_hashes(lg_config_k: u8, hashes: impl IntoIterator<Item = u64>) -> Self {
        let mut sketch = Self::new(lg_config_k);
        for hash in hashes {
            sketch.update_hash(hash);
        }
        sketch
    }

    /// Rebuilds a sketch around an existing register array.
    pub(super) fn from_registers(lg_config_k: u8, registers: Box<[u8]>) -> Self {
        let num_zeros = registers.iter().filter(|&&v| v == 0).count() as u32;
        let estimator = KxqEstimator::from_registers(&registers);
        Self {
            lg_config_k,
            registers,
            num_zeros,
            estimator,
        }
    }

    pub fn lg_config_k(&self) -> u8 {
        self.lg_config_k
    }

    /// Returns true if no value has been added.
    pub fn is_empty(&self) -> bool {
        self.num_zeros as usize == self.registers.len()
    }

    /// Adds one hash value of the input set.
    pub fn update_hash(&mut self, hash: u64) {
        self.update_coupon(coupon(hash));
    }

    fn update_coupon(&mut self, coupon: u32) {
        let mask = (1u32 << self.lg_config_k) - 1;
        let slot = get_slot(coupon) & mask & KEY_MASK_26;
        self.raise(slot as usize, get_value(coupon));
    }

    /// Raises one register to `value` if it is currently lower.
    pub(super) fn raise(&mut self, slot: usize, value: u8) {
        let old_value = self.registers[slot];
        if value > old_value {
            self.estimator.update(old_value, value);
            self.registers[slot] = value;
            if old_value == 0 {
                self.num_zeros -= 1;
            }
        }
    }

    pub(super) fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Estimated number of distinct hash values added to this sketch.
    pub fn estimate(&self) -> f64 {
        self.estimator.estimate(self.lg_config_k, self.num_zeros)
    }

    /// Serializes the sketch.
    ///
    /// Layout: `[preamble (8 bytes)] [registers (k bytes, omitted when empty)]`. The
    /// preamble holds the serial version, family id, `lg_k` and flags.
    pub fn serialize(&self) -> Vec<u8> {
        let empty = self.is_empty();
        let capacity = PREAMBLE_BYTES + if empty { 0 } else { self.registers.len() };
        let mut bytes = SketchBytes::with_capacity(capacity);

        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(HLL_FAMILY_ID);
        bytes.write_u8(self.lg_config_k);
        bytes.write_u8(if empty { EMPTY_FLAG_MASK } else { 0 });
        bytes.write_u32_le(self.registers.len() as u32 - self.num_zeros);

        if !empty {
            bytes.write(&self.registers);
        }
        bytes.into_bytes()
    }

    /// Deserializes a sketch written by [`HllSketch::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let serial_version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        let family_id = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("family_id"))?;
        let lg_config_k = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("lg_config_k"))?;
        let flags = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("flags"))?;
        let num_hit = cursor
            .read_u32_le()
            .map_err(|_| Error::insufficient_data("num_hit"))?;

        if family_id != HLL_FAMILY_ID {
            return Err(Error::invalid_family(HLL_FAMILY_ID, family_id, "HLL"));
        }
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_config_k) {
            return Err(Error::malformed(format!(
                "invalid lg_k: {lg_config_k}, must be in [{MIN_LG_K}; {MAX_LG_K}]"
            )));
        }

        if flags & EMPTY_FLAG_MASK != 0 {
            return Ok(Self::new(lg_config_k));
        }

        let k = 1usize << lg_config_k;
        let mut registers = vec![0u8; k].into_boxed_slice();
        cursor
            .read_exact(&mut registers)
            .map_err(|_| Error::insufficient_data("registers"))?;
        if registers.iter().any(|&v| v > 63) {
            return Err(Error::malformed("register value exceeds 63"));
        }

        let sketch = Self::from_registers(lg_config_k, registers);
        if sketch.registers.len() as u32 - sketch.num_zeros != num_hit {
            return Err(Error::malformed(format!(
                "register count mismatch: header says {num_hit} hit registers"
            ))
            .with_context("actual", sketch.registers.len() as u32 - sketch.num_zeros));
        }
        Ok(sketch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hll::pack_coupon;

    #[test]
    fn test_empty_sketch() {
        let sketch = HllSketch::new(12);
        assert!(sketch.is_empty());
        assert_eq!(sketch.estimate(), 0.0);
        assert_eq!(sketch.registers().len(), 4096);
    }

    #[test]
    fn test_update_keeps_maximum() {
        let mut sketch = HllSketch::new(4);
        sketch.update_coupon(pack_coupon(0, 5));
        sketch.update_coupon(pack_coupon(0, 3));
        assert_eq!(sketch.registers()[0], 5);
        sketch.update_coupon(pack_coupon(0, 42));
        assert_eq!(sketch.registers()[0], 42);
        assert_eq!(sketch.num_zeros, 15);
    }

    #[test]
    fn test_slot_is_masked_to_lg_k() {
        let mut sketch = HllSketch::new(4);
        sketch.update_coupon(pack_coupon(0x31, 2));
        assert_eq!(sketch.registers()[1], 2);
    }

    #[test]
    fn test_duplicates_do_not_inflate() {
        let once = HllSketch::from_hashes(12, 0..500u64);
        let twice = HllSketch::from_hashes(12, (0..500u64).chain(0..500u64));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_serialize_roundtrip_keeps_registers() {
        let sketch = HllSketch::from_hashes(10, (0..5_000u64).map(|i| i * 7919));
        let bytes = sketch.serialize();
        assert_eq!(bytes.len(), PREAMBLE_BYTES + 1024);
        let restored = HllSketch::deserialize(&bytes).unwrap();
        assert_eq!(restored, sketch);
        let drift = (restored.estimate() - sketch.estimate()).abs();
        assert!(drift < 1e-6 * sketch.estimate(), "drift {drift}");
    }

    #[test]
    fn test_serialize_empty_is_preamble_only() {
        let bytes = HllSketch::new(12).serialize();
        assert_eq!(bytes.len(), PREAMBLE_BYTES);
        assert!(HllSketch::deserialize(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_deserialize_rejects_bad_family() {
        let mut bytes = HllSketch::from_hashes(8, 0..10u64).serialize();
        bytes[1] = 3;
        let err = HllSketch::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
        assert!(err.message().contains("invalid family"));
    }

    #[test]
    fn test_deserialize_rejects_truncated_registers() {
        let bytes = HllSketch::from_hashes(8, 0..10u64).serialize();
        let err = HllSketch::deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.message().contains("registers"));
    }

    #[test]
    #[should_panic(expected = "lg_config_k must be in [4, 21]")]
    fn test_invalid_lg_k_low() {
        HllSketch::new(3);
    }
}
