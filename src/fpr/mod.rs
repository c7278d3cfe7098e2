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

//! False-positive-rate model for sizing membership-filter bins.
//!
//! Every bin of the layout becomes a Bloom filter with `h` hash functions. For a bin
//! that must hold `n` elements with false positive rate `p`, the required size is
//!
//! ```text
//! m = ceil(-(n * h) / ln(1 - exp(ln(p) / h)))
//! ```
//!
//! and the rate achieved by a bin of `m` bits holding `n` elements is
//! `(1 - exp(-h * n / m))^h`.
//!
//! Two corrections keep the user's target rate intact across the hierarchy:
//!
//! - A query descends through up to `max_depth` levels of filters, so each level is
//!   sized for `1 - (1 - p)^(1 / max_depth)`.
//! - An input split across `i` technical bins is answered positively when any of the
//!   `i` bins reports it, so those bins are enlarged by `split[i]`.

use serde::Deserialize;
use serde::Serialize;

/// Smallest bin size handed to a filter, in bits.
pub const MIN_BIN_BITS: u64 = 64;

/// Bits needed for `elements` elements at rate `fpr` with `hash_count` hash functions.
///
/// Returns 0 for zero elements. The result is not rounded; see [`round_bits`].
pub fn bin_size_in_bits(elements: u64, fpr: f64, hash_count: usize) -> u64 {
    if elements == 0 {
        return 0;
    }
    (elements as f64 * bits_per_element(fpr, hash_count)).ceil() as u64
}

/// Rate achieved by a filter of `bits` bits holding `elements` elements.
pub fn achieved_fpr(bits: u64, hash_count: usize, elements: u64) -> f64 {
    if elements == 0 {
        return 0.0;
    }
    if bits == 0 {
        return 1.0;
    }
    let h = hash_count as f64;
    (1.0 - (-h * elements as f64 / bits as f64).exp()).powf(h)
}

/// Per-level rate so that `depth` compounded levels stay within `overall`.
pub fn per_level_fpr(overall: f64, depth: usize) -> f64 {
    let depth = depth.max(1) as f64;
    1.0 - (1.0 - overall).powf(1.0 / depth)
}

/// Default maximum depth of a hierarchy over `inputs` inputs with branching `tmax`.
///
/// A branching factor of one can never recurse, so its depth is one. Otherwise the
/// depth covers `log_tmax(inputs)` partition levels plus one level for split inputs.
pub fn derive_max_depth(inputs: usize, tmax: usize) -> usize {
    if tmax <= 1 {
        return 1;
    }
    let mut levels = 0;
    let mut reach = 1usize;
    while reach < inputs {
        reach = reach.saturating_mul(tmax);
        levels += 1;
    }
    (levels + 1).max(2)
}

/// Rounds a raw bit count up to a multiple of 64 within `[MIN_BIN_BITS, max_bits]`.
pub fn round_bits(bits: u64, max_bits: u64) -> u64 {
    bits.div_ceil(64)
        .saturating_mul(64)
        .clamp(MIN_BIN_BITS, max_bits.max(MIN_BIN_BITS))
}

fn bits_per_element(fpr: f64, hash_count: usize) -> f64 {
    -(hash_count as f64) / denominator(fpr, hash_count)
}

#[inline]
fn denominator(fpr: f64, hash_count: usize) -> f64 {
    (1.0 - (fpr.ln() / hash_count as f64).exp()).ln()
}

/// Corrections derived once per run, before any layout decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FpCorrection {
    /// Target rate requested for a complete query.
    pub overall_fpr: f64,
    /// Rate each level is sized for.
    pub per_level_fpr: f64,
    /// Number of levels a query may pass through.
    pub max_depth: usize,
    /// Hash functions of every filter.
    pub hash_count: usize,
    /// `split[i]` enlarges bins holding one input spread over `i` bins; `split[0]` is unused.
    pub split: Vec<f64>,
}

impl FpCorrection {
    /// Computes the corrections for a branching factor of `tmax` and `max_depth` levels.
    pub fn compute(overall_fpr: f64, hash_count: usize, tmax: usize, max_depth: usize) -> Self {
        let per_level = per_level_fpr(overall_fpr, max_depth);
        let base = denominator(per_level, hash_count);

        let mut split = vec![1.0; tmax.max(1) + 1];
        for (i, slot) in split.iter_mut().enumerate().skip(2) {
            let tmp = 1.0 - (1.0 - per_level).powf(1.0 / i as f64);
            *slot = base / denominator(tmp, hash_count);
        }

        Self {
            overall_fpr,
            per_level_fpr: per_level,
            max_depth: max_depth.max(1),
            hash_count,
            split,
        }
    }

    /// Multiplier for an input spread over `span` technical bins.
    pub fn split_factor(&self, span: usize) -> f64 {
        match self.split.get(span) {
            Some(&factor) => factor,
            None => {
                let tmp = 1.0 - (1.0 - self.per_level_fpr).powf(1.0 / span as f64);
                denominator(self.per_level_fpr, self.hash_count) / denominator(tmp, self.hash_count)
            }
        }
    }

    /// Raw bits for one technical bin holding `elements` of an input spread over `span` bins.
    pub fn bin_bits(&self, elements: u64, span: usize) -> u64 {
        let base = bin_size_in_bits(elements, self.per_level_fpr, self.hash_count);
        (base as f64 * self.split_factor(span.max(1))).ceil() as u64
    }

    /// Largest element count whose bin fits into `max_bits` bits.
    pub fn max_elements_per_bin(&self, max_bits: u64) -> u64 {
        let per_element = bits_per_element(self.per_level_fpr, self.hash_count);
        (max_bits as f64 / per_element).floor().max(1.0) as u64
    }

    /// Achieved rate of a level-sized filter.
    pub fn achieved(&self, bits: u64, elements: u64) -> f64 {
        achieved_fpr(bits, self.hash_count, elements)
    }
}
