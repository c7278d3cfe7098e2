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

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::bloom;
use crate::error::Error;
use crate::fpr::FpCorrection;
use crate::fpr::MIN_BIN_BITS;
use crate::fpr::derive_max_depth;
use crate::hll::DEFAULT_LG_K;

/// How the rearrangement allowance is shared when several tmax values are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearrangementBudget {
    /// Every candidate tmax may rearrange up to the full ratio.
    #[default]
    PerCandidate,
    /// The ratio is divided evenly among all candidates.
    Shared,
}

/// Immutable parameters of one layout run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of technical bins per level; `None` uses `floor(sqrt(inputs))`.
    pub tmax: Option<usize>,
    /// Target false positive rate of a complete query.
    pub false_positive_rate: f64,
    /// Hash functions of every membership filter.
    pub num_hash_functions: usize,
    /// Slack factor: a bin may be filled up to `alpha` times the level capacity.
    pub alpha: f64,
    /// Largest fraction of a level's inputs the rearrangement pass may move.
    pub max_rearrangement_ratio: f64,
    /// Worker threads for sketching, recursion and index building.
    pub threads: usize,
    /// Measure shared bins by estimated union instead of summed cardinalities.
    pub estimate_union: bool,
    /// Run the rearrangement pass.
    pub rearrange_user_bins: bool,
    /// Search tmax among powers of two near `sqrt(inputs)`.
    pub auto_tmax: bool,
    /// Budget sharing between tmax candidates when `auto_tmax` is set.
    pub rearrangement_budget: RearrangementBudget,
    /// Maximum hierarchy depth; `None` derives it from the input count and tmax.
    pub max_depth: Option<usize>,
    /// Largest representable bin, in bits.
    pub max_bin_bits: u64,
    /// `lg_k` of the input sketches.
    pub sketch_bits: u8,
    /// Directory receiving one `<position>.hll` file per input, if set.
    pub sketch_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmax: None,
            false_positive_rate: 0.05,
            num_hash_functions: 4,
            alpha: 1.2,
            max_rearrangement_ratio: 0.5,
            threads: 1,
            estimate_union: true,
            rearrange_user_bins: true,
            auto_tmax: false,
            rearrangement_budget: RearrangementBudget::PerCandidate,
            max_depth: None,
            max_bin_bits: (1u64 << 35) - 64,
            sketch_bits: DEFAULT_LG_K,
            sketch_directory: None,
        }
    }
}

impl Config {
    /// Checks every parameter before any sketching or layout work starts.
    pub fn validate(&self) -> Result<(), Error> {
        let fpr = self.false_positive_rate;
        if !(fpr > 0.0 && fpr < 1.0) {
            return Err(Error::config_invalid("false positive rate must be in (0, 1)")
                .with_context("false_positive_rate", fpr));
        }
        if self.tmax == Some(0) {
            return Err(Error::config_invalid("tmax must be at least 1"));
        }
        if self.num_hash_functions == 0
            || self.num_hash_functions > usize::from(bloom::MAX_NUM_HASHES)
        {
            return Err(
                Error::config_invalid("number of hash functions must be in [1, 100]")
                    .with_context("num_hash_functions", self.num_hash_functions),
            );
        }
        if !(self.alpha.is_finite() && self.alpha >= 1.0) {
            return Err(
                Error::config_invalid("alpha must be a finite value of at least 1")
                    .with_context("alpha", self.alpha),
            );
        }
        let ratio = self.max_rearrangement_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(
                Error::config_invalid("max rearrangement ratio must be in [0, 1]")
                    .with_context("max_rearrangement_ratio", ratio),
            );
        }
        if self.threads == 0 {
            return Err(Error::config_invalid("at least one thread is required"));
        }
        if self.max_depth == Some(0) {
            return Err(Error::config_invalid("max depth must be at least 1"));
        }
        if !(4..=16).contains(&self.sketch_bits) {
            return Err(Error::config_invalid("sketch bits must be in [4, 16]")
                .with_context("sketch_bits", self.sketch_bits));
        }
        if !(MIN_BIN_BITS..=bloom::MAX_NUM_BITS).contains(&self.max_bin_bits) {
            return Err(
                Error::config_invalid("max bin bits must be in [64, 2^35 - 64]")
                    .with_context("max_bin_bits", self.max_bin_bits),
            );
        }
        Ok(())
    }

    /// tmax used for `inputs` inputs when no search is requested.
    pub fn resolve_tmax(&self, inputs: usize) -> usize {
        self.tmax.unwrap_or_else(|| inputs.isqrt()).max(1)
    }

    /// Maximum depth used with branching factor `tmax`.
    pub fn resolve_max_depth(&self, inputs: usize, tmax: usize) -> usize {
        self.max_depth
            .unwrap_or_else(|| derive_max_depth(inputs, tmax))
            .max(1)
    }

    /// Per-level corrections for a run with branching factor `tmax`.
    pub fn corrections(&self, inputs: usize, tmax: usize) -> FpCorrection {
        FpCorrection::compute(
            self.false_positive_rate,
            self.num_hash_functions,
            tmax,
            self.resolve_max_depth(inputs, tmax),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_out_of_range_parameters() {
        let cases = [
            Config {
                false_positive_rate: 0.0,
                ..Config::default()
            },
            Config {
                false_positive_rate: 1.0,
                ..Config::default()
            },
            Config {
                tmax: Some(0),
                ..Config::default()
            },
            Config {
                num_hash_functions: 0,
                ..Config::default()
            },
            Config {
                alpha: 0.9,
                ..Config::default()
            },
            Config {
                max_rearrangement_ratio: 1.5,
                ..Config::default()
            },
            Config {
                threads: 0,
                ..Config::default()
            },
            Config {
                max_depth: Some(0),
                ..Config::default()
            },
            Config {
                sketch_bits: 20,
                ..Config::default()
            },
            Config {
                max_bin_bits: 1 << 40,
                ..Config::default()
            },
            Config {
                num_hash_functions: 101,
                ..Config::default()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigInvalid, "{config:?}");
        }
    }

    #[test]
    fn test_resolve_tmax() {
        let config = Config::default();
        assert_eq!(config.resolve_tmax(100), 10);
        assert_eq!(config.resolve_tmax(99), 9);
        assert_eq!(config.resolve_tmax(0), 1);
        let fixed = Config {
            tmax: Some(64),
            ..Config::default()
        };
        assert_eq!(fixed.resolve_tmax(100), 64);
    }

    #[test]
    fn test_json_roundtrip_with_missing_fields() {
        let config: Config = serde_json::from_str(r#"{"tmax": 7, "alpha": 1.5}"#).unwrap();
        assert_eq!(config.tmax, Some(7));
        assert_eq!(config.alpha, 1.5);
        assert_eq!(config.num_hash_functions, 4);

        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
