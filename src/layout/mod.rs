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

//! Hierarchical bin layout.
//!
//! The engine distributes inputs over at most `tmax` technical bins per level. Inputs
//! too large for a shared bin get an internal node whose child level splits them over
//! several bins; small inputs share bins. Levels below internal nodes are laid out
//! independently and in parallel, with results identical for any thread count.
//!
//! # Usage
//!
//! ```rust
//! use hibf_layout::layout::{compute_layout, Config, LayoutData};
//!
//! let ids = (0..16).map(|i| format!("sample-{i}")).collect();
//! let cardinalities = (0..16).map(|i| 1_000 + 100 * i).collect();
//! let data = LayoutData::new(ids, cardinalities).unwrap();
//!
//! let outcome = compute_layout(&data, &Config::default()).unwrap();
//! assert_eq!(outcome.tmax, 4);
//! assert_eq!(outcome.tree.assignments().len(), 16);
//! ```

mod auto;
mod config;
mod data;
mod engine;
mod format;
mod packing;
mod stats;
mod tree;

pub use self::auto::candidate_tmax;
pub use self::config::Config;
pub use self::config::RearrangementBudget;
pub use self::data::LayoutData;
pub use self::engine::LayoutOutcome;
pub use self::format::ParsedLayout;
pub use self::format::parse_layout;
pub use self::format::write_layout;
pub use self::stats::GlobalStatistics;
pub use self::stats::LevelStatistics;
pub use self::tree::Assignment;
pub use self::tree::Degradation;
pub use self::tree::InternalNode;
pub use self::tree::LayoutNode;
pub use self::tree::LayoutTree;
pub use self::tree::LeafAssignment;
pub use self::tree::LevelId;
pub use self::tree::LevelLayout;

use tracing::info;

use crate::error::Error;
use crate::parallel;
use engine::HierarchicalBinning;

/// Computes the layout of `data` on a pool of `config.threads` workers.
pub fn compute_layout(data: &LayoutData, config: &Config) -> Result<LayoutOutcome, Error> {
    config.validate()?;
    parallel::install(config.threads, || layout_in_pool(data, config))
}

/// Computes the layout on the current thread pool; `config` must be valid.
pub(crate) fn layout_in_pool(data: &LayoutData, config: &Config) -> LayoutOutcome {
    let outcome = if config.auto_tmax {
        auto::search(data, config)
    } else {
        let tmax = config.resolve_tmax(data.len());
        layout_with_tmax(data, config, tmax, config.max_rearrangement_ratio)
    };

    let total = outcome.statistics.total();
    info!(
        inputs = data.len(),
        tmax = outcome.tmax,
        levels = total.levels,
        technical_bins = total.technical_bins,
        degraded_bins = total.degraded_bins,
        total_bits = total.total_bits,
        "computed layout"
    );
    outcome
}

pub(crate) fn layout_with_tmax(
    data: &LayoutData,
    config: &Config,
    tmax: usize,
    rearrangement_ratio: f64,
) -> LayoutOutcome {
    let corrections = config.corrections(data.len(), tmax);
    HierarchicalBinning::new(data, config, &corrections, tmax, rearrangement_ratio).execute()
}
