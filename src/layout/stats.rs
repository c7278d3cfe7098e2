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

use std::collections::BTreeMap;
use std::fmt;

use crate::fpr::FpCorrection;
use crate::layout::tree::LayoutTree;
use crate::layout::tree::LevelLayout;

/// Counters of all levels at one depth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelStatistics {
    pub levels: usize,
    pub technical_bins: usize,
    pub leaf_bins: usize,
    /// Leaves shared by more than one input.
    pub merged_bins: usize,
    /// Technical bins of split inputs.
    pub split_bins: usize,
    pub internal_bins: usize,
    pub degraded_bins: usize,
    pub total_load: u64,
    pub max_load: u64,
    pub total_bits: u64,
    /// Worst achieved false positive rate of any leaf bin.
    pub max_fpr: f64,
}

impl LevelStatistics {
    /// Counts one level.
    pub fn observe(level: &LevelLayout, corrections: &FpCorrection) -> Self {
        let mut stats = LevelStatistics {
            levels: 1,
            technical_bins: level.technical_bins(),
            total_bits: level.total_bits(),
            ..LevelStatistics::default()
        };
        for leaf in level.leaves() {
            stats.leaf_bins += leaf.span;
            if leaf.is_merged() {
                stats.merged_bins += 1;
            }
            if leaf.is_split() {
                stats.split_bins += leaf.span;
            }
            if leaf.degradation.is_some() {
                stats.degraded_bins += leaf.span;
            }
            stats.total_load += leaf.load * leaf.span as u64;
            stats.max_load = stats.max_load.max(leaf.load);
            stats.max_fpr = stats.max_fpr.max(corrections.achieved(leaf.bits, leaf.load));
        }
        stats.internal_bins = level.internals().count();
        stats
    }

    pub fn merge(&mut self, other: &LevelStatistics) {
        self.levels += other.levels;
        self.technical_bins += other.technical_bins;
        self.leaf_bins += other.leaf_bins;
        self.merged_bins += other.merged_bins;
        self.split_bins += other.split_bins;
        self.internal_bins += other.internal_bins;
        self.degraded_bins += other.degraded_bins;
        self.total_load += other.total_load;
        self.max_load = self.max_load.max(other.max_load);
        self.total_bits += other.total_bits;
        self.max_fpr = self.max_fpr.max(other.max_fpr);
    }

    /// Mean load of a leaf bin, rounded down.
    pub fn avg_load(&self) -> u64 {
        match self.leaf_bins {
            0 => 0,
            n => self.total_load / n as u64,
        }
    }
}

/// Statistics of a whole layout, keyed by depth.
///
/// Subtrees are counted independently and combined with [`GlobalStatistics::merge`],
/// so the result does not depend on the order subtrees finish in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStatistics {
    per_depth: BTreeMap<usize, LevelStatistics>,
}

impl GlobalStatistics {
    pub fn from_level(level: &LevelLayout, corrections: &FpCorrection) -> Self {
        let mut per_depth = BTreeMap::new();
        per_depth.insert(level.depth, LevelStatistics::observe(level, corrections));
        Self { per_depth }
    }

    /// Recounts a finished tree.
    pub fn from_tree(tree: &LayoutTree, corrections: &FpCorrection) -> Self {
        tree.levels()
            .iter()
            .fold(GlobalStatistics::default(), |mut acc, level| {
                acc.merge(GlobalStatistics::from_level(level, corrections));
                acc
            })
    }

    pub fn merge(&mut self, other: GlobalStatistics) {
        for (depth, stats) in other.per_depth {
            self.per_depth.entry(depth).or_default().merge(&stats);
        }
    }

    pub fn depth(&self, depth: usize) -> Option<&LevelStatistics> {
        self.per_depth.get(&depth)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &LevelStatistics)> {
        self.per_depth.iter().map(|(depth, stats)| (*depth, stats))
    }

    pub fn total(&self) -> LevelStatistics {
        let mut total = LevelStatistics::default();
        for stats in self.per_depth.values() {
            total.merge(stats);
        }
        total
    }
}

impl fmt::Display for GlobalStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "depth\tlevels\ttechnical_bins\tleaf_bins\tmerged_bins\tsplit_bins\tinternal_bins\tdegraded_bins\tmax_load\tavg_load\ttotal_bits\tmax_fpr"
        )?;
        for (depth, s) in self.iter() {
            writeln!(
                f,
                "{depth}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.6}",
                s.levels,
                s.technical_bins,
                s.leaf_bins,
                s.merged_bins,
                s.split_bins,
                s.internal_bins,
                s.degraded_bins,
                s.max_load,
                s.avg_load(),
                s.total_bits,
                s.max_fpr
            )?;
        }
        Ok(())
    }
}
