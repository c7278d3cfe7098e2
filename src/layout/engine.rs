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

use rayon::prelude::*;
use tracing::debug;
use tracing::warn;

use crate::fpr;
use crate::fpr::FpCorrection;
use crate::layout::config::Config;
use crate::layout::data::LayoutData;
use crate::layout::packing::Packer;
use crate::layout::packing::WorkBin;
use crate::layout::stats::GlobalStatistics;
use crate::layout::tree::Degradation;
use crate::layout::tree::InternalNode;
use crate::layout::tree::LayoutNode;
use crate::layout::tree::LayoutTree;
use crate::layout::tree::LeafAssignment;
use crate::layout::tree::LevelId;
use crate::layout::tree::LevelLayout;

/// Result of one layout run.
#[derive(Debug, Clone)]
pub struct LayoutOutcome {
    pub tree: LayoutTree,
    pub statistics: GlobalStatistics,
    /// Branching factor the tree was built with.
    pub tmax: usize,
    pub corrections: FpCorrection,
    /// Inputs the rearrangement pass moved, over all levels.
    pub rearranged_inputs: usize,
    /// Merges performed by the merge pass, over all levels.
    pub merges: usize,
}

enum SubProblem {
    /// Lay out a group of inputs over one level.
    Partition(Vec<usize>),
    /// Spread one input evenly over `bins` technical bins.
    Split { input: usize, bins: usize },
}

struct Task {
    problem: SubProblem,
    depth: usize,
    path: Vec<usize>,
}

/// The levels of a solved task, depth first, with child ids local to `levels`.
struct Subtree {
    levels: Vec<LevelLayout>,
    statistics: GlobalStatistics,
    rearranged: usize,
    merges: usize,
}

pub(crate) struct HierarchicalBinning<'a> {
    data: &'a LayoutData,
    config: &'a Config,
    corrections: &'a FpCorrection,
    tmax: usize,
    rearrangement_ratio: f64,
    /// Largest load a bin of `max_bin_bits` can hold.
    max_elements: u64,
}

impl<'a> HierarchicalBinning<'a> {
    pub(crate) fn new(
        data: &'a LayoutData,
        config: &'a Config,
        corrections: &'a FpCorrection,
        tmax: usize,
        rearrangement_ratio: f64,
    ) -> Self {
        Self {
            data,
            config,
            corrections,
            tmax: tmax.max(1),
            rearrangement_ratio,
            max_elements: corrections.max_elements_per_bin(config.max_bin_bits),
        }
    }

    pub(crate) fn execute(&self) -> LayoutOutcome {
        let n = self.data.len();
        let subtree = if n == 0 {
            Subtree {
                levels: Vec::new(),
                statistics: GlobalStatistics::default(),
                rearranged: 0,
                merges: 0,
            }
        } else {
            self.solve(Task {
                problem: SubProblem::Partition((0..n).collect()),
                depth: 0,
                path: Vec::new(),
            })
        };

        LayoutOutcome {
            tree: LayoutTree::from_levels(subtree.levels),
            statistics: subtree.statistics,
            tmax: self.tmax,
            corrections: self.corrections.clone(),
            rearranged_inputs: subtree.rearranged,
            merges: subtree.merges,
        }
    }

    fn solve(&self, task: Task) -> Subtree {
        match task.problem {
            SubProblem::Partition(members) => self.partition(members, task.depth, task.path),
            SubProblem::Split { input, bins } => self.split(input, bins, task.depth, task.path),
        }
    }

    fn round_bits(&self, bits: u64) -> u64 {
        fpr::round_bits(bits, self.config.max_bin_bits)
    }

    fn split(&self, input: usize, bins: usize, depth: usize, path: Vec<usize>) -> Subtree {
        let span = bins.clamp(1, self.tmax);
        let load = self.data.cardinality(input).div_ceil(span as u64);
        let bits = self.round_bits(self.corrections.bin_bits(load, span));
        let degradation = (load > self.max_elements).then_some(Degradation::Oversized);
        if degradation.is_some() {
            warn!(
                input = %self.data.ids()[input],
                depth,
                span,
                load,
                "input does not fit into the largest bins even when split"
            );
        }

        let level = LevelLayout {
            path,
            depth,
            tmax: self.tmax,
            capacity: load,
            bin_size_bits: bits,
            nodes: vec![LayoutNode::Leaf(LeafAssignment {
                bin: 0,
                span,
                load,
                bits,
                members: vec![input],
                degradation,
            })],
        };
        debug!(depth, path = ?level.path, span, load, "split input over technical bins");

        Subtree {
            statistics: GlobalStatistics::from_level(&level, self.corrections),
            levels: vec![level],
            rearranged: 0,
            merges: 0,
        }
    }

    /// Finds the prefix of `order` (sorted by descending cardinality) that is too large
    /// to share bins, and the capacity of a bin for the remaining inputs.
    fn split_point(&self, order: &[usize]) -> (usize, u64) {
        let cards = self.data.cardinalities();
        let slots = self.tmax;
        let mut rest_sum: u64 = order.iter().map(|&i| cards[i]).sum();
        if slots <= 1 {
            return (0, rest_sum.max(1));
        }

        for k in 0..order.len() {
            let rest = &order[k..];
            let reserved = k.min(slots - 1);
            let free = (slots - reserved).min(rest.len()) as u64;
            let target = rest_sum.div_ceil(free).max(1);
            let head = cards[rest[0]];
            let limit = self.config.alpha * target.min(self.max_elements) as f64;
            let oversized = head > self.max_elements || (rest.len() > 1 && head as f64 > limit);
            if !oversized {
                return (k, target.max(head).min(self.max_elements).max(1));
            }
            rest_sum -= head;
        }
        (order.len(), self.max_elements)
    }

    fn partition(&self, members: Vec<usize>, depth: usize, path: Vec<usize>) -> Subtree {
        let cards = self.data.cardinalities();
        let mut order = members;
        order.sort_by(|&a, &b| cards[b].cmp(&cards[a]));

        let slots = self.tmax;
        let (oversized, capacity) = self.split_point(&order);
        let can_recurse = depth + 1 < self.corrections.max_depth;
        let allowed = if oversized == order.len() && oversized <= slots {
            slots
        } else {
            slots - 1
        };

        let mut internals: Vec<(Vec<usize>, SubProblem)> = Vec::new();
        let mut alone: Vec<usize> = Vec::new();
        let mut pool_start = oversized;
        if oversized > 0 && can_recurse {
            let own = if oversized <= allowed {
                oversized
            } else {
                allowed - 1
            };
            for &input in &order[..own] {
                let bins = (cards[input].div_ceil(capacity) as usize).min(slots);
                internals.push((vec![input], SubProblem::Split { input, bins }));
            }
            if own < oversized {
                let cluster = order[own..oversized].to_vec();
                debug!(depth, inputs = cluster.len(), "clustering surplus large inputs");
                internals.push((cluster.clone(), SubProblem::Partition(cluster)));
            }
        } else if oversized > 0 {
            let own = oversized.min(allowed);
            alone.extend_from_slice(&order[..own]);
            pool_start = own;
        }

        let packer = Packer::new(self.data, self.config.estimate_union, self.config.alpha, capacity);
        let pool = &order[pool_start..];
        let free = slots - internals.len() - alone.len();
        let mut bins = packer.greedy_fill(pool, free);
        let merges = packer.merge_lightest(&mut bins);
        let rearranged = if self.config.rearrange_user_bins {
            packer.rearrange(&mut bins, self.rearrangement_ratio)
        } else {
            0
        };

        let (level, children) =
            self.assemble(&packer, internals, alone, bins, capacity, depth, path);
        debug!(
            depth,
            path = ?level.path,
            inputs = order.len(),
            bins = level.technical_bins(),
            capacity,
            merges,
            rearranged,
            "laid out level"
        );

        let subtrees: Vec<Subtree> = children
            .into_par_iter()
            .map(|task| self.solve(task))
            .collect();
        self.attach(level, subtrees, rearranged, merges)
    }

    /// Numbers the level's bins: internal nodes first, then oversized leaves, then the
    /// packed bins. Returns the level and the tasks of its internal nodes.
    fn assemble(
        &self,
        packer: &Packer<'_>,
        internals: Vec<(Vec<usize>, SubProblem)>,
        alone: Vec<usize>,
        bins: Vec<WorkBin>,
        capacity: u64,
        depth: usize,
        path: Vec<usize>,
    ) -> (LevelLayout, Vec<Task>) {
        let mut nodes = Vec::with_capacity(internals.len() + alone.len() + bins.len());
        let mut children = Vec::with_capacity(internals.len());

        for (mut members, problem) in internals {
            let bin = nodes.len();
            members.sort_unstable();
            let load = packer.load_of(&members);
            let routing_bits = self.round_bits(self.corrections.bin_bits(load, 1));
            let mut child_path = path.clone();
            child_path.push(bin);
            children.push(Task {
                problem,
                depth: depth + 1,
                path: child_path,
            });
            nodes.push(LayoutNode::Internal(InternalNode {
                bin,
                load,
                routing_bits,
                members,
                child: LevelId(0),
            }));
        }

        for input in alone {
            let load = self.data.cardinality(input);
            warn!(
                input = %self.data.ids()[input],
                depth,
                load,
                capacity,
                "input exceeds the bin capacity at the depth limit"
            );
            nodes.push(LayoutNode::Leaf(LeafAssignment {
                bin: nodes.len(),
                span: 1,
                load,
                bits: self.round_bits(self.corrections.bin_bits(load, 1)),
                members: vec![input],
                degradation: Some(Degradation::Oversized),
            }));
        }

        for WorkBin { mut members, load } in bins {
            members.sort_unstable();
            let degradation = if load > self.max_elements {
                Some(Degradation::Oversized)
            } else if packer.exceeds_limit(load) {
                Some(Degradation::Overflow)
            } else {
                None
            };
            if let Some(degradation) = degradation {
                warn!(
                    depth,
                    bin = nodes.len(),
                    load,
                    capacity,
                    degradation = degradation.flag(),
                    "bin exceeds its capacity"
                );
            }
            nodes.push(LayoutNode::Leaf(LeafAssignment {
                bin: nodes.len(),
                span: 1,
                load,
                bits: 0,
                members,
                degradation,
            }));
        }

        // Regular leaves share the size of the heaviest one; oversized leaves keep their own.
        let uniform = nodes
            .iter()
            .filter_map(|node| match node {
                LayoutNode::Leaf(leaf) if leaf.degradation != Some(Degradation::Oversized) => {
                    Some(self.round_bits(self.corrections.bin_bits(leaf.load, 1)))
                }
                _ => None,
            })
            .max();
        for node in &mut nodes {
            if let LayoutNode::Leaf(leaf) = node {
                if leaf.degradation == Some(Degradation::Oversized) {
                    leaf.bits = self.round_bits(self.corrections.bin_bits(leaf.load, 1));
                } else {
                    leaf.bits = uniform.unwrap_or(fpr::MIN_BIN_BITS);
                }
            }
        }

        let level = LevelLayout {
            path,
            depth,
            tmax: self.tmax,
            capacity,
            bin_size_bits: uniform.unwrap_or(0),
            nodes,
        };
        (level, children)
    }

    /// Places the child subtrees after `level` and points its internal nodes at them.
    fn attach(
        &self,
        mut level: LevelLayout,
        subtrees: Vec<Subtree>,
        rearranged: usize,
        merges: usize,
    ) -> Subtree {
        let mut statistics = GlobalStatistics::from_level(&level, self.corrections);
        let mut rearranged = rearranged;
        let mut merges = merges;
        let mut child_ids = Vec::with_capacity(subtrees.len());
        let mut descendants = Vec::new();

        for subtree in subtrees {
            let offset = 1 + descendants.len();
            child_ids.push(LevelId(offset));
            for mut child in subtree.levels {
                for node in &mut child.nodes {
                    if let LayoutNode::Internal(internal) = node {
                        internal.child.0 += offset;
                    }
                }
                descendants.push(child);
            }
            statistics.merge(subtree.statistics);
            rearranged += subtree.rearranged;
            merges += subtree.merges;
        }

        let internals = level.nodes.iter_mut().filter_map(|node| match node {
            LayoutNode::Internal(internal) => Some(internal),
            LayoutNode::Leaf(_) => None,
        });
        for (internal, id) in internals.zip(child_ids) {
            internal.child = id;
        }

        let mut levels = Vec::with_capacity(1 + descendants.len());
        levels.push(level);
        levels.extend(descendants);
        Subtree {
            levels,
            statistics,
            rearranged,
            merges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(cards: &[u64]) -> LayoutData {
        let ids = (0..cards.len()).map(|i| format!("input-{i}")).collect();
        LayoutData::new(ids, cards.to_vec()).unwrap()
    }

    fn run(cards: &[u64], config: &Config, tmax: usize) -> LayoutOutcome {
        let data = data(cards);
        let corrections = config.corrections(cards.len(), tmax);
        HierarchicalBinning::new(&data, config, &corrections, tmax, config.max_rearrangement_ratio)
            .execute()
    }

    #[test]
    fn test_empty_input_gives_empty_tree() {
        let outcome = run(&[], &Config::default(), 4);
        assert!(outcome.tree.is_empty());
        assert_eq!(outcome.statistics, GlobalStatistics::default());
    }

    #[test]
    fn test_single_slot_takes_everything() {
        let outcome = run(&[500, 400, 300], &Config::default(), 1);
        let tree = &outcome.tree;
        assert_eq!(tree.levels().len(), 1);
        let root = tree.root().unwrap();
        assert_eq!(root.nodes.len(), 1);
        assert_eq!(root.nodes[0].members(), &[0, 1, 2]);
        assert_eq!(root.nodes[0].load(), 1200);
        assert_eq!(root.capacity, 1200);
    }

    #[test]
    fn test_large_input_becomes_split_child() {
        let mut cards = vec![1_000u64; 9];
        cards.push(100_000);
        let outcome = run(&cards, &Config::default(), 4);
        let tree = &outcome.tree;
        let root = tree.root().unwrap();
        let internal = root.internals().next().unwrap();
        assert_eq!(internal.bin, 0);
        assert_eq!(internal.members, vec![9]);

        let child = tree.level(internal.child);
        assert_eq!(child.path, vec![0]);
        assert_eq!(child.depth, 1);
        let leaf = child.leaves().next().unwrap();
        assert_eq!(leaf.span, 4);
        assert_eq!(leaf.load, 25_000);
    }

    #[test]
    fn test_depth_limit_places_large_input_alone() {
        let config = Config {
            max_depth: Some(1),
            ..Config::default()
        };
        let mut cards = vec![1_000u64; 9];
        cards.push(100_000);
        let outcome = run(&cards, &config, 4);
        let tree = &outcome.tree;
        assert_eq!(tree.levels().len(), 1);
        let root = tree.root().unwrap();
        let first = root.leaves().next().unwrap();
        assert_eq!(first.members, vec![9]);
        assert_eq!(first.degradation, Some(Degradation::Oversized));
        assert_eq!(root.technical_bins(), 4);
    }

    #[test]
    fn test_surplus_large_inputs_share_a_cluster() {
        // Bins of 6400 bits hold a few hundred elements, so every large input is oversized.
        let config = Config {
            max_bin_bits: 6400,
            ..Config::default()
        };
        let mut cards = vec![100_000u64; 5];
        cards.extend([10u64; 3]);
        let outcome = run(&cards, &config, 3);
        let root = outcome.tree.root().unwrap();
        let internals: Vec<_> = root.internals().collect();
        assert_eq!(internals.len(), 2);
        assert_eq!(internals[0].members.len(), 1);
        assert_eq!(internals[1].members.len(), 4);
        assert_eq!(root.technical_bins(), 3);
    }

    #[test]
    fn test_child_ids_point_at_matching_paths() {
        let mut cards = vec![50u64; 20];
        cards.extend([40_000u64, 30_000, 20_000]);
        let outcome = run(&cards, &Config::default(), 4);
        let tree = &outcome.tree;
        for level in tree.levels() {
            for internal in level.internals() {
                let child = tree.level(internal.child);
                let mut expected = level.path.clone();
                expected.push(internal.bin);
                assert_eq!(child.path, expected);
                assert_eq!(child.depth, level.depth + 1);
            }
        }
        assert_eq!(outcome.statistics, GlobalStatistics::from_tree(tree, &outcome.corrections));
    }
}
