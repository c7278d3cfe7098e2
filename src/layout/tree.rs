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

//! The hierarchical layout produced by the engine.
//!
//! Levels live in one arena ([`LayoutTree::levels`]) ordered depth first: a level is
//! always followed by the levels of its internal nodes, in bin order. Internal nodes
//! refer to their child level by [`LevelId`].

/// Index of a level in [`LayoutTree::levels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LevelId(pub(crate) usize);

impl LevelId {
    /// Position of the level in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Why a bin does not meet the level's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Degradation {
    /// An input too large for any bin, placed alone at the depth limit.
    Oversized,
    /// Greedy fill found no bin with room left and overfilled the lightest one.
    Overflow,
}

impl Degradation {
    pub(crate) fn flag(self) -> &'static str {
        match self {
            Degradation::Oversized => "oversized",
            Degradation::Overflow => "overflow",
        }
    }

    pub(crate) fn from_flag(flag: &str) -> Option<Option<Self>> {
        match flag {
            "-" => Some(None),
            "oversized" => Some(Some(Degradation::Oversized)),
            "overflow" => Some(Some(Degradation::Overflow)),
            _ => None,
        }
    }
}

/// A bin, or a run of `span` consecutive bins, that stores its members directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafAssignment {
    /// First technical bin.
    pub bin: usize,
    /// Number of technical bins; above 1 only for a split input.
    pub span: usize,
    /// Estimated distinct elements in each of the `span` bins.
    pub load: u64,
    /// Bits of each of the `span` bins.
    pub bits: u64,
    /// Input positions, ascending.
    pub members: Vec<usize>,
    pub degradation: Option<Degradation>,
}

impl LeafAssignment {
    /// True for a single input spread over several bins.
    pub fn is_split(&self) -> bool {
        self.span > 1
    }

    /// True for a bin shared by several inputs.
    pub fn is_merged(&self) -> bool {
        self.members.len() > 1
    }
}

/// A bin whose members are laid out again one level further down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub bin: usize,
    /// Estimated distinct elements over all members.
    pub load: u64,
    /// Bits of the filter that routes queries into the child level.
    pub routing_bits: u64,
    /// Input positions, ascending.
    pub members: Vec<usize>,
    pub child: LevelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutNode {
    Leaf(LeafAssignment),
    Internal(InternalNode),
}

impl LayoutNode {
    pub fn bin(&self) -> usize {
        match self {
            LayoutNode::Leaf(leaf) => leaf.bin,
            LayoutNode::Internal(node) => node.bin,
        }
    }

    /// Number of technical bins the node occupies.
    pub fn span(&self) -> usize {
        match self {
            LayoutNode::Leaf(leaf) => leaf.span,
            LayoutNode::Internal(_) => 1,
        }
    }

    pub fn members(&self) -> &[usize] {
        match self {
            LayoutNode::Leaf(leaf) => &leaf.members,
            LayoutNode::Internal(node) => &node.members,
        }
    }

    pub fn load(&self) -> u64 {
        match self {
            LayoutNode::Leaf(leaf) => leaf.load,
            LayoutNode::Internal(node) => node.load,
        }
    }

    /// Bits of every technical bin of the node.
    pub fn bits(&self) -> u64 {
        match self {
            LayoutNode::Leaf(leaf) => leaf.bits,
            LayoutNode::Internal(node) => node.routing_bits,
        }
    }
}

/// One level of the hierarchy: the bins below one internal node, or the root.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelLayout {
    /// Bins of the internal nodes leading here; empty for the root.
    pub path: Vec<usize>,
    pub depth: usize,
    /// Bin budget of this level.
    pub tmax: usize,
    /// Target load of a leaf bin.
    pub capacity: u64,
    /// Uniform size of the level's regular leaf bins.
    pub bin_size_bits: u64,
    /// Nodes ordered by bin.
    pub nodes: Vec<LayoutNode>,
}

impl LevelLayout {
    /// Number of technical bins in use.
    pub fn technical_bins(&self) -> usize {
        self.nodes.iter().map(LayoutNode::span).sum()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &LeafAssignment> {
        self.nodes.iter().filter_map(|node| match node {
            LayoutNode::Leaf(leaf) => Some(leaf),
            LayoutNode::Internal(_) => None,
        })
    }

    pub fn internals(&self) -> impl Iterator<Item = &InternalNode> {
        self.nodes.iter().filter_map(|node| match node {
            LayoutNode::Internal(node) => Some(node),
            LayoutNode::Leaf(_) => None,
        })
    }

    /// Bits of all filters of the level.
    pub fn total_bits(&self) -> u64 {
        self.nodes
            .iter()
            .map(|node| node.bits() * node.span() as u64)
            .sum()
    }

    /// Ratio of the heaviest leaf bin to the mean leaf bin load; 1 without leaves.
    pub fn load_ratio(&self) -> f64 {
        let mut max = 0u64;
        let mut total = 0u64;
        let mut count = 0u64;
        for leaf in self.leaves() {
            max = max.max(leaf.load);
            total += leaf.load * leaf.span as u64;
            count += leaf.span as u64;
        }
        if total == 0 {
            return 1.0;
        }
        max as f64 / (total as f64 / count as f64)
    }
}

/// Where one input ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub input: usize,
    /// Path of the level holding the input's leaf.
    pub path: Vec<usize>,
    pub bin: usize,
    pub span: usize,
}

/// A complete layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutTree {
    levels: Vec<LevelLayout>,
}

impl LayoutTree {
    pub(crate) fn from_levels(levels: Vec<LevelLayout>) -> Self {
        Self { levels }
    }

    /// True for the layout of zero inputs.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[LevelLayout] {
        &self.levels
    }

    pub fn level(&self, id: LevelId) -> &LevelLayout {
        &self.levels[id.0]
    }

    pub fn root(&self) -> Option<&LevelLayout> {
        self.levels.first()
    }

    /// Deepest level index plus one.
    pub fn depth(&self) -> usize {
        self.levels.iter().map(|l| l.depth + 1).max().unwrap_or(0)
    }

    pub fn total_bits(&self) -> u64 {
        self.levels.iter().map(LevelLayout::total_bits).sum()
    }

    /// The leaf of every input, ordered by input; an input found in several leaves
    /// appears several times.
    pub fn assignments(&self) -> Vec<Assignment> {
        let mut assignments: Vec<Assignment> = self
            .levels
            .iter()
            .flat_map(|level| {
                level.leaves().flat_map(move |leaf| {
                    leaf.members.iter().map(move |&input| Assignment {
                        input,
                        path: level.path.clone(),
                        bin: leaf.bin,
                        span: leaf.span,
                    })
                })
            })
            .collect();
        assignments.sort_by(|a, b| {
            (a.input, &a.path, a.bin).cmp(&(b.input, &b.path, b.bin))
        });
        assignments
    }
}
