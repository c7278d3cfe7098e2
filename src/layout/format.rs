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

//! Text form of a layout.
//!
//! ```text
//! ##CONFIG:
//! ##{ ...pretty printed configuration... }
//! ##ENDCONFIG
//! ##FPR:
//! ##tmax	10
//! ##...
//! ##ENDFPR
//! ##STATS:
//! ##depth	levels	...
//! ##ENDSTATS
//! ##INPUT	0	4213	sample-a
//! #LEVEL	.	0	10	30000	262144
//! #INTERNAL	.	0	10000000	87654400	17
//! #PATH	BIN	SPAN	LOAD	BITS	FLAG	MEMBERS
//! .	1	1	29876	262144	-	0,4,9
//! 0	0	10	1000000	8765440	-	17
//! ```
//!
//! Paths are the bins of the internal nodes leading to a level, joined by `;`, and `.`
//! for the root. A layout read back with [`parse_layout`] writes out byte for byte
//! identical.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::fpr::FpCorrection;
use crate::layout::config::Config;
use crate::layout::data::LayoutData;
use crate::layout::engine::LayoutOutcome;
use crate::layout::stats::GlobalStatistics;
use crate::layout::tree::Degradation;
use crate::layout::tree::InternalNode;
use crate::layout::tree::LayoutNode;
use crate::layout::tree::LayoutTree;
use crate::layout::tree::LeafAssignment;
use crate::layout::tree::LevelId;
use crate::layout::tree::LevelLayout;

const CONFIG_START: &str = "##CONFIG:";
const CONFIG_END: &str = "##ENDCONFIG";
const FPR_START: &str = "##FPR:";
const FPR_END: &str = "##ENDFPR";
const STATS_START: &str = "##STATS:";
const STATS_END: &str = "##ENDSTATS";
const INPUT_PREFIX: &str = "##INPUT\t";
const LEVEL_PREFIX: &str = "#LEVEL\t";
const INTERNAL_PREFIX: &str = "#INTERNAL\t";
const RECORD_HEADER: &str = "#PATH\tBIN\tSPAN\tLOAD\tBITS\tFLAG\tMEMBERS";

/// Renders `outcome` as a layout file.
pub fn write_layout(
    outcome: &LayoutOutcome,
    data: &LayoutData,
    config: &Config,
) -> Result<String, Error> {
    let config_json = render_config(config)?;
    let document = Document {
        config_json: &config_json,
        tmax: outcome.tmax,
        corrections: &outcome.corrections,
        ids: data.ids(),
        cardinalities: data.cardinalities(),
        tree: &outcome.tree,
        statistics: &outcome.statistics,
    };
    Ok(document.to_string())
}

/// A layout file read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLayout {
    pub config: Config,
    pub tmax: usize,
    pub corrections: FpCorrection,
    pub ids: Vec<String>,
    pub cardinalities: Vec<u64>,
    pub tree: LayoutTree,
    /// Recounted from `tree`.
    pub statistics: GlobalStatistics,
}

impl ParsedLayout {
    /// Renders the layout again.
    pub fn to_text(&self) -> Result<String, Error> {
        let config_json = render_config(&self.config)?;
        let document = Document {
            config_json: &config_json,
            tmax: self.tmax,
            corrections: &self.corrections,
            ids: &self.ids,
            cardinalities: &self.cardinalities,
            tree: &self.tree,
            statistics: &self.statistics,
        };
        Ok(document.to_string())
    }
}

fn render_config(config: &Config) -> Result<String, Error> {
    serde_json::to_string_pretty(config).map_err(|e| {
        Error::config_invalid("configuration cannot be written to a layout file").set_source(e)
    })
}

struct Document<'a> {
    config_json: &'a str,
    tmax: usize,
    corrections: &'a FpCorrection,
    ids: &'a [String],
    cardinalities: &'a [u64],
    tree: &'a LayoutTree,
    statistics: &'a GlobalStatistics,
}

struct PathDisplay<'a>(&'a [usize]);

impl fmt::Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, ".");
        }
        for (i, bin) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            write!(f, "{bin}")?;
        }
        Ok(())
    }
}

struct ListDisplay<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for ListDisplay<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Document<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{CONFIG_START}")?;
        for line in self.config_json.lines() {
            writeln!(f, "##{line}")?;
        }
        writeln!(f, "{CONFIG_END}")?;

        let c = self.corrections;
        writeln!(f, "{FPR_START}")?;
        writeln!(f, "##tmax\t{}", self.tmax)?;
        writeln!(f, "##overall_fpr\t{}", c.overall_fpr)?;
        writeln!(f, "##per_level_fpr\t{}", c.per_level_fpr)?;
        writeln!(f, "##max_depth\t{}", c.max_depth)?;
        writeln!(f, "##hash_count\t{}", c.hash_count)?;
        writeln!(f, "##split\t{}", ListDisplay(&c.split))?;
        writeln!(f, "{FPR_END}")?;

        writeln!(f, "{STATS_START}")?;
        for line in self.statistics.to_string().lines() {
            writeln!(f, "##{line}")?;
        }
        writeln!(f, "{STATS_END}")?;

        for (index, (id, card)) in self.ids.iter().zip(self.cardinalities).enumerate() {
            writeln!(f, "{INPUT_PREFIX}{index}\t{card}\t{id}")?;
        }

        let levels = self.tree.levels();
        for level in levels {
            writeln!(
                f,
                "{LEVEL_PREFIX}{}\t{}\t{}\t{}\t{}",
                PathDisplay(&level.path),
                level.depth,
                level.tmax,
                level.capacity,
                level.bin_size_bits
            )?;
        }
        for level in levels {
            for node in level.internals() {
                writeln!(
                    f,
                    "{INTERNAL_PREFIX}{}\t{}\t{}\t{}\t{}",
                    PathDisplay(&level.path),
                    node.bin,
                    node.load,
                    node.routing_bits,
                    ListDisplay(&node.members)
                )?;
            }
        }

        writeln!(f, "{RECORD_HEADER}")?;
        for level in levels {
            for leaf in level.leaves() {
                writeln!(
                    f,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    PathDisplay(&level.path),
                    leaf.bin,
                    leaf.span,
                    leaf.load,
                    leaf.bits,
                    leaf.degradation.map_or("-", Degradation::flag),
                    ListDisplay(&leaf.members)
                )?;
            }
        }
        Ok(())
    }
}

/// Reads a layout written by [`write_layout`].
pub fn parse_layout(text: &str) -> Result<ParsedLayout, Error> {
    let mut parser = Parser::default();
    let mut lines = text.lines().enumerate().map(|(i, line)| (i + 1, line));

    while let Some((number, line)) = lines.next() {
        let result = match line {
            CONFIG_START => {
                let body = collect_block(&mut lines, CONFIG_END)?;
                parser.config(&body)
            }
            FPR_START => {
                let body = collect_block(&mut lines, FPR_END)?;
                parser.fpr(&body)
            }
            STATS_START => collect_block(&mut lines, STATS_END).map(|_| ()),
            RECORD_HEADER => Ok(()),
            _ => {
                if let Some(rest) = line.strip_prefix(INPUT_PREFIX) {
                    parser.input(rest)
                } else if let Some(rest) = line.strip_prefix(LEVEL_PREFIX) {
                    parser.level(rest)
                } else if let Some(rest) = line.strip_prefix(INTERNAL_PREFIX) {
                    parser.internal(rest)
                } else if line.is_empty() {
                    Ok(())
                } else {
                    parser.leaf(line)
                }
            }
        };
        result.map_err(|e| e.with_context("line", number))?;
    }
    parser.finish()
}

fn collect_block<'t>(
    lines: &mut impl Iterator<Item = (usize, &'t str)>,
    end: &'static str,
) -> Result<Vec<&'t str>, Error> {
    let mut body = Vec::new();
    for (_, line) in lines.by_ref() {
        if line == end {
            return Ok(body);
        }
        let Some(content) = line.strip_prefix("##") else {
            return Err(Error::malformed("block line without ## prefix").with_context("block", end));
        };
        body.push(content);
    }
    Err(Error::malformed("unterminated block").with_context("block", end))
}

fn field<T: FromStr>(value: Option<&str>, name: &'static str) -> Result<T, Error> {
    let value = value.ok_or_else(|| Error::insufficient_data(name))?;
    value
        .parse()
        .map_err(|_| Error::malformed(format!("invalid {name}")).with_context("value", value))
}

fn parse_list<T: FromStr>(value: Option<&str>, name: &'static str) -> Result<Vec<T>, Error> {
    let value = value.ok_or_else(|| Error::insufficient_data(name))?;
    value.split(',').map(|item| field(Some(item), name)).collect()
}

fn parse_path(value: Option<&str>) -> Result<Vec<usize>, Error> {
    match value {
        Some(".") => Ok(Vec::new()),
        Some(value) => value.split(';').map(|bin| field(Some(bin), "path")).collect(),
        None => Err(Error::insufficient_data("path")),
    }
}

struct PendingInternal {
    path: Vec<usize>,
    bin: usize,
    load: u64,
    routing_bits: u64,
    members: Vec<usize>,
}

#[derive(Default)]
struct Parser {
    config: Option<Config>,
    fpr: HashMap<String, String>,
    ids: Vec<String>,
    cardinalities: Vec<u64>,
    levels: Vec<LevelLayout>,
    by_path: HashMap<Vec<usize>, usize>,
    internals: Vec<PendingInternal>,
}

impl Parser {
    fn config(&mut self, body: &[&str]) -> Result<(), Error> {
        let config = serde_json::from_str(&body.join("\n")).map_err(|e| {
            Error::malformed("invalid configuration block").set_source(e)
        })?;
        self.config = Some(config);
        Ok(())
    }

    fn fpr(&mut self, body: &[&str]) -> Result<(), Error> {
        for line in body {
            let Some((key, value)) = line.split_once('\t') else {
                return Err(Error::malformed("invalid FPR line").with_context("content", line));
            };
            self.fpr.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn input(&mut self, rest: &str) -> Result<(), Error> {
        let mut fields = rest.splitn(3, '\t');
        let index: usize = field(fields.next(), "input index")?;
        if index != self.ids.len() {
            return Err(Error::malformed("inputs are not numbered consecutively")
                .with_context("index", index));
        }
        let card = field(fields.next(), "cardinality")?;
        let id = fields.next().ok_or_else(|| Error::insufficient_data("input id"))?;
        self.cardinalities.push(card);
        self.ids.push(id.to_string());
        Ok(())
    }

    fn level(&mut self, rest: &str) -> Result<(), Error> {
        let mut fields = rest.split('\t');
        let path = parse_path(fields.next())?;
        let level = LevelLayout {
            depth: field(fields.next(), "depth")?,
            tmax: field(fields.next(), "level tmax")?,
            capacity: field(fields.next(), "capacity")?,
            bin_size_bits: field(fields.next(), "bin size")?,
            nodes: Vec::new(),
            path: path.clone(),
        };
        if self.by_path.insert(path, self.levels.len()).is_some() {
            return Err(Error::malformed("duplicate level"));
        }
        self.levels.push(level);
        Ok(())
    }

    fn internal(&mut self, rest: &str) -> Result<(), Error> {
        let mut fields = rest.split('\t');
        self.internals.push(PendingInternal {
            path: parse_path(fields.next())?,
            bin: field(fields.next(), "bin")?,
            load: field(fields.next(), "load")?,
            routing_bits: field(fields.next(), "routing bits")?,
            members: parse_list(fields.next(), "members")?,
        });
        Ok(())
    }

    fn leaf(&mut self, line: &str) -> Result<(), Error> {
        let mut fields = line.split('\t');
        let path = parse_path(fields.next())?;
        let bin = field(fields.next(), "bin")?;
        let span = field(fields.next(), "span")?;
        let load = field(fields.next(), "load")?;
        let bits = field(fields.next(), "bits")?;
        let flag = fields.next().ok_or_else(|| Error::insufficient_data("flag"))?;
        let degradation = Degradation::from_flag(flag)
            .ok_or_else(|| Error::malformed("unknown bin flag").with_context("flag", flag))?;
        let members = parse_list(fields.next(), "members")?;

        let level = self.level_index(&path)?;
        self.levels[level].nodes.push(LayoutNode::Leaf(LeafAssignment {
            bin,
            span,
            load,
            bits,
            members,
            degradation,
        }));
        Ok(())
    }

    fn level_index(&self, path: &[usize]) -> Result<usize, Error> {
        self.by_path.get(path).copied().ok_or_else(|| {
            Error::malformed("record refers to an unknown level")
                .with_context("path", PathDisplay(path))
        })
    }

    fn fpr_value<T: FromStr>(&self, key: &'static str) -> Result<T, Error> {
        field(self.fpr.get(key).map(String::as_str), key)
    }

    fn finish(mut self) -> Result<ParsedLayout, Error> {
        let config = self
            .config
            .take()
            .ok_or_else(|| Error::malformed("layout has no configuration block"))?;
        if self.fpr.is_empty() {
            return Err(Error::malformed("layout has no FPR block"));
        }
        let tmax = self.fpr_value("tmax")?;
        let corrections = FpCorrection {
            overall_fpr: self.fpr_value("overall_fpr")?,
            per_level_fpr: self.fpr_value("per_level_fpr")?,
            max_depth: self.fpr_value("max_depth")?,
            hash_count: self.fpr_value("hash_count")?,
            split: parse_list(self.fpr.get("split").map(String::as_str), "split")?,
        };

        for pending in std::mem::take(&mut self.internals) {
            let level = self.level_index(&pending.path)?;
            let mut child_path = pending.path.clone();
            child_path.push(pending.bin);
            let child = self.level_index(&child_path)?;
            self.levels[level].nodes.push(LayoutNode::Internal(InternalNode {
                bin: pending.bin,
                load: pending.load,
                routing_bits: pending.routing_bits,
                members: pending.members,
                child: LevelId(child),
            }));
        }

        let inputs = self.ids.len();
        for level in &mut self.levels {
            level.nodes.sort_by_key(LayoutNode::bin);
            if let Some(&member) = level
                .nodes
                .iter()
                .flat_map(|node| node.members())
                .find(|&&member| member >= inputs)
            {
                return Err(Error::malformed("member refers to an unknown input")
                    .with_context("member", member)
                    .with_context("path", PathDisplay(&level.path)));
            }
        }

        let tree = LayoutTree::from_levels(self.levels);
        let statistics = GlobalStatistics::from_tree(&tree, &corrections);
        Ok(ParsedLayout {
            config,
            tmax,
            corrections,
            ids: self.ids,
            cardinalities: self.cardinalities,
            tree,
            statistics,
        })
    }
}
