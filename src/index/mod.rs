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

//! Hierarchical index built from a layout.
//!
//! Every technical bin of every level becomes one [`BloomFilter`]. A leaf bin holds the
//! element hashes of its members; an internal node's bin is a routing filter holding
//! the hashes of all inputs below it. A split input spreads its hashes over its bins.

use rayon::prelude::*;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::bloom::BloomFilterBuilder;
use crate::bloom::MAX_NUM_BITS;
use crate::bloom::MIN_NUM_BITS;
use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::error::Error;
use crate::hash::hash_u64;
use crate::layout::LayoutNode;
use crate::layout::LayoutTree;
use crate::layout::LevelLayout;
use crate::sketch::InputSet;

const MAGIC: &[u8; 4] = b"HIBF";
const SERIAL_VERSION: u8 = 1;
/// Seed choosing the bin of a split input an element hash goes to.
const SPLIT_SEED: u32 = 7919;

/// Filters of one level, indexed by technical bin.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLevel {
    pub path: Vec<usize>,
    pub filters: Vec<BloomFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HibfIndex {
    hash_count: u16,
    layout_file: String,
    levels: Vec<IndexLevel>,
}

impl HibfIndex {
    pub fn hash_count(&self) -> u16 {
        self.hash_count
    }

    /// Name of the layout file the index was built from.
    pub fn layout_file(&self) -> &str {
        &self.layout_file
    }

    /// Levels in the order of [`LayoutTree::levels`].
    pub fn levels(&self) -> &[IndexLevel] {
        &self.levels
    }

    pub fn filter(&self, path: &[usize], bin: usize) -> Option<&BloomFilter> {
        self.levels
            .iter()
            .find(|level| level.path == path)
            .and_then(|level| level.filters.get(bin))
    }

    /// True if the filter at `path` and `bin` possibly holds `hash`.
    pub fn contains(&self, path: &[usize], bin: usize, hash: u64) -> bool {
        self.filter(path, bin)
            .is_some_and(|filter| filter.contains_hash(hash))
    }

    pub fn total_bits(&self) -> u64 {
        self.levels
            .iter()
            .flat_map(|level| &level.filters)
            .map(BloomFilter::capacity)
            .sum()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = SketchBytes::with_capacity(64);
        bytes.write(MAGIC);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u16_le(self.hash_count);
        bytes.write_str(&self.layout_file);
        bytes.write_u32_le(self.levels.len() as u32);
        for level in &self.levels {
            bytes.write_u32_le(level.path.len() as u32);
            for &bin in &level.path {
                bytes.write_u32_le(bin as u32);
            }
            bytes.write_u32_le(level.filters.len() as u32);
            for filter in &level.filters {
                let encoded = filter.serialize();
                bytes.write_u64_le(encoded.len() as u64);
                bytes.write(&encoded);
            }
        }
        bytes.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);

        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| Error::insufficient_data("magic"))?;
        if &magic != MAGIC {
            return Err(Error::malformed("not an index file"));
        }
        let serial_version = cursor
            .read_u8()
            .map_err(|_| Error::insufficient_data("serial_version"))?;
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        let hash_count = cursor
            .read_u16_le()
            .map_err(|_| Error::insufficient_data("hash_count"))?;
        let layout_file = cursor
            .read_str()
            .map_err(|_| Error::insufficient_data("layout_file"))?;

        let num_levels = read_count(&mut cursor, "num_levels")?;
        let mut levels = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            let path_len = read_count(&mut cursor, "path_len")?;
            let mut path = Vec::with_capacity(path_len);
            for _ in 0..path_len {
                let bin = cursor
                    .read_u32_le()
                    .map_err(|_| Error::insufficient_data("path"))?;
                path.push(bin as usize);
            }

            let num_filters = read_count(&mut cursor, "num_filters")?;
            let mut filters = Vec::with_capacity(num_filters);
            for _ in 0..num_filters {
                let len = cursor
                    .read_u64_le()
                    .map_err(|_| Error::insufficient_data("filter_len"))?;
                if len > cursor.remaining() as u64 {
                    return Err(Error::insufficient_data("filter"));
                }
                let mut encoded = vec![0u8; len as usize];
                cursor
                    .read_exact(&mut encoded)
                    .map_err(|_| Error::insufficient_data("filter"))?;
                filters.push(BloomFilter::deserialize(&encoded)?);
            }
            levels.push(IndexLevel { path, filters });
        }

        if cursor.remaining() != 0 {
            return Err(Error::malformed("trailing bytes after index")
                .with_context("remaining", cursor.remaining()));
        }
        Ok(HibfIndex {
            hash_count,
            layout_file,
            levels,
        })
    }
}

/// Reads a `u32` element count, rejecting counts larger than the remaining bytes.
fn read_count(cursor: &mut SketchSlice<'_>, field: &'static str) -> Result<usize, Error> {
    let count = cursor
        .read_u32_le()
        .map_err(|_| Error::insufficient_data(field))? as usize;
    if count > cursor.remaining() {
        return Err(Error::insufficient_data(field));
    }
    Ok(count)
}

/// Builds the filters of a layout from the inputs' element hashes.
pub struct IndexBuilder<'a> {
    tree: &'a LayoutTree,
    inputs: &'a [InputSet],
    hash_count: u16,
    layout_file: String,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(tree: &'a LayoutTree, inputs: &'a [InputSet], hash_count: u16) -> Self {
        Self {
            tree,
            inputs,
            hash_count,
            layout_file: String::new(),
        }
    }

    /// Records the layout file name in the index.
    pub fn layout_file(mut self, name: impl Into<String>) -> Self {
        self.layout_file = name.into();
        self
    }

    /// Builds one filter per technical bin, levels in parallel on the current pool.
    pub fn build(&self) -> Result<HibfIndex, Error> {
        if self.hash_count == 0 {
            return Err(Error::config_invalid("at least one hash function is required"));
        }
        for level in self.tree.levels() {
            let members = level.nodes.iter().flat_map(LayoutNode::members);
            if let Some(&member) = members.into_iter().find(|&&m| m >= self.inputs.len()) {
                return Err(Error::invalid_input("layout refers to an unknown input")
                    .with_context("member", member)
                    .with_context("inputs", self.inputs.len()));
            }
        }

        let levels = self
            .tree
            .levels()
            .par_iter()
            .map(|level| self.build_level(level))
            .collect();
        let index = HibfIndex {
            hash_count: self.hash_count,
            layout_file: self.layout_file.clone(),
            levels,
        };
        debug!(
            levels = index.levels.len(),
            total_bits = index.total_bits(),
            "built index filters"
        );
        Ok(index)
    }

    fn new_filter(&self, bits: u64) -> BloomFilter {
        BloomFilterBuilder::with_size(bits.clamp(MIN_NUM_BITS, MAX_NUM_BITS), self.hash_count)
            .build()
    }

    fn build_level(&self, level: &LevelLayout) -> IndexLevel {
        let width = level
            .nodes
            .iter()
            .map(|node| node.bin() + node.span())
            .max()
            .unwrap_or(0);
        let mut filters: Vec<BloomFilter> =
            (0..width).map(|_| self.new_filter(MIN_NUM_BITS)).collect();

        for node in &level.nodes {
            let (first, span) = (node.bin(), node.span());
            for filter in &mut filters[first..first + span] {
                *filter = self.new_filter(node.bits());
            }
            for &member in node.members() {
                for &hash in self.inputs[member].hashes() {
                    let offset = if span > 1 {
                        (hash_u64(hash, SPLIT_SEED).0 % span as u64) as usize
                    } else {
                        0
                    };
                    filters[first + offset].insert_hash(hash);
                }
            }
        }

        IndexLevel {
            path: level.path.clone(),
            filters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::layout::Config;
    use crate::layout::LayoutData;
    use crate::layout::compute_layout;

    fn inputs() -> Vec<InputSet> {
        let mut inputs: Vec<InputSet> = (0..12u64)
            .map(|i| {
                let hashes = (0..200u64).map(|h| (i << 32) | h).collect();
                InputSet::new(format!("small-{i}"), hashes)
            })
            .collect();
        inputs.push(InputSet::new("large", (0..20_000u64).map(|h| (99 << 32) | h).collect()));
        inputs
    }

    fn layout(inputs: &[InputSet]) -> LayoutTree {
        let ids = inputs.iter().map(|i| i.id().to_string()).collect();
        let cards = inputs.iter().map(InputSet::cardinality).collect();
        let data = LayoutData::new(ids, cards).unwrap();
        let config = Config {
            tmax: Some(4),
            ..Config::default()
        };
        compute_layout(&data, &config).unwrap().tree
    }

    #[test]
    fn test_every_member_is_found_in_its_bins() {
        let inputs = inputs();
        let tree = layout(&inputs);
        let index = IndexBuilder::new(&tree, &inputs, 4).build().unwrap();
        assert_eq!(index.levels().len(), tree.levels().len());

        for assignment in tree.assignments() {
            for &hash in inputs[assignment.input].hashes() {
                let found = (assignment.bin..assignment.bin + assignment.span)
                    .any(|bin| index.contains(&assignment.path, bin, hash));
                assert!(found, "input {} hash {hash}", assignment.input);
            }
        }
        for level in tree.levels() {
            for internal in level.internals() {
                for &member in &internal.members {
                    for &hash in inputs[member].hashes() {
                        assert!(index.contains(&level.path, internal.bin, hash));
                    }
                }
            }
        }
    }

    #[test]
    fn test_serialize_roundtrip() {
        let inputs = inputs();
        let tree = layout(&inputs);
        let index = IndexBuilder::new(&tree, &inputs, 3)
            .layout_file("run.layout")
            .build()
            .unwrap();
        let bytes = index.serialize();
        let restored = HibfIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored, index);
        assert_eq!(restored.layout_file(), "run.layout");
        assert_eq!(restored.hash_count(), 3);

        let err = HibfIndex::deserialize(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(HibfIndex::deserialize(&trailing).is_err());
        assert!(HibfIndex::deserialize(b"HIBX").is_err());
    }

    #[test]
    fn test_rejects_layout_of_other_inputs() {
        let inputs = inputs();
        let tree = layout(&inputs);
        let err = IndexBuilder::new(&tree, &inputs[..3], 4).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
