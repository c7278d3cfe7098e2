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

//! Input sets and their cardinality sketches.
//!
//! An [`InputSet`] is one original sequence set, already reduced to its ordered set of
//! representative hash values. Sketching wraps each hash set into an [`HllSketch`];
//! inputs are independent, so the work is spread over the worker pool with one result
//! slot per input position.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use rayon::prelude::*;

use crate::error::Error;
use crate::hll::HllSketch;

/// One input of the layout: an identifier and its ordered, duplicate-free hash values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSet {
    id: String,
    hashes: Vec<u64>,
}

impl InputSet {
    /// Creates an input, sorting and deduplicating `hashes`.
    pub fn new(id: impl Into<String>, mut hashes: Vec<u64>) -> Self {
        hashes.sort_unstable();
        hashes.dedup();
        Self {
            id: id.into(),
            hashes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    /// Exact number of distinct hash values.
    pub fn cardinality(&self) -> u64 {
        self.hashes.len() as u64
    }
}

/// Checks that `inputs` can be laid out: at least one input, unique non-empty ids that
/// fit on one layout line.
pub fn validate_inputs(inputs: &[InputSet]) -> Result<(), Error> {
    if inputs.is_empty() {
        return Err(Error::invalid_input("at least one input is required"));
    }

    let mut seen = std::collections::HashMap::with_capacity(inputs.len());
    for (position, input) in inputs.iter().enumerate() {
        validate_id(input.id()).map_err(|e| e.with_context("position", position))?;
        if let Some(first) = seen.insert(input.id(), position) {
            return Err(Error::invalid_input("duplicate input id")
                .with_context("id", input.id())
                .with_context("first", first)
                .with_context("position", position));
        }
    }
    Ok(())
}

/// Rejects ids the layout file cannot represent.
pub fn validate_id(id: &str) -> Result<(), Error> {
    if id.is_empty() {
        return Err(Error::invalid_input("input id must not be empty"));
    }
    if id.contains(['\t', '\n', '\r']) {
        return Err(Error::invalid_input("input id must not contain tabs or line breaks")
            .with_context("id", id.escape_debug()));
    }
    Ok(())
}

/// Sketches every input with `2^lg_k` registers, in parallel on the current pool.
pub fn sketch_inputs(inputs: &[InputSet], lg_k: u8) -> Vec<HllSketch> {
    inputs
        .par_iter()
        .map(|input| HllSketch::from_hashes(lg_k, input.hashes().iter().copied()))
        .collect()
}

/// Path of the dumped sketch of the input at `position`.
pub fn sketch_path(dir: &Path, position: usize) -> PathBuf {
    dir.join(format!("{position}.hll"))
}

/// Writes one `<position>.hll` file per sketch into `dir`, creating it if needed.
pub fn write_sketches(dir: &Path, sketches: &[HllSketch]) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::io("failed to create sketch directory", e).with_context("dir", dir.display())
    })?;
    for (position, sketch) in sketches.iter().enumerate() {
        let path = sketch_path(dir, position);
        fs::write(&path, sketch.serialize()).map_err(|e| {
            Error::io("failed to write sketch", e).with_context("path", path.display())
        })?;
    }
    Ok(())
}

/// Reads a sketch written by [`write_sketches`].
pub fn read_sketch(path: &Path) -> Result<HllSketch, Error> {
    let bytes = fs::read(path)
        .map_err(|e| Error::io("failed to read sketch", e).with_context("path", path.display()))?;
    HllSketch::deserialize(&bytes).map_err(|e| e.with_context("path", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_input_set_is_ordered_and_unique() {
        let input = InputSet::new("a", vec![9, 3, 3, 7, 1]);
        assert_eq!(input.hashes(), &[1, 3, 7, 9]);
        assert_eq!(input.cardinality(), 4);
    }

    #[test]
    fn test_validate_rejects_empty_collection() {
        let err = validate_inputs(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let inputs = vec![
            InputSet::new("a", vec![1]),
            InputSet::new("b", vec![2]),
            InputSet::new("a", vec![3]),
        ];
        let err = validate_inputs(&inputs).unwrap_err();
        assert_eq!(err.message(), "duplicate input id");
        assert!(err.to_string().contains("position: 2"));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_ids() {
        assert!(validate_id("").is_err());
        assert!(validate_id("a\tb").is_err());
        assert!(validate_id("a\nb").is_err());
        assert!(validate_id("GCF_000001405.40 chr1").is_ok());
    }

    #[test]
    fn test_sketches_follow_input_order() {
        let inputs: Vec<_> = (0..8u64)
            .map(|i| InputSet::new(format!("s{i}"), (0..(i + 1) * 200).collect()))
            .collect();
        let sketches = sketch_inputs(&inputs, 12);
        assert_eq!(sketches.len(), inputs.len());
        for (input, sketch) in inputs.iter().zip(&sketches) {
            let expected = input.cardinality() as f64;
            assert!((sketch.estimate() - expected).abs() < expected * 0.1);
        }
    }

    #[test]
    fn test_sketch_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sketches = vec![
            HllSketch::from_hashes(12, 0..100u64),
            HllSketch::new(12),
        ];
        write_sketches(dir.path(), &sketches).unwrap();
        for (position, sketch) in sketches.iter().enumerate() {
            let restored = read_sketch(&sketch_path(dir.path(), position)).unwrap();
            assert_eq!(&restored, sketch);
        }
        let missing = read_sketch(&sketch_path(dir.path(), 9)).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Io);
    }
}
