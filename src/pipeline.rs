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

//! End-to-end run: sketch the inputs, compute the layout, build the index and write
//! `<prefix>.layout` and `<prefix>.hibf`.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::info;
use tracing::warn;

use crate::error::Error;
use crate::index::IndexBuilder;
use crate::layout;
use crate::layout::Config;
use crate::layout::GlobalStatistics;
use crate::layout::LayoutData;
use crate::layout::write_layout;
use crate::parallel;
use crate::sketch::InputSet;
use crate::sketch::sketch_inputs;
use crate::sketch::validate_inputs;
use crate::sketch::write_sketches;

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub layout_path: PathBuf,
    pub index_path: PathBuf,
    /// Branching factor of the layout.
    pub tmax: usize,
    pub statistics: GlobalStatistics,
    pub rearranged_inputs: usize,
}

/// Runs the whole pipeline on `config.threads` workers.
///
/// Both output files appear together or not at all: they are written next to their
/// targets under a `.tmp` suffix and renamed once both are complete.
pub fn run(config: &Config, inputs: &[InputSet], prefix: &Path) -> Result<RunSummary, Error> {
    config.validate()?;
    validate_inputs(inputs)?;
    let hash_count = u16::try_from(config.num_hash_functions).map_err(|_| {
        Error::config_invalid("too many hash functions")
            .with_context("num_hash_functions", config.num_hash_functions)
    })?;

    parallel::install(config.threads, || {
        run_in_pool(config, inputs, prefix, hash_count)
    })?
}

fn run_in_pool(
    config: &Config,
    inputs: &[InputSet],
    prefix: &Path,
    hash_count: u16,
) -> Result<RunSummary, Error> {
    info!(
        inputs = inputs.len(),
        threads = config.threads,
        sketch_bits = config.sketch_bits,
        "sketching inputs"
    );
    let sketches = sketch_inputs(inputs, config.sketch_bits);
    if let Some(dir) = &config.sketch_directory {
        write_sketches(dir, &sketches)?;
        info!(dir = %dir.display(), "wrote sketches");
    }

    let data = LayoutData::from_sketches(inputs, sketches)?;
    let outcome = layout::layout_in_pool(&data, config);
    let text = write_layout(&outcome, &data, config)?;

    let layout_path = with_suffix(prefix, ".layout");
    let index_path = with_suffix(prefix, ".hibf");
    let layout_name = layout_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index = IndexBuilder::new(&outcome.tree, inputs, hash_count)
        .layout_file(layout_name)
        .build()?;

    write_together(&[
        (index_path.as_path(), index.serialize().as_slice()),
        (layout_path.as_path(), text.as_bytes()),
    ])?;

    let total = outcome.statistics.total();
    info!(
        layout = %layout_path.display(),
        index = %index_path.display(),
        technical_bins = total.technical_bins,
        total_bits = total.total_bits,
        "wrote layout and index"
    );
    Ok(RunSummary {
        layout_path,
        index_path,
        tmax: outcome.tmax,
        statistics: outcome.statistics,
        rearranged_inputs: outcome.rearranged_inputs,
    })
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes every file under a temporary name, then renames all of them into place.
/// On failure, temporary files and already renamed targets are removed.
fn write_together(files: &[(&Path, &[u8])]) -> Result<(), Error> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
    for &(target, contents) in files {
        let temp = with_suffix(target, ".tmp");
        if let Err(e) = fs::write(&temp, contents) {
            remove_all(staged.iter().map(|(temp, _)| temp.as_path()).chain([temp.as_path()]));
            return Err(Error::io("failed to write output", e)
                .with_context("path", target.display()));
        }
        staged.push((temp, target));
    }

    for (done, (temp, target)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(temp, target) {
            let renamed = staged[..done].iter().map(|(_, target)| *target);
            let pending = staged[done..].iter().map(|(temp, _)| temp.as_path());
            remove_all(renamed.chain(pending));
            return Err(Error::io("failed to move output into place", e)
                .with_context("path", target.display()));
        }
    }
    Ok(())
}

fn remove_all<'p>(paths: impl IntoIterator<Item = &'p Path>) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove partial output");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_suffix_keeps_dots() {
        let path = with_suffix(Path::new("out/run.v2"), ".layout");
        assert_eq!(path, PathBuf::from("out/run.v2.layout"));
    }

    #[test]
    fn test_write_together_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.hibf");
        let blocked = dir.path().join("b.layout");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), b"x").unwrap();

        let files: [(&Path, &[u8]); 2] = [(&first, b"one"), (&blocked, b"two")];
        let err = write_together(&files).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        assert!(!first.exists());
        assert!(!with_suffix(&first, ".tmp").exists());
        assert!(!with_suffix(&blocked, ".tmp").exists());
    }
}
