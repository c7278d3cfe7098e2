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

use std::fs;

use googletest::assert_that;
use googletest::prelude::contains_substring;
use googletest::prelude::eq;
use hibf_layout::error::ErrorKind;
use hibf_layout::index::HibfIndex;
use hibf_layout::layout::Config;
use hibf_layout::layout::parse_layout;
use hibf_layout::pipeline;
use hibf_layout::sketch::InputSet;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn random_inputs(n: usize, seed: u64) -> Vec<InputSet> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let len = if i == 3 { 40_000 } else { rng.gen_range(200..2_000) };
            let hashes = (0..len).map(|_| rng.r#gen::<u64>()).collect();
            InputSet::new(format!("genome_{i}.fa"), hashes)
        })
        .collect()
}

#[test]
fn test_run_writes_layout_and_index() {
    let inputs = random_inputs(40, 1);
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");
    let sketch_dir = dir.path().join("sketches");
    let config = Config {
        tmax: Some(8),
        threads: 2,
        sketch_directory: Some(sketch_dir.clone()),
        ..Config::default()
    };

    let summary = pipeline::run(&config, &inputs, &prefix).unwrap();
    assert_eq!(summary.layout_path, dir.path().join("run.layout"));
    assert_eq!(summary.index_path, dir.path().join("run.hibf"));
    assert_that!(summary.tmax, eq(8));
    assert!(sketch_dir.join("39.hll").exists());

    let text = fs::read_to_string(&summary.layout_path).unwrap();
    let parsed = parse_layout(&text).unwrap();
    assert_eq!(parsed.config, config);
    assert_eq!(parsed.ids[3], "genome_3.fa");
    assert_eq!(parsed.statistics, summary.statistics);
    assert_eq!(parsed.to_text().unwrap(), text);

    let bytes = fs::read(&summary.index_path).unwrap();
    let index = HibfIndex::deserialize(&bytes).unwrap();
    assert_that!(index.layout_file(), eq("run.layout"));
    assert_that!(index.levels().len(), eq(parsed.tree.levels().len()));
    for assignment in parsed.tree.assignments() {
        let hash = inputs[assignment.input].hashes()[0];
        let found = (assignment.bin..assignment.bin + assignment.span)
            .any(|bin| index.contains(&assignment.path, bin, hash));
        assert!(found, "input {}", assignment.input);
    }

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn test_run_is_reproducible_across_thread_counts() {
    let inputs = random_inputs(60, 9);
    let dir = tempfile::tempdir().unwrap();
    let mut outputs = Vec::new();
    for threads in [1, 4] {
        let config = Config {
            tmax: Some(8),
            threads,
            ..Config::default()
        };
        let prefix = dir.path().join(format!("t{threads}"));
        let summary = pipeline::run(&config, &inputs, &prefix).unwrap();
        let layout = parse_layout(&fs::read_to_string(&summary.layout_path).unwrap()).unwrap();
        let index = fs::read(&summary.index_path).unwrap();
        outputs.push((layout.tree, index.len()));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_run_rejects_bad_inputs_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("run");

    let err = pipeline::run(&Config::default(), &[], &prefix).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::InvalidInput));

    let duplicated = vec![
        InputSet::new("same", vec![1, 2]),
        InputSet::new("same", vec![3]),
    ];
    let err = pipeline::run(&Config::default(), &duplicated, &prefix).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::InvalidInput));
    assert_that!(err.to_string(), contains_substring("duplicate input id"));

    let bad_config = Config {
        false_positive_rate: 1.5,
        ..Config::default()
    };
    let inputs = random_inputs(4, 3);
    let err = pipeline::run(&bad_config, &inputs, &prefix).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::ConfigInvalid));

    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_failed_write_leaves_no_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("missing").join("run");
    let inputs = random_inputs(5, 4);

    let err = pipeline::run(&Config::default(), &inputs, &prefix).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::Io));
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());

    // The layout target is a directory, so moving the layout into place fails after
    // the index was already moved.
    let prefix = dir.path().join("blocked");
    fs::create_dir(dir.path().join("blocked.layout")).unwrap();
    fs::write(dir.path().join("blocked.layout").join("keep"), b"x").unwrap();
    let err = pipeline::run(&Config::default(), &inputs, &prefix).unwrap_err();
    assert_that!(err.kind(), eq(ErrorKind::Io));
    assert!(!dir.path().join("blocked.hibf").exists());
    assert!(!dir.path().join("blocked.hibf.tmp").exists());
    assert!(!dir.path().join("blocked.layout.tmp").exists());
}
