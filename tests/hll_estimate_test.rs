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

use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;
use hibf_layout::hll::HllSketch;
use hibf_layout::hll::HllUnion;
use hibf_layout::hll::estimate_union;
use hibf_layout::sketch::InputSet;
use hibf_layout::sketch::read_sketch;
use hibf_layout::sketch::sketch_inputs;
use hibf_layout::sketch::sketch_path;
use hibf_layout::sketch::write_sketches;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn test_estimates_are_close_across_ranges() {
    let mut rng = StdRng::seed_from_u64(2024);
    for n in [10u64, 1_000, 20_000, 300_000] {
        let sketch = HllSketch::from_hashes(12, (0..n).map(|_| rng.r#gen::<u64>()));
        // Four standard errors of a 4096-register sketch.
        let tolerance = (n as f64 * 4.0 * 1.04 / 64.0).max(1.0);
        assert_that!(sketch.estimate(), near(n as f64, tolerance));
    }
}

#[test]
fn test_duplicates_do_not_change_the_estimate() {
    let hashes: Vec<u64> = (0..5_000u64).collect();
    let once = HllSketch::from_hashes(12, hashes.iter().copied());
    let thrice = HllSketch::from_hashes(12, hashes.iter().chain(&hashes).chain(&hashes).copied());
    assert_eq!(once, thrice);
}

#[test]
fn test_union_is_monotone() {
    let mut rng = StdRng::seed_from_u64(7);
    let sketches: Vec<HllSketch> = (0..8)
        .map(|_| {
            let len = rng.gen_range(100..5_000);
            HllSketch::from_hashes(12, (0..len).map(|_| rng.gen_range(0..40_000u64)))
        })
        .collect();

    let mut union = HllUnion::new(12);
    let mut previous = 0.0;
    for sketch in &sketches {
        union.update(sketch);
        let estimate = union.estimate();
        // Registers only grow; the small-range switch may shift the estimate slightly.
        assert_that!(estimate, ge(previous * 0.97));
        assert_that!(estimate, ge(sketch.estimate() * 0.97));
        previous = estimate;
    }

    let all: Vec<&HllSketch> = sketches.iter().collect();
    assert_that!(estimate_union(&all), near(previous, 1e-9));
    let sum: f64 = sketches.iter().map(HllSketch::estimate).sum();
    assert_that!(previous, le(sum));
}

#[test]
fn test_union_of_disjoint_sets_adds_up() {
    let a = HllSketch::from_hashes(12, 0..10_000u64);
    let b = HllSketch::from_hashes(12, 10_000..20_000u64);
    let estimate = estimate_union(&[&a, &b]);
    assert_that!(estimate, near(20_000.0, 20_000.0 * 0.05));
}

#[test]
fn test_mixed_precision_union_uses_lower_precision() {
    let fine = HllSketch::from_hashes(14, 0..8_000u64);
    let coarse = HllSketch::from_hashes(10, 4_000..12_000u64);
    let mut union = HllUnion::new(14);
    union.update(&fine);
    union.update(&coarse);
    let result = union.get_result();
    assert_eq!(result.lg_config_k(), 10);
    assert_that!(result.estimate(), near(12_000.0, 12_000.0 * 0.15));
}

#[test]
fn test_sketch_files_roundtrip() {
    let inputs: Vec<InputSet> = (0..5u64)
        .map(|i| InputSet::new(format!("input-{i}"), (0..(i + 1) * 700).collect()))
        .collect();
    let sketches = sketch_inputs(&inputs, 11);
    let dir = tempfile::tempdir().unwrap();
    write_sketches(dir.path(), &sketches).unwrap();

    for (position, sketch) in sketches.iter().enumerate() {
        let path = sketch_path(dir.path(), position);
        assert!(path.ends_with(format!("{position}.hll")));
        let restored = read_sketch(&path).unwrap();
        assert_eq!(&restored, sketch);
    }
    assert!(read_sketch(&sketch_path(dir.path(), 99)).is_err());
}
