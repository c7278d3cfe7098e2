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
use tracing::info;

use crate::layout::config::Config;
use crate::layout::config::RearrangementBudget;
use crate::layout::data::LayoutData;
use crate::layout::engine::LayoutOutcome;
use crate::layout::layout_with_tmax;

/// tmax values worth trying for `inputs` inputs: the powers of two within a factor of
/// four of `sqrt(inputs)`, plus `fallback`, all clamped to `[1, inputs]`.
pub fn candidate_tmax(inputs: usize, fallback: usize) -> Vec<usize> {
    let n = inputs.max(1);
    let root = (n as f64).sqrt();
    let (low, high) = (root / 4.0, root * 4.0);

    let mut candidates: Vec<usize> = (0..usize::BITS - 1)
        .map(|shift| 1usize << shift)
        .take_while(|&p| p as f64 <= high)
        .filter(|&p| p as f64 >= low)
        .map(|p| p.clamp(1, n))
        .collect();
    candidates.push(fallback.clamp(1, n));
    candidates.sort_unstable();
    candidates.dedup();
    candidates
}

/// Lays out `data` once per candidate tmax and keeps the layout with the fewest total
/// bits; ties go to the smaller tmax.
pub(crate) fn search(data: &LayoutData, config: &Config) -> LayoutOutcome {
    let fallback = config.resolve_tmax(data.len());
    let candidates = candidate_tmax(data.len(), fallback);
    let ratio = match config.rearrangement_budget {
        RearrangementBudget::PerCandidate => config.max_rearrangement_ratio,
        RearrangementBudget::Shared => config.max_rearrangement_ratio / candidates.len() as f64,
    };

    let outcomes: Vec<LayoutOutcome> = candidates
        .par_iter()
        .map(|&tmax| layout_with_tmax(data, config, tmax, ratio))
        .collect();

    let mut best: Option<LayoutOutcome> = None;
    for outcome in outcomes {
        let bits = outcome.tree.total_bits();
        debug!(tmax = outcome.tmax, total_bits = bits, "evaluated tmax candidate");
        match &best {
            Some(current) if current.tree.total_bits() <= bits => {}
            _ => best = Some(outcome),
        }
    }

    let best = best.unwrap_or_else(|| layout_with_tmax(data, config, fallback, ratio));
    info!(
        tmax = best.tmax,
        candidates = ?candidates,
        total_bits = best.tree.total_bits(),
        "selected tmax"
    );
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_around_square_root() {
        // sqrt(1024) = 32, so powers of two in [8, 128].
        assert_eq!(candidate_tmax(1024, 32), vec![8, 16, 32, 64, 128]);
        // sqrt(100) = 10: [2.5, 40] plus the fallback.
        assert_eq!(candidate_tmax(100, 10), vec![4, 8, 10, 16, 32]);
        assert_eq!(candidate_tmax(1, 1), vec![1]);
        assert_eq!(candidate_tmax(3, 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_search_prefers_fewest_bits() {
        let ids = (0..64).map(|i| format!("input-{i}")).collect();
        let cards = (0..64u64).map(|i| 1_000 + 37 * i).collect();
        let data = LayoutData::new(ids, cards).unwrap();
        let config = Config {
            auto_tmax: true,
            ..Config::default()
        };

        let best = search(&data, &config);
        for tmax in candidate_tmax(64, 8) {
            let other = layout_with_tmax(&data, &config, tmax, config.max_rearrangement_ratio);
            assert!(best.tree.total_bits() <= other.tree.total_bits(), "tmax {tmax}");
        }
    }
}
