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

//! Bin packing within one level: greedy fill, merging of light bins and the bounded
//! rearrangement of inputs between the heaviest and the lightest bin.

use std::collections::HashMap;

use crate::hll;
use crate::hll::HllSketch;
use crate::hll::HllUnion;
use crate::layout::data::LayoutData;

/// A leaf bin under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkBin {
    pub members: Vec<usize>,
    pub load: u64,
}

/// Members of the heaviest and the lightest bin offered for exchange per round.
const EXCHANGE_MEMBERS: usize = 8;
/// Ranked exchanges checked against union estimates per round.
const ESTIMATED_EXCHANGES: usize = 4;

/// One candidate improvement between the heaviest and the lightest bin. Positions
/// index the members of the heavy (`at`) and the light (`light_at`) bin.
#[derive(Debug, Clone, Copy)]
enum Exchange {
    Move { x: usize, at: usize },
    Swap { x: usize, at: usize, y: usize, light_at: usize },
}

/// Union sketches of a bin, with every member left out once.
enum SideSketch {
    Additive,
    Union {
        whole: HllSketch,
        without: Vec<HllSketch>,
    },
}

struct Side {
    members: Vec<usize>,
    sum: u64,
    sketch: SideSketch,
}

pub(crate) struct Packer<'a> {
    data: &'a LayoutData,
    union: bool,
    alpha: f64,
    capacity: u64,
}

impl<'a> Packer<'a> {
    pub(crate) fn new(data: &'a LayoutData, estimate_union: bool, alpha: f64, capacity: u64) -> Self {
        Self {
            data,
            union: estimate_union && data.sketches().is_some(),
            alpha,
            capacity,
        }
    }

    pub(crate) fn load_of(&self, members: &[usize]) -> u64 {
        self.data.load_of(members, self.union)
    }

    /// True if `load` does not fit into `alpha` times the capacity.
    pub(crate) fn exceeds_limit(&self, load: u64) -> bool {
        load as f64 > self.alpha * self.capacity as f64
    }

    /// Distributes `pool`, heaviest first, over at most `free` bins.
    ///
    /// Every input opens a new bin while bins are left. Afterwards an input goes into the
    /// least loaded bin it fits in; if none has room, the least loaded bin takes it anyway.
    pub(crate) fn greedy_fill(&self, pool: &[usize], free: usize) -> Vec<WorkBin> {
        let mut bins: Vec<WorkBin> = Vec::with_capacity(free.min(pool.len()));
        for &input in pool {
            let card = self.data.cardinality(input);
            if bins.len() < free || bins.is_empty() {
                bins.push(WorkBin {
                    members: vec![input],
                    load: card,
                });
                continue;
            }

            let fitting = bins
                .iter()
                .enumerate()
                .filter(|(_, bin)| !self.exceeds_limit(bin.load + card))
                .min_by_key(|(_, bin)| bin.load)
                .map(|(index, _)| index);
            let target = match fitting {
                Some(index) => index,
                None => lightest(&bins),
            };
            bins[target].members.push(input);
            bins[target].load += card;
        }

        if self.union {
            for bin in &mut bins {
                bin.load = self.load_of(&bin.members);
            }
        }
        bins
    }

    /// Repeatedly merges the lightest bin into the next lightest bin the combination
    /// fits within the capacity. Returns the number of merges.
    pub(crate) fn merge_lightest(&self, bins: &mut Vec<WorkBin>) -> usize {
        let mut merges = 0;
        while bins.len() > 1 {
            let mut by_load: Vec<usize> = (0..bins.len()).collect();
            by_load.sort_by_key(|&i| (bins[i].load, i));
            let first = by_load[0];

            let mut accepted = None;
            for &other in &by_load[1..] {
                if bins[other].load > self.capacity {
                    break;
                }
                if !self.union && bins[first].load + bins[other].load > self.capacity {
                    break;
                }
                let mut members = bins[first].members.clone();
                members.extend_from_slice(&bins[other].members);
                let load = self.load_of(&members);
                if load <= self.capacity {
                    accepted = Some((other, members, load));
                    break;
                }
            }

            let Some((other, members, load)) = accepted else {
                break;
            };
            let (keep, drop) = (first.min(other), first.max(other));
            bins[keep] = WorkBin { members, load };
            bins.remove(drop);
            merges += 1;
        }
        merges
    }

    /// Moves or swaps inputs between the heaviest and the lightest bin while that
    /// strictly lowers the heavier of the two.
    ///
    /// At most `floor(ratio * inputs)` inputs end up outside their original bin. Only
    /// bins with at least two members give an input away without taking one back.
    /// Each round offers the largest members of the heavy bin and the smallest of the
    /// light bin, ranks the exchanges by summed cardinalities and estimates unions for
    /// the first few only. Leave-one-out sketches are rebuilt only for bins that changed.
    /// Returns the number of inputs that changed bins.
    pub(crate) fn rearrange(&self, bins: &mut [WorkBin], ratio: f64) -> usize {
        let inputs: usize = bins.iter().map(|bin| bin.members.len()).sum();
        let budget = (ratio * inputs as f64).floor() as isize;
        if bins.len() < 2 || budget == 0 {
            return 0;
        }

        let home: HashMap<usize, usize> = bins
            .iter()
            .enumerate()
            .flat_map(|(index, bin)| bin.members.iter().map(move |&m| (m, index)))
            .collect();
        let displaced = |input: usize, bin: usize| (home[&input] != bin) as isize;
        let estimated_limit = if self.union {
            ESTIMATED_EXCHANGES
        } else {
            usize::MAX
        };
        let mut sides: Vec<Option<Side>> = bins.iter().map(|_| None).collect();
        let mut touched = 0isize;

        for _ in 0..inputs {
            let heavy = heaviest(bins);
            let light = lightest(bins);
            let bound = bins[heavy].load;
            if heavy == light || bins[light].load >= bound {
                break;
            }
            for index in [heavy, light] {
                if sides[index].is_none() {
                    sides[index] = Some(self.side(&bins[index].members));
                }
            }
            let (Some(heavy_side), Some(light_side)) = (&sides[heavy], &sides[light]) else {
                break;
            };

            let ranked = self.ranked_exchanges(&bins[heavy], heavy_side, &bins[light], light_side);
            let mut applied = None;
            let mut estimated = 0;
            for exchange in ranked {
                if estimated == estimated_limit {
                    break;
                }
                let delta = match exchange {
                    Exchange::Move { x, .. } => displaced(x, light) - displaced(x, heavy),
                    Exchange::Swap { x, y, .. } => {
                        displaced(x, light) - displaced(x, heavy) + displaced(y, heavy)
                            - displaced(y, light)
                    }
                };
                if touched + delta > budget {
                    continue;
                }

                estimated += 1;
                let (peak, heavy_members, light_members) = match exchange {
                    Exchange::Move { x, at } => (
                        self.estimate(heavy_side, Some(at), None)
                            .max(self.estimate(light_side, None, Some(x))),
                        without(&bins[heavy].members, x, None),
                        with(&bins[light].members, x),
                    ),
                    Exchange::Swap { x, at, y, light_at } => (
                        self.estimate(heavy_side, Some(at), Some(y))
                            .max(self.estimate(light_side, Some(light_at), Some(x))),
                        without(&bins[heavy].members, x, Some(y)),
                        without(&bins[light].members, y, Some(x)),
                    ),
                };
                if peak >= bound {
                    continue;
                }
                let heavy_load = self.load_of(&heavy_members);
                let light_load = self.load_of(&light_members);
                if heavy_load.max(light_load) >= bound {
                    continue;
                }
                applied = Some((heavy_members, heavy_load, light_members, light_load, delta));
                break;
            }

            let Some((heavy_members, heavy_load, light_members, light_load, delta)) = applied
            else {
                break;
            };
            bins[heavy] = WorkBin {
                members: heavy_members,
                load: heavy_load,
            };
            bins[light] = WorkBin {
                members: light_members,
                load: light_load,
            };
            sides[heavy] = None;
            sides[light] = None;
            touched += delta;
        }
        touched.max(0) as usize
    }

    /// Exchanges between the largest members of `heavy` and the smallest members of
    /// `light`, lowest summed peak first.
    fn ranked_exchanges(
        &self,
        heavy: &WorkBin,
        heavy_side: &Side,
        light: &WorkBin,
        light_side: &Side,
    ) -> Vec<Exchange> {
        let givers = self.extremes(&heavy.members, true);
        let takers = self.extremes(&light.members, false);
        let mut ranked = Vec::with_capacity(givers.len() * (takers.len() + 1));

        for &at in &givers {
            let x = heavy.members[at];
            let cx = self.data.cardinality(x);
            if heavy.members.len() > 1 {
                let peak = (heavy_side.sum - cx).max(light_side.sum + cx);
                ranked.push((peak, Exchange::Move { x, at }));
            }
            for &light_at in &takers {
                let y = light.members[light_at];
                let cy = self.data.cardinality(y);
                let peak = (heavy_side.sum - cx + cy).max(light_side.sum - cy + cx);
                ranked.push((peak, Exchange::Swap { x, at, y, light_at }));
            }
        }
        ranked.sort_by_key(|(peak, _)| *peak);
        ranked.into_iter().map(|(_, exchange)| exchange).collect()
    }

    /// Positions of at most [`EXCHANGE_MEMBERS`] members with the largest (or smallest)
    /// cardinalities, earlier positions first among ties.
    fn extremes(&self, members: &[usize], largest: bool) -> Vec<usize> {
        let mut positions: Vec<usize> = (0..members.len()).collect();
        positions.sort_by_key(|&at| {
            let card = self.data.cardinality(members[at]);
            (if largest { u64::MAX - card } else { card }, at)
        });
        positions.truncate(EXCHANGE_MEMBERS);
        positions
    }

    fn side(&self, members: &[usize]) -> Side {
        let sum = members.iter().map(|&m| self.data.cardinality(m)).sum();
        let sketch = match self.data.sketches() {
            Some(sketches) if self.union => union_sides(sketches, members),
            _ => SideSketch::Additive,
        };
        Side {
            members: members.to_vec(),
            sum,
            sketch,
        }
    }

    /// Load of a side after removing the member at position `removed` and adding `added`.
    fn estimate(&self, side: &Side, removed: Option<usize>, added: Option<usize>) -> u64 {
        let removed_card = removed.map_or(0, |at| self.data.cardinality(side.members[at]));
        let sum = side.sum - removed_card + added.map_or(0, |a| self.data.cardinality(a));
        let (SideSketch::Union { whole, without: excluded }, Some(sketches)) =
            (&side.sketch, self.data.sketches())
        else {
            return sum;
        };
        let base = match removed {
            Some(index) => &excluded[index],
            None => whole,
        };
        let estimate = match added {
            Some(input) => hll::estimate_union(&[base, &sketches[input]]),
            None => base.estimate(),
        };
        (estimate.ceil() as u64).min(sum)
    }
}

fn union_sides(sketches: &[HllSketch], members: &[usize]) -> SideSketch {
    let lg_k = members
        .iter()
        .map(|&m| sketches[m].lg_config_k())
        .min()
        .unwrap_or(hll::DEFAULT_LG_K);

    let mut prefix = Vec::with_capacity(members.len());
    let mut union = HllUnion::new(lg_k);
    for &m in members {
        prefix.push(union.get_result());
        union.update(&sketches[m]);
    }
    let whole = union.get_result();

    let mut suffix = vec![HllSketch::new(lg_k); members.len()];
    union.reset();
    for (index, &m) in members.iter().enumerate().rev() {
        suffix[index] = union.get_result();
        union.update(&sketches[m]);
    }

    let without = prefix
        .iter()
        .zip(&suffix)
        .map(|(before, after)| {
            union.reset();
            union.update(before);
            union.update(after);
            union.get_result()
        })
        .collect();
    SideSketch::Union { whole, without }
}

fn without(members: &[usize], removed: usize, added: Option<usize>) -> Vec<usize> {
    let mut result: Vec<usize> = members.iter().copied().filter(|&m| m != removed).collect();
    result.extend(added);
    result
}

fn with(members: &[usize], added: usize) -> Vec<usize> {
    let mut result = members.to_vec();
    result.push(added);
    result
}

/// Index of the heaviest bin, the lowest index among ties.
fn heaviest(bins: &[WorkBin]) -> usize {
    (0..bins.len()).fold(0, |best, i| if bins[i].load > bins[best].load { i } else { best })
}

/// Index of the lightest bin, the lowest index among ties.
fn lightest(bins: &[WorkBin]) -> usize {
    (0..bins.len()).fold(0, |best, i| if bins[i].load < bins[best].load { i } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(cards: &[u64]) -> LayoutData {
        let ids = (0..cards.len()).map(|i| format!("input-{i}")).collect();
        LayoutData::new(ids, cards.to_vec()).unwrap()
    }

    #[test]
    fn test_greedy_fill_opens_bins_then_balances() {
        let data = data(&[50, 40, 30, 20, 10]);
        let packer = Packer::new(&data, false, 1.2, 75);
        let bins = packer.greedy_fill(&[0, 1, 2, 3, 4], 2);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].members, vec![0, 3, 4]);
        assert_eq!(bins[1].members, vec![1, 2]);
        assert_eq!(bins[0].load, 80);
        assert_eq!(bins[1].load, 70);
    }

    #[test]
    fn test_greedy_fill_overfills_lightest_when_nothing_fits() {
        let data = data(&[100, 100, 100]);
        let packer = Packer::new(&data, false, 1.0, 100);
        let bins = packer.greedy_fill(&[0, 1, 2], 2);
        assert_eq!(bins[0].members, vec![0, 2]);
        assert!(packer.exceeds_limit(bins[0].load));
        assert!(!packer.exceeds_limit(bins[1].load));
    }

    #[test]
    fn test_merge_joins_light_bins() {
        let data = data(&[60, 10, 15, 20]);
        let packer = Packer::new(&data, false, 1.2, 60);
        let mut bins = packer.greedy_fill(&[0, 3, 2, 1], 4);
        let merges = packer.merge_lightest(&mut bins);
        // 10 + 15 = 25, then 25 + 20 = 45; 45 + 60 exceeds the capacity.
        assert_eq!(merges, 2);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1].load, 45);
        let mut members = bins[1].members.clone();
        members.sort_unstable();
        assert_eq!(members, vec![1, 2, 3]);
    }

    #[test]
    fn test_rearrange_improves_and_respects_budget() {
        let data = data(&[40, 40, 30, 5, 5]);
        let packer = Packer::new(&data, false, 2.0, 60);
        let mut bins = vec![
            WorkBin {
                members: vec![0, 1],
                load: 80,
            },
            WorkBin {
                members: vec![2, 3, 4],
                load: 40,
            },
        ];
        let moved = packer.rearrange(&mut bins, 1.0);
        assert!(moved > 0);
        let peak = bins.iter().map(|b| b.load).max().unwrap();
        assert!(peak < 80, "peak {peak}");
        assert_eq!(bins.iter().map(|b| b.load).sum::<u64>(), 120);

        let mut untouched = vec![
            WorkBin {
                members: vec![0, 1],
                load: 80,
            },
            WorkBin {
                members: vec![2, 3, 4],
                load: 40,
            },
        ];
        assert_eq!(packer.rearrange(&mut untouched, 0.0), 0);
        assert_eq!(untouched[0].load, 80);
    }

    #[test]
    fn test_rearrange_with_union_estimates() {
        let hashes: Vec<Vec<u64>> = vec![
            (0..3000).collect(),
            (3000..6000).collect(),
            (6000..7000).collect(),
            (7000..8000).collect(),
        ];
        let ids = (0..4).map(|i| format!("input-{i}")).collect();
        let cards = hashes.iter().map(|h| h.len() as u64).collect();
        let sketches = hashes
            .iter()
            .map(|h| HllSketch::from_hashes(12, h.iter().copied()))
            .collect();
        let data = LayoutData::new(ids, cards)
            .unwrap()
            .with_sketches(sketches)
            .unwrap();
        let packer = Packer::new(&data, true, 2.0, 4000);

        let mut bins = vec![
            WorkBin {
                members: vec![0, 1],
                load: data.load_of(&[0, 1], true),
            },
            WorkBin {
                members: vec![2, 3],
                load: data.load_of(&[2, 3], true),
            },
        ];
        let before = bins[0].load;
        let moved = packer.rearrange(&mut bins, 0.5);
        assert!(moved <= 2);
        assert!(bins.iter().all(|b| b.load < before));
        for bin in &bins {
            assert_eq!(bin.load, data.load_of(&bin.members, true));
        }
    }
}
