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

use crate::error::Error;
use crate::hll;
use crate::hll::HllSketch;
use crate::sketch;
use crate::sketch::InputSet;

/// Per-input facts the engine decides on: identifiers, estimated cardinalities and,
/// when union estimation is wanted, the sketches themselves.
#[derive(Debug, Clone, Default)]
pub struct LayoutData {
    ids: Vec<String>,
    cardinalities: Vec<u64>,
    sketches: Option<Vec<HllSketch>>,
}

impl LayoutData {
    /// Creates data from known cardinalities; shared bins are then measured by sums.
    ///
    /// Ids must be non-empty and free of tabs and line breaks, so that layouts written
    /// for them can be parsed back.
    pub fn new(ids: Vec<String>, cardinalities: Vec<u64>) -> Result<Self, Error> {
        if ids.len() != cardinalities.len() {
            return Err(Error::invalid_input("every input needs exactly one cardinality")
                .with_context("ids", ids.len())
                .with_context("cardinalities", cardinalities.len()));
        }
        for (position, id) in ids.iter().enumerate() {
            sketch::validate_id(id).map_err(|err| err.with_context("position", position))?;
        }
        Ok(Self {
            ids,
            cardinalities,
            sketches: None,
        })
    }

    /// Creates data from inputs and their sketches, in input order.
    ///
    /// Cardinalities are the sketch estimates.
    pub fn from_sketches(inputs: &[InputSet], sketches: Vec<HllSketch>) -> Result<Self, Error> {
        let ids = inputs.iter().map(|input| input.id().to_string()).collect();
        let cardinalities = sketches.iter().map(estimate_to_count).collect();
        Self::new(ids, cardinalities)?.with_sketches(sketches)
    }

    /// Attaches one sketch per input.
    pub fn with_sketches(mut self, sketches: Vec<HllSketch>) -> Result<Self, Error> {
        if sketches.len() != self.ids.len() {
            return Err(Error::invalid_input("every input needs exactly one sketch")
                .with_context("ids", self.ids.len())
                .with_context("sketches", sketches.len()));
        }
        self.sketches = Some(sketches);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn cardinalities(&self) -> &[u64] {
        &self.cardinalities
    }

    pub fn cardinality(&self, input: usize) -> u64 {
        self.cardinalities[input]
    }

    pub fn sketches(&self) -> Option<&[HllSketch]> {
        self.sketches.as_deref()
    }

    /// Distinct elements of a bin holding `members`.
    ///
    /// With `union` set and sketches attached, this is the union estimate, never
    /// more than the summed cardinalities. Otherwise it is the sum.
    pub(crate) fn load_of(&self, members: &[usize], union: bool) -> u64 {
        let sum: u64 = members.iter().map(|&m| self.cardinalities[m]).sum();
        if members.len() < 2 || !union {
            return sum;
        }
        let Some(sketches) = &self.sketches else {
            return sum;
        };
        let selected: Vec<&HllSketch> = members.iter().map(|&m| &sketches[m]).collect();
        let estimate = hll::estimate_union(&selected).ceil() as u64;
        estimate.min(sum)
    }
}

fn estimate_to_count(sketch: &HllSketch) -> u64 {
    sketch.estimate().round() as u64
}
