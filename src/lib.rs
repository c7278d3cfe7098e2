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

//! Hierarchical bin layouts for membership-filter indexes over large collections of
//! sequence sets.
//!
//! Each input set is summarized by a HyperLogLog sketch. The layout engine assigns
//! inputs to technical bins of a tree of filters so that every bin has a similar
//! number of distinct elements and the whole index meets a target false positive
//! rate. The layout is written as a text file and turned into one Bloom filter per
//! technical bin.
//!
//! # Modules
//!
//! - [`hll`]: cardinality sketches and unions
//! - [`fpr`]: false positive rate model and bin sizing
//! - [`sketch`]: input sets and parallel sketching
//! - [`layout`]: the layout engine, its statistics and the layout file
//! - [`bloom`] and [`index`]: filters built from a layout
//! - [`pipeline`]: one call from inputs to written files

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bloom;
pub mod error;
pub mod fpr;
pub mod hash;
pub mod hll;
pub mod index;
pub mod layout;
pub mod pipeline;
pub mod sketch;

mod codec;
mod parallel;
