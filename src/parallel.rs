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

//! Worker pool shared by sketching, layout recursion and index building.

use rayon::ThreadPoolBuilder;

use crate::error::Error;
use crate::error::ErrorKind;

/// Runs `f` inside a dedicated pool of `threads` workers.
///
/// Every parallel section of the crate collects results in input order, so the
/// outcome does not depend on `threads`.
pub(crate) fn install<R, F>(threads: usize, f: F) -> Result<R, Error>
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| {
            Error::new(ErrorKind::Io, "failed to create thread pool")
                .with_context("threads", threads)
                .set_source(e)
        })?;
    Ok(pool.install(f))
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;

    #[test]
    fn test_install_runs_in_requested_pool() {
        let threads = install(3, rayon::current_num_threads).unwrap();
        assert_eq!(threads, 3);
    }

    #[test]
    fn test_results_keep_input_order() {
        let squares = install(4, || (0..1_000u64).into_par_iter().map(|i| i * i).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(squares, (0..1_000u64).map(|i| i * i).collect::<Vec<_>>());
    }
}
