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
use crate::filter::CountingQuotientFilter;
use crate::hash::DEFAULT_SEED;
use crate::hash::HashMode;
use crate::metadata::Geometry;
use crate::table::Table;

/// Builder for creating counting quotient filters.
///
/// # Examples
///
/// ```
/// use cqf::{CountingQuotientFilter, HashMode, LockMode};
///
/// let filter = CountingQuotientFilter::builder(1 << 12, 20)
///     .value_bits(4)
///     .hash_mode(HashMode::Invertible)
///     .auto_resize(true)
///     .build()
///     .unwrap();
///
/// filter.insert(7, 3, 2, LockMode::Wait).unwrap();
/// assert_eq!(filter.count(7, 3), 2);
/// ```
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    nslots: usize,
    key_bits: u32,
    value_bits: u32,
    hash_mode: HashMode,
    seed: u64,
    auto_resize: bool,
}

impl FilterBuilder {
    pub(super) fn new(nslots: usize, key_bits: u32) -> Self {
        Self {
            nslots,
            key_bits,
            value_bits: 0,
            hash_mode: HashMode::Default,
            seed: DEFAULT_SEED,
            auto_resize: false,
        }
    }

    /// Sets the number of value bits stored next to each key fingerprint.
    ///
    /// Values are truncated to this width. Defaults to 0.
    pub fn value_bits(mut self, value_bits: u32) -> Self {
        self.value_bits = value_bits;
        self
    }

    /// Sets how keys are mapped to fingerprints. Defaults to
    /// [`HashMode::Default`], which cannot resize or report keys.
    pub fn hash_mode(mut self, hash_mode: HashMode) -> Self {
        self.hash_mode = hash_mode;
        self
    }

    /// Sets the hash seed. Filters built with different seeds are incompatible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Grows the filter instead of failing when it fills up. Defaults to off.
    pub fn auto_resize(mut self, auto_resize: bool) -> Self {
        self.auto_resize = auto_resize;
        self
    }

    /// Allocates the filter.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid)
    /// if `nslots` is not a power of two of at least 64, if `key_bits` does
    /// not exceed `log2(nslots)` or exceeds 63, or if a slot would be wider
    /// than 63 bits. Returns
    /// [`ErrorKind::NoSpace`](crate::error::ErrorKind::NoSpace) if the memory
    /// cannot be allocated.
    pub fn build(self) -> Result<CountingQuotientFilter, Error> {
        let geometry = Geometry::new(
            self.nslots,
            self.key_bits,
            self.value_bits,
            self.hash_mode,
            self.seed,
        )?;
        let table = Table::allocate(geometry, self.auto_resize)?;
        Ok(CountingQuotientFilter::from_table(table))
    }
}
