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

use std::path::Path;

use crate::error::Error;
use crate::hash::Quotienter;
use crate::lock::BlockLocks;
use crate::metadata::Geometry;
use crate::metadata::HEADER_WORDS;
use crate::metadata::field;
use crate::storage::Backing;
use crate::storage::SlotStore;

/// One generation of a filter: geometry, slot store and block locks.
///
/// The cluster algorithms live in `cluster.rs`; they assume the caller holds
/// the block locks covering every slot they touch.
#[derive(Debug)]
pub(crate) struct Table {
    pub(crate) geometry: Geometry,
    pub(crate) quotienter: Quotienter,
    pub(crate) store: SlotStore,
    pub(crate) locks: BlockLocks,
    /// Trust the cached block offsets. When off, offsets are derived from
    /// block 0 on every lookup.
    pub(crate) offset_hint: bool,
}

impl Table {
    /// Allocates an empty in-memory table.
    pub fn allocate(geometry: Geometry, auto_resize: bool) -> Result<Self, Error> {
        let backing = Backing::zeroed(geometry.total_words())?;
        let table = Self::with_backing(geometry, backing)?;
        for (index, word) in geometry.header_words(auto_resize).into_iter().enumerate() {
            table.store.set_header(index, word);
        }
        log::debug!(
            "allocated table: nslots={}, xnslots={}, key_bits={}, value_bits={}, bytes={}",
            geometry.nslots,
            geometry.xnslots,
            geometry.key_bits,
            geometry.value_bits,
            geometry.total_size_in_bytes()
        );
        Ok(table)
    }

    /// Wraps an existing image; the header is expected to match `geometry`.
    pub fn with_backing(geometry: Geometry, backing: Backing) -> Result<Self, Error> {
        let store = SlotStore::new(backing, &geometry)?;
        Ok(Self {
            quotienter: geometry.quotienter(),
            locks: BlockLocks::new(geometry.nblocks),
            store,
            geometry,
            offset_hint: true,
        })
    }

    #[cfg(test)]
    pub fn header_words(&self) -> [u64; HEADER_WORDS] {
        std::array::from_fn(|index| self.store.header(index))
    }

    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn auto_resize(&self) -> bool {
        self.store.header(field::AUTO_RESIZE) != 0
    }

    pub fn set_auto_resize(&self, enabled: bool) {
        self.store.set_header(field::AUTO_RESIZE, enabled as u64);
    }

    pub fn noccupied_slots(&self) -> u64 {
        self.store.header(field::NOCCUPIED_SLOTS)
    }

    pub fn nelts(&self) -> u64 {
        self.store.header(field::NELTS)
    }

    pub fn ndistinct_elts(&self) -> u64 {
        self.store.header(field::NDISTINCT_ELTS)
    }

    /// Clears every block and counter, keeping geometry and flags.
    pub fn reset(&self) {
        let words = self.store.words().len();
        for index in HEADER_WORDS..words {
            self.store.store(index, 0);
        }
        self.store.set_header(field::NOCCUPIED_SLOTS, 0);
        self.store.set_header(field::NELTS, 0);
        self.store.set_header(field::NDISTINCT_ELTS, 0);
    }
}
