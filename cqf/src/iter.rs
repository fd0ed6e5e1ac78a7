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

//! Ordered iteration over stored items.
//!
//! Items come out in slot order, which is quotient order, and within a run
//! in ascending remainder order.

use parking_lot::RwLockReadGuard;

use crate::counter::read_item;
use crate::table::Table;

/// One distinct stored `(key, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    /// The key, or `None` when the hash mode cannot invert fingerprints.
    pub key: Option<u64>,
    pub value: u64,
    /// The fingerprint: the key hash shifted above the value bits.
    pub hash: u64,
    pub count: u64,
    /// Slot of the item's primary remainder, as returned by `unique_index`.
    pub position: u64,
}

/// A stored item under a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stored {
    pub hash: u64,
    pub slot: usize,
    pub count: u64,
}

/// Position of an iteration: the quotient of the current run and the
/// primary slot of the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    run: usize,
    slot: usize,
}

impl Cursor {
    /// A cursor on the first primary slot at or after `position`.
    pub fn new(table: &Table, position: usize) -> Self {
        let done = Self {
            run: table.geometry.nslots,
            slot: table.geometry.xnslots,
        };
        if position >= table.geometry.xnslots {
            return done;
        }

        // Find the run holding `position`, remembering the first run that
        // starts after it.
        let mut later = table.next_occupied(position + 1);
        let mut candidate = table.prev_occupied(position);
        while let Some(run) = candidate {
            if table.run_start(run) <= position {
                break;
            }
            later = Some(run);
            candidate = run.checked_sub(1).and_then(|at| table.prev_occupied(at));
        }

        if let Some(run) = candidate {
            if table.run_end(run) >= position {
                let mut cursor = Self {
                    run,
                    slot: table.run_start(run),
                };
                while !cursor.at_end(table) && cursor.slot < position {
                    cursor.advance(table);
                }
                return cursor;
            }
        }
        match later {
            Some(run) => Self {
                run,
                slot: table.run_start(run),
            },
            None => done,
        }
    }

    pub fn at_end(&self, table: &Table) -> bool {
        self.run >= table.geometry.nslots
    }

    pub fn current(&self, table: &Table) -> Option<Stored> {
        if self.at_end(table) {
            return None;
        }
        let item = read_item(
            &table.store,
            self.slot,
            table.geometry.xnslots,
            table.geometry.bits_per_slot,
        );
        Some(Stored {
            hash: table.quotienter.join(self.run, item.remainder),
            slot: self.slot,
            count: item.count,
        })
    }

    /// Moves to the next primary slot, skipping extension slots.
    pub fn advance(&mut self, table: &Table) {
        if self.at_end(table) {
            return;
        }
        let item = read_item(
            &table.store,
            self.slot,
            table.geometry.xnslots,
            table.geometry.bits_per_slot,
        );
        let last = self.slot + item.len - 1;
        self.slot = last + 1;
        if table.store.is_runend(last) {
            match table.next_occupied(self.run + 1) {
                Some(run) => {
                    self.run = run;
                    self.slot = self.slot.max(run);
                }
                None => self.run = table.geometry.nslots,
            }
        }
    }
}

/// An iterator over the distinct items of a filter, in slot order.
///
/// The iterator holds a shared lock on the filter: inserts, deletes and
/// lookups proceed, but a resize waits until the iterator is dropped.
/// Lookups and statistics on the iterating thread never wait for a queued
/// resize. An insert or delete there may wait for it, and one that itself
/// triggers a resize deadlocks.
pub struct Iter<'a> {
    table: RwLockReadGuard<'a, Table>,
    cursor: Cursor,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(table: RwLockReadGuard<'a, Table>, position: usize) -> Self {
        let cursor = Cursor::new(&table, position);
        Self { table, cursor }
    }

    /// The item under the cursor, or `None` at the end.
    pub fn current(&self) -> Option<Entry> {
        let stored = self.cursor.current(&self.table)?;
        let quotienter = &self.table.quotienter;
        let (key_hash, value) = quotienter.unpack(stored.hash);
        Some(Entry {
            key: quotienter.unhash_key(key_hash),
            value,
            hash: stored.hash,
            count: stored.count,
            position: stored.slot as u64,
        })
    }

    /// Moves to the next item.
    pub fn advance(&mut self) {
        self.cursor.advance(&self.table);
    }

    /// Whether the cursor has passed the last item.
    pub fn at_end(&self) -> bool {
        self.cursor.at_end(&self.table)
    }
}

impl Iterator for Iter<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let entry = self.current()?;
        self.advance();
        Some(entry)
    }
}
