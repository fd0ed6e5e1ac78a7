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

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::filter::FilterBuilder;
use crate::hash::HashMode;
use crate::iter::Iter;
use crate::lock::LockMode;
use crate::metadata::HEADER_BYTES;
use crate::metadata::SLOTS_PER_BLOCK;
use crate::resize::resize;
use crate::serialization::LoadMode;
use crate::table::Table;

/// A counting quotient filter.
///
/// See the [module level documentation](crate::filter) for an overview.
pub struct CountingQuotientFilter {
    // Block operations share the table; resize, serialization and reset take
    // it exclusively. Lookups, statistics and iterators read it recursively,
    // so a thread holding an `Iter` can still query while a writer is queued.
    table: RwLock<Table>,
}

/// Runs `op` while holding the block locks from the home block of `hash`
/// through the block after `reach`. The reach is computed again under the
/// locks; if it moved past them the span is released and taken again, larger.
fn with_block_locks<T>(
    table: &Table,
    hash: u64,
    mode: LockMode,
    reach: impl Fn(&Table) -> usize,
    op: impl FnOnce(&Table) -> T,
) -> Result<T, Error> {
    if mode == LockMode::NoLock {
        return Ok(op(table));
    }
    let locks = &table.locks;
    let (quotient, _) = table.quotienter.split(hash);
    let first = locks.stripe_of_block(quotient / SLOTS_PER_BLOCK);
    let needed = |table: &Table| locks.stripe_of_block(reach(table) / SLOTS_PER_BLOCK + 1);

    let mut last = needed(table);
    loop {
        let span = locks.lock(first, last, mode)?;
        let now = needed(table);
        if span.covers(now) {
            return Ok(op(table));
        }
        drop(span);
        last = now;
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl CountingQuotientFilter {
    /// Returns a builder for a filter of `nslots` slots (a power of two, at
    /// least 64) hashing keys to `key_bits` bits.
    ///
    /// # Examples
    ///
    /// ```
    /// use cqf::CountingQuotientFilter;
    ///
    /// let filter = CountingQuotientFilter::builder(1 << 10, 18).build().unwrap();
    /// assert_eq!(filter.nslots(), 1024);
    /// assert_eq!(filter.remainder_bits(), 8);
    /// ```
    pub fn builder(nslots: usize, key_bits: u32) -> FilterBuilder {
        FilterBuilder::new(nslots, key_bits)
    }

    pub(super) fn from_table(table: Table) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Enables or disables growing the filter when it fills up.
    pub fn set_auto_resize(&self, enabled: bool) {
        self.table.read_recursive().set_auto_resize(enabled);
    }

    pub fn auto_resize(&self) -> bool {
        self.table.read_recursive().auto_resize()
    }

    /// Sets whether lookups trust the cached block offsets. With the hint
    /// off, offsets are derived from the first block on every lookup: much
    /// slower, with identical results.
    pub fn set_offset_hint(&self, enabled: bool) {
        self.table.write().offset_hint = enabled;
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Adds `count` occurrences of `(key, value)`.
    ///
    /// Once the filter reaches [`RESIZE_LOAD_FACTOR`](crate::RESIZE_LOAD_FACTOR)
    /// of its slots, or a shift finds no empty slot, the filter doubles if
    /// auto-resize is on and the insert is retried once.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidArgument`] if `count` is zero or the stored count
    ///   would overflow.
    /// - [`ErrorKind::NoSpace`] if the filter is full and cannot grow. A failed
    ///   resize is attached as the source.
    /// - [`ErrorKind::CouldNotLock`] with [`LockMode::TryOnce`] if a lock is held.
    ///
    /// In all error cases the filter is unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use cqf::{CountingQuotientFilter, HashMode, LockMode};
    ///
    /// let filter = CountingQuotientFilter::builder(1 << 10, 18)
    ///     .hash_mode(HashMode::None)
    ///     .build()
    ///     .unwrap();
    /// filter.insert(0x3F2, 0, 5, LockMode::Wait).unwrap();
    /// assert_eq!(filter.count(0x3F2, 0), 5);
    /// ```
    pub fn insert(&self, key: u64, value: u64, count: u64, mode: LockMode) -> Result<(), Error> {
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument, "count must be positive"));
        }
        let seen = {
            let table = self.table.read();
            match Self::insert_into(&table, key, value, count, mode) {
                Err(err) if err.kind() == ErrorKind::NoSpace && table.auto_resize() => {
                    table.geometry.nslots
                }
                result => return result,
            }
        };
        self.grow(seen)?;
        let table = self.table.read();
        Self::insert_into(&table, key, value, count, mode)
    }

    fn insert_into(table: &Table, key: u64, value: u64, count: u64, mode: LockMode) -> Result<(), Error> {
        if table.is_over_threshold() {
            return Err(table.no_space());
        }
        let hash = table.quotienter.hash(key, value);
        with_block_locks(
            table,
            hash,
            mode,
            |t| t.insert_reach(hash, count),
            |t| t.insert_hash(hash, count),
        )?
    }

    /// Doubles the filter unless another thread already grew it past `seen` slots.
    fn grow(&self, seen: usize) -> Result<(), Error> {
        let mut table = self.table.write();
        if table.geometry.nslots > seen {
            return Ok(());
        }
        let grown = table
            .geometry
            .doubled()
            .and_then(|target| resize(&mut table, target.nslots));
        grown.map_err(|err| {
            log::warn!("failed to grow filter of {seen} slots: {err}");
            Error::new(ErrorKind::NoSpace, "filter is full and could not grow")
                .with_context("nslots", seen)
                .set_source(err)
        })
    }

    /// Removes up to `count` occurrences of `(key, value)` and returns how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidArgument`] if `count` is zero.
    /// - [`ErrorKind::NotFound`] if the pair is not stored.
    /// - [`ErrorKind::CouldNotLock`] with [`LockMode::TryOnce`] if a lock is held.
    pub fn remove(&self, key: u64, value: u64, count: u64, mode: LockMode) -> Result<u64, Error> {
        if count == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument, "count must be positive"));
        }
        let table = self.table.read();
        let hash = table.quotienter.hash(key, value);
        with_block_locks(
            &table,
            hash,
            mode,
            |t| t.remove_reach(hash),
            |t| t.remove_hash(hash, count),
        )?
        .ok_or_else(|| Error::not_found(key, value))
    }

    /// Removes one occurrence of `(key, value)`.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove).
    pub fn delete(&self, key: u64, value: u64, mode: LockMode) -> Result<(), Error> {
        self.remove(key, value, 1, mode).map(|_| ())
    }

    /// Removes every occurrence of `(key, value)` and returns how many there were.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove).
    pub fn delete_key(&self, key: u64, value: u64, mode: LockMode) -> Result<u64, Error> {
        self.remove(key, value, u64::MAX, mode)
    }

    /// Rehashes the filter into `nslots` slots.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Unsupported`] with [`HashMode::Default`].
    /// - [`ErrorKind::ConfigInvalid`] if `nslots` is not a valid slot count for
    ///   the filter's `key_bits`.
    /// - [`ErrorKind::NoSpace`] if the items do not fit.
    /// - [`ErrorKind::Io`] if a mapped filter cannot be rewritten.
    ///
    /// In all error cases the filter is unchanged.
    pub fn resize(&self, nslots: usize) -> Result<(), Error> {
        resize(&mut self.table.write(), nslots)
    }

    /// Clears every item, keeping the geometry.
    pub fn reset(&self) {
        self.table.write().reset();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns how often `(key, value)` was inserted, or 0.
    ///
    /// Takes no block locks: a concurrent mutation nearby may give a stale count.
    pub fn count(&self, key: u64, value: u64) -> u64 {
        let table = self.table.read_recursive();
        let hash = table.quotienter.hash(key, value);
        table.find(hash).map_or(0, |(_, item)| item.count)
    }

    /// Like [`count`](Self::count), but holding the block locks of the run.
    pub fn count_with_lock(&self, key: u64, value: u64, mode: LockMode) -> Result<u64, Error> {
        let table = self.table.read_recursive();
        let hash = table.quotienter.hash(key, value);
        with_block_locks(
            &table,
            hash,
            mode,
            |t| t.lookup_reach(hash),
            |t| t.find(hash).map_or(0, |(_, item)| item.count),
        )
    }

    /// Returns the slot holding `(key, value)`. Distinct stored pairs have
    /// distinct indices until the next mutation shifts their runs.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::NotFound`] if the pair is not stored.
    /// - [`ErrorKind::CouldNotLock`] with [`LockMode::TryOnce`] if a lock is held.
    pub fn unique_index(&self, key: u64, value: u64, mode: LockMode) -> Result<u64, Error> {
        let table = self.table.read_recursive();
        let hash = table.quotienter.hash(key, value);
        with_block_locks(
            &table,
            hash,
            mode,
            |t| t.lookup_reach(hash),
            |t| t.find(hash).map(|(slot, _)| slot as u64),
        )?
        .ok_or_else(|| Error::not_found(key, value))
    }

    /// Iterates over the distinct stored pairs in slot order.
    pub fn iter(&self) -> Iter<'_> {
        self.iter_from(0)
    }

    /// Iterates from the first item whose primary slot is at or after `position`.
    pub fn iter_from(&self, position: u64) -> Iter<'_> {
        let position = usize::try_from(position).unwrap_or(usize::MAX);
        Iter::new(self.table.read_recursive(), position)
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Writes the filter image to `path` and returns the bytes written: the
    /// header plus [`size_in_bytes`](Self::size_in_bytes).
    ///
    /// A filter mapped from `path` itself is flushed instead of rewritten.
    pub fn serialize_to_file(&self, path: impl AsRef<Path>) -> Result<u64, Error> {
        let path = path.as_ref();
        let table = self.table.write();
        let written = match table.path() {
            Some(own) if same_file(own, path) => {
                table.store.flush()?;
                HEADER_BYTES as u64 + table.geometry.total_size_in_bytes()
            }
            _ => table.save(path)?,
        };
        log::info!(
            "serialized filter to {}: {} bytes, {} distinct items",
            path.display(),
            written,
            table.ndistinct_elts()
        );
        Ok(written)
    }

    /// Loads a filter written by [`serialize_to_file`](Self::serialize_to_file).
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Io`] if the file cannot be read or mapped.
    /// - [`ErrorKind::MalformedDeserializeData`] if the header is invalid or
    ///   the file length does not match it.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cqf::{CountingQuotientFilter, HashMode, LoadMode, LockMode};
    /// # let dir = std::env::temp_dir().join(format!("cqf-doc-{}", std::process::id()));
    /// # std::fs::create_dir_all(&dir).unwrap();
    /// let path = dir.join("filter.cqf");
    /// let filter = CountingQuotientFilter::builder(1 << 10, 18).build().unwrap();
    /// filter.insert(7, 0, 4, LockMode::Wait).unwrap();
    /// filter.serialize_to_file(&path).unwrap();
    ///
    /// let mapped = CountingQuotientFilter::load(&path, LoadMode::Map).unwrap();
    /// assert_eq!(mapped.count(7, 0), 4);
    /// # std::fs::remove_dir_all(&dir).unwrap();
    /// ```
    pub fn load(path: impl AsRef<Path>, mode: LoadMode) -> Result<Self, Error> {
        let path = path.as_ref();
        let table = Table::load(path, mode)?;
        log::info!(
            "loaded filter from {} ({:?}): {} slots, {} distinct items",
            path.display(),
            mode,
            table.geometry.nslots,
            table.ndistinct_elts()
        );
        Ok(Self::from_table(table))
    }

    /// Serializes the filter image to a byte vector.
    pub fn serialize(&self) -> Vec<u8> {
        let table = self.table.write();
        let words = table.store.words().len();
        let mut bytes = Vec::with_capacity(words * 8);
        for index in 0..words {
            bytes.extend_from_slice(&table.store.load(index).to_le_bytes());
        }
        bytes
    }

    /// Deserializes a filter from bytes produced by [`serialize`](Self::serialize).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::MalformedDeserializeData`] if the data is
    /// truncated, over-long or has an invalid header.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Table::read_image(bytes, bytes.len() as u64).map(Self::from_table)
    }

    /// Flushes a mapped filter to its file. A no-op for in-memory filters.
    pub fn flush(&self) -> Result<(), Error> {
        self.table.read_recursive().store.flush()
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Home slots; quotients range over `0..nslots`.
    pub fn nslots(&self) -> u64 {
        self.table.read_recursive().geometry.nslots as u64
    }

    /// Home slots plus the overflow slots at the end.
    pub fn xnslots(&self) -> u64 {
        self.table.read_recursive().geometry.xnslots as u64
    }

    pub fn key_bits(&self) -> u32 {
        self.table.read_recursive().geometry.key_bits
    }

    pub fn value_bits(&self) -> u32 {
        self.table.read_recursive().geometry.value_bits
    }

    /// Key fingerprint bits stored in a slot.
    pub fn remainder_bits(&self) -> u32 {
        self.table.read_recursive().geometry.key_remainder_bits
    }

    pub fn hash_mode(&self) -> HashMode {
        self.table.read_recursive().geometry.hash_mode
    }

    pub fn seed(&self) -> u64 {
        self.table.read_recursive().geometry.seed
    }

    /// Size of the key fingerprint domain: `2^key_bits`.
    pub fn range(&self) -> u64 {
        self.table.read_recursive().geometry.range()
    }

    /// Slots in use, counting extension slots.
    pub fn noccupied_slots(&self) -> u64 {
        self.table.read_recursive().noccupied_slots()
    }

    /// Sum of the counts of all stored pairs.
    pub fn num_elements(&self) -> u64 {
        self.table.read_recursive().nelts()
    }

    pub fn num_distinct_elements(&self) -> u64 {
        self.table.read_recursive().ndistinct_elts()
    }

    /// Used slots relative to home slots.
    pub fn load_factor(&self) -> f64 {
        let table = self.table.read_recursive();
        table.noccupied_slots() as f64 / table.geometry.nslots as f64
    }

    /// Bytes of the block array, excluding the header.
    pub fn size_in_bytes(&self) -> u64 {
        self.table.read_recursive().geometry.total_size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read_recursive().ndistinct_elts() == 0
    }

    pub fn is_file_backed(&self) -> bool {
        self.table.read_recursive().path().is_some()
    }

    /// The file a mapped filter lives in.
    pub fn path(&self) -> Option<PathBuf> {
        self.table.read_recursive().path().map(Path::to_path_buf)
    }
}

impl fmt::Debug for CountingQuotientFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read_recursive();
        f.debug_struct("CountingQuotientFilter")
            .field("nslots", &table.geometry.nslots)
            .field("key_bits", &table.geometry.key_bits)
            .field("value_bits", &table.geometry.value_bits)
            .field("hash_mode", &table.geometry.hash_mode)
            .field("noccupied_slots", &table.noccupied_slots())
            .field("nelts", &table.nelts())
            .field("path", &table.path())
            .finish_non_exhaustive()
    }
}
