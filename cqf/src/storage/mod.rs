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

//! The slot store: header and blocks laid out as one array of 64-bit words.
//!
//! ```text
//! [ header (17 words) ][ block 0 ][ block 1 ] ...
//! block = [ offset ][ occupieds ][ runends ][ extensions ][ slot words x bits_per_slot ]
//! ```
//!
//! Words are kept little-endian so the same bytes can live in memory or in a
//! mapped file. All accesses are relaxed atomics; mutual exclusion between
//! writers comes from the block locks.

mod backing;

use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

pub(crate) use self::backing::Backing;
pub(crate) use self::backing::MappedFile;
use crate::error::Error;
use crate::hash::low_mask;
use crate::metadata::Geometry;
use crate::metadata::HEADER_WORDS;
use crate::metadata::SLOTS_PER_BLOCK;

const OFFSET_WORD: usize = 0;
const OCCUPIEDS_WORD: usize = 1;
const RUNENDS_WORD: usize = 2;
const EXTENSIONS_WORD: usize = 3;
const SLOTS_WORD: usize = 4;

#[derive(Debug)]
pub(crate) struct SlotStore {
    backing: Backing,
    block_words: usize,
    bits_per_slot: usize,
    slot_mask: u64,
}

impl SlotStore {
    /// Wraps a backing whose length matches `geometry`.
    pub fn new(backing: Backing, geometry: &Geometry) -> Result<Self, Error> {
        let len = backing.words().len();
        if len != geometry.total_words() {
            return Err(Error::malformed("filter image size does not match its header")
                .with_context("expected_words", geometry.total_words())
                .with_context("actual_words", len));
        }
        Ok(Self {
            backing,
            block_words: geometry.block_words(),
            bits_per_slot: geometry.bits_per_slot as usize,
            slot_mask: low_mask(geometry.bits_per_slot),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.backing.path()
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.backing.flush()
    }

    pub fn words(&self) -> &[AtomicU64] {
        self.backing.words()
    }

    #[inline]
    pub fn load(&self, index: usize) -> u64 {
        u64::from_le(self.words()[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, index: usize, value: u64) {
        self.words()[index].store(value.to_le(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Header
    // ------------------------------------------------------------------------

    pub fn header(&self, field: usize) -> u64 {
        debug_assert!(field < HEADER_WORDS);
        self.load(field)
    }

    pub fn set_header(&self, field: usize, value: u64) {
        debug_assert!(field < HEADER_WORDS);
        self.store(field, value);
    }

    pub fn add_header(&self, field: usize, delta: u64) {
        self.update_header(field, |v| v.saturating_add(delta));
    }

    pub fn sub_header(&self, field: usize, delta: u64) {
        self.update_header(field, |v| v.saturating_sub(delta));
    }

    fn update_header(&self, field: usize, f: impl Fn(u64) -> u64) {
        debug_assert!(field < HEADER_WORDS);
        let _ = self.words()[field].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |raw| {
            Some(f(u64::from_le(raw)).to_le())
        });
    }

    // ------------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------------

    #[inline]
    fn block_word(&self, block: usize, word: usize) -> usize {
        HEADER_WORDS + block * self.block_words + word
    }

    pub fn offset(&self, block: usize) -> usize {
        self.load(self.block_word(block, OFFSET_WORD)) as usize
    }

    pub fn set_offset(&self, block: usize, offset: usize) {
        self.store(self.block_word(block, OFFSET_WORD), offset as u64);
    }

    pub fn occupieds(&self, block: usize) -> u64 {
        self.load(self.block_word(block, OCCUPIEDS_WORD))
    }

    pub fn runends(&self, block: usize) -> u64 {
        self.load(self.block_word(block, RUNENDS_WORD))
    }

    #[cfg(test)]
    pub fn extensions(&self, block: usize) -> u64 {
        self.load(self.block_word(block, EXTENSIONS_WORD))
    }

    #[inline]
    fn bit(&self, word: usize, slot: usize) -> bool {
        let block = slot / SLOTS_PER_BLOCK;
        (self.load(self.block_word(block, word)) >> (slot % SLOTS_PER_BLOCK)) & 1 == 1
    }

    #[inline]
    fn set_bit(&self, word: usize, slot: usize, on: bool) {
        let block = slot / SLOTS_PER_BLOCK;
        let mask = (1u64 << (slot % SLOTS_PER_BLOCK)).to_le();
        let cell = &self.words()[self.block_word(block, word)];
        // Byte swapping commutes with bitwise and/or.
        if on {
            cell.fetch_or(mask, Ordering::Relaxed);
        } else {
            cell.fetch_and(!mask, Ordering::Relaxed);
        }
    }

    pub fn is_occupied(&self, quotient: usize) -> bool {
        self.bit(OCCUPIEDS_WORD, quotient)
    }

    pub fn set_occupied(&self, quotient: usize, on: bool) {
        self.set_bit(OCCUPIEDS_WORD, quotient, on)
    }

    pub fn is_runend(&self, slot: usize) -> bool {
        self.bit(RUNENDS_WORD, slot)
    }

    pub fn set_runend(&self, slot: usize, on: bool) {
        self.set_bit(RUNENDS_WORD, slot, on)
    }

    pub fn is_extension(&self, slot: usize) -> bool {
        self.bit(EXTENSIONS_WORD, slot)
    }

    pub fn set_extension(&self, slot: usize, on: bool) {
        self.set_bit(EXTENSIONS_WORD, slot, on)
    }

    /// Reads the `bits_per_slot` wide value of `slot`.
    pub fn slot(&self, slot: usize) -> u64 {
        let (lo, shift) = self.slot_position(slot);
        let mut value = self.load(lo) >> shift;
        if shift + self.bits_per_slot > 64 {
            value |= self.load(lo + 1) << (64 - shift);
        }
        value & self.slot_mask
    }

    pub fn set_slot(&self, slot: usize, value: u64) {
        let value = value & self.slot_mask;
        let (lo, shift) = self.slot_position(slot);
        let word = self.load(lo);
        self.store(lo, (word & !(self.slot_mask << shift)) | (value << shift));
        if shift + self.bits_per_slot > 64 {
            let spill = 64 - shift;
            let hi_mask = self.slot_mask >> spill;
            let word = self.load(lo + 1);
            self.store(lo + 1, (word & !hi_mask) | (value >> spill));
        }
    }

    /// Word index and bit shift of the first bit of `slot`.
    #[inline]
    fn slot_position(&self, slot: usize) -> (usize, usize) {
        let block = slot / SLOTS_PER_BLOCK;
        let bit = (slot % SLOTS_PER_BLOCK) * self.bits_per_slot;
        (self.block_word(block, SLOTS_WORD + bit / 64), bit % 64)
    }

    /// Copies value, run-end and extension bit of `from` onto `to`.
    pub fn copy_slot(&self, from: usize, to: usize) {
        self.set_slot(to, self.slot(from));
        self.set_runend(to, self.is_runend(from));
        self.set_extension(to, self.is_extension(from));
    }

    /// Resets value, run-end and extension bit of `slot`.
    pub fn clear_slot(&self, slot: usize) {
        self.set_slot(slot, 0);
        self.set_runend(slot, false);
        self.set_extension(slot, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashMode;
    use crate::metadata::field;

    fn store(key_bits: u32, value_bits: u32) -> SlotStore {
        let geometry = Geometry::new(1 << 8, key_bits, value_bits, HashMode::None, 0).unwrap();
        let backing = Backing::zeroed(geometry.total_words()).unwrap();
        SlotStore::new(backing, &geometry).unwrap()
    }

    #[test]
    fn test_slots_do_not_clobber_neighbours() {
        // 13-bit slots straddle word boundaries.
        let store = store(19, 2);
        let n = 3 * SLOTS_PER_BLOCK;
        for slot in 0..n {
            store.set_slot(slot, (slot as u64 * 0x9e37) & 0x1fff);
        }
        for slot in 0..n {
            assert_eq!(store.slot(slot), (slot as u64 * 0x9e37) & 0x1fff, "slot {slot}");
        }
        store.set_slot(70, 0x1fff);
        assert_eq!(store.slot(69), (69 * 0x9e37) & 0x1fff);
        assert_eq!(store.slot(71), (71 * 0x9e37) & 0x1fff);
    }

    #[test]
    fn test_bitmaps_are_separate() {
        let store = store(16, 0);
        store.set_occupied(65, true);
        store.set_runend(66, true);
        store.set_extension(67, true);
        assert!(store.is_occupied(65) && !store.is_runend(65) && !store.is_extension(65));
        assert_eq!(store.occupieds(1), 1 << 1);
        assert_eq!(store.runends(1), 1 << 2);
        assert_eq!(store.extensions(1), 1 << 3);
        store.set_runend(66, false);
        assert_eq!(store.runends(1), 0);
    }

    #[test]
    fn test_header_counters() {
        let store = store(16, 0);
        store.add_header(field::NELTS, 5);
        store.sub_header(field::NELTS, 2);
        assert_eq!(store.header(field::NELTS), 3);
        store.sub_header(field::NELTS, 10);
        assert_eq!(store.header(field::NELTS), 0);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let geometry = Geometry::new(1 << 8, 16, 0, HashMode::None, 0).unwrap();
        let backing = Backing::zeroed(geometry.total_words() - 1).unwrap();
        assert!(SlotStore::new(backing, &geometry).is_err());
    }
}
