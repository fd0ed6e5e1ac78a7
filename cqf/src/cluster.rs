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

//! Runs, clusters and block offsets.
//!
//! All items whose fingerprints share a quotient form a *run*: a contiguous
//! range of slots sorted by remainder, whose last slot carries the run-end
//! bit. Runs appear in quotient order and never start before their quotient.
//! A maximal range of non-empty slots is a *cluster*.
//!
//! The offset of block `b` is the number of slots at the start of `b` used by
//! runs of quotients below `b * 64`. Together with the occupied and run-end
//! bitmaps it lets [`Table::run_end`] find the end of any run by looking at
//! one block and then counting run ends forward.
//!
//! Nothing here takes locks: callers hold the stripes covering the slots an
//! operation reads and writes.

use crate::counter::Item;
use crate::counter::item_len;
use crate::counter::read_item;
use crate::counter::write_item;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::hash::low_mask;
use crate::metadata::SLOTS_PER_BLOCK;
use crate::metadata::field;
use crate::table::Table;

/// Number of set bits of `word` at positions `0..=pos`.
#[inline]
fn bitrank(word: u64, pos: usize) -> usize {
    (word & low_mask(pos as u32 + 1)).count_ones() as usize
}

/// Position of the set bit of `word` with the given zero-based rank.
#[inline]
fn bitselect(mut word: u64, rank: usize) -> Option<usize> {
    for _ in 0..rank {
        if word == 0 {
            return None;
        }
        word &= word - 1;
    }
    (word != 0).then(|| word.trailing_zeros() as usize)
}

impl Table {
    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    pub(crate) fn block_offset(&self, block: usize) -> usize {
        if self.offset_hint {
            self.store.offset(block)
        } else {
            (0..block).fold(0, |offset, b| self.next_offset(b, offset))
        }
    }

    /// The offset of `block + 1`, given the offset of `block`.
    fn next_offset(&self, block: usize, offset: usize) -> usize {
        let runs = self.store.occupieds(block).count_ones() as usize;
        if runs == 0 {
            return offset.saturating_sub(SLOTS_PER_BLOCK);
        }
        let end = self.select_runend(block * SLOTS_PER_BLOCK + offset, runs - 1);
        (end + 1).saturating_sub((block + 1) * SLOTS_PER_BLOCK)
    }

    /// Position of the run end with zero-based `rank` among those at or after `from`.
    fn select_runend(&self, from: usize, mut rank: usize) -> usize {
        let last = self.geometry.xnslots - 1;
        if from > last {
            return last;
        }
        let mut block = from / SLOTS_PER_BLOCK;
        let mut word = self.store.runends(block) & !low_mask((from % SLOTS_PER_BLOCK) as u32);
        loop {
            if let Some(bit) = bitselect(word, rank) {
                return block * SLOTS_PER_BLOCK + bit;
            }
            rank -= word.count_ones() as usize;
            block += 1;
            if block == self.geometry.nblocks {
                return last;
            }
            word = self.store.runends(block);
        }
    }

    /// The last slot used by runs of quotients up to `quotient`, or
    /// `quotient` itself if those runs end before it.
    pub(crate) fn run_end(&self, quotient: usize) -> usize {
        let block = quotient / SLOTS_PER_BLOCK;
        let intra = quotient % SLOTS_PER_BLOCK;
        let offset = self.block_offset(block);
        let rank = bitrank(self.store.occupieds(block), intra);
        if rank == 0 {
            return if offset <= intra {
                quotient
            } else {
                block * SLOTS_PER_BLOCK + offset - 1
            };
        }
        self.select_runend(block * SLOTS_PER_BLOCK + offset, rank - 1)
            .max(quotient)
    }

    /// The slot where the run of `quotient` starts, or would start if the
    /// quotient is not occupied.
    pub(crate) fn run_start(&self, quotient: usize) -> usize {
        if quotient == 0 {
            0
        } else {
            self.run_end(quotient - 1) + 1
        }
    }

    /// A lower bound on how many slots starting at `slot` are in use; zero
    /// exactly when `slot` is empty.
    fn offset_lower_bound(&self, slot: usize) -> usize {
        let block = slot / SLOTS_PER_BLOCK;
        let intra = slot % SLOTS_PER_BLOCK;
        let offset = self.block_offset(block);
        let occupieds = bitrank(self.store.occupieds(block), intra);
        if offset <= intra {
            let runends = (self.store.runends(block) & low_mask(intra as u32)) >> offset;
            occupieds.saturating_sub(runends.count_ones() as usize)
        } else {
            offset - intra + occupieds
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty_slot(&self, slot: usize) -> bool {
        self.offset_lower_bound(slot) == 0
    }

    /// The first empty slot at or after `slot`.
    pub(crate) fn find_first_empty(&self, mut slot: usize) -> Option<usize> {
        while slot < self.geometry.xnslots {
            match self.offset_lower_bound(slot) {
                0 => return Some(slot),
                skip => slot += skip,
            }
        }
        None
    }

    /// The smallest occupied quotient at or after `from`.
    pub(crate) fn next_occupied(&self, from: usize) -> Option<usize> {
        let nslots = self.geometry.nslots;
        if from >= nslots {
            return None;
        }
        let mut block = from / SLOTS_PER_BLOCK;
        let mut word = self.store.occupieds(block) & !low_mask((from % SLOTS_PER_BLOCK) as u32);
        loop {
            if word != 0 {
                let quotient = block * SLOTS_PER_BLOCK + word.trailing_zeros() as usize;
                return (quotient < nslots).then_some(quotient);
            }
            block += 1;
            if block * SLOTS_PER_BLOCK >= nslots {
                return None;
            }
            word = self.store.occupieds(block);
        }
    }

    /// The largest occupied quotient at or before `at`.
    pub(crate) fn prev_occupied(&self, at: usize) -> Option<usize> {
        let at = at.min(self.geometry.nslots - 1);
        let mut block = at / SLOTS_PER_BLOCK;
        let mut word = self.store.occupieds(block) & low_mask((at % SLOTS_PER_BLOCK) as u32 + 1);
        loop {
            if word != 0 {
                return Some(block * SLOTS_PER_BLOCK + 63 - word.leading_zeros() as usize);
            }
            if block == 0 {
                return None;
            }
            block -= 1;
            word = self.store.occupieds(block);
        }
    }

    /// Looks `remainder` up in the run of `quotient`, which must be occupied
    /// and end at `run_end`. On a miss returns the slot where it belongs.
    fn scan_run(&self, quotient: usize, remainder: u64, run_end: usize) -> Result<(usize, Item), usize> {
        let bits_per_slot = self.geometry.bits_per_slot;
        let mut pos = self.run_start(quotient);
        while pos <= run_end {
            let item = read_item(&self.store, pos, run_end + 1, bits_per_slot);
            if item.remainder == remainder {
                return Ok((pos, item));
            }
            if item.remainder > remainder {
                return Err(pos);
            }
            pos += item.len;
        }
        Err(pos)
    }

    /// The primary slot and decoded item of a stored fingerprint.
    pub(crate) fn find(&self, hash: u64) -> Option<(usize, Item)> {
        let (quotient, remainder) = self.quotienter.split(hash);
        if !self.store.is_occupied(quotient) {
            return None;
        }
        let run_end = self.run_end(quotient);
        self.scan_run(quotient, remainder, run_end).ok()
    }

    // ------------------------------------------------------------------------
    // Reach: the last slot an operation may touch, used to size lock spans.
    // ------------------------------------------------------------------------

    pub(crate) fn insert_reach(&self, hash: u64, count: u64) -> usize {
        let (quotient, _) = self.quotienter.split(hash);
        let mut slot = self.run_end(quotient);
        for _ in 0..item_len(count, self.geometry.bits_per_slot) {
            match self.find_first_empty(slot + 1) {
                Some(empty) => slot = empty,
                None => return self.geometry.xnslots - 1,
            }
        }
        slot
    }

    pub(crate) fn remove_reach(&self, hash: u64) -> usize {
        let (quotient, _) = self.quotienter.split(hash);
        self.find_first_empty(self.run_end(quotient) + 1)
            .unwrap_or(self.geometry.xnslots - 1)
    }

    pub(crate) fn lookup_reach(&self, hash: u64) -> usize {
        let (quotient, _) = self.quotienter.split(hash);
        self.run_end(quotient)
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    pub(crate) fn no_space(&self) -> Error {
        Error::no_space(self.geometry.nslots as u64, self.noccupied_slots())
    }

    /// Adds `count` occurrences of a fingerprint.
    ///
    /// Fails with `NoSpace` before touching any slot if the shift would run
    /// past the overflow area.
    pub(crate) fn insert_hash(&self, hash: u64, count: u64) -> Result<(), Error> {
        debug_assert!(count > 0);
        let bits_per_slot = self.geometry.bits_per_slot;
        let (quotient, remainder) = self.quotienter.split(hash);
        let len = item_len(count, bits_per_slot);

        if !self.store.is_occupied(quotient) {
            let pos = self.run_start(quotient);
            let last = self.make_room(pos, len)?;
            write_item(&self.store, pos, remainder, count, bits_per_slot);
            self.mark_runend(pos, len, true);
            self.store.set_occupied(quotient, true);
            self.finish_insert(quotient, last, len, count, true);
            return Ok(());
        }

        let run_end = self.run_end(quotient);
        match self.scan_run(quotient, remainder, run_end) {
            Ok((pos, item)) => {
                let total = item.count.checked_add(count).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidArgument, "count overflows u64")
                        .with_context("stored", item.count)
                        .with_context("added", count)
                })?;
                let new_len = item_len(total, bits_per_slot);
                let grow = new_len - item.len;
                let mut last = pos + new_len - 1;
                if grow > 0 {
                    last = last.max(self.make_room(pos + item.len, grow)?);
                }
                write_item(&self.store, pos, remainder, total, bits_per_slot);
                self.mark_runend(pos, new_len, pos + item.len - 1 == run_end);
                self.finish_insert(quotient, last, grow, count, false);
            }
            Err(pos) => {
                let appends = pos > run_end;
                let last = self.make_room(pos, len)?;
                write_item(&self.store, pos, remainder, count, bits_per_slot);
                self.mark_runend(pos, len, appends);
                if appends {
                    self.store.set_runend(run_end, false);
                }
                self.finish_insert(quotient, last, len, count, true);
            }
        }
        Ok(())
    }

    /// Frees slots `pos..pos + k` by shifting everything up to the k-th
    /// empty slot right. Returns the last slot written.
    fn make_room(&self, pos: usize, k: usize) -> Result<usize, Error> {
        let mut empties = Vec::with_capacity(k);
        let mut from = pos;
        for _ in 0..k {
            let empty = self.find_first_empty(from).ok_or_else(|| self.no_space())?;
            empties.push(empty);
            from = empty + 1;
        }
        // The segment before the j-th empty slot moves by the number of empty
        // slots it has to absorb. Moving from the right keeps sources intact.
        for j in (0..k).rev() {
            let start = if j == 0 { pos } else { empties[j - 1] + 1 };
            let shift = k - j;
            for slot in (start..empties[j]).rev() {
                self.store.copy_slot(slot, slot + shift);
            }
        }
        Ok(empties[k - 1])
    }

    fn mark_runend(&self, pos: usize, len: usize, ends_run: bool) {
        for slot in pos..pos + len - 1 {
            self.store.set_runend(slot, false);
        }
        self.store.set_runend(pos + len - 1, ends_run);
    }

    fn finish_insert(&self, quotient: usize, last: usize, new_slots: usize, count: u64, distinct: bool) {
        self.store.add_header(field::NOCCUPIED_SLOTS, new_slots as u64);
        self.store.add_header(field::NELTS, count);
        if distinct {
            self.store.add_header(field::NDISTINCT_ELTS, 1);
        }
        self.refresh_offsets(quotient, last);
    }

    /// Removes up to `count` occurrences of a fingerprint and returns how
    /// many were removed, or `None` if it is not stored.
    pub(crate) fn remove_hash(&self, hash: u64, count: u64) -> Option<u64> {
        let bits_per_slot = self.geometry.bits_per_slot;
        let (quotient, remainder) = self.quotienter.split(hash);
        let (pos, item) = self.find(hash)?;

        let left = item.count.saturating_sub(count);
        let new_len = if left == 0 {
            0
        } else {
            write_item(&self.store, pos, remainder, left, bits_per_slot)
        };
        let freed = item.len - new_len;
        if freed > 0 {
            self.release_slots(quotient, pos + new_len, freed);
        }

        self.store.sub_header(field::NOCCUPIED_SLOTS, freed as u64);
        self.store.sub_header(field::NELTS, item.count - left);
        if left == 0 {
            self.store.sub_header(field::NDISTINCT_ELTS, 1);
        }
        Some(item.count - left)
    }

    /// Drops slots `from..from + k` from the run of `quotient` and lays the
    /// rest of the cluster out again, moving runs back toward their quotients.
    fn release_slots(&self, quotient: usize, from: usize, k: usize) {
        let start = self.run_start(quotient);
        let end = self
            .find_first_empty(from)
            .unwrap_or(self.geometry.xnslots);

        let mut runs: Vec<(usize, Vec<(u64, bool)>)> = Vec::new();
        let mut run = quotient;
        let mut kept = Vec::new();
        for slot in start..end {
            if !(from..from + k).contains(&slot) {
                kept.push((self.store.slot(slot), self.store.is_extension(slot)));
            }
            if self.store.is_runend(slot) {
                runs.push((run, std::mem::take(&mut kept)));
                match self.next_occupied(run + 1) {
                    Some(next) => run = next,
                    None => break,
                }
            }
        }
        if runs.first().is_some_and(|(_, slots)| slots.is_empty()) {
            self.store.set_occupied(quotient, false);
            runs.remove(0);
        }

        for slot in start..end {
            self.store.clear_slot(slot);
        }
        let mut cursor = start;
        for (run, slots) in runs {
            cursor = cursor.max(run);
            for (value, extension) in slots {
                self.store.set_slot(cursor, value);
                self.store.set_extension(cursor, extension);
                cursor += 1;
            }
            self.store.set_runend(cursor - 1, true);
        }
        self.refresh_offsets(quotient, end - 1);
    }

    /// Recomputes the offsets of the blocks after `quotient`'s block, up to
    /// the block after the one holding `last`.
    fn refresh_offsets(&self, quotient: usize, last: usize) {
        let first = quotient / SLOTS_PER_BLOCK + 1;
        let stop = (last / SLOTS_PER_BLOCK + 1).min(self.geometry.nblocks - 1);
        for block in first..=stop {
            let offset = self.next_offset(block - 1, self.store.offset(block - 1));
            self.store.set_offset(block, offset);
        }
    }
}
