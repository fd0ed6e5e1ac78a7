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

//! Counting encoder.
//!
//! An item occupies one primary slot holding its remainder. A count `n > 1`
//! is stored as `n - 1` in little-endian base `2^bits_per_slot` digits, one
//! digit per extension slot right after the primary, with the most
//! significant digit non-zero. Extension slots carry the extension bit; the
//! first following slot without it ends the chain.

use crate::storage::SlotStore;

/// An item decoded from the slots starting at its primary slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Item {
    pub remainder: u64,
    pub count: u64,
    /// Slots used: the primary plus its extensions.
    pub len: usize,
}

/// Number of slots an item with `count` occupies.
pub(crate) fn item_len(count: u64, bits_per_slot: u32) -> usize {
    debug_assert!(count > 0);
    let extra = count - 1;
    if extra == 0 {
        1
    } else {
        let bits = u64::BITS - extra.leading_zeros();
        1 + bits.div_ceil(bits_per_slot) as usize
    }
}

/// Decodes the item whose primary slot is `pos`. Slots at or past `end` are
/// never read.
pub(crate) fn read_item(store: &SlotStore, pos: usize, end: usize, bits_per_slot: u32) -> Item {
    let remainder = store.slot(pos);
    let mut extra = 0u64;
    let mut len = 1;
    while pos + len < end && store.is_extension(pos + len) {
        let shift = (len as u32 - 1) * bits_per_slot;
        if let Some(digit) = store.slot(pos + len).checked_shl(shift) {
            extra |= digit;
        }
        len += 1;
    }
    Item {
        remainder,
        count: extra.saturating_add(1),
        len,
    }
}

/// Writes the primary slot and extension slots of an item at `pos`, setting
/// the extension bits. Run-end bits are left to the caller.
pub(crate) fn write_item(store: &SlotStore, pos: usize, remainder: u64, count: u64, bits_per_slot: u32) -> usize {
    debug_assert!(count > 0);
    store.set_slot(pos, remainder);
    store.set_extension(pos, false);

    let digit_mask = (1u64 << bits_per_slot) - 1;
    let mut extra = count - 1;
    let mut len = 1;
    while extra != 0 {
        store.set_slot(pos + len, extra & digit_mask);
        store.set_extension(pos + len, true);
        extra = extra.checked_shr(bits_per_slot).unwrap_or(0);
        len += 1;
    }
    debug_assert_eq!(len, item_len(count, bits_per_slot));
    len
}
