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
use crate::hash::HashMode;
use crate::hash::Quotienter;

/// Slots per block; also the width of the per-block bitmaps.
pub(crate) const SLOTS_PER_BLOCK: usize = 64;

/// Words in front of the slot words of every block:
/// offset, occupieds, runends, extensions.
pub(crate) const BLOCK_HEADER_WORDS: usize = 4;

pub(crate) const MAGIC: u64 = u64::from_le_bytes(*b"CQFILTER");
pub(crate) const SERIAL_VERSION: u64 = 1;

/// Word index of each header field. The header is stored in front of the
/// blocks, both in memory and on disk.
pub(crate) mod field {
    pub const MAGIC: usize = 0;
    pub const SERIAL_VERSION: usize = 1;
    pub const HASH_MODE: usize = 2;
    pub const SEED: usize = 3;
    pub const NSLOTS: usize = 4;
    pub const XNSLOTS: usize = 5;
    pub const KEY_BITS: usize = 6;
    pub const VALUE_BITS: usize = 7;
    pub const KEY_REMAINDER_BITS: usize = 8;
    pub const BITS_PER_SLOT: usize = 9;
    pub const RANGE: usize = 10;
    pub const NBLOCKS: usize = 11;
    pub const TOTAL_SIZE_IN_BYTES: usize = 12;
    pub const AUTO_RESIZE: usize = 13;
    pub const NOCCUPIED_SLOTS: usize = 14;
    pub const NELTS: usize = 15;
    pub const NDISTINCT_ELTS: usize = 16;
}

pub(crate) const HEADER_WORDS: usize = 17;
pub(crate) const HEADER_BYTES: usize = HEADER_WORDS * 8;

/// Fixed shape of a filter: everything in the header except the counters and
/// the auto-resize flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub nslots: usize,
    pub xnslots: usize,
    pub nblocks: usize,
    pub quotient_bits: u32,
    pub key_bits: u32,
    pub value_bits: u32,
    pub key_remainder_bits: u32,
    pub bits_per_slot: u32,
    pub hash_mode: HashMode,
    pub seed: u64,
}

impl Geometry {
    pub fn new(
        nslots: usize,
        key_bits: u32,
        value_bits: u32,
        hash_mode: HashMode,
        seed: u64,
    ) -> Result<Self, Error> {
        if !nslots.is_power_of_two() || nslots < SLOTS_PER_BLOCK {
            return Err(Error::config_invalid(
                "nslots must be a power of two and at least 64",
            )
            .with_context("nslots", nslots));
        }
        let quotient_bits = nslots.trailing_zeros();
        if key_bits <= quotient_bits || key_bits > 63 {
            return Err(Error::config_invalid(
                "key_bits must be greater than log2(nslots) and at most 63",
            )
            .with_context("key_bits", key_bits)
            .with_context("quotient_bits", quotient_bits));
        }
        if key_bits as u64 + value_bits as u64 > 64 {
            return Err(Error::config_invalid("key_bits + value_bits must not exceed 64")
                .with_context("key_bits", key_bits)
                .with_context("value_bits", value_bits));
        }
        let key_remainder_bits = key_bits - quotient_bits;
        let bits_per_slot = key_remainder_bits + value_bits;
        if bits_per_slot > 63 {
            return Err(Error::config_invalid("slot width must not exceed 63 bits")
                .with_context("bits_per_slot", bits_per_slot));
        }

        let overflow = (10.0 * (nslots as f64).sqrt()) as usize;
        let nblocks = (nslots + overflow).div_ceil(SLOTS_PER_BLOCK);
        Ok(Self {
            nslots,
            xnslots: nblocks * SLOTS_PER_BLOCK,
            nblocks,
            quotient_bits,
            key_bits,
            value_bits,
            key_remainder_bits,
            bits_per_slot,
            hash_mode,
            seed,
        })
    }

    /// Geometry with twice as many slots and the same fingerprint domain.
    pub fn doubled(&self) -> Result<Self, Error> {
        let nslots = self
            .nslots
            .checked_mul(2)
            .ok_or_else(|| Error::config_invalid("nslots overflow").with_context("nslots", self.nslots))?;
        Self::new(
            nslots,
            self.key_bits,
            self.value_bits,
            self.hash_mode,
            self.seed,
        )
    }

    /// Number of distinct key fingerprints, `2^key_bits`.
    pub fn range(&self) -> u64 {
        1u64 << self.key_bits
    }

    pub fn block_words(&self) -> usize {
        BLOCK_HEADER_WORDS + self.bits_per_slot as usize
    }

    pub fn total_size_in_bytes(&self) -> u64 {
        (self.nblocks * self.block_words() * 8) as u64
    }

    /// Words of the whole image: header and blocks.
    pub fn total_words(&self) -> usize {
        HEADER_WORDS + self.nblocks * self.block_words()
    }

    pub fn quotienter(&self) -> Quotienter {
        Quotienter::new(
            self.hash_mode,
            self.seed,
            self.key_bits,
            self.value_bits,
            self.bits_per_slot,
        )
    }

    /// Header words describing this geometry, counters zeroed.
    pub fn header_words(&self, auto_resize: bool) -> [u64; HEADER_WORDS] {
        let mut words = [0u64; HEADER_WORDS];
        words[field::MAGIC] = MAGIC;
        words[field::SERIAL_VERSION] = SERIAL_VERSION;
        words[field::HASH_MODE] = self.hash_mode.to_u64();
        words[field::SEED] = self.seed;
        words[field::NSLOTS] = self.nslots as u64;
        words[field::XNSLOTS] = self.xnslots as u64;
        words[field::KEY_BITS] = self.key_bits as u64;
        words[field::VALUE_BITS] = self.value_bits as u64;
        words[field::KEY_REMAINDER_BITS] = self.key_remainder_bits as u64;
        words[field::BITS_PER_SLOT] = self.bits_per_slot as u64;
        words[field::RANGE] = self.range();
        words[field::NBLOCKS] = self.nblocks as u64;
        words[field::TOTAL_SIZE_IN_BYTES] = self.total_size_in_bytes();
        words[field::AUTO_RESIZE] = auto_resize as u64;
        words
    }

    /// Rebuilds and cross-checks a geometry from header words.
    pub fn from_header_words(words: &[u64; HEADER_WORDS]) -> Result<Self, Error> {
        if words[field::MAGIC] != MAGIC {
            return Err(Error::malformed("not a counting quotient filter image")
                .with_context("magic", format!("{:#018x}", words[field::MAGIC])));
        }
        if words[field::SERIAL_VERSION] != SERIAL_VERSION {
            return Err(Error::malformed("unsupported serial version")
                .with_context("expected", SERIAL_VERSION)
                .with_context("actual", words[field::SERIAL_VERSION]));
        }
        let hash_mode = HashMode::from_u64(words[field::HASH_MODE])?;
        let small = |index: usize, name: &'static str| -> Result<u32, Error> {
            u32::try_from(words[index])
                .map_err(|_| Error::malformed("header field out of range").with_context("field", name))
        };
        let nslots = usize::try_from(words[field::NSLOTS])
            .map_err(|_| Error::malformed("header field out of range").with_context("field", "nslots"))?;
        let geometry = Self::new(
            nslots,
            small(field::KEY_BITS, "key_bits")?,
            small(field::VALUE_BITS, "value_bits")?,
            hash_mode,
            words[field::SEED],
        )
        .map_err(|err| Error::malformed("inconsistent filter geometry").set_source(err))?;

        let expected = geometry.header_words(false);
        for (index, name) in [
            (field::XNSLOTS, "xnslots"),
            (field::KEY_REMAINDER_BITS, "key_remainder_bits"),
            (field::BITS_PER_SLOT, "bits_per_slot"),
            (field::RANGE, "range"),
            (field::NBLOCKS, "nblocks"),
            (field::TOTAL_SIZE_IN_BYTES, "total_size_in_bytes"),
        ] {
            if words[index] != expected[index] {
                return Err(Error::malformed("header field disagrees with filter geometry")
                    .with_context("field", name)
                    .with_context("expected", expected[index])
                    .with_context("actual", words[index]));
            }
        }
        if words[field::AUTO_RESIZE] > 1 {
            return Err(Error::malformed("auto_resize flag must be 0 or 1")
                .with_context("auto_resize", words[field::AUTO_RESIZE]));
        }
        Ok(geometry)
    }
}
