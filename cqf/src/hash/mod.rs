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

//! Fingerprinting and quotienting.
//!
//! A `(key, value)` pair becomes the fingerprint
//! `hash = (H(key) << value_bits) | value`, where `H(key)` has `key_bits` bits.
//! The top `quotient_bits` of `hash` select the home slot and the remaining
//! `bits_per_slot` bits are stored in the slot.

mod invertible;

use crate::error::Error;

/// The default hash seed.
pub const DEFAULT_SEED: u64 = 9001;

/// How keys are turned into fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashMode {
    /// Seeded MurmurHash3; keys cannot be recovered from the filter.
    Default,
    /// Seeded bijection over the fingerprint domain; keys can be recovered.
    Invertible,
    /// Keys are used as fingerprints directly (truncated to `key_bits`).
    None,
}

impl HashMode {
    /// Returns whether original keys can be reconstructed from stored fingerprints.
    pub fn is_invertible(self) -> bool {
        !matches!(self, HashMode::Default)
    }

    pub(crate) fn to_u64(self) -> u64 {
        match self {
            HashMode::Default => 0,
            HashMode::Invertible => 1,
            HashMode::None => 2,
        }
    }

    pub(crate) fn from_u64(raw: u64) -> Result<Self, Error> {
        match raw {
            0 => Ok(HashMode::Default),
            1 => Ok(HashMode::Invertible),
            2 => Ok(HashMode::None),
            _ => Err(Error::malformed("unknown hash mode").with_context("hash_mode", raw)),
        }
    }
}

/// Maps pairs to fingerprints and splits fingerprints into quotient and remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Quotienter {
    mode: HashMode,
    seed: u64,
    key_bits: u32,
    value_bits: u32,
    bits_per_slot: u32,
}

impl Quotienter {
    pub fn new(mode: HashMode, seed: u64, key_bits: u32, value_bits: u32, bits_per_slot: u32) -> Self {
        Self {
            mode,
            seed,
            key_bits,
            value_bits,
            bits_per_slot,
        }
    }

    fn key_mask(&self) -> u64 {
        low_mask(self.key_bits)
    }

    fn value_mask(&self) -> u64 {
        low_mask(self.value_bits)
    }

    /// Hashes a key into the `key_bits` fingerprint domain.
    pub fn hash_key(&self, key: u64) -> u64 {
        let mask = self.key_mask();
        match self.mode {
            HashMode::Default => {
                let seed = (self.seed ^ (self.seed >> 32)) as u32;
                let (h1, _) = mur3::murmurhash3_x64_128(&key.to_le_bytes(), seed);
                h1 & mask
            }
            HashMode::Invertible => invertible::hash(key ^ self.seed, mask),
            HashMode::None => key & mask,
        }
    }

    /// Recovers the key from its fingerprint, if the mode allows it.
    pub fn unhash_key(&self, key_hash: u64) -> Option<u64> {
        let mask = self.key_mask();
        match self.mode {
            HashMode::Default => None,
            HashMode::Invertible => Some((invertible::unhash(key_hash, mask) ^ self.seed) & mask),
            HashMode::None => Some(key_hash & mask),
        }
    }

    /// Fingerprint of a `(key, value)` pair.
    pub fn hash(&self, key: u64, value: u64) -> u64 {
        (self.hash_key(key) << self.value_bits) | (value & self.value_mask())
    }

    /// Splits a fingerprint into `(quotient, remainder)`.
    pub fn split(&self, hash: u64) -> (usize, u64) {
        (
            (hash >> self.bits_per_slot) as usize,
            hash & low_mask(self.bits_per_slot),
        )
    }

    /// Rebuilds the fingerprint stored at `quotient` with slot value `remainder`.
    pub fn join(&self, quotient: usize, remainder: u64) -> u64 {
        ((quotient as u64) << self.bits_per_slot) | remainder
    }

    /// Splits a fingerprint into `(key_hash, value)`.
    pub fn unpack(&self, hash: u64) -> (u64, u64) {
        (hash >> self.value_bits, hash & self.value_mask())
    }
}

/// A mask of the `bits` low bits; `bits` may be 0..=64.
#[inline]
pub(crate) fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
