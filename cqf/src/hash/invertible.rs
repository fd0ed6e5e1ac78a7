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

//! Thomas Wang's 64-bit integer mix restricted to `key_bits` bits.
//!
//! Every step is a bijection modulo `2^k`: multiplications by odd constants,
//! `x ^ (x >> s)` shifts and a final affine step. Working modulo `2^64` and
//! masking at the end is therefore exact, and each step is undone in reverse.

const MUL_STEP_1: u64 = (1 << 21) - 1;
const MUL_STEP_3: u64 = 265;
const MUL_STEP_5: u64 = 21;
const MUL_STEP_7: u64 = (1 << 31) + 1;

const INV_STEP_1: u64 = mod_inverse(MUL_STEP_1);
const INV_STEP_3: u64 = mod_inverse(MUL_STEP_3);
const INV_STEP_5: u64 = mod_inverse(MUL_STEP_5);
const INV_STEP_7: u64 = mod_inverse(MUL_STEP_7);

/// Multiplicative inverse of an odd `a` modulo `2^64` by Newton iteration.
///
/// `a * a == 1 (mod 8)` for odd `a`, and every round doubles the number of
/// correct low bits: 3, 6, 12, 24, 48, 96.
const fn mod_inverse(a: u64) -> u64 {
    let mut x = a;
    let mut i = 0;
    while i < 5 {
        x = x.wrapping_mul(2u64.wrapping_sub(a.wrapping_mul(x)));
        i += 1;
    }
    x
}

#[inline]
fn unxorshift(y: u64, shift: u32) -> u64 {
    let mut x = y;
    for _ in 0..(64 / shift) {
        x = y ^ (x >> shift);
    }
    x
}

/// Forward mix of `key` within `mask` (a `2^k - 1` bit mask).
pub(crate) fn hash(key: u64, mask: u64) -> u64 {
    let mut key = key & mask;
    key = key.wrapping_mul(MUL_STEP_1).wrapping_sub(1) & mask;
    key ^= key >> 24;
    key = key.wrapping_mul(MUL_STEP_3) & mask;
    key ^= key >> 14;
    key = key.wrapping_mul(MUL_STEP_5) & mask;
    key ^= key >> 28;
    key.wrapping_mul(MUL_STEP_7) & mask
}

/// Inverse of [`hash`] for values within `mask`.
pub(crate) fn unhash(hash: u64, mask: u64) -> u64 {
    let mut key = hash & mask;
    key = key.wrapping_mul(INV_STEP_7) & mask;
    key = unxorshift(key, 28);
    key = key.wrapping_mul(INV_STEP_5) & mask;
    key = unxorshift(key, 14);
    key = key.wrapping_mul(INV_STEP_3) & mask;
    key = unxorshift(key, 24);
    key.wrapping_add(1).wrapping_mul(INV_STEP_1) & mask
}
