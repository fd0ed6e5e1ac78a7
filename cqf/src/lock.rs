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

//! Striped block locks.
//!
//! Every [`LOCK_STRIPE_BLOCKS`] consecutive blocks share one mutex. An
//! operation locks a contiguous range of stripes, always in ascending order,
//! so two operations whose ranges overlap cannot deadlock.

use parking_lot::Mutex;
use parking_lot::MutexGuard;

use crate::error::Error;

/// Blocks guarded by one mutex (4096 slots).
pub const LOCK_STRIPE_BLOCKS: usize = 64;

/// How a mutating or locked operation acquires block locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// Take no block locks; the caller guarantees exclusive access.
    NoLock,
    /// Block until the locks are acquired.
    #[default]
    Wait,
    /// Try each lock once and fail with `CouldNotLock` if one is held.
    TryOnce,
}

#[derive(Debug)]
pub(crate) struct BlockLocks {
    stripes: Box<[Mutex<()>]>,
}

impl BlockLocks {
    pub fn new(nblocks: usize) -> Self {
        let n = nblocks.div_ceil(LOCK_STRIPE_BLOCKS).max(1);
        Self {
            stripes: (0..n).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_of_block(&self, block: usize) -> usize {
        (block / LOCK_STRIPE_BLOCKS).min(self.stripes.len() - 1)
    }

    /// Locks stripes `first..=last` (clamped to the table) in ascending order.
    ///
    /// On a `TryOnce` failure every lock taken so far is released again.
    pub fn lock(&self, first: usize, last: usize, mode: LockMode) -> Result<LockSpan<'_>, Error> {
        let last = last.min(self.stripes.len() - 1);
        let first = first.min(last);
        let guards = match mode {
            LockMode::NoLock => return Ok(LockSpan::unlocked()),
            LockMode::Wait => self.stripes[first..=last].iter().map(|m| m.lock()).collect(),
            LockMode::TryOnce => {
                let mut guards = Vec::with_capacity(last - first + 1);
                for (stripe, mutex) in self.stripes[first..=last].iter().enumerate() {
                    match mutex.try_lock() {
                        Some(guard) => guards.push(guard),
                        None => return Err(Error::could_not_lock(first + stripe)),
                    }
                }
                guards
            }
        };
        Ok(LockSpan {
            _guards: guards,
            last,
        })
    }
}

/// Held stripe locks; released on drop.
#[derive(Debug)]
pub(crate) struct LockSpan<'a> {
    _guards: Vec<MutexGuard<'a, ()>>,
    last: usize,
}

impl LockSpan<'_> {
    fn unlocked() -> Self {
        Self {
            _guards: Vec::new(),
            last: usize::MAX,
        }
    }

    /// Whether stripes up to and including `stripe` are held.
    pub fn covers(&self, stripe: usize) -> bool {
        stripe <= self.last
    }
}
