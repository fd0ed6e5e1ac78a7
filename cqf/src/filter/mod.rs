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

//! Counting quotient filter: an approximate multiset of `(key, value)` pairs.
//!
//! Each pair is hashed to a fingerprint of `key_bits + value_bits` bits. The
//! high bits (the quotient) pick a home slot and the rest (the remainder) is
//! stored, so a query for a pair never undercounts, and overcounts only when
//! two pairs share a fingerprint.
//!
//! # Usage
//!
//! ```rust
//! use cqf::{CountingQuotientFilter, HashMode, LockMode};
//!
//! let filter = CountingQuotientFilter::builder(1 << 10, 18)
//!     .hash_mode(HashMode::Invertible)
//!     .build()
//!     .unwrap();
//!
//! filter.insert(42, 0, 3, LockMode::Wait).unwrap();
//! filter.delete(42, 0, LockMode::Wait).unwrap();
//! assert_eq!(filter.count(42, 0), 2);
//!
//! let entries: Vec<_> = filter.iter().collect();
//! assert_eq!(entries[0].key, Some(42));
//! ```
//!
//! # Notes
//!
//! - All operations take `&self`; the filter is `Sync` and may be shared
//!   between threads. Mutations lock the blocks they shift.
//! - Growing the filter takes it over exclusively and needs an invertible
//!   hash mode ([`HashMode::Invertible`] or [`HashMode::None`]).

mod builder;
mod sketch;

pub use self::builder::FilterBuilder;
pub use self::sketch::CountingQuotientFilter;
