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

//! A counting quotient filter: a compact, resizable approximate multiset of
//! `(key, value)` pairs that can be persisted to a file and mapped back in
//! place.
//!
//! ```rust
//! use cqf::{CountingQuotientFilter, HashMode, LockMode};
//!
//! let filter = CountingQuotientFilter::builder(1 << 16, 40)
//!     .hash_mode(HashMode::Invertible)
//!     .auto_resize(true)
//!     .build()
//!     .unwrap();
//!
//! for key in 0..1_000u64 {
//!     filter.insert(key, 0, key % 3 + 1, LockMode::Wait).unwrap();
//! }
//! assert_eq!(filter.count(10, 0), 2);
//! assert_eq!(filter.num_distinct_elements(), 1_000);
//! ```

pub mod error;
pub mod filter;

mod cluster;
mod codec;
mod counter;
mod hash;
mod iter;
mod lock;
mod metadata;
mod resize;
mod serialization;
mod storage;
mod table;

pub use self::filter::CountingQuotientFilter;
pub use self::filter::FilterBuilder;
pub use self::hash::DEFAULT_SEED;
pub use self::hash::HashMode;
pub use self::iter::Entry;
pub use self::iter::Iter;
pub use self::lock::LOCK_STRIPE_BLOCKS;
pub use self::lock::LockMode;
pub use self::resize::RESIZE_LOAD_FACTOR;
pub use self::serialization::LoadMode;
