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

use std::error::Error as _;

use cqf::CountingQuotientFilter;
use cqf::HashMode;
use cqf::LoadMode;
use cqf::LockMode;
use cqf::error::ErrorKind;
use googletest::assert_that;
use googletest::prelude::contains_substring;
use tempdir::TempDir;

fn small(mode: HashMode, auto_resize: bool) -> CountingQuotientFilter {
    CountingQuotientFilter::builder(1 << 8, 24)
        .hash_mode(mode)
        .auto_resize(auto_resize)
        .build()
        .unwrap()
}

#[test]
fn test_auto_resize_preserves_counts() {
    let _ = env_logger::builder().is_test(true).try_init();
    let filter = small(HashMode::Invertible, true);
    for key in 0..2_000u64 {
        filter.insert(key, 0, key % 4 + 1, LockMode::Wait).unwrap();
    }
    assert!(filter.nslots() >= 1 << 11);
    assert_eq!(filter.key_bits(), 24);
    for key in 0..2_000u64 {
        assert_eq!(filter.count(key, 0), key % 4 + 1);
    }
    assert_eq!(filter.num_distinct_elements(), 2_000);
    let keys: Vec<u64> = filter.iter().map(|e| e.key.unwrap()).collect();
    assert_eq!(keys.len(), 2_000);
}

#[test]
fn test_full_filter_without_auto_resize() {
    let filter = small(HashMode::None, false);
    let mut inserted = 0u64;
    let err = loop {
        match filter.insert(inserted << 16, 0, 1, LockMode::Wait) {
            Ok(()) => inserted += 1,
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    // Inserts stop once 95% of the home slots are in use.
    assert_eq!(inserted, 244);
    assert_eq!(filter.nslots(), 256);
    assert_eq!(filter.count(0, 0), 1);
    assert_eq!(filter.count(inserted << 16, 0), 0);

    filter.set_auto_resize(true);
    filter.insert(inserted << 16, 0, 1, LockMode::Wait).unwrap();
    assert_eq!(filter.nslots(), 512);
    assert_eq!(filter.count(inserted << 16, 0), 1);
}

#[test]
fn test_failed_resize_reports_no_space() {
    let filter = small(HashMode::Default, true);
    let mut stored = Vec::new();
    let err = loop {
        let key: u64 = rand::random();
        match filter.insert(key, 0, 1, LockMode::Wait) {
            Ok(()) => stored.push(key),
            Err(err) => break err,
        }
    };
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    assert_that!(err.to_string(), contains_substring("could not grow"));
    let source = err.source().unwrap().to_string();
    assert_that!(source, contains_substring("invertible"));

    // The filter is unchanged and still usable.
    assert_eq!(filter.nslots(), 256);
    assert_eq!(filter.num_elements(), stored.len() as u64);
    assert!(stored.iter().all(|&key| filter.count(key, 0) >= 1));
    filter.delete(stored[0], 0, LockMode::Wait).unwrap();
}

#[test]
fn test_explicit_resize() {
    let filter = small(HashMode::Invertible, false);
    for key in 0..100u64 {
        filter.insert(key * 31, 0, 2, LockMode::Wait).unwrap();
    }
    filter.resize(1 << 12).unwrap();
    assert_eq!(filter.nslots(), 1 << 12);
    assert_eq!(filter.remainder_bits(), 12);
    for key in 0..100u64 {
        assert_eq!(filter.count(key * 31, 0), 2);
    }

    let err = filter.resize(1 << 24).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    let err = filter.resize(3_000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    assert_eq!(filter.nslots(), 1 << 12);
}

#[test]
fn test_default_mode_cannot_resize() {
    let filter = small(HashMode::Default, false);
    filter.insert(1, 0, 1, LockMode::Wait).unwrap();
    let err = filter.resize(1 << 9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(filter.count(1, 0), 1);
}

#[test]
fn test_mapped_filter_grows_in_its_file() {
    let dir = TempDir::new("cqf").unwrap();
    let path = dir.path().join("grow.cqf");
    small(HashMode::Invertible, true).serialize_to_file(&path).unwrap();

    let filter = CountingQuotientFilter::load(&path, LoadMode::Map).unwrap();
    for key in 0..600u64 {
        filter.insert(key, 0, 1, LockMode::Wait).unwrap();
    }
    assert!(filter.nslots() >= 1 << 10);
    assert!(filter.is_file_backed());
    assert_eq!(filter.path().unwrap(), path);
    filter.flush().unwrap();

    let expected = 17 * 8 + filter.size_in_bytes();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected);
    let reloaded = CountingQuotientFilter::load(&path, LoadMode::Copy).unwrap();
    assert_eq!(reloaded.nslots(), filter.nslots());
    for key in 0..600u64 {
        assert_eq!(reloaded.count(key, 0), 1);
    }
}
