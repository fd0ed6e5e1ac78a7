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

use std::collections::HashMap;
use std::collections::HashSet;

use cqf::CountingQuotientFilter;
use cqf::HashMode;
use cqf::LoadMode;
use cqf::LockMode;
use cqf::error::ErrorKind;
use googletest::assert_that;
use googletest::prelude::contains_substring;
use googletest::prelude::eq;
use googletest::prelude::ge;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tempdir::TempDir;

const QBITS: u32 = 12;

fn filter(mode: HashMode) -> CountingQuotientFilter {
    CountingQuotientFilter::builder(1 << QBITS, QBITS + 8)
        .hash_mode(mode)
        .build()
        .unwrap()
}

/// Random keys in the fingerprint domain with random multiplicities.
fn workload(seed: u64, n: usize) -> HashMap<u64, u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model = HashMap::new();
    for _ in 0..n {
        let key = rng.gen_range(0..1u64 << (QBITS + 8));
        *model.entry(key).or_default() += rng.gen_range(1..=200u64);
    }
    model
}

fn fill(filter: &CountingQuotientFilter, model: &HashMap<u64, u64>) {
    for (&key, &count) in model {
        filter.insert(key, 0, count, LockMode::Wait).unwrap();
    }
}

#[test]
fn test_insert_count_delete_scenario() {
    let filter = CountingQuotientFilter::builder(1 << 10, 18)
        .hash_mode(HashMode::None)
        .build()
        .unwrap();
    filter.insert(0x3F2, 0, 5, LockMode::Wait).unwrap();
    assert_eq!(filter.count(0x3F2, 0), 5);
    filter.delete(0x3F2, 0, LockMode::Wait).unwrap();
    assert_eq!(filter.count(0x3F2, 0), 4);
    assert_eq!(filter.num_elements(), 4);
    assert_eq!(filter.num_distinct_elements(), 1);

    let dir = TempDir::new("cqf").unwrap();
    let path = dir.path().join("scenario.cqf");
    filter.serialize_to_file(&path).unwrap();
    for mode in [LoadMode::Copy, LoadMode::Map] {
        let loaded = CountingQuotientFilter::load(&path, mode).unwrap();
        assert_eq!(loaded.count(0x3F2, 0), 4, "{mode:?}");
        assert_eq!(loaded.num_distinct_elements(), 1);
    }
}

#[test]
fn test_counts_round_trip() {
    for mode in [HashMode::Default, HashMode::Invertible, HashMode::None] {
        let filter = filter(mode);
        let model = workload(1, 1_000);
        fill(&filter, &model);
        for (&key, &count) in &model {
            if mode.is_invertible() {
                assert_eq!(filter.count(key, 0), count, "{mode:?} key {key}");
            } else {
                // Hashed fingerprints may collide, which only adds.
                assert_that!(filter.count(key, 0), ge(count));
            }
        }
        assert_eq!(filter.num_elements(), model.values().sum::<u64>());
        if mode.is_invertible() {
            assert_eq!(filter.num_distinct_elements(), model.len() as u64);
        }
    }
}

#[test]
fn test_offset_hint_does_not_change_results() {
    let with_hint = filter(HashMode::Invertible);
    let without_hint = filter(HashMode::Invertible);
    without_hint.set_offset_hint(false);

    let model = workload(2, 600);
    fill(&with_hint, &model);
    fill(&without_hint, &model);
    for (i, &key) in model.keys().enumerate() {
        if i % 4 == 0 {
            with_hint.delete_key(key, 0, LockMode::Wait).unwrap();
            without_hint.delete_key(key, 0, LockMode::Wait).unwrap();
        }
    }
    assert_eq!(with_hint.serialize(), without_hint.serialize());
    for &key in model.keys() {
        assert_eq!(with_hint.count(key, 0), without_hint.count(key, 0));
    }
}

#[test]
fn test_delete_decrements_by_one() {
    let filter = filter(HashMode::Invertible);
    let model = workload(3, 500);
    fill(&filter, &model);
    for (&key, &count) in &model {
        filter.delete(key, 0, LockMode::Wait).unwrap();
        assert_eq!(filter.count(key, 0), count - 1);
    }
    let total: u64 = model.values().map(|c| c - 1).sum();
    assert_eq!(filter.num_elements(), total);
    let survivors = model.values().filter(|&&c| c > 1).count() as u64;
    assert_eq!(filter.num_distinct_elements(), survivors);
}

#[test]
fn test_remove_and_delete_key() {
    let filter = filter(HashMode::Invertible);
    filter.insert(9, 0, 1_000, LockMode::Wait).unwrap();
    filter.insert(10, 0, 3, LockMode::Wait).unwrap();

    assert_eq!(filter.remove(9, 0, 600, LockMode::Wait).unwrap(), 600);
    assert_eq!(filter.count(9, 0), 400);
    assert_eq!(filter.remove(9, 0, 1_000, LockMode::Wait).unwrap(), 400);
    assert_eq!(filter.count(9, 0), 0);

    assert_eq!(filter.delete_key(10, 0, LockMode::Wait).unwrap(), 3);
    assert!(filter.is_empty());
    assert_eq!(filter.noccupied_slots(), 0);
}

#[test]
fn test_missing_items() {
    let filter = filter(HashMode::Invertible);
    filter.insert(1, 0, 1, LockMode::Wait).unwrap();
    assert_eq!(filter.count(2, 0), 0);

    let err = filter.delete(2, 0, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_that!(err.to_string(), contains_substring("not stored"));

    let err = filter.unique_index(2, 0, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    filter.delete(1, 0, LockMode::Wait).unwrap();
    let err = filter.delete(1, 0, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_invalid_counts() {
    let filter = filter(HashMode::None);
    let err = filter.insert(1, 0, 0, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = filter.remove(1, 0, 0, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    filter.insert(1, 0, u64::MAX, LockMode::Wait).unwrap();
    assert_eq!(filter.count(1, 0), u64::MAX);
    let err = filter.insert(1, 0, 1, LockMode::Wait).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(filter.count(1, 0), u64::MAX);
}

#[test]
fn test_values_are_part_of_the_fingerprint() {
    let filter = CountingQuotientFilter::builder(1 << 8, 16)
        .value_bits(4)
        .hash_mode(HashMode::Invertible)
        .build()
        .unwrap();
    filter.insert(5, 1, 2, LockMode::Wait).unwrap();
    filter.insert(5, 2, 3, LockMode::Wait).unwrap();
    assert_eq!(filter.count(5, 1), 2);
    assert_eq!(filter.count(5, 2), 3);
    // Values are truncated to `value_bits`.
    assert_eq!(filter.count(5, 17), 2);

    let entries: Vec<_> = filter.iter().collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.key == Some(5)));
    let values: HashSet<u64> = entries.iter().map(|e| e.value).collect();
    assert_eq!(values, HashSet::from([1, 2]));
}

#[test]
fn test_unique_indexes_are_distinct() {
    let filter = filter(HashMode::Invertible);
    let model = workload(4, 1_500);
    fill(&filter, &model);

    let mut seen = HashSet::new();
    for &key in model.keys() {
        let index = filter.unique_index(key, 0, LockMode::Wait).unwrap();
        assert!(index < filter.xnslots());
        assert!(seen.insert(index), "index {index} reused");
    }
    for entry in filter.iter() {
        let key = entry.key.unwrap();
        assert_eq!(filter.unique_index(key, 0, LockMode::NoLock).unwrap(), entry.position);
    }
}

#[test]
fn test_iterator_visits_every_item_in_order() {
    let filter = filter(HashMode::Invertible);
    let model = workload(5, 1_200);
    fill(&filter, &model);

    let entries: Vec<_> = filter.iter().collect();
    assert_eq!(entries.len(), model.len());
    for pair in entries.windows(2) {
        assert!(pair[0].hash < pair[1].hash);
        assert!(pair[0].position < pair[1].position);
    }
    for entry in &entries {
        let key = entry.key.unwrap();
        assert_that!(entry.count, eq(model[&key]));
        assert_eq!(entry.count, filter.count(key, 0));
    }
}

#[test]
fn test_iterator_restarts_from_any_position() {
    let filter = filter(HashMode::Invertible);
    fill(&filter, &workload(6, 300));
    let entries: Vec<_> = filter.iter().collect();

    let middle = entries[entries.len() / 2];
    let tail: Vec<_> = filter.iter_from(middle.position).collect();
    assert_eq!(tail, entries[entries.len() / 2..]);

    let after_last = entries[entries.len() - 1].position + 1;
    let iter = filter.iter_from(after_last);
    assert!(iter.at_end());
    assert!(iter.current().is_none());

    let mut iter = filter.iter();
    assert_eq!(iter.current(), Some(entries[0]));
    iter.advance();
    assert_eq!(iter.current(), Some(entries[1]));
    assert!(!iter.at_end());
}

#[test]
fn test_default_mode_hides_keys() {
    let filter = filter(HashMode::Default);
    filter.insert(77, 0, 2, LockMode::Wait).unwrap();
    let entries: Vec<_> = filter.iter().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, None);
    assert_eq!(entries[0].count, 2);
}

#[test]
fn test_builder_rejects_bad_geometry() {
    let cases = [
        (1000, 20, 0),
        (32, 20, 0),
        (1 << 10, 10, 0),
        (1 << 10, 64, 0),
        (1 << 10, 40, 30),
    ];
    for (nslots, key_bits, value_bits) in cases {
        let err = CountingQuotientFilter::builder(nslots, key_bits)
            .value_bits(value_bits)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid, "{nslots} {key_bits} {value_bits}");
    }
}

#[test]
fn test_statistics() {
    let filter = CountingQuotientFilter::builder(1 << 10, 18)
        .value_bits(2)
        .hash_mode(HashMode::Invertible)
        .seed(42)
        .build()
        .unwrap();
    assert_eq!(filter.nslots(), 1024);
    assert_eq!(filter.xnslots(), 1344);
    assert_eq!(filter.key_bits(), 18);
    assert_eq!(filter.value_bits(), 2);
    assert_eq!(filter.remainder_bits(), 8);
    assert_eq!(filter.range(), 1 << 18);
    assert_eq!(filter.seed(), 42);
    assert_eq!(filter.hash_mode(), HashMode::Invertible);
    // 21 blocks of 4 metadata words and 10 slot words.
    assert_eq!(filter.size_in_bytes(), 21 * 14 * 8);
    assert!(filter.is_empty());
    assert!(!filter.is_file_backed());
    assert!(!filter.auto_resize());

    filter.insert(3, 1, 300, LockMode::Wait).unwrap();
    // A count of 300 takes one extension slot of 10 bits.
    assert_eq!(filter.noccupied_slots(), 2);
    assert_eq!(filter.load_factor(), 2.0 / 1024.0);

    filter.reset();
    assert!(filter.is_empty());
    assert_eq!(filter.count(3, 1), 0);
    assert_eq!(filter.noccupied_slots(), 0);
    assert_eq!(filter.nslots(), 1024);
}
