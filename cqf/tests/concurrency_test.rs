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

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cqf::CountingQuotientFilter;
use cqf::HashMode;
use cqf::LockMode;
use cqf::error::ErrorKind;

const THREADS: u64 = 4;

fn filter(nslots: usize, auto_resize: bool) -> CountingQuotientFilter {
    CountingQuotientFilter::builder(nslots, 28)
        .hash_mode(HashMode::Invertible)
        .auto_resize(auto_resize)
        .build()
        .unwrap()
}

fn insert_retrying(filter: &CountingQuotientFilter, key: u64, count: u64) {
    loop {
        match filter.insert(key, 0, count, LockMode::TryOnce) {
            Ok(()) => return,
            Err(err) if err.kind() == ErrorKind::CouldNotLock => thread::yield_now(),
            Err(err) => panic!("insert of {key} failed: {err}"),
        }
    }
}

#[test]
fn test_parallel_inserts_of_disjoint_keys() {
    let filter = filter(1 << 14, false);
    thread::scope(|scope| {
        for t in 0..THREADS {
            let filter = &filter;
            scope.spawn(move || {
                for key in t * 100_000..t * 100_000 + 1_500 {
                    filter.insert(key, 0, key % 3 + 1, LockMode::Wait).unwrap();
                }
            });
        }
    });

    assert_eq!(filter.num_distinct_elements(), THREADS * 1_500);
    for t in 0..THREADS {
        for key in t * 100_000..t * 100_000 + 1_500 {
            assert_eq!(filter.count(key, 0), key % 3 + 1, "key {key}");
        }
    }
    assert_eq!(filter.iter().count() as u64, THREADS * 1_500);
}

#[test]
fn test_try_once_contention_loses_no_update() {
    let filter = filter(1 << 12, false);
    thread::scope(|scope| {
        for _ in 0..THREADS {
            let filter = &filter;
            scope.spawn(move || {
                for key in 0..1_000u64 {
                    insert_retrying(filter, key, 1);
                }
            });
        }
    });

    for key in 0..1_000u64 {
        assert_eq!(filter.count(key, 0), THREADS);
    }
    assert_eq!(filter.num_elements(), THREADS * 1_000);
    assert_eq!(filter.num_distinct_elements(), 1_000);
}

#[test]
fn test_counts_stay_stable_during_deletes() {
    let filter = filter(1 << 12, false);
    for key in 0..2_000u64 {
        filter.insert(key, 0, 2, LockMode::Wait).unwrap();
    }
    thread::scope(|scope| {
        let deleter = &filter;
        scope.spawn(move || {
            for key in (0..2_000u64).step_by(2) {
                deleter.delete(key, 0, LockMode::Wait).unwrap();
            }
        });
        for _ in 0..2 {
            let reader = &filter;
            scope.spawn(move || {
                for _ in 0..3 {
                    for key in (1..2_000u64).step_by(2) {
                        assert_eq!(reader.count_with_lock(key, 0, LockMode::Wait).unwrap(), 2);
                    }
                }
            });
        }
    });

    for key in 0..2_000u64 {
        assert_eq!(filter.count(key, 0), if key % 2 == 0 { 1 } else { 2 });
    }
    assert_eq!(filter.num_elements(), 3_000);
}

#[test]
fn test_parallel_inserts_grow_the_filter() {
    let _ = env_logger::builder().is_test(true).try_init();
    let filter = filter(1 << 8, true);
    thread::scope(|scope| {
        for t in 0..THREADS {
            let filter = &filter;
            scope.spawn(move || {
                for key in (0..500u64).map(|i| i * THREADS + t) {
                    filter.insert(key, 0, 1, LockMode::Wait).unwrap();
                }
            });
        }
    });

    assert!(filter.nslots() >= 1 << 11);
    assert_eq!(filter.num_distinct_elements(), THREADS * 500);
    for key in 0..THREADS * 500 {
        assert_eq!(filter.count(key, 0), 1, "key {key}");
    }
}

#[test]
fn test_lookups_during_iteration_do_not_wait_for_resize() {
    let filter = Arc::new(filter(1 << 12, false));
    for key in 0..1_500u64 {
        filter.insert(key, 0, key % 2 + 1, LockMode::Wait).unwrap();
    }
    let (iterating, started) = mpsc::channel();
    let (done, finished) = mpsc::channel();

    let reader = Arc::clone(&filter);
    let iterator_done = done.clone();
    thread::spawn(move || {
        let mut iter = reader.iter();
        iterating.send(()).unwrap();
        // Give the resizing thread time to queue for the write lock.
        thread::sleep(Duration::from_millis(200));
        let mut visited = 0u64;
        while let Some(entry) = iter.current() {
            let index = reader.unique_index(entry.key.unwrap(), entry.value, LockMode::Wait).unwrap();
            assert_eq!(index, entry.position);
            assert_eq!(reader.count(entry.key.unwrap(), entry.value), entry.count);
            visited += 1;
            iter.advance();
        }
        assert_eq!(visited, reader.num_distinct_elements());
        drop(iter);
        iterator_done.send("iterate").unwrap();
    });

    let resizer = Arc::clone(&filter);
    thread::spawn(move || {
        started.recv().unwrap();
        resizer.resize(1 << 13).unwrap();
        done.send("resize").unwrap();
    });

    let mut finished_tasks: Vec<&str> = (0..2)
        .map(|_| finished.recv_timeout(Duration::from_secs(10)).expect("a thread is stuck"))
        .collect();
    finished_tasks.sort();
    assert_eq!(finished_tasks, ["iterate", "resize"]);
    assert_eq!(filter.nslots(), 1 << 13);
    for key in 0..1_500u64 {
        assert_eq!(filter.count(key, 0), key % 2 + 1);
    }
}
