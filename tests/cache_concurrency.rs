// ==============================================
// TIERED CACHE CONCURRENCY TESTS (integration)
// ==============================================
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tiercache::cache::{CacheOptions, TieredCache};

type SharedCache = Arc<TieredCache<u64, u64>>;

fn shared_cache(capacity: usize, frequency_aware: bool) -> SharedCache {
    let options = CacheOptions {
        frequency_aware,
        ..CacheOptions::new(capacity)
    };
    Arc::new(TieredCache::try_with_options(options).unwrap())
}

#[test]
fn concurrent_mixed_workload_stays_bounded() {
    let cache = shared_cache(200, false);
    let num_threads = 8;
    let operations_per_thread = 2_000;
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            let completed = Arc::clone(&completed);

            thread::spawn(move || {
                for i in 0..operations_per_thread {
                    let key = (thread_id * 37 + i * 13) % 500;
                    match i % 5 {
                        0 | 1 => {
                            cache.add_or_update(key, key * 2);
                        },
                        2 | 3 => {
                            if let Some(value) = cache.try_get(&key) {
                                assert_eq!(*value, key * 2, "stale value for key {key}");
                            }
                        },
                        _ => {
                            if i % 20 == 0 {
                                cache.try_remove(&key);
                            } else {
                                cache.contains(&key);
                            }
                        },
                    }
                }
                completed.fetch_add(operations_per_thread as usize, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        completed.load(Ordering::SeqCst),
        (num_threads * operations_per_thread) as usize
    );

    cache.do_maintenance();
    let len = cache.len();
    let capacity = cache.capacity();
    assert!(len <= capacity, "len {len} exceeded capacity {capacity}");

    println!(
        "mixed workload: final len={len}, capacity={capacity}, stats={:?}",
        cache.stats()
    );
}

#[test]
fn concurrent_workload_with_admission_stays_bounded() {
    let cache = shared_cache(64, true);
    let num_threads = 4;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                // Each thread hammers a small hot set and streams a long
                // tail of one-hit wonders past it.
                for round in 0..1_000u64 {
                    for hot_key in 0..8 {
                        cache.get_or_add(hot_key, |k| *k);
                    }
                    let cold_key = 1_000 + thread_id * 10_000 + round;
                    cache.add_or_update(cold_key, cold_key);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    cache.do_maintenance();
    assert!(cache.len() <= cache.capacity());

    // The hot set should have survived the scan.
    let surviving = (0..8).filter(|key| cache.contains(key)).count();
    assert!(
        surviving >= 6,
        "only {surviving}/8 hot keys survived the streaming scan"
    );
}

#[test]
fn same_thread_read_your_writes_under_contention() {
    let cache = shared_cache(500, false);
    let num_threads = 4;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                // Keys are private per thread and the combined key set fits
                // inside the hot quota, so nothing is ever routed or
                // evicted; every read must observe this thread's last
                // write.
                for i in 0..500u64 {
                    let key = thread_id * 10_000 + i % 10;
                    cache.add_or_update(key, i);
                    cache.do_maintenance();
                    let found = cache
                        .try_get(&key)
                        .expect("just-written key must be readable");
                    assert_eq!(*found, i);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_get_or_add_converges_to_one_value() {
    // Fifty keys inside the hot quota of a 1000-entry cache: no evictions,
    // so the first inserted value is the only one ever served.
    let cache: Arc<TieredCache<u64, u64>> = shared_cache(1_000, false);
    let num_threads = 8;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut observed = Vec::new();
                for key in 0..50 {
                    observed.push(*cache.get_or_add(key, |_| thread_id));
                }
                observed
            })
        })
        .collect();

    let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Whatever value won the insert race, every thread saw the same one
    // per key.
    for key in 0..50usize {
        let winner = results[0][key];
        for per_thread in &results {
            assert_eq!(per_thread[key], winner, "diverging value for key {key}");
        }
    }
}

#[test]
fn concurrent_removes_and_inserts_never_resurrect() {
    let cache = shared_cache(100, false);
    let rounds = 500;

    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for i in 0..rounds {
                cache.add_or_update(7, i);
            }
        })
    };
    let remover = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..rounds {
                cache.try_remove(&7);
            }
        })
    };
    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..rounds {
                if let Some(value) = cache.try_get(&7) {
                    assert!(*value < rounds, "impossible value {}", *value);
                }
            }
        })
    };

    writer.join().unwrap();
    remover.join().unwrap();
    reader.join().unwrap();

    cache.do_maintenance();
    assert!(cache.len() <= 1);
}

#[test]
fn clear_under_concurrent_readers() {
    let cache = shared_cache(200, false);
    for key in 0..100 {
        cache.add_or_update(key, key);
    }
    cache.do_maintenance();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..200 {
                    for key in 0..100 {
                        let _ = cache.try_get(&key);
                    }
                }
            })
        })
        .collect();

    cache.clear();

    for reader in readers {
        reader.join().unwrap();
    }

    cache.do_maintenance();
    // Readers running during the clear may have re-triggered nothing;
    // whatever remains must be within capacity and served consistently.
    assert!(cache.len() <= cache.capacity());
}
