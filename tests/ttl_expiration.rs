// ==============================================
// TTL EXPIRATION TESTS (integration, real clock)
// ==============================================
//
// These tests use the real monotonic clock and generous margins so they
// hold on slow CI machines: an entry only ever becomes *more* expired as
// time passes, so sleeping well past the deadline is safe, and liveness
// checks use TTLs far longer than any plausible scheduling delay.
use std::thread;
use std::time::Duration;

use tiercache::cache::{CacheOptions, TieredCache};
use tiercache::policy::expiry::{ExpireAfterAccess, ExpireAfterWrite};

fn write_expiry_cache(
    capacity: usize,
    ttl: Duration,
) -> TieredCache<u64, String, ExpireAfterWrite> {
    let policy = ExpireAfterWrite::new(ttl).unwrap();
    TieredCache::with_policy(CacheOptions::new(capacity), policy).unwrap()
}

#[test]
fn entry_expires_after_write_ttl() {
    let cache = write_expiry_cache(9, Duration::from_millis(200));

    cache.get_or_add(1, |_| "value".to_string());
    thread::sleep(Duration::from_millis(500));

    assert_eq!(cache.try_get(&1), None);
}

#[test]
fn entry_is_served_inside_generous_ttl() {
    let cache = write_expiry_cache(9, Duration::from_secs(120));

    cache.get_or_add(1, |_| "value".to_string());
    thread::sleep(Duration::from_millis(20));

    assert_eq!(cache.try_get(&1).as_deref(), Some(&"value".to_string()));
}

#[test]
fn access_expiry_is_refreshed_by_reads() {
    let policy = ExpireAfterAccess::new(Duration::from_secs(120)).unwrap();
    let cache: TieredCache<u64, String, _> =
        TieredCache::with_policy(CacheOptions::new(9), policy).unwrap();

    cache.add_or_update(1, "value".to_string());
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(5));
        assert!(cache.try_get(&1).is_some(), "entry died inside its window");
    }
}

#[test]
fn maintenance_removes_expired_entries_from_the_index() {
    let cache = write_expiry_cache(30, Duration::from_millis(100));

    for key in 0..6 {
        cache.add_or_update(key, key.to_string());
    }
    cache.do_maintenance();
    assert_eq!(cache.len(), 6);

    thread::sleep(Duration::from_millis(400));

    // A best-effort pass: repeat until nothing is left, as the contract
    // requires of callers that need a strict bound.
    let mut passes = 0;
    while cache.len() > 0 && passes < 10 {
        cache.trim_expired();
        passes += 1;
    }
    assert_eq!(cache.len(), 0, "expired entries survived {passes} trim passes");
}

#[test]
fn expired_entry_is_replaced_by_get_or_add() {
    let cache = write_expiry_cache(9, Duration::from_millis(100));

    cache.add_or_update(1, "old".to_string());
    thread::sleep(Duration::from_millis(300));
    assert_eq!(cache.try_get(&1), None);

    let value = cache.get_or_add(1, |_| "fresh".to_string());
    assert_eq!(*value, "fresh");
    assert_eq!(cache.try_get(&1).as_deref(), Some(&"fresh".to_string()));
}
