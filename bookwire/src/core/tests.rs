use super::{
    Admission, BookwireError, IdempotencyCache, IdempotencyConfig, Lookup, MemoryStore, RateLimitConfig,
    SharedStore, SlidingWindowLimiter, Store,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

fn limiter(quota: u32, window_secs: u64) -> SlidingWindowLimiter<MemoryStore> {
    SlidingWindowLimiter::new(
        SharedStore::new(MemoryStore::new()),
        RateLimitConfig::new(quota, Duration::from_secs(window_secs)),
    )
    .unwrap()
}

fn cache() -> IdempotencyCache<MemoryStore> {
    IdempotencyCache::new(
        SharedStore::new(MemoryStore::new()),
        IdempotencyConfig::default(),
    )
    .unwrap()
}

#[test]
fn test_quota_enforcement() {
    let limiter = limiter(5, 60);
    let now = SystemTime::now();

    // First N requests are admitted with strictly decreasing remaining quota
    for i in 0..5 {
        let at = now + Duration::from_millis(100 * i);
        let admission = limiter.admit("client", "get_books", at).unwrap();
        assert_eq!(
            admission,
            Admission::Admitted {
                remaining: 4 - i as u32
            }
        );
    }

    // The N+1th is rejected with zero remaining and retry_after in (0, W]
    let admission = limiter
        .admit("client", "get_books", now + Duration::from_secs(1))
        .unwrap();
    assert!(!admission.is_admitted());
    assert_eq!(admission.remaining(), 0);
    let retry = admission.retry_after_secs();
    assert!(retry > 0 && retry <= 60, "retry_after was {retry}");
}

#[test]
fn test_retry_after_counts_from_oldest_record() {
    let limiter = limiter(2, 60);
    let now = SystemTime::now();

    limiter.admit("client", "a", now).unwrap();
    limiter
        .admit("client", "a", now + Duration::from_secs(20))
        .unwrap();

    let admission = limiter
        .admit("client", "a", now + Duration::from_secs(25))
        .unwrap();
    assert_eq!(
        admission,
        Admission::Rejected {
            retry_after: Duration::from_secs(35)
        }
    );
}

#[test]
fn test_retry_after_never_rounds_to_zero() {
    let limiter = limiter(1, 60);
    let now = SystemTime::now();

    limiter.admit("client", "a", now).unwrap();
    let admission = limiter
        .admit("client", "a", now + Duration::from_millis(59_700))
        .unwrap();
    assert_eq!(admission.retry_after_secs(), 1);
}

#[test]
fn test_rejected_requests_are_not_recorded() {
    let limiter = limiter(1, 60);
    let now = SystemTime::now();

    assert!(limiter.admit("client", "a", now).unwrap().is_admitted());
    for i in 1..10 {
        let at = now + Duration::from_secs(i);
        assert!(!limiter.admit("client", "a", at).unwrap().is_admitted());
    }

    // Only the admitted request occupies the window
    let at = now + Duration::from_secs(60);
    assert!(limiter.admit("client", "a", at).unwrap().is_admitted());
}

#[test]
fn test_window_rollover() {
    let limiter = limiter(3, 60);
    let now = SystemTime::now();

    for _ in 0..3 {
        assert!(limiter.admit("client", "a", now).unwrap().is_admitted());
    }
    assert!(!limiter.admit("client", "a", now).unwrap().is_admitted());

    // Exactly W seconds after the first request the window is empty again
    let later = now + Duration::from_secs(60);
    assert_eq!(
        limiter.admit("client", "a", later).unwrap(),
        Admission::Admitted { remaining: 2 }
    );
}

#[test]
fn test_partial_rollover() {
    let limiter = limiter(2, 10);
    let now = SystemTime::now();

    limiter.admit("client", "a", now).unwrap();
    limiter
        .admit("client", "a", now + Duration::from_secs(5))
        .unwrap();

    // At t=10 only the first record has left the window
    let admission = limiter
        .admit("client", "a", now + Duration::from_secs(10))
        .unwrap();
    assert_eq!(admission, Admission::Admitted { remaining: 0 });

    let admission = limiter
        .admit("client", "a", now + Duration::from_secs(11))
        .unwrap();
    assert_eq!(
        admission,
        Admission::Rejected {
            retry_after: Duration::from_secs(4)
        }
    );
}

#[test]
fn test_clients_are_independent() {
    let limiter = limiter(2, 60);
    let now = SystemTime::now();

    assert!(limiter.admit("a", "x", now).unwrap().is_admitted());
    assert!(limiter.admit("a", "x", now).unwrap().is_admitted());
    assert!(!limiter.admit("a", "x", now).unwrap().is_admitted());

    // A saturated client never eats into another client's quota
    assert_eq!(
        limiter.admit("b", "x", now).unwrap(),
        Admission::Admitted { remaining: 1 }
    );
}

#[test]
fn test_invalid_config() {
    let store = SharedStore::new(MemoryStore::new());
    assert!(
        SlidingWindowLimiter::new(store.clone(), RateLimitConfig::new(0, Duration::from_secs(60)))
            .is_err()
    );
    assert!(
        SlidingWindowLimiter::new(store, RateLimitConfig::new(10, Duration::from_millis(500)))
            .is_err()
    );
}

#[test]
fn test_concurrent_admission_never_exceeds_quota() {
    let store = SharedStore::new(MemoryStore::new());
    let limiter = Arc::new(
        SlidingWindowLimiter::new(store.clone(), RateLimitConfig::new(10, Duration::from_secs(60)))
            .unwrap(),
    );
    let admitted = Arc::new(AtomicUsize::new(0));
    let now = SystemTime::now();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..10 {
                    if limiter.admit("shared", "a", now).unwrap().is_admitted() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 10);
    let stored = store.atomically(|s| s.count_requests("shared").unwrap());
    assert_eq!(stored, 10);
}

#[test]
fn test_idempotent_replay_is_byte_identical() {
    let cache = cache();
    let now = SystemTime::now();
    let response = json!({
        "id": 7,
        "title": "Dune",
        "created_at": "2024-05-01T10:00:00.123456Z",
        "isbn": "9780441013593"
    });

    assert_eq!(cache.lookup("k1", "book_v1", now).unwrap(), Lookup::Miss);
    cache.store(Some("k1"), "book_v1", &response, now).unwrap();

    let first = match cache.lookup("k1", "book_v1", now).unwrap() {
        Lookup::Cached(cached) => cached,
        other => panic!("expected cached response, got {other:?}"),
    };
    let second = match cache
        .lookup("k1", "book_v1", now + Duration::from_secs(60))
        .unwrap()
    {
        Lookup::Cached(cached) => cached,
        other => panic!("expected cached response, got {other:?}"),
    };

    assert_eq!(first.data(), &response);
    assert_eq!(first.raw(), second.raw());
    assert_eq!(
        serde_json::to_vec(first.data()).unwrap(),
        serde_json::to_vec(second.data()).unwrap()
    );
}

#[test]
fn test_idempotency_keys_are_scoped_by_resource_type() {
    let cache = cache();
    let now = SystemTime::now();

    cache.lookup("k1", "book_v1", now).unwrap();
    cache
        .store(Some("k1"), "book_v1", &json!({"id": 1}), now)
        .unwrap();

    assert_eq!(cache.lookup("k1", "book_v2", now).unwrap(), Lookup::Miss);
}

#[test]
fn test_ttl_expiry_treats_key_as_new() {
    let cache = cache();
    let now = SystemTime::now();

    cache.lookup("k1", "book_v1", now).unwrap();
    cache
        .store(Some("k1"), "book_v1", &json!({"id": 1}), now)
        .unwrap();

    let after_ttl = now + Duration::from_secs(24 * 60 * 60);
    assert_eq!(cache.lookup("k1", "book_v1", after_ttl).unwrap(), Lookup::Miss);

    // The fresh result overwrites the expired one
    cache
        .store(Some("k1"), "book_v1", &json!({"id": 2}), after_ttl)
        .unwrap();
    match cache.lookup("k1", "book_v1", after_ttl).unwrap() {
        Lookup::Cached(cached) => assert_eq!(cached.data(), &json!({"id": 2})),
        other => panic!("expected cached response, got {other:?}"),
    }
}

#[test]
fn test_store_without_key_is_noop() {
    let store = SharedStore::new(MemoryStore::new());
    let cache = IdempotencyCache::new(store.clone(), IdempotencyConfig::default()).unwrap();

    cache
        .store(None, "book_v1", &json!({"id": 1}), SystemTime::now())
        .unwrap();
    assert_eq!(store.atomically(|s| s.idempotency_records()), 0);
}

#[test]
fn test_concurrent_lookup_sees_in_flight() {
    let cache = cache();
    let now = SystemTime::now();

    assert_eq!(cache.lookup("k1", "book_v1", now).unwrap(), Lookup::Miss);
    assert_eq!(cache.lookup("k1", "book_v1", now).unwrap(), Lookup::InFlight);
}

#[test]
fn test_abandoned_reservation_is_taken_over_after_lease() {
    let cache = cache();
    let now = SystemTime::now();

    assert_eq!(cache.lookup("k1", "book_v1", now).unwrap(), Lookup::Miss);
    let after_lease = now + Duration::from_secs(31);
    assert_eq!(cache.lookup("k1", "book_v1", after_lease).unwrap(), Lookup::Miss);
}

#[test]
fn test_zero_lease_or_ttl_is_rejected() {
    let store = SharedStore::new(MemoryStore::new());
    let zero_lease = IdempotencyConfig {
        lease: Duration::ZERO,
        ..IdempotencyConfig::default()
    };
    assert!(matches!(
        IdempotencyCache::new(store.clone(), zero_lease),
        Err(BookwireError::InvalidConfig(_))
    ));

    let zero_ttl = IdempotencyConfig {
        ttl: Duration::ZERO,
        ..IdempotencyConfig::default()
    };
    assert!(matches!(
        IdempotencyCache::new(store, zero_ttl),
        Err(BookwireError::InvalidConfig(_))
    ));
}

#[test]
fn test_shortest_lease_still_blocks_concurrent_duplicate() {
    let cache = IdempotencyCache::new(
        SharedStore::new(MemoryStore::new()),
        IdempotencyConfig {
            lease: Duration::from_secs(1),
            ..IdempotencyConfig::default()
        },
    )
    .unwrap();
    let now = SystemTime::now();

    assert_eq!(cache.lookup("k", "book_v1", now).unwrap(), Lookup::Miss);
    assert_eq!(cache.lookup("k", "book_v1", now).unwrap(), Lookup::InFlight);
}

#[test]
fn test_release_drops_reservation_but_keeps_completed_records() {
    let store = SharedStore::new(MemoryStore::new());
    let cache = IdempotencyCache::new(store.clone(), IdempotencyConfig::default()).unwrap();
    let now = SystemTime::now();

    // Failed call: no record survives
    cache.lookup("failed", "book_v1", now).unwrap();
    cache.release(Some("failed"), "book_v1").unwrap();
    assert_eq!(store.atomically(|s| s.idempotency_records()), 0);

    // Completed records are not released
    cache.lookup("done", "book_v1", now).unwrap();
    cache
        .store(Some("done"), "book_v1", &json!({"id": 1}), now)
        .unwrap();
    cache.release(Some("done"), "book_v1").unwrap();
    assert!(matches!(
        cache.lookup("done", "book_v1", now).unwrap(),
        Lookup::Cached(_)
    ));
}

#[test]
fn test_concurrent_lookup_grants_single_miss() {
    let cache = Arc::new(cache());
    let misses = Arc::new(AtomicUsize::new(0));
    let now = SystemTime::now();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let misses = Arc::clone(&misses);
            thread::spawn(move || {
                if cache.lookup("shared", "book_v1", now).unwrap() == Lookup::Miss {
                    misses.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(misses.load(Ordering::SeqCst), 1);
}
