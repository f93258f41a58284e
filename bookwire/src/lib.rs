//! # Bookwire
//!
//! The core of an RPC-over-broker API: callers publish request envelopes to a
//! durable queue, a dispatcher consumes them one at a time and publishes the
//! response to the caller's private reply queue.
//!
//! ## Overview
//!
//! This crate holds the pieces shared by the server and the client:
//! - **Envelopes**: [`RequestEnvelope`] and [`ResponseEnvelope`], the JSON bodies
//!   carried across the broker
//! - **Sliding-window rate limiting**: [`SlidingWindowLimiter`] enforces a quota of
//!   `N` requests per trailing window of `W` seconds, per client identity
//! - **Idempotency cache**: [`IdempotencyCache`] replays the stored response of a
//!   mutating call when the same idempotency key comes back within the TTL
//! - **Storage port**: the [`Store`] trait behind both, with [`MemoryStore`] as the
//!   bundled implementation and [`SharedStore`] providing atomic check-then-act
//! - **Broker adapter**: the [`broker::Broker`] trait, an in-memory broker and
//!   (with the `amqp` feature) a RabbitMQ adapter
//!
//! ## Quick Start
//!
//! ```
//! use bookwire::{Admission, MemoryStore, RateLimitConfig, SharedStore, SlidingWindowLimiter};
//! use std::time::{Duration, SystemTime};
//!
//! let store = SharedStore::new(MemoryStore::new());
//! let limiter =
//!     SlidingWindowLimiter::new(store, RateLimitConfig::new(10, Duration::from_secs(60))).unwrap();
//!
//! match limiter.admit("client:42", "create_book", SystemTime::now()).unwrap() {
//!     Admission::Admitted { remaining } => println!("admitted, {remaining} left"),
//!     Admission::Rejected { retry_after } => println!("retry in {}s", retry_after.as_secs()),
//! }
//! ```
//!
//! ## Idempotent replays
//!
//! ```
//! use bookwire::{IdempotencyCache, IdempotencyConfig, Lookup, MemoryStore, SharedStore};
//! use serde_json::json;
//! use std::time::SystemTime;
//!
//! let cache = IdempotencyCache::new(SharedStore::new(MemoryStore::new()), IdempotencyConfig::default())?;
//! let now = SystemTime::now();
//!
//! assert!(matches!(cache.lookup("key-1", "book_v1", now)?, Lookup::Miss));
//! cache.store(Some("key-1"), "book_v1", &json!({"id": 1}), now)?;
//!
//! match cache.lookup("key-1", "book_v1", now)? {
//!     Lookup::Cached(cached) => assert_eq!(cached.data(), &json!({"id": 1})),
//!     other => panic!("expected a cached response, got {other:?}"),
//! }
//! # Ok::<(), bookwire::BookwireError>(())
//! ```
//!
//! ## Thread Safety
//!
//! Stores are plain `&mut self` data structures. [`SharedStore`] wraps one in a
//! mutex and is the only handle the limiter and cache use, so every
//! evict-count-insert and lookup-reserve sequence runs as one atomic unit.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing
//! - `amqp`: RabbitMQ broker adapter built on `lapin`

pub mod broker;
pub mod core;

pub use core::{
    Admission, BookwireError, CachedResponse, IdempotencyCache, IdempotencyConfig,
    IdempotencyRecord, Lookup, MemoryStore, MemoryStoreBuilder, RateLimitConfig, RateLimitRecord,
    RequestEnvelope, ResponseEnvelope, SharedStore, SlidingWindowLimiter, Status, Store,
};

pub use crate::core::envelope::errors;
pub use crate::core::store;
