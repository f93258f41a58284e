//! Core components of the bookwire RPC layer
//!
//! This module contains the fundamental building blocks:
//! - [`envelope`]: Request and response bodies carried across the broker
//! - [`rate_limiter`]: The sliding-window rate limiter
//! - [`idempotency`]: The idempotency cache for mutating calls
//! - [`store`]: Storage port for rate-limit and idempotency records

pub mod envelope;
pub mod idempotency;
pub mod rate_limiter;
pub mod store;
#[cfg(test)]
mod tests;

pub use envelope::{RequestEnvelope, ResponseEnvelope, Status};
pub use idempotency::{CachedResponse, IdempotencyCache, IdempotencyConfig, Lookup};
pub use rate_limiter::{Admission, RateLimitConfig, SlidingWindowLimiter};
pub use store::{
    IdempotencyRecord, MemoryStore, MemoryStoreBuilder, RateLimitRecord, SharedStore, Store,
};

use std::error::Error;
use std::fmt;

/// Errors raised by the core components and broker adapters
///
/// # Variants
///
/// - [`Store`](BookwireError::Store): The backing store failed a read or write
/// - [`InvalidConfig`](BookwireError::InvalidConfig): A quota, window or TTL is unusable
/// - [`Broker`](BookwireError::Broker): The message broker rejected an operation or went away
/// - [`Serialization`](BookwireError::Serialization): A body or cached response could not be (de)serialized
///
/// # Example
///
/// ```
/// use bookwire::{BookwireError, MemoryStore, RateLimitConfig, SharedStore, SlidingWindowLimiter};
/// use std::time::Duration;
///
/// let store = SharedStore::new(MemoryStore::new());
/// match SlidingWindowLimiter::new(store, RateLimitConfig::new(0, Duration::from_secs(60))) {
///     Err(BookwireError::InvalidConfig(msg)) => println!("rejected: {msg}"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub enum BookwireError {
    /// The backing store failed
    Store(String),
    /// Configuration values are unusable (zero quota, zero window, zero TTL)
    InvalidConfig(String),
    /// The message broker failed
    Broker(String),
    /// JSON encoding or decoding failed
    Serialization(String),
}

impl fmt::Display for BookwireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookwireError::Store(msg) => write!(f, "store error: {msg}"),
            BookwireError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            BookwireError::Broker(msg) => write!(f, "broker error: {msg}"),
            BookwireError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl Error for BookwireError {}

impl From<serde_json::Error> for BookwireError {
    fn from(err: serde_json::Error) -> Self {
        BookwireError::Serialization(err.to_string())
    }
}
