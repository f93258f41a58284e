//! Idempotency cache for mutating calls
//!
//! A caller opts in by attaching an idempotency key. The first successful call
//! with a given `(key, resource_type)` stores its response; repeats within the
//! TTL get that response back without the handler running again.

use super::BookwireError;
use super::store::{IdempotencyRecord, SharedStore, Store};
use serde_json::Value;
use std::time::{Duration, SystemTime};

const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_LEASE_SECS: u64 = 30;

/// Lifetimes of completed records and in-flight reservations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a completed response is replayed
    pub ttl: Duration,
    /// How long a reservation blocks the key when its request never completes
    pub lease: Duration,
}

impl Default for IdempotencyConfig {
    /// 24 hour TTL, 30 second lease
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            lease: Duration::from_secs(DEFAULT_LEASE_SECS),
        }
    }
}

impl IdempotencyConfig {
    fn validate(&self) -> Result<(), BookwireError> {
        if self.ttl.is_zero() {
            return Err(BookwireError::InvalidConfig(
                "idempotency TTL must be greater than zero".into(),
            ));
        }
        // A zero lease treats every reservation as abandoned, letting
        // concurrent duplicates both miss.
        if self.lease.is_zero() {
            return Err(BookwireError::InvalidConfig(
                "idempotency lease must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A previously stored successful response
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    raw: String,
    data: Value,
}

impl CachedResponse {
    fn parse(raw: String) -> Result<Self, BookwireError> {
        let data = serde_json::from_str(&raw)?;
        Ok(Self { raw, data })
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The canonical JSON exactly as stored
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}

/// Result of [`IdempotencyCache::lookup`]
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// A live response exists; replay it
    Cached(CachedResponse),
    /// No live response; the key is now reserved for the caller
    Miss,
    /// Another request holding the key is still running
    InFlight,
}

/// Render a response in the canonical form used for storage
///
/// Object keys come out in a stable order and timestamps are expected to have
/// been serialized as RFC 3339 strings already, so the same value always
/// produces the same bytes.
pub fn canonical_json(response: &Value) -> Result<String, BookwireError> {
    Ok(serde_json::to_string(response)?)
}

/// Idempotency cache over a shared [`Store`]
pub struct IdempotencyCache<S: Store> {
    store: SharedStore<S>,
    config: IdempotencyConfig,
}

impl<S: Store> IdempotencyCache<S> {
    pub fn new(store: SharedStore<S>, config: IdempotencyConfig) -> Result<Self, BookwireError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Look up `(key, resource_type)` and reserve it on a miss
    ///
    /// - Absent, or present but older than the TTL: the record is replaced by a
    ///   reservation and [`Lookup::Miss`] is returned.
    /// - Completed and live: the stored response is returned verbatim.
    /// - Reserved by a request younger than the lease: [`Lookup::InFlight`].
    ///   An older reservation is considered abandoned and taken over.
    ///
    /// The read and the reservation happen in one atomic unit, so of two
    /// concurrent requests with the same key exactly one sees a miss.
    pub fn lookup(
        &self,
        key: &str,
        resource_type: &str,
        now: SystemTime,
    ) -> Result<Lookup, BookwireError> {
        let config = self.config;

        self.store.atomically(|store| {
            let existing = store
                .get_idempotency(key, resource_type)
                .map_err(BookwireError::Store)?;

            if let Some(record) = existing {
                let age = now
                    .duration_since(record.created_at)
                    .unwrap_or(Duration::ZERO);

                match record.response_data {
                    Some(raw) if age < config.ttl => {
                        return Ok(Lookup::Cached(CachedResponse::parse(raw)?));
                    }
                    None if age < config.lease => return Ok(Lookup::InFlight),
                    _ => {
                        tracing::debug!(key, resource_type, "Idempotency record expired");
                        store
                            .delete_idempotency(key, resource_type)
                            .map_err(BookwireError::Store)?;
                    }
                }
            }

            store
                .put_idempotency(IdempotencyRecord::pending(key, resource_type, now))
                .map_err(BookwireError::Store)?;
            Ok(Lookup::Miss)
        })
    }

    /// Store the successful response for `(key, resource_type)`
    ///
    /// A no-op when the caller supplied no key.
    pub fn store(
        &self,
        key: Option<&str>,
        resource_type: &str,
        response: &Value,
        now: SystemTime,
    ) -> Result<(), BookwireError> {
        let Some(key) = key else {
            return Ok(());
        };

        let raw = canonical_json(response)?;
        self.store.atomically(|store| {
            store
                .put_idempotency(IdempotencyRecord::completed(key, resource_type, raw, now))
                .map_err(BookwireError::Store)
        })
    }

    /// Drop the reservation taken by [`lookup`](Self::lookup) after a failed call
    ///
    /// Completed records are left alone. A no-op when the caller supplied no key.
    pub fn release(&self, key: Option<&str>, resource_type: &str) -> Result<(), BookwireError> {
        let Some(key) = key else {
            return Ok(());
        };

        self.store.atomically(|store| {
            let pending = store
                .get_idempotency(key, resource_type)
                .map_err(BookwireError::Store)?
                .is_some_and(|record| record.is_pending());

            if pending {
                store
                    .delete_idempotency(key, resource_type)
                    .map_err(BookwireError::Store)?;
            }
            Ok(())
        })
    }
}
