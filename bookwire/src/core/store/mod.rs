use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

mod memory;

pub use memory::{MemoryStore, MemoryStoreBuilder};


/// One admitted request inside a client's sliding window
///
/// Records are inserted once and never updated in place; they leave the store
/// when they fall out of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub client_identity: String,
    pub request_time: SystemTime,
    pub endpoint: String,
}

/// Stored outcome of a mutating call, keyed by `(key, resource_type)`
///
/// `response_data` is `None` while the request that first claimed the key is
/// still running; it holds the canonical JSON of the successful response once
/// that request completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub resource_type: String,
    pub response_data: Option<String>,
    pub created_at: SystemTime,
}

impl IdempotencyRecord {
    /// A reservation held by an in-flight request
    pub fn pending(key: &str, resource_type: &str, now: SystemTime) -> Self {
        Self {
            key: key.to_string(),
            resource_type: resource_type.to_string(),
            response_data: None,
            created_at: now,
        }
    }

    /// A completed record holding the canonical response
    pub fn completed(key: &str, resource_type: &str, response_data: String, now: SystemTime) -> Self {
        Self {
            key: key.to_string(),
            resource_type: resource_type.to_string(),
            response_data: Some(response_data),
            created_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.response_data.is_none()
    }
}

/// Storage port for rate-limit and idempotency records
///
/// Implementations only need plain reads and writes. Atomicity of the
/// check-then-act sequences comes from [`SharedStore::atomically`], which holds
/// exclusive access for the whole sequence.
pub trait Store {
    /// Delete every record of `client_identity` whose request time is at or before `cutoff`
    ///
    /// Returns the number of records removed.
    fn evict_requests_until(
        &mut self,
        client_identity: &str,
        cutoff: SystemTime,
    ) -> Result<usize, String>;

    /// Count the records currently held for `client_identity`
    fn count_requests(&self, client_identity: &str) -> Result<usize, String>;

    /// Request time of the oldest record held for `client_identity`
    fn oldest_request(&self, client_identity: &str) -> Result<Option<SystemTime>, String>;

    /// Insert a new rate-limit record
    fn insert_request(&mut self, record: RateLimitRecord) -> Result<(), String>;

    /// Get the idempotency record for `(key, resource_type)`
    fn get_idempotency(
        &self,
        key: &str,
        resource_type: &str,
    ) -> Result<Option<IdempotencyRecord>, String>;

    /// Insert or replace the idempotency record for its `(key, resource_type)`
    fn put_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), String>;

    /// Delete the idempotency record for `(key, resource_type)`
    ///
    /// Returns whether a record existed.
    fn delete_idempotency(&mut self, key: &str, resource_type: &str) -> Result<bool, String>;
}

/// A store shared by every limiter, cache and dispatcher worker in the process
///
/// Cloning is cheap and yields a handle to the same store.
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: Store> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run `f` with exclusive access to the store
    ///
    /// No other limiter or cache operation can interleave with `f`.
    pub fn atomically<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
