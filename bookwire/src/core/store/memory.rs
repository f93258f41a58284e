use super::{IdempotencyRecord, RateLimitRecord, Store};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
const DEFAULT_RETENTION_SECS: u64 = 24 * 60 * 60;

/// In-process store for rate-limit windows and idempotency records
///
/// Rate-limit records are kept per client identity in arrival order.
/// Both kinds of record are expired lazily by their owners, and additionally
/// swept at a fixed interval so identities that never call again and keys that
/// are never looked up again do not pile up.
///
/// # Example
///
/// ```
/// use bookwire::{MemoryStore, SharedStore};
/// use std::time::Duration;
///
/// let store = MemoryStore::builder()
///     .capacity(10_000)
///     .cleanup_interval(Duration::from_secs(60))
///     .retention(Duration::from_secs(24 * 60 * 60))
///     .window_retention(Duration::from_secs(60))
///     .build();
/// let shared = SharedStore::new(store);
/// ```
pub struct MemoryStore {
    windows: HashMap<String, VecDeque<RateLimitRecord>>,
    idempotency: HashMap<(String, String), IdempotencyRecord>,
    // Track when next sweep is needed
    next_cleanup: SystemTime,
    cleanup_interval: Duration,
    // Idempotency records older than this are swept
    retention: Duration,
    // Rate-limit records older than this are swept
    window_retention: Duration,
    // Number of records removed by the last sweep
    swept_count: usize,
}

/// Builder for configuring a MemoryStore
pub struct MemoryStoreBuilder {
    capacity: usize,
    cleanup_interval: Duration,
    retention: Duration,
    window_retention: Option<Duration>,
}

impl MemoryStore {
    /// Create a new MemoryStore with default configuration
    ///
    /// Uses a capacity of 1000 keys, a 5 minute sweep interval and 24 hour retention.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    fn with_config(
        capacity: usize,
        cleanup_interval: Duration,
        retention: Duration,
        window_retention: Duration,
    ) -> Self {
        let capacity = (capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize;
        MemoryStore {
            windows: HashMap::with_capacity(capacity),
            idempotency: HashMap::with_capacity(capacity),
            next_cleanup: SystemTime::now() + cleanup_interval,
            cleanup_interval,
            retention,
            window_retention,
            swept_count: 0,
        }
    }

    /// Number of client identities with a live window
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Number of idempotency records, pending or completed
    pub fn idempotency_records(&self) -> usize {
        self.idempotency.len()
    }

    #[cfg(test)]
    pub fn swept_count(&self) -> usize {
        self.swept_count
    }

    fn maybe_sweep(&mut self, now: SystemTime) {
        if now < self.next_cleanup {
            return;
        }

        let before = self.idempotency.len() + self.windows.len();
        let retention = self.retention;
        self.idempotency.retain(|_, record| is_live(now, record.created_at, retention));

        let window_retention = self.window_retention;
        self.windows.retain(|_, window| {
            while window
                .front()
                .is_some_and(|record| !is_live(now, record.request_time, window_retention))
            {
                window.pop_front();
            }
            !window.is_empty()
        });

        self.swept_count = before.saturating_sub(self.idempotency.len() + self.windows.len());
        self.next_cleanup = now + self.cleanup_interval;

        if self.swept_count > 0 {
            tracing::debug!("Memory store sweep removed {} entries", self.swept_count);
        }
    }
}

fn is_live(now: SystemTime, created: SystemTime, retention: Duration) -> bool {
    now.duration_since(created)
        .map(|age| age < retention)
        .unwrap_or(true)
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn evict_requests_until(
        &mut self,
        client_identity: &str,
        cutoff: SystemTime,
    ) -> Result<usize, String> {
        let Some(window) = self.windows.get_mut(client_identity) else {
            return Ok(0);
        };

        let before = window.len();
        window.retain(|record| record.request_time > cutoff);
        let evicted = before - window.len();

        if window.is_empty() {
            self.windows.remove(client_identity);
        }

        Ok(evicted)
    }

    fn count_requests(&self, client_identity: &str) -> Result<usize, String> {
        Ok(self.windows.get(client_identity).map_or(0, VecDeque::len))
    }

    fn oldest_request(&self, client_identity: &str) -> Result<Option<SystemTime>, String> {
        Ok(self
            .windows
            .get(client_identity)
            .and_then(|window| window.iter().map(|record| record.request_time).min()))
    }

    fn insert_request(&mut self, record: RateLimitRecord) -> Result<(), String> {
        self.maybe_sweep(record.request_time);

        self.windows
            .entry(record.client_identity.clone())
            .or_default()
            .push_back(record);
        Ok(())
    }

    fn get_idempotency(
        &self,
        key: &str,
        resource_type: &str,
    ) -> Result<Option<IdempotencyRecord>, String> {
        Ok(self
            .idempotency
            .get(&(key.to_string(), resource_type.to_string()))
            .cloned())
    }

    fn put_idempotency(&mut self, record: IdempotencyRecord) -> Result<(), String> {
        self.maybe_sweep(record.created_at);

        self.idempotency
            .insert((record.key.clone(), record.resource_type.clone()), record);
        Ok(())
    }

    fn delete_idempotency(&mut self, key: &str, resource_type: &str) -> Result<bool, String> {
        Ok(self
            .idempotency
            .remove(&(key.to_string(), resource_type.to_string()))
            .is_some())
    }
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            window_retention: None,
        }
    }
}

impl MemoryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected number of client identities and idempotency keys
    ///
    /// The store will allocate 30% more space to reduce rehashing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the interval between sweeps of expired entries
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set how long idempotency records survive a sweep
    ///
    /// Should be at least the idempotency TTL, otherwise a sweep can drop a
    /// record the cache would still replay.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set how long rate-limit records survive a sweep
    ///
    /// Normally the rate-limit window. Defaults to the idempotency retention.
    pub fn window_retention(mut self, retention: Duration) -> Self {
        self.window_retention = Some(retention);
        self
    }

    pub fn build(self) -> MemoryStore {
        let window_retention = self.window_retention.unwrap_or(self.retention);
        MemoryStore::with_config(
            self.capacity,
            self.cleanup_interval,
            self.retention,
            window_retention,
        )
    }
}
