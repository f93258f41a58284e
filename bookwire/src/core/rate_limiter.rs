//! Sliding-window rate limiter
//!
//! Each client identity gets an independent window of the trailing `W` seconds
//! holding at most `N` admitted requests. Windows are re-read from the shared
//! store on every call, so several dispatcher workers enforce one quota.

use super::BookwireError;
use super::store::{RateLimitRecord, SharedStore, Store};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_QUOTA: u32 = 10;
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Quota and window length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per window
    pub quota: u32,
    /// Length of the trailing window
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self { quota, window }
    }

    fn validate(&self) -> Result<(), BookwireError> {
        if self.quota == 0 {
            return Err(BookwireError::InvalidConfig(
                "rate limit quota must be greater than zero".into(),
            ));
        }
        if self.window.as_secs() == 0 {
            return Err(BookwireError::InvalidConfig(
                "rate limit window must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// 10 requests per 60 seconds
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA, Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

/// Decision for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded; `remaining` more fit in the current window
    Admitted { remaining: u32 },
    /// The window is full; the oldest record leaves it after `retry_after`
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }

    /// Remaining quota (zero when rejected)
    pub fn remaining(&self) -> u32 {
        match self {
            Admission::Admitted { remaining } => *remaining,
            Admission::Rejected { .. } => 0,
        }
    }

    /// Whole seconds to wait before retrying (zero when admitted)
    pub fn retry_after_secs(&self) -> u64 {
        match self {
            Admission::Admitted { .. } => 0,
            Admission::Rejected { retry_after } => retry_after.as_secs(),
        }
    }
}

/// Sliding-window rate limiter over a shared [`Store`]
///
/// # Example
///
/// ```
/// use bookwire::{Admission, MemoryStore, RateLimitConfig, SharedStore, SlidingWindowLimiter};
/// use std::time::{Duration, SystemTime};
///
/// let limiter = SlidingWindowLimiter::new(
///     SharedStore::new(MemoryStore::new()),
///     RateLimitConfig::new(2, Duration::from_secs(60)),
/// )?;
///
/// let now = SystemTime::now();
/// assert_eq!(limiter.admit("c1", "get_books", now)?, Admission::Admitted { remaining: 1 });
/// assert_eq!(limiter.admit("c1", "get_books", now)?, Admission::Admitted { remaining: 0 });
/// assert!(!limiter.admit("c1", "get_books", now)?.is_admitted());
///
/// // Other clients are unaffected
/// assert!(limiter.admit("c2", "get_books", now)?.is_admitted());
/// # Ok::<(), bookwire::BookwireError>(())
/// ```
pub struct SlidingWindowLimiter<S: Store> {
    store: SharedStore<S>,
    config: RateLimitConfig,
}

impl<S: Store> SlidingWindowLimiter<S> {
    /// Create a limiter, rejecting a zero quota or a window shorter than a second
    pub fn new(store: SharedStore<S>, config: RateLimitConfig) -> Result<Self, BookwireError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record one request from `client_identity`
    ///
    /// Eviction, counting and insertion run as one atomic unit against the
    /// store, so concurrent requests from the same identity can never both be
    /// admitted past the quota.
    ///
    /// A record whose age equals the window has left it. The retry delay is
    /// the time until the oldest record leaves, rounded down to whole seconds
    /// but never below one second.
    pub fn admit(
        &self,
        client_identity: &str,
        endpoint: &str,
        now: SystemTime,
    ) -> Result<Admission, BookwireError> {
        let quota = self.config.quota as usize;
        let window = self.config.window;
        let cutoff = now.checked_sub(window).unwrap_or(UNIX_EPOCH);

        self.store.atomically(|store| {
            store
                .evict_requests_until(client_identity, cutoff)
                .map_err(BookwireError::Store)?;

            let count = store
                .count_requests(client_identity)
                .map_err(BookwireError::Store)?;

            if count >= quota {
                let oldest = store
                    .oldest_request(client_identity)
                    .map_err(BookwireError::Store)?
                    .unwrap_or(now);
                let elapsed = now.duration_since(oldest).unwrap_or(Duration::ZERO);
                let retry_secs = window.saturating_sub(elapsed).as_secs().max(1);

                tracing::debug!(
                    client = client_identity,
                    endpoint,
                    retry_after = retry_secs,
                    "Rate limit exceeded"
                );

                return Ok(Admission::Rejected {
                    retry_after: Duration::from_secs(retry_secs),
                });
            }

            store
                .insert_request(RateLimitRecord {
                    client_identity: client_identity.to_string(),
                    request_time: now,
                    endpoint: endpoint.to_string(),
                })
                .map_err(BookwireError::Store)?;

            Ok(Admission::Admitted {
                remaining: (quota - count - 1) as u32,
            })
        })
    }
}
