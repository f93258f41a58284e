//! Simple metrics collection for observability
//!
//! Atomic counters for every dispatch outcome, with no allocation in the hot
//! path, and a Prometheus text export served by the HTTP gateway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Where a request entered the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Broker,
    Http,
}

/// How the dispatcher settled one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler ran and succeeded
    Ok,
    /// Stored response replayed for an idempotency key
    CacheHit,
    /// Body was not a valid envelope
    Malformed,
    /// Shared secret mismatch
    Unauthorized,
    /// Quota exhausted
    RateLimited,
    /// No handler for `(action, version)`
    UnknownAction,
    /// Idempotency key held by a request still running
    InFlight,
    /// Handler reported a business failure
    DomainError,
    /// Unexpected failure; message forwarded to the dead-letter queue
    DeadLettered,
}

/// Core metrics collected by the server
pub struct Metrics {
    /// Server start time
    start_time: Instant,

    /// Total requests received
    pub total_requests: AtomicU64,

    /// Requests by transport
    pub broker_requests: AtomicU64,
    pub http_requests: AtomicU64,

    /// Dispatch outcomes
    pub replied_ok: AtomicU64,
    pub cache_hits: AtomicU64,
    pub malformed: AtomicU64,
    pub unauthorized: AtomicU64,
    pub rate_limited: AtomicU64,
    pub unknown_action: AtomicU64,
    pub in_flight: AtomicU64,
    pub domain_errors: AtomicU64,
    pub dead_lettered: AtomicU64,

    /// Request latency buckets (in microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,

    /// Histogram support
    pub latency_sum_micros: AtomicU64,
    pub latency_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            broker_requests: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            replied_ok: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            unknown_action: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            domain_errors: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    /// Record a settled request and its latency
    pub fn record(&self, transport: Transport, disposition: Disposition, latency_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        match transport {
            Transport::Broker => self.broker_requests.fetch_add(1, Ordering::Relaxed),
            Transport::Http => self.http_requests.fetch_add(1, Ordering::Relaxed),
        };

        self.counter(disposition).fetch_add(1, Ordering::Relaxed);

        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };

        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    fn counter(&self, disposition: Disposition) -> &AtomicU64 {
        match disposition {
            Disposition::Ok => &self.replied_ok,
            Disposition::CacheHit => &self.cache_hits,
            Disposition::Malformed => &self.malformed,
            Disposition::Unauthorized => &self.unauthorized,
            Disposition::RateLimited => &self.rate_limited,
            Disposition::UnknownAction => &self.unknown_action,
            Disposition::InFlight => &self.in_flight,
            Disposition::DomainError => &self.domain_errors,
            Disposition::DeadLettered => &self.dead_lettered,
        }
    }

    pub fn count(&self, disposition: Disposition) -> u64 {
        self.counter(disposition).load(Ordering::Relaxed)
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        output.push_str("# HELP bookwire_uptime_seconds Time since server start in seconds\n");
        output.push_str("# TYPE bookwire_uptime_seconds gauge\n");
        output.push_str(&format!(
            "bookwire_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        output.push_str("# HELP bookwire_requests_total Total number of requests received\n");
        output.push_str("# TYPE bookwire_requests_total counter\n");
        output.push_str(&format!(
            "bookwire_requests_total {}\n\n",
            self.total_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP bookwire_requests_by_transport Total requests by transport type\n");
        output.push_str("# TYPE bookwire_requests_by_transport counter\n");
        output.push_str(&format!(
            "bookwire_requests_by_transport{{transport=\"broker\"}} {}\n",
            self.broker_requests.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "bookwire_requests_by_transport{{transport=\"http\"}} {}\n\n",
            self.http_requests.load(Ordering::Relaxed)
        ));

        output.push_str("# HELP bookwire_dispatch_total Requests by dispatch outcome\n");
        output.push_str("# TYPE bookwire_dispatch_total counter\n");
        for (label, disposition) in [
            ("ok", Disposition::Ok),
            ("cache_hit", Disposition::CacheHit),
            ("malformed", Disposition::Malformed),
            ("unauthorized", Disposition::Unauthorized),
            ("rate_limited", Disposition::RateLimited),
            ("unknown_action", Disposition::UnknownAction),
            ("in_flight", Disposition::InFlight),
            ("domain_error", Disposition::DomainError),
            ("dead_lettered", Disposition::DeadLettered),
        ] {
            output.push_str(&format!(
                "bookwire_dispatch_total{{outcome=\"{label}\"}} {}\n",
                self.count(disposition)
            ));
        }
        output.push('\n');

        // Latency distribution
        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);

        output.push_str("# HELP bookwire_request_duration_bucket Request latency distribution\n");
        output.push_str("# TYPE bookwire_request_duration_bucket histogram\n");
        output.push_str(&format!(
            "bookwire_request_duration_bucket{{le=\"0.001\"}} {under_1ms}\n"
        ));
        output.push_str(&format!(
            "bookwire_request_duration_bucket{{le=\"0.01\"}} {under_10ms}\n"
        ));
        output.push_str(&format!(
            "bookwire_request_duration_bucket{{le=\"0.1\"}} {under_100ms}\n"
        ));
        output.push_str(&format!(
            "bookwire_request_duration_bucket{{le=\"1\"}} {under_1s}\n"
        ));
        output.push_str(&format!(
            "bookwire_request_duration_bucket{{le=\"+Inf\"}} {}\n",
            self.total_requests.load(Ordering::Relaxed)
        ));

        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str(&format!(
            "bookwire_request_duration_sum {latency_sum_seconds:.6}\n"
        ));
        output.push_str(&format!(
            "bookwire_request_duration_count {}\n",
            self.latency_count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
