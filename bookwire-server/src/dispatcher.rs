//! Dispatcher: the consume, dispatch and acknowledge loop
//!
//! Every request goes through the same pipeline whichever transport carried it:
//!
//! ```text
//! parse ─► auth ─► rate limit ─► resolve ─► idempotency ─► handler ─► reply
//!   │        │          │            │            │            │
//!   └────────┴──────────┴────────────┴────────────┴──► error reply
//!                                                              └──► dead letter
//! ```
//!
//! Malformed bodies, auth failures, rate-limit rejections, unknown actions and
//! domain errors become `error` replies and the message is acked. Anything
//! unexpected (a store failure, a handler returning
//! [`HandlerError::Unexpected`] or panicking) is not answered: the original
//! message is forwarded to the dead-letter queue, then acked. The caller times
//! out.

use crate::handler::{HandlerError, HandlerRegistry};
use crate::metrics::{Disposition, Metrics, Transport};
use anyhow::{Result, anyhow};
use bookwire::broker::{
    Broker, CLIENT_ID_HEADER, DEAD_LETTER_QUEUE, DEATH_REASON_HEADER, Delivery,
    LIMIT_REMAINING_HEADER, Message, QueueSpec, REQUEST_QUEUE, RETRY_AFTER_HEADER,
};
use bookwire::{
    Admission, BookwireError, IdempotencyCache, IdempotencyConfig, Lookup, MemoryStore,
    RateLimitConfig, RequestEnvelope, ResponseEnvelope, SharedStore, SlidingWindowLimiter, Store,
    errors,
};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Shared secret accepted when none is configured
pub const DEFAULT_API_KEY: &str = "supersecretapikey";

/// Identity used for rate limiting when a request carries neither a client id nor a reply address
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Dispatcher settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Shared secret every request must carry
    pub api_key: String,
    /// Queue requests are consumed from
    pub request_queue: String,
    /// Queue unprocessable messages are forwarded to
    pub dead_letter_queue: String,
    /// Unsettled deliveries allowed per worker
    pub prefetch: u16,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            api_key: DEFAULT_API_KEY.to_string(),
            request_queue: REQUEST_QUEUE.to_string(),
            dead_letter_queue: DEAD_LETTER_QUEUE.to_string(),
            prefetch: 1,
        }
    }
}

/// A response the dispatcher decided to send
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub disposition: Disposition,
    /// `Ok(data)` for an `ok` response, `Err(message)` for an `error` response
    pub result: Result<Value, String>,
    /// Rate-limit decision, once the request got that far
    pub admission: Option<Admission>,
}

impl Reply {
    fn ok(disposition: Disposition, data: Value) -> Self {
        Self {
            disposition,
            result: Ok(data),
            admission: None,
        }
    }

    fn error(disposition: Disposition, message: impl Into<String>) -> Self {
        Self {
            disposition,
            result: Err(message.into()),
            admission: None,
        }
    }

    fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = Some(admission);
        self
    }
}

/// What happened to one request
#[derive(Debug)]
pub enum Outcome {
    /// A response was produced
    Replied(Reply),
    /// An unexpected failure; the message must go to the dead-letter queue
    DeadLettered(anyhow::Error),
}

/// Routes requests to handlers behind the auth, rate-limit and idempotency checks
pub struct Dispatcher<S: Store = MemoryStore> {
    config: DispatcherConfig,
    registry: HandlerRegistry,
    limiter: SlidingWindowLimiter<S>,
    cache: IdempotencyCache<S>,
    metrics: Arc<Metrics>,
}

impl<S: Store + Send + 'static> Dispatcher<S> {
    /// Create a dispatcher whose limiter and cache share `store`
    pub fn new(
        config: DispatcherConfig,
        registry: HandlerRegistry,
        store: SharedStore<S>,
        rate_limit: RateLimitConfig,
        idempotency: IdempotencyConfig,
    ) -> Result<Self, BookwireError> {
        Ok(Self {
            config,
            registry,
            limiter: SlidingWindowLimiter::new(store.clone(), rate_limit)?,
            cache: IdempotencyCache::new(store, idempotency)?,
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run the pipeline on a raw request body
    pub async fn execute_body(&self, body: &[u8], identity: &str, now: SystemTime) -> Outcome {
        match RequestEnvelope::from_slice(body) {
            Ok(envelope) => self.execute(envelope, identity, now).await,
            Err(err) => {
                tracing::debug!("Rejecting malformed request: {}", err);
                Outcome::Replied(Reply::error(Disposition::Malformed, errors::INVALID_JSON))
            }
        }
    }

    /// Run the pipeline on a decoded request
    pub async fn execute(
        &self,
        envelope: RequestEnvelope,
        identity: &str,
        now: SystemTime,
    ) -> Outcome {
        match self.dispatch(envelope, identity, now).await {
            Ok(reply) => Outcome::Replied(reply),
            Err(err) => Outcome::DeadLettered(err),
        }
    }

    async fn dispatch(
        &self,
        envelope: RequestEnvelope,
        identity: &str,
        now: SystemTime,
    ) -> Result<Reply> {
        if envelope.auth_token != self.config.api_key {
            tracing::debug!(request_id = %envelope.request_id, "Rejecting request with invalid API key");
            return Ok(Reply::error(
                Disposition::Unauthorized,
                errors::INVALID_API_KEY,
            ));
        }

        let admission = self.limiter.admit(identity, &envelope.action, now)?;
        if !admission.is_admitted() {
            return Ok(
                Reply::error(Disposition::RateLimited, errors::RATE_LIMIT_EXCEEDED)
                    .with_admission(admission),
            );
        }

        let reply = self.invoke(envelope, now).await?;
        Ok(reply.with_admission(admission))
    }

    async fn invoke(&self, envelope: RequestEnvelope, now: SystemTime) -> Result<Reply> {
        let Some(route) = self.registry.resolve(&envelope.action, &envelope.version) else {
            tracing::debug!(
                action = %envelope.action,
                version = %envelope.version,
                "No handler registered"
            );
            return Ok(Reply::error(
                Disposition::UnknownAction,
                errors::UNKNOWN_ACTION,
            ));
        };

        // Only idempotent routes called with a non-empty key touch the cache
        let key = envelope
            .idempotency_key
            .as_deref()
            .filter(|key| !key.is_empty());
        let scope = route.resource_type().zip(key);

        if let Some((resource_type, key)) = scope {
            match self.cache.lookup(key, resource_type, now)? {
                Lookup::Cached(cached) => {
                    tracing::debug!(key, resource_type, "Replaying cached response");
                    return Ok(Reply::ok(Disposition::CacheHit, cached.into_data()));
                }
                Lookup::InFlight => {
                    return Ok(Reply::error(
                        Disposition::InFlight,
                        errors::REQUEST_IN_PROGRESS,
                    ));
                }
                Lookup::Miss => {}
            }
        }

        let outcome = AssertUnwindSafe(route.handler().call(envelope.payload))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(data)) => {
                if let Some((resource_type, key)) = scope {
                    if let Err(err) = self.cache.store(Some(key), resource_type, &data, now) {
                        self.release(scope);
                        return Err(err.into());
                    }
                }
                Ok(Reply::ok(Disposition::Ok, data))
            }
            Ok(Err(HandlerError::Domain(message))) => {
                self.release(scope);
                Ok(Reply::error(Disposition::DomainError, message))
            }
            Ok(Err(HandlerError::Unexpected(err))) => {
                self.release(scope);
                Err(err.context(format!(
                    "handler {}/{} failed",
                    envelope.version, envelope.action
                )))
            }
            Err(panic) => {
                self.release(scope);
                Err(anyhow!(
                    "handler {}/{} panicked: {}",
                    envelope.version,
                    envelope.action,
                    panic_message(&*panic)
                ))
            }
        }
    }

    fn release(&self, scope: Option<(&str, &str)>) {
        let Some((resource_type, key)) = scope else {
            return;
        };
        if let Err(err) = self.cache.release(Some(key), resource_type) {
            tracing::warn!(key, resource_type, "Failed to release idempotency key: {}", err);
        }
    }

    /// Handle one delivery end to end and settle it
    ///
    /// The delivery is acked once a reply was published or the message was
    /// forwarded to the dead-letter queue. If either publish fails the
    /// delivery is requeued and the error returned.
    pub async fn process(&self, broker: &dyn Broker, delivery: Delivery) -> Result<()> {
        let started = Instant::now();
        let identity = client_identity(&delivery.message);

        let outcome = self
            .execute_body(&delivery.message.body, &identity, SystemTime::now())
            .await;

        let disposition = match &outcome {
            Outcome::Replied(reply) => reply.disposition,
            Outcome::DeadLettered(_) => Disposition::DeadLettered,
        };
        self.metrics.record(
            Transport::Broker,
            disposition,
            started.elapsed().as_micros() as u64,
        );

        let published = match outcome {
            Outcome::Replied(reply) => self.send_reply(broker, &delivery.message, reply).await,
            Outcome::DeadLettered(err) => {
                tracing::error!(
                    correlation_id = ?delivery.message.correlation_id,
                    "Dead-lettering message: {:#}",
                    err
                );
                let message = delivery
                    .message
                    .clone()
                    .with_header(DEATH_REASON_HEADER, format!("{err:#}"));
                broker.publish(&self.config.dead_letter_queue, message).await
            }
        };

        if let Err(err) = published {
            delivery.nack(true).await?;
            return Err(anyhow!(err).context("failed to publish, message requeued"));
        }

        delivery.ack().await?;
        Ok(())
    }

    async fn send_reply(
        &self,
        broker: &dyn Broker,
        request: &Message,
        reply: Reply,
    ) -> Result<(), BookwireError> {
        let Some(reply_to) = request.reply_to.as_deref() else {
            tracing::warn!(
                correlation_id = ?request.correlation_id,
                "Request has no reply address, dropping response"
            );
            return Ok(());
        };

        let correlation_id = request.correlation_id.clone().unwrap_or_default();
        let body = ResponseEnvelope::from_result(&correlation_id, reply.result).to_vec()?;
        let mut message = Message::new(body).with_correlation_id(correlation_id);

        if let Some(admission) = reply.admission {
            message = message.with_header(LIMIT_REMAINING_HEADER, admission.remaining().to_string());
            if !admission.is_admitted() {
                message =
                    message.with_header(RETRY_AFTER_HEADER, admission.retry_after_secs().to_string());
            }
        }

        broker.publish(reply_to, message).await
    }

    /// Consume the request queue until the subscription ends
    ///
    /// Declares the request and dead-letter queues first. A failure while
    /// processing one message is logged and never stops the loop; a broker
    /// failure on the subscription itself does.
    pub async fn run(&self, broker: &dyn Broker) -> Result<()> {
        broker
            .declare_queue(QueueSpec::durable(&self.config.request_queue))
            .await?;
        broker
            .declare_queue(QueueSpec::durable(&self.config.dead_letter_queue))
            .await?;

        let mut subscription = broker
            .consume(&self.config.request_queue, self.config.prefetch)
            .await?;
        tracing::info!(
            "Dispatcher waiting for messages in {}",
            self.config.request_queue
        );

        while let Some(delivery) = subscription.next_delivery().await {
            let delivery = delivery?;
            if let Err(err) = self.process(broker, delivery).await {
                tracing::error!("Failed to settle message: {:#}", err);
            }
        }

        tracing::info!("Request subscription ended");
        Ok(())
    }
}

/// Rate-limit identity of a message: its client id header, else its reply address
pub fn client_identity(message: &Message) -> String {
    message
        .header(CLIENT_ID_HEADER)
        .filter(|id| !id.is_empty())
        .or(message.reply_to.as_deref())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
