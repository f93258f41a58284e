//! Broker adapter
//!
//! The dispatcher and the client only talk to the broker through the traits in
//! this module. A queue is addressed by name, messages are published to it
//! directly (the AMQP default exchange), and consumers settle every delivery
//! with an explicit ack or nack.
//!
//! Two implementations are bundled:
//! - [`MemoryBroker`]: in-process queues for tests and single-binary setups
//! - [`AmqpBroker`] (feature `amqp`): RabbitMQ over `lapin`

use crate::core::BookwireError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

mod memory;
#[cfg(feature = "amqp")]
mod amqp;

pub use memory::MemoryBroker;
#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;


/// Durable queue the dispatcher consumes requests from
pub const REQUEST_QUEUE: &str = "api.requests";
/// Durable queue receiving messages the dispatcher could not process
pub const DEAD_LETTER_QUEUE: &str = "api.dlq";

/// Header carrying the client identity used for rate limiting
pub const CLIENT_ID_HEADER: &str = "x-client-id";
/// Header on rate-limit rejections carrying the remaining quota
pub const LIMIT_REMAINING_HEADER: &str = "x-limit-remaining";
/// Header on rate-limit rejections carrying the retry delay in seconds
pub const RETRY_AFTER_HEADER: &str = "retry-after";
/// Header added to dead-lettered messages naming the failure
pub const DEATH_REASON_HEADER: &str = "x-death-reason";

/// A message as it travels across the broker
///
/// The body is opaque bytes; routing data lives in the metadata fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub body: Bytes,
    /// Token that pairs a response with the request that caused it
    pub correlation_id: Option<String>,
    /// Queue the response should be published to
    pub reply_to: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Queue declaration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name; empty asks the broker to generate a unique one
    pub name: String,
    /// Survives a broker restart
    pub durable: bool,
    /// Private to the declaring connection and deleted with it
    pub exclusive: bool,
}

impl QueueSpec {
    /// A named durable queue shared by every consumer
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
        }
    }

    /// A private queue with a broker-generated name, as used for replies
    pub fn exclusive() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
        }
    }
}

/// Connection to a message broker
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare a queue, returning its (possibly generated) name
    ///
    /// Declaring an existing queue is a no-op.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BookwireError>;

    /// Delete a queue; its consumers see the end of their subscription
    async fn delete_queue(&self, name: &str) -> Result<(), BookwireError>;

    /// Publish a message to a queue by name
    async fn publish(&self, queue: &str, message: Message) -> Result<(), BookwireError>;

    /// Start consuming a queue with at most `prefetch` unsettled deliveries
    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BookwireError>;

    /// Close the connection
    async fn close(&self) -> Result<(), BookwireError> {
        Ok(())
    }
}

/// A live consumer on one queue
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery
    ///
    /// `None` means the subscription ended: the queue was deleted or the
    /// connection closed.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BookwireError>>;
}

/// Settlement handle of one delivery
#[async_trait]
pub trait Acker: Send {
    async fn ack(&mut self) -> Result<(), BookwireError>;

    async fn nack(&mut self, requeue: bool) -> Result<(), BookwireError>;
}

/// A consumed message waiting to be settled
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: Message, acker: Box<dyn Acker>) -> Self {
        Self { message, acker }
    }

    /// Remove the message from the queue
    pub async fn ack(mut self) -> Result<(), BookwireError> {
        self.acker.ack().await
    }

    /// Reject the message, optionally putting it back on the queue
    pub async fn nack(mut self, requeue: bool) -> Result<(), BookwireError> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
