//! Transport layer implementations for the dispatcher
//!
//! Every transport implements the [`Transport`] trait and drives the same
//! shared [`Dispatcher`], so quotas and idempotency records are enforced
//! across all of them.
//!
//! # Available Transports
//!
//! - [`broker`]: consume request envelopes from a message broker (AMQP)
//! - [`http`]: REST gateway with JSON bodies, health and metrics endpoints

pub mod broker;
pub mod http;


use crate::dispatcher::Dispatcher;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for all transport implementations
///
/// Each transport is responsible for:
/// - Accepting requests from its source
/// - Turning them into request envelopes
/// - Running them through the dispatcher
/// - Delivering the responses
#[async_trait]
pub trait Transport {
    /// Start the transport
    ///
    /// Runs until the source closes or an error occurs.
    async fn start(self, dispatcher: Arc<Dispatcher>) -> Result<()>;
}
