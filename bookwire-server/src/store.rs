//! Dispatcher factory
//!
//! Wires the configured store, limiter, idempotency cache and library
//! handlers into one [`Dispatcher`] shared by every transport.
//!
//! The rate-limit history and the idempotency records live in the same
//! [`MemoryStore`], so its sweep keeps records for at least the idempotency
//! TTL or the rate-limit window, whichever is longer.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::handler::HandlerRegistry;
use crate::handlers::{self, Library};
use anyhow::Result;
use bookwire::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;

/// Build the dispatcher described by `config`
///
/// # Example
///
/// ```ignore
/// let config = Config::from_env_and_args()?;
/// let dispatcher = create_dispatcher(&config)?;
/// ```
pub fn create_dispatcher(config: &Config) -> Result<Arc<Dispatcher>> {
    let store = MemoryStore::builder()
        .capacity(config.store.capacity)
        .cleanup_interval(Duration::from_secs(config.store.cleanup_interval))
        .retention(config.idempotency.ttl)
        .window_retention(config.rate_limit.window)
        .build();

    let library = Arc::new(Library::new());
    let registry = handlers::register(HandlerRegistry::builder(), library).build();
    tracing::debug!("Registered {} handlers", registry.len());

    let dispatcher = Dispatcher::new(
        config.dispatcher.clone(),
        registry,
        SharedStore::new(store),
        config.rate_limit,
        config.idempotency,
    )?;

    Ok(Arc::new(dispatcher))
}
