//! Handler registry
//!
//! Handlers are registered once at startup under `(version, action)`. Routes
//! registered with [`HandlerRegistryBuilder::idempotent`] also name the
//! resource type their responses are cached under.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Failure of a handler call
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// An expected business failure, returned to the caller as an error response
    #[error("{0}")]
    Domain(String),
    /// Anything else; the message is dead-lettered instead of answered
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn domain(message: impl Into<String>) -> Self {
        HandlerError::Domain(message.into())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// A business operation invoked with the request payload
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, payload: Value) -> HandlerResult;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`Handler`]
///
/// ```
/// use bookwire_server::handler::{HandlerRegistry, handler_fn};
/// use serde_json::json;
///
/// let registry = HandlerRegistry::builder()
///     .route("v1", "ping", handler_fn(|_payload| async { Ok(json!("pong")) }))
///     .build();
/// assert!(registry.resolve("ping", "v1").is_some());
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, payload: Value) -> HandlerResult {
        (self.0)(payload).await
    }
}

/// A registered handler
#[derive(Clone)]
pub struct Route {
    handler: Arc<dyn Handler>,
    resource_type: Option<String>,
}

impl Route {
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Resource type for idempotent routes
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }
}

/// Registration table from `(version, action)` to handler
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    // version -> action -> route
    routes: HashMap<String, HashMap<String, Route>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn resolve(&self, action: &str, version: &str) -> Option<&Route> {
        self.routes.get(version)?.get(action)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    routes: HashMap<String, HashMap<String, Route>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler whose calls are never cached
    pub fn route(self, version: &str, action: &str, handler: impl Handler) -> Self {
        self.insert(version, action, handler, None)
    }

    /// Register a mutating handler whose successful responses are cached
    /// under `resource_type` when the caller supplies an idempotency key
    pub fn idempotent(
        self,
        version: &str,
        action: &str,
        resource_type: &str,
        handler: impl Handler,
    ) -> Self {
        self.insert(version, action, handler, Some(resource_type.to_string()))
    }

    fn insert(
        mut self,
        version: &str,
        action: &str,
        handler: impl Handler,
        resource_type: Option<String>,
    ) -> Self {
        let previous = self
            .routes
            .entry(version.to_string())
            .or_default()
            .insert(
                action.to_string(),
                Route {
                    handler: Arc::new(handler),
                    resource_type,
                },
            );
        if previous.is_some() {
            tracing::warn!(version, action, "Replacing previously registered handler");
        }
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            routes: self.routes,
        }
    }
}
