//! Request/reply client for the bookwire RPC-over-broker API
//!
//! This crate publishes request envelopes to the dispatcher's request queue
//! and routes each reply back to the call waiting for it, so callers get a
//! plain `async fn` over an asynchronous broker.

pub mod client;
pub mod error;
pub mod router;

pub use client::{ClientConfig, RpcClient};
pub use error::{ClientError, Result};
pub use router::{PendingCall, ReplyRouter};

// Re-export commonly used items
pub use bookwire::{RequestEnvelope, ResponseEnvelope, Status};
pub use client::ClientBuilder;
