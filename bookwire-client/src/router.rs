//! Reply router
//!
//! Pairs inbound responses with the calls waiting for them. Every call
//! registers a one-shot slot under a fresh correlation id; the reply listener
//! resolves the slot whose id the response carries and wakes exactly that
//! caller. Responses nobody is waiting for are dropped.

use crate::error::{ClientError, Result};
use bookwire::ResponseEnvelope;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Default)]
struct Slots {
    waiting: HashMap<String, oneshot::Sender<ResponseEnvelope>>,
    closed: bool,
}

/// Table of calls awaiting a reply
#[derive(Default)]
pub struct ReplyRouter {
    slots: Mutex<Slots>,
}

impl ReplyRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mint a correlation id and register a slot for it
    ///
    /// Fails with [`ClientError::ConnectionClosed`] once the router was closed.
    pub fn register(self: &Arc<Self>) -> Result<PendingCall> {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(ClientError::ConnectionClosed);
        }
        slots.waiting.insert(correlation_id.clone(), tx);

        Ok(PendingCall {
            correlation_id,
            rx: Some(rx),
            router: Arc::clone(self),
        })
    }

    /// Hand `response` to the call registered under `correlation_id`
    ///
    /// Returns `false` when no call is waiting for it.
    pub fn resolve(&self, correlation_id: &str, response: ResponseEnvelope) -> bool {
        let Some(tx) = self.slots.lock().waiting.remove(correlation_id) else {
            tracing::debug!(correlation_id, "Discarding reply with no waiting call");
            return false;
        };
        // The receiver may have given up between the lookup and the send
        tx.send(response).is_ok()
    }

    /// Forget a call; a late reply for it is discarded
    pub fn cancel(&self, correlation_id: &str) {
        self.slots.lock().waiting.remove(correlation_id);
    }

    /// Refuse new calls and fail every waiting one with [`ClientError::ConnectionClosed`]
    ///
    /// Returns the number of calls that were failed.
    pub fn close(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.closed = true;
        let failed = slots.waiting.len();
        // Dropping the senders wakes the receivers with an error
        slots.waiting.clear();
        failed
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Calls currently waiting for a reply
    pub fn pending(&self) -> usize {
        self.slots.lock().waiting.len()
    }
}

/// A registered call waiting for its reply
///
/// Dropping it (for example when a timeout fires) removes the slot.
pub struct PendingCall {
    correlation_id: String,
    rx: Option<oneshot::Receiver<ResponseEnvelope>>,
    router: Arc<ReplyRouter>,
}

impl PendingCall {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the reply
    pub async fn wait(mut self) -> Result<ResponseEnvelope> {
        let rx = self.rx.take().ok_or(ClientError::ConnectionClosed)?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.router.cancel(&self.correlation_id);
    }
}
