use std::sync::Arc;
use std::time::Duration;

use bookwire::broker::{Broker, CLIENT_ID_HEADER, Message, QueueSpec, REQUEST_QUEUE, Subscription};
use bookwire::{RequestEnvelope, ResponseEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};
use crate::router::ReplyRouter;

/// Shared secret sent when none is configured
pub const DEFAULT_AUTH_TOKEN: &str = "supersecretapikey";

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Queue requests are published to
    pub request_queue: String,
    /// Shared secret put into every request built by [`RpcClient::request`]
    pub auth_token: String,
    /// Rate-limit identity sent in the `x-client-id` header; the server falls
    /// back to the reply queue name when unset
    pub client_id: Option<String>,
    /// How long a call waits for its reply; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// Unacknowledged replies the listener may hold
    pub reply_prefetch: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_queue: REQUEST_QUEUE.to_string(),
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            client_id: None,
            request_timeout: Some(Duration::from_secs(30)),
            reply_prefetch: 100,
        }
    }
}

/// Builder for creating an RpcClient
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue requests are published to
    pub fn request_queue(mut self, queue: impl Into<String>) -> Self {
        self.config.request_queue = queue.into();
        self
    }

    /// Set the shared secret
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = token.into();
        self
    }

    /// Set the rate-limit identity
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = Some(id.into());
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Wait for replies without a deadline
    pub fn no_timeout(mut self) -> Self {
        self.config.request_timeout = None;
        self
    }

    /// Set how many replies the listener may hold unacknowledged
    pub fn reply_prefetch(mut self, prefetch: u16) -> Self {
        self.config.reply_prefetch = prefetch.max(1);
        self
    }

    /// Connect over `broker`
    pub async fn connect(self, broker: Arc<dyn Broker>) -> Result<RpcClient> {
        RpcClient::connect_with(broker, self.config).await
    }

    /// Connect to an AMQP broker
    #[cfg(feature = "amqp")]
    pub async fn connect_amqp(self, url: &str) -> Result<RpcClient> {
        let broker = bookwire::broker::AmqpBroker::connect(url).await?;
        self.connect(Arc::new(broker)).await
    }
}

/// Request/reply client over a message broker
///
/// Each instance owns a private reply queue. Calls publish a request envelope
/// to the request queue with a fresh correlation id and wait for the reply
/// carrying that id; any number of calls may be in flight at once.
///
/// # Example
///
/// ```no_run
/// use bookwire::broker::MemoryBroker;
/// use bookwire_client::RpcClient;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn run() -> bookwire_client::Result<()> {
/// let client = RpcClient::connect(Arc::new(MemoryBroker::new())).await?;
///
/// let request = client
///     .request("create_book", "v1", json!({"title": "Dune"}))
///     .with_idempotency_key("create-dune");
/// let response = client.call(request).await?;
/// println!("{:?}", response.data);
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient {
    broker: Arc<dyn Broker>,
    config: ClientConfig,
    reply_queue: String,
    router: Arc<ReplyRouter>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Connect with default configuration
    pub async fn connect(broker: Arc<dyn Broker>) -> Result<Self> {
        ClientBuilder::new().connect(broker).await
    }

    /// Create a new client builder for advanced configuration
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    async fn connect_with(broker: Arc<dyn Broker>, config: ClientConfig) -> Result<Self> {
        let reply_queue = broker.declare_queue(QueueSpec::exclusive()).await?;
        let replies = broker
            .consume(&reply_queue, config.reply_prefetch)
            .await?;

        let router = ReplyRouter::new();
        let listener = tokio::spawn(listen(replies, Arc::clone(&router)));
        tracing::info!(reply_queue = %reply_queue, "Client connected");

        Ok(Self {
            broker,
            config,
            reply_queue,
            router,
            listener: Mutex::new(Some(listener)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Name of this instance's private reply queue
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Calls currently waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.router.pending()
    }

    /// Build a request carrying the configured shared secret
    pub fn request(
        &self,
        action: impl Into<String>,
        version: impl Into<String>,
        payload: Value,
    ) -> RequestEnvelope {
        RequestEnvelope::new(action, version, payload, self.config.auth_token.as_str())
    }

    /// Send `request` and wait for its reply with the configured timeout
    pub async fn call(&self, request: RequestEnvelope) -> Result<ResponseEnvelope> {
        self.dispatch(request, self.config.request_timeout).await
    }

    /// Send `request` and wait at most `timeout` for its reply
    pub async fn call_with_timeout(
        &self,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, Some(timeout)).await
    }

    async fn dispatch(
        &self,
        request: RequestEnvelope,
        timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope> {
        if self.router.is_closed() {
            return Err(ClientError::NotConnected);
        }

        let pending = self.router.register()?;
        let correlation_id = pending.correlation_id().to_string();

        let mut message = Message::new(request.to_vec()?)
            .with_correlation_id(correlation_id.as_str())
            .with_reply_to(self.reply_queue.as_str());
        if let Some(client_id) = &self.config.client_id {
            message = message.with_header(CLIENT_ID_HEADER, client_id.as_str());
        }

        // A failed publish drops `pending`, which frees the slot
        self.broker
            .publish(&self.config.request_queue, message)
            .await?;
        tracing::debug!(
            correlation_id = %correlation_id,
            action = %request.action,
            version = %request.version,
            "Request published"
        );

        match timeout {
            Some(limit) => tokio::time::timeout(limit, pending.wait())
                .await
                .map_err(|_| {
                    tracing::warn!(correlation_id = %correlation_id, "Call timed out");
                    ClientError::Timeout(limit)
                })?,
            None => pending.wait().await,
        }
    }

    /// Stop listening, delete the reply queue and fail every waiting call
    ///
    /// Calls made afterwards fail with [`ClientError::NotConnected`].
    pub async fn close(&self) -> Result<()> {
        let failed = self.router.close();
        if failed > 0 {
            tracing::warn!("Closing client with {} call(s) still waiting", failed);
        }

        let listener = self.listener.lock().take();
        let Some(listener) = listener else {
            return Ok(());
        };
        listener.abort();

        self.broker.delete_queue(&self.reply_queue).await?;
        tracing::info!(reply_queue = %self.reply_queue, "Client closed");
        Ok(())
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

/// Route every reply on `replies` until the subscription ends
async fn listen(mut replies: Box<dyn Subscription>, router: Arc<ReplyRouter>) {
    while let Some(delivery) = replies.next_delivery().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!("Reply subscription failed: {}", err);
                break;
            }
        };

        match ResponseEnvelope::from_slice(&delivery.message.body) {
            Ok(response) => {
                let correlation_id = delivery
                    .message
                    .correlation_id
                    .clone()
                    .unwrap_or_else(|| response.correlation_id.clone());
                router.resolve(&correlation_id, response);
            }
            Err(err) => {
                tracing::warn!("Discarding unreadable reply: {}", err);
            }
        }

        if let Err(err) = delivery.ack().await {
            tracing::warn!("Failed to ack reply: {}", err);
        }
    }

    let failed = router.close();
    tracing::debug!(failed, "Reply listener stopped");
}
