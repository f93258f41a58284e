//! Broker transport
//!
//! Runs `workers` consume loops against one broker connection. Workers share
//! the dispatcher, so each message is handled by exactly one of them and all of
//! them enforce the same quotas.

use super::Transport;
use crate::dispatcher::Dispatcher;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bookwire::broker::{AmqpBroker, Broker};
use std::sync::Arc;
use tokio::task::JoinSet;

enum Source {
    Connected(Arc<dyn Broker>),
    Amqp(String),
}

pub struct BrokerTransport {
    source: Source,
    workers: usize,
}

impl BrokerTransport {
    /// Consume from an already connected broker
    pub fn new(broker: Arc<dyn Broker>, workers: usize) -> Self {
        Self {
            source: Source::Connected(broker),
            workers,
        }
    }

    /// Connect to an AMQP broker when started
    pub fn amqp(url: impl Into<String>, workers: usize) -> Self {
        Self {
            source: Source::Amqp(url.into()),
            workers,
        }
    }

    async fn connect(source: Source) -> Result<Arc<dyn Broker>> {
        match source {
            Source::Connected(broker) => Ok(broker),
            Source::Amqp(url) => {
                let broker = AmqpBroker::connect(&url).await?;
                Ok(Arc::new(broker))
            }
        }
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    async fn start(self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        let broker = Self::connect(self.source).await?;

        let mut workers = JoinSet::new();
        for worker in 0..self.workers.max(1) {
            let broker = Arc::clone(&broker);
            let dispatcher = Arc::clone(&dispatcher);
            workers.spawn(async move {
                tracing::debug!(worker, "Starting consume loop");
                dispatcher.run(broker.as_ref()).await
            });
        }

        let mut result = Ok(());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Consume loop failed: {:#}", e);
                    result = Err(e);
                    break;
                }
                Err(e) => {
                    tracing::error!("Consume loop panicked: {}", e);
                    result = Err(anyhow!("Consume loop panicked"));
                    break;
                }
            }
        }
        workers.shutdown().await;

        if let Err(e) = broker.close().await {
            tracing::warn!("Failed to close broker connection: {}", e);
        }
        result
    }
}
