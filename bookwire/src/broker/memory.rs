use super::{Acker, Broker, Delivery, Message, QueueSpec, Subscription};
use crate::core::BookwireError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use uuid::Uuid;

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

struct QueueState {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    ready: AtomicUsize,
    deleted: watch::Sender<bool>,
}

impl QueueState {
    fn new(name: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (deleted, _) = watch::channel(false);
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
            ready: AtomicUsize::new(0),
            deleted,
        }
    }

    fn enqueue(&self, message: Message) {
        self.ready.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            self.ready.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// In-process broker
///
/// Queues are unbounded FIFOs. A delivery that is dropped without being
/// settled goes back on its queue, so consumers see at-least-once delivery
/// just as they would against a real broker.
///
/// Cloning yields another handle to the same set of queues.
///
/// # Example
///
/// ```
/// use bookwire::broker::{Broker, MemoryBroker, Message, QueueSpec};
///
/// # tokio_test::block_on(async {
/// let broker = MemoryBroker::new();
/// let queue = broker.declare_queue(QueueSpec::durable("jobs")).await?;
/// broker.publish(&queue, Message::new("hello")).await?;
///
/// let mut subscription = broker.consume(&queue, 1).await?;
/// let delivery = subscription.next_delivery().await.unwrap()?;
/// assert_eq!(&delivery.message.body[..], b"hello");
/// delivery.ack().await?;
/// # Ok::<(), bookwire::BookwireError>(())
/// # }).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<RwLock<HashMap<String, Arc<QueueState>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting on `queue` (excluding unsettled deliveries)
    pub fn ready_count(&self, queue: &str) -> usize {
        self.queues
            .read()
            .get(queue)
            .map_or(0, |state| state.ready.load(Ordering::SeqCst))
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.queues.read().contains_key(queue)
    }

    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        self.queues.read().get(name).cloned()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, spec: QueueSpec) -> Result<String, BookwireError> {
        let name = if spec.name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            spec.name
        };

        self.queues
            .write()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(QueueState::new(name.clone())));

        tracing::debug!(queue = %name, durable = spec.durable, exclusive = spec.exclusive, "Declared queue");
        Ok(name)
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BookwireError> {
        if let Some(state) = self.queues.write().remove(name) {
            state.deleted.send_replace(true);
            tracing::debug!(queue = name, "Deleted queue");
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, message: Message) -> Result<(), BookwireError> {
        match self.queue(queue) {
            Some(state) => state.enqueue(message),
            // The default exchange silently drops unroutable messages
            None => tracing::warn!(queue, "Dropping message published to unknown queue"),
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BookwireError> {
        let state = self
            .queue(queue)
            .ok_or_else(|| BookwireError::Broker(format!("queue '{queue}' not found")))?;
        let deleted = state.deleted.subscribe();

        Ok(Box::new(MemorySubscription {
            queue: state,
            deleted,
            prefetch: Arc::new(Semaphore::new(prefetch.max(1) as usize)),
        }))
    }
}

struct MemorySubscription {
    queue: Arc<QueueState>,
    deleted: watch::Receiver<bool>,
    prefetch: Arc<Semaphore>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BookwireError>> {
        let deleted = *self.deleted.borrow();
        if deleted {
            return None;
        }

        // Block while `prefetch` deliveries are still unsettled
        let permit = self.prefetch.clone().acquire_owned().await.ok()?;
        let queue = Arc::clone(&self.queue);

        let message = tokio::select! {
            message = async { queue.rx.lock().await.recv().await } => message?,
            _ = wait_deleted(&mut self.deleted) => return None,
        };
        self.queue.ready.fetch_sub(1, Ordering::SeqCst);

        let acker = MemoryAcker {
            queue: Arc::clone(&self.queue),
            message: Some(message.clone()),
            _permit: permit,
        };
        Some(Ok(Delivery::new(message, Box::new(acker))))
    }
}

async fn wait_deleted(deleted: &mut watch::Receiver<bool>) {
    loop {
        let is_deleted = *deleted.borrow_and_update();
        if is_deleted || deleted.changed().await.is_err() {
            return;
        }
    }
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    // Present until the delivery is settled
    message: Option<Message>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<(), BookwireError> {
        self.message.take();
        Ok(())
    }

    async fn nack(&mut self, requeue: bool) -> Result<(), BookwireError> {
        if let Some(message) = self.message.take() {
            if requeue {
                self.queue.enqueue(message);
            } else {
                tracing::debug!(queue = %self.queue.name, "Discarded rejected message");
            }
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            tracing::debug!(queue = %self.queue.name, "Requeueing unsettled delivery");
            self.queue.enqueue(message);
        }
    }
}
