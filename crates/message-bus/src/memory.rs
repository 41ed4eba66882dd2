use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{BusError, Consumer, Delivery, MessageBroker, Publisher, Result};

#[derive(Debug)]
struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

pub(crate) struct Queue {
    name: String,
    sender: UnboundedSender<Message>,
    /// Parked here while no consumer holds it.
    receiver: Mutex<Option<UnboundedReceiver<Message>>>,
}

impl Queue {
    fn new(name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.to_string(),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Puts a message back, flagged as redelivered.
    pub(crate) fn requeue(&self, body: Vec<u8>) {
        let message = Message {
            body,
            redelivered: true,
        };
        if let Err(e) = self.enqueue(message) {
            tracing::error!(error = %e, "failed to requeue message");
        }
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| BusError::PublishFailed {
                target: self.name.clone(),
                reason: "queue closed".to_string(),
            })
    }
}

#[derive(Default)]
struct Topology {
    queues: HashMap<String, Arc<Queue>>,
    bindings: HashMap<String, Vec<String>>,
}

/// In-process broker with named queues and fanout exchanges.
///
/// Each queue has at most one consumer at a time. Messages survive a
/// consumer being dropped: its receiver is parked back on the queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    topology: Arc<RwLock<Topology>>,
}

impl InMemoryBroker {
    /// Creates a broker with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a queue. Declaring an existing queue is a no-op.
    pub async fn declare_queue(&self, name: &str) {
        let mut topology = self.topology.write().await;
        topology
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new(name)));
    }

    /// Declares a queue and binds it to a fanout exchange.
    pub async fn bind_queue(&self, queue: &str, exchange: &str) {
        self.declare_queue(queue).await;
        let mut topology = self.topology.write().await;
        let bound = topology.bindings.entry(exchange.to_string()).or_default();
        if !bound.iter().any(|name| name == queue) {
            bound.push(queue.to_string());
        }
    }

    /// Starts consuming a queue. Each queue has at most one consumer.
    pub async fn consume(&self, name: &str) -> Result<Consumer> {
        let queue = self.queue(name).await?;
        let receiver = queue
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| BusError::AlreadyConsumed(name.to_string()))?;

        tracing::debug!(queue = name, "consumer attached");
        Ok(Consumer::memory(
            name,
            MemoryReceiver {
                queue,
                receiver: Some(receiver),
            },
        ))
    }

    async fn queue(&self, name: &str) -> Result<Arc<Queue>> {
        self.topology
            .read()
            .await
            .queues
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::UnknownQueue(name.to_string()))
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        InMemoryBroker::declare_queue(self, name).await;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        InMemoryBroker::bind_queue(self, queue, exchange).await;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer> {
        InMemoryBroker::consume(self, queue).await
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.queue(queue).await?.enqueue(Message {
            body,
            redelivered: false,
        })?;
        metrics::counter!("bus_messages_published_total", "target" => queue.to_string())
            .increment(1);
        Ok(())
    }

    async fn broadcast(&self, exchange: &str, body: Vec<u8>) -> Result<()> {
        let topology = self.topology.read().await;
        let Some(bound) = topology.bindings.get(exchange) else {
            tracing::debug!(exchange, "no queues bound, message dropped");
            return Ok(());
        };

        for name in bound {
            if let Some(queue) = topology.queues.get(name) {
                queue.enqueue(Message {
                    body: body.clone(),
                    redelivered: false,
                })?;
            }
        }
        metrics::counter!("bus_messages_published_total", "target" => exchange.to_string())
            .increment(1);
        Ok(())
    }
}

/// Receiving end of a queue, held by at most one consumer at a time.
pub(crate) struct MemoryReceiver {
    queue: Arc<Queue>,
    receiver: Option<UnboundedReceiver<Message>>,
}

impl MemoryReceiver {
    pub(crate) async fn next(&mut self) -> Option<Delivery> {
        let message = self.receiver.as_mut()?.recv().await?;
        Some(self.deliver(message))
    }

    pub(crate) fn try_next(&mut self) -> Option<Delivery> {
        let message = self.receiver.as_mut()?.try_recv().ok()?;
        Some(self.deliver(message))
    }

    fn deliver(&self, message: Message) -> Delivery {
        Delivery::memory(Arc::clone(&self.queue), message.body, message.redelivered)
    }
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self
                .queue
                .receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(receiver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker_with(queue: &str) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.declare_queue(queue).await;
        broker
    }

    #[tokio::test]
    async fn test_send_and_ack() {
        let broker = broker_with("q").await;
        let mut consumer = broker.consume("q").await.unwrap();

        broker.send("q", b"hello".to_vec()).await.unwrap();

        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.body(), b"hello");
        assert!(!delivery.is_redelivered());
        delivery.ack().await;

        assert!(consumer.try_next().is_none());
    }

    #[tokio::test]
    async fn test_send_to_unknown_queue_fails() {
        let broker = InMemoryBroker::new();
        let result = broker.send("nowhere", b"x".to_vec()).await;
        assert!(matches!(result, Err(BusError::UnknownQueue(name)) if name == "nowhere"));
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_redelivered() {
        let broker = broker_with("q").await;
        let mut consumer = broker.consume("q").await.unwrap();
        broker.send("q", b"once".to_vec()).await.unwrap();

        let delivery = consumer.next().await.unwrap();
        drop(delivery);

        let again = consumer.next().await.unwrap();
        assert_eq!(again.body(), b"once");
        assert!(again.is_redelivered());
        again.ack().await;
    }

    #[tokio::test]
    async fn test_nack_without_requeue_discards() {
        let broker = broker_with("q").await;
        let mut consumer = broker.consume("q").await.unwrap();
        broker.send("q", b"poison".to_vec()).await.unwrap();

        consumer.next().await.unwrap().nack(false).await;
        assert!(consumer.try_next().is_none());
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let broker = broker_with("q").await;
        let mut consumer = broker.consume("q").await.unwrap();
        broker.send("q", b"retry".to_vec()).await.unwrap();

        consumer.next().await.unwrap().nack(true).await;
        let again = consumer.try_next().unwrap();
        assert!(again.is_redelivered());
        again.ack().await;
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_bound_queue() {
        let broker = InMemoryBroker::new();
        broker.bind_queue("a", "events").await;
        broker.bind_queue("b", "events").await;
        broker.bind_queue("b", "events").await;

        let mut a = broker.consume("a").await.unwrap();
        let mut b = broker.consume("b").await.unwrap();

        broker.broadcast("events", b"evt".to_vec()).await.unwrap();

        a.try_next().unwrap().ack().await;
        b.try_next().unwrap().ack().await;
        assert!(b.try_next().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_without_bindings_is_dropped() {
        let broker = InMemoryBroker::new();
        broker.broadcast("empty", b"evt".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_consumer_per_queue() {
        let broker = broker_with("q").await;
        let first = broker.consume("q").await.unwrap();

        assert!(matches!(
            broker.consume("q").await,
            Err(BusError::AlreadyConsumed(_))
        ));

        drop(first);
        assert!(broker.consume("q").await.is_ok());
    }

    #[tokio::test]
    async fn test_messages_survive_consumer_restart() {
        let broker = broker_with("q").await;
        broker.send("q", b"kept".to_vec()).await.unwrap();

        drop(broker.consume("q").await.unwrap());

        let mut consumer = broker.consume("q").await.unwrap();
        assert_eq!(consumer.try_next().unwrap().body(), b"kept");
    }

    async fn bound_consumer<B: MessageBroker>(broker: &B) -> Consumer {
        broker.bind_queue("q", "events").await.unwrap();
        broker.consume("q").await.unwrap()
    }

    #[tokio::test]
    async fn test_broker_trait_topology() {
        let broker = InMemoryBroker::new();
        let mut consumer = bound_consumer(&broker).await;
        assert_eq!(consumer.queue_name(), "q");

        broker.broadcast("events", b"evt".to_vec()).await.unwrap();
        broker.send("q", b"direct".to_vec()).await.unwrap();

        assert_eq!(consumer.try_next().unwrap().body(), b"evt");
        assert_eq!(consumer.try_next().unwrap().body(), b"direct");
    }
}
