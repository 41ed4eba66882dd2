use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Outbound side of the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends a message to a single named queue.
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<()>;

    /// Broadcasts a message to every queue bound to a fanout exchange.
    async fn broadcast(&self, exchange: &str, body: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        (**self).send(queue, body).await
    }

    async fn broadcast(&self, exchange: &str, body: Vec<u8>) -> Result<()> {
        (**self).broadcast(exchange, body).await
    }
}
