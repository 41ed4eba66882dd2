use async_trait::async_trait;

use crate::{Consumer, Publisher, Result};

/// A broker backend: topology management plus the [`Publisher`] side.
///
/// Queues are point-to-point; exchanges fan a message out to every queue
/// bound to them.
#[async_trait]
pub trait MessageBroker: Publisher + Clone + 'static {
    /// Declares a queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// Declares a queue and binds it to a fanout exchange.
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Starts consuming a declared queue.
    async fn consume(&self, queue: &str) -> Result<Consumer>;
}
