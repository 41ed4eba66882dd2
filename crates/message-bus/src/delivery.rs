use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, AckKind};
use futures_util::{FutureExt, StreamExt};

use crate::memory::{MemoryReceiver, Queue};

/// Pause after a failed pull before asking the server again.
const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

enum Source {
    Memory(MemoryReceiver),
    Nats(jetstream::consumer::pull::Stream),
}

/// Consumer of one queue.
pub struct Consumer {
    queue: String,
    source: Source,
}

impl Consumer {
    pub(crate) fn memory(queue: &str, receiver: MemoryReceiver) -> Self {
        Self {
            queue: queue.to_string(),
            source: Source::Memory(receiver),
        }
    }

    pub(crate) fn nats(queue: &str, messages: jetstream::consumer::pull::Stream) -> Self {
        Self {
            queue: queue.to_string(),
            source: Source::Nats(messages),
        }
    }

    /// Name of the consumed queue.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. `None` once the queue is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        match &mut self.source {
            Source::Memory(receiver) => receiver.next().await,
            Source::Nats(messages) => loop {
                match messages.next().await? {
                    Ok(message) => return Some(Delivery::nats(&self.queue, message)),
                    Err(e) => {
                        tracing::warn!(queue = %self.queue, error = %e, "failed to pull message");
                        tokio::time::sleep(PULL_RETRY_DELAY).await;
                    }
                }
            },
        }
    }

    /// Returns the next delivery if one is already waiting.
    pub fn try_next(&mut self) -> Option<Delivery> {
        match &mut self.source {
            Source::Memory(receiver) => receiver.try_next(),
            Source::Nats(messages) => match messages.next().now_or_never()?? {
                Ok(message) => Some(Delivery::nats(&self.queue, message)),
                Err(_) => None,
            },
        }
    }
}

enum Handle {
    Memory(Arc<Queue>),
    Nats(jetstream::Message),
}

/// One message handed to a consumer.
///
/// Must be settled with [`ack`](Delivery::ack) or [`nack`](Delivery::nack).
/// Dropping it unsettled requeues the message.
pub struct Delivery {
    queue: String,
    body: Vec<u8>,
    redelivered: bool,
    /// `None` once settled.
    handle: Option<Handle>,
}

impl Delivery {
    pub(crate) fn memory(queue: Arc<Queue>, body: Vec<u8>, redelivered: bool) -> Self {
        Self {
            queue: queue.name().to_string(),
            body,
            redelivered,
            handle: Some(Handle::Memory(queue)),
        }
    }

    fn nats(queue: &str, message: jetstream::Message) -> Self {
        let redelivered = message
            .info()
            .map(|info| info.delivered > 1)
            .unwrap_or(false);
        Self {
            queue: queue.to_string(),
            body: message.payload.to_vec(),
            redelivered,
            handle: Some(Handle::Nats(message)),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True if this message was handed out before and not acknowledged.
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledges the message; it will not be delivered again.
    pub async fn ack(mut self) {
        if let Some(Handle::Nats(message)) = self.handle.take() {
            if let Err(e) = message.ack().await {
                // The server redelivers after the ack wait; handlers are idempotent.
                tracing::warn!(queue = %self.queue, error = %e, "failed to ack message");
            }
        }
    }

    /// Rejects the message, optionally putting it back on the queue.
    pub async fn nack(mut self, requeue: bool) {
        if !requeue {
            tracing::warn!(queue = %self.queue, "message rejected without requeue");
        }
        match self.handle.take() {
            Some(Handle::Memory(queue)) if requeue => {
                queue.requeue(std::mem::take(&mut self.body));
            }
            Some(Handle::Nats(message)) => {
                let kind = if requeue {
                    AckKind::Nak(None)
                } else {
                    AckKind::Term
                };
                if let Err(e) = message.ack_with(kind).await {
                    tracing::warn!(queue = %self.queue, error = %e, "failed to nack message");
                }
            }
            _ => {}
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::debug!(queue = %self.queue, "unsettled delivery requeued");
        match handle {
            Handle::Memory(queue) => queue.requeue(std::mem::take(&mut self.body)),
            Handle::Nats(message) => {
                // Without a nak the server still redelivers once the ack wait expires.
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(async move {
                        let _ = message.ack_with(AckKind::Nak(None)).await;
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
