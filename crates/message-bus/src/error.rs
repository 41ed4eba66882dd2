use thiserror::Error;

/// Errors raised by the broker.
#[derive(Debug, Error)]
pub enum BusError {
    /// The target queue was never declared.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue already has an active consumer.
    #[error("Queue '{0}' already has a consumer")]
    AlreadyConsumed(String),

    /// The broker could not accept the message.
    #[error("Publish to '{target}' failed: {reason}")]
    PublishFailed { target: String, reason: String },

    /// The broker server is unreachable or refused the topology.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// A consumer could not be attached to the queue.
    #[error("Consume from '{queue}' failed: {reason}")]
    ConsumeFailed { queue: String, reason: String },
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BusError>;
