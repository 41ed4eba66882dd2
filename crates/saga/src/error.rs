//! Saga error types.

use message_bus::BusError;
use protocol::ProtocolError;
use saga_store::StoreError;
use thiserror::Error;

/// Errors that can occur while starting or driving a saga.
///
/// Domain failures (a declined payment, missing stock) are not errors: they
/// arrive as events and move the saga to `Failed`.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order was rejected before a saga was created.
    #[error("Invalid order: {0}")]
    Validation(String),

    /// Saga store or idempotency ledger error.
    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),

    /// Broker error while publishing a command.
    #[error("Broker error: {0}")]
    Bus(#[from] BusError),

    /// A message could not be built.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SagaError {
    /// Returns true if the error came from the broker.
    pub fn is_publish_failure(&self) -> bool {
        matches!(self, SagaError::Bus(_))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
