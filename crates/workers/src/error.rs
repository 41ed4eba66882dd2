//! Worker error types.

use message_bus::BusError;
use protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by simulated services and the command runner.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The payment provider declined the charge.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Stock could not be reserved.
    #[error("Inventory unavailable: {0}")]
    InventoryUnavailable(String),

    /// No carrier could take the shipment.
    #[error("Shipping unavailable: {0}")]
    ShippingUnavailable(String),

    /// A compensation could not be performed yet.
    #[error("Compensation failed: {0}")]
    CompensationFailed(String),

    /// Broker error while publishing a result event.
    #[error("Broker error: {0}")]
    Bus(#[from] BusError),

    /// A result event could not be built.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl WorkerError {
    /// The human-readable reason carried in failure events.
    pub fn reason(&self) -> String {
        match self {
            WorkerError::PaymentDeclined(reason)
            | WorkerError::InventoryUnavailable(reason)
            | WorkerError::ShippingUnavailable(reason)
            | WorkerError::CompensationFailed(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Convenience type alias for worker results.
pub type Result<T> = std::result::Result<T, WorkerError>;
