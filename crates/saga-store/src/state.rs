//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► PaymentOk ──► InventoryOk ──► ShippingOk ──► Completed
///    │            │              │               │
///    │            └──────────────┴───────────────┴──► Compensating ──► Failed
///    └─────────────────────────────────────────────────────────────────► Failed
/// ```
/// Forward moves may skip states but never go back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Saga created, payment requested.
    #[default]
    Started,

    /// Payment authorized, inventory requested.
    PaymentOk,

    /// Inventory reserved, shipping requested.
    InventoryOk,

    /// Shipping arranged.
    ShippingOk,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and compensations are being dispatched.
    Compensating,

    /// The saga failed; compensations, if any, have been dispatched (terminal state).
    Failed,
}

impl SagaState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Failed)
    }

    /// Position along the forward path, or `None` off that path.
    fn forward_rank(&self) -> Option<u8> {
        match self {
            SagaState::Started => Some(0),
            SagaState::PaymentOk => Some(1),
            SagaState::InventoryOk => Some(2),
            SagaState::ShippingOk => Some(3),
            SagaState::Completed => Some(4),
            SagaState::Compensating | SagaState::Failed => None,
        }
    }

    /// Returns true if the saga may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (SagaState::Compensating, SagaState::Failed) => true,
            (SagaState::Compensating, _) => false,
            (_, SagaState::Compensating | SagaState::Failed) => true,
            (from, to) => match (from.forward_rank(), to.forward_rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Started => "STARTED",
            SagaState::PaymentOk => "PAYMENT_OK",
            SagaState::InventoryOk => "INVENTORY_OK",
            SagaState::ShippingOk => "SHIPPING_OK",
            SagaState::Completed => "COMPLETED",
            SagaState::Compensating => "COMPENSATING",
            SagaState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
