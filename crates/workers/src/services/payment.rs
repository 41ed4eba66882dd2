//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::OrderRequest;

use crate::error::{Result, WorkerError};

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Trait for payment operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Authorizes the order amount for the user.
    async fn authorize(&self, order: &OrderRequest) -> Result<Authorization>;

    /// Refunds the payment made for an order. Refunding twice is a no-op.
    async fn refund(&self, order: &OrderRequest) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    /// order_id -> payment_id
    payments: HashMap<String, String>,
    refunds: usize,
    next_id: u32,
    fail_on_authorize: bool,
    fail_on_refund: bool,
}

/// In-memory payment service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to decline every authorization.
    pub fn set_fail_on_authorize(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_authorize = fail;
    }

    /// Configures the service to reject every refund.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_refund = fail;
    }

    /// Returns the number of payments not refunded.
    pub fn payment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .len()
    }

    /// Returns the number of refunds performed.
    pub fn refund_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refunds
    }

    /// Returns true if the order holds an active payment.
    pub fn is_charged(&self, order_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .payments
            .contains_key(order_id)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn authorize(&self, order: &OrderRequest) -> Result<Authorization> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_authorize {
            return Err(WorkerError::PaymentDeclined("payment declined".to_string()));
        }

        if let Some(payment_id) = state.payments.get(&order.order_id) {
            return Ok(Authorization {
                payment_id: payment_id.clone(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(order.order_id.clone(), payment_id.clone());

        Ok(Authorization { payment_id })
    }

    async fn refund(&self, order: &OrderRequest) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_refund {
            return Err(WorkerError::CompensationFailed(
                "refund rejected".to_string(),
            ));
        }

        if state.payments.remove(&order.order_id).is_some() {
            state.refunds += 1;
        }
        Ok(())
    }
}
