//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::OrderRequest;

use crate::error::{Result, WorkerError};

/// Carrier name used by the in-memory service.
pub const DEMO_CARRIER: &str = "demo-carrier";

/// Result of a successful shipment booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    /// The tracking number assigned by the carrier.
    pub tracking_number: String,
    pub carrier: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Books a shipment for an order.
    async fn arrange(&self, order: &OrderRequest) -> Result<Shipment>;

    /// Cancels the shipment booked for an order. Cancelling twice is a no-op.
    async fn cancel(&self, order: &OrderRequest) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    /// order_id -> tracking number
    shipments: HashMap<String, String>,
    next_id: u32,
    fail_on_arrange: bool,
}

/// In-memory shipping service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every booking.
    pub fn set_fail_on_arrange(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_arrange = fail;
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .len()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn arrange(&self, order: &OrderRequest) -> Result<Shipment> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_arrange {
            return Err(WorkerError::ShippingUnavailable(
                "shipping unavailable".to_string(),
            ));
        }

        let tracking_number = match state.shipments.get(&order.order_id) {
            Some(existing) => existing.clone(),
            None => {
                state.next_id += 1;
                let tracking_number = format!("TRACK-{:04}", state.next_id);
                state
                    .shipments
                    .insert(order.order_id.clone(), tracking_number.clone());
                tracking_number
            }
        };

        Ok(Shipment {
            tracking_number,
            carrier: DEMO_CARRIER.to_string(),
        })
    }

    async fn cancel(&self, order: &OrderRequest) -> Result<()> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .remove(&order.order_id);
        Ok(())
    }
}
