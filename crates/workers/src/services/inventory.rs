//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use protocol::OrderRequest;

use crate::error::{Result, WorkerError};

/// Result of a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The reservation ID assigned by the inventory service.
    pub reservation_id: String,
}

/// Trait for inventory operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for an order.
    async fn reserve(&self, order: &OrderRequest) -> Result<Reservation>;

    /// Releases the reservation held for an order. Releasing twice is a no-op.
    async fn release(&self, order: &OrderRequest) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    /// order_id -> reservation_id
    reservations: HashMap<String, String>,
    releases: usize,
    next_id: u32,
    fail_on_reserve: bool,
}

/// In-memory inventory service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every reservation.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_reserve = fail;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reservations
            .len()
    }

    /// Returns the number of releases performed.
    pub fn release_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .releases
    }

    /// Returns true if stock is reserved for the order.
    pub fn is_reserved(&self, order_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reservations
            .contains_key(order_id)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(&self, order: &OrderRequest) -> Result<Reservation> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_reserve {
            return Err(WorkerError::InventoryUnavailable(
                "inventory unavailable".to_string(),
            ));
        }

        if let Some(reservation_id) = state.reservations.get(&order.order_id) {
            return Ok(Reservation {
                reservation_id: reservation_id.clone(),
            });
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state
            .reservations
            .insert(order.order_id.clone(), reservation_id.clone());

        Ok(Reservation { reservation_id })
    }

    async fn release(&self, order: &OrderRequest) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.reservations.remove(&order.order_id).is_some() {
            state.releases += 1;
        }
        Ok(())
    }
}
