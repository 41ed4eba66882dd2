//! Command handlers: one per worker, each turning a command into exactly one
//! result event.
//!
//! Forward steps always produce an event, a failure event if the service
//! refused. Compensations have no failure event: a failed compensation is
//! returned as an error and retried until it succeeds.

use async_trait::async_trait;
use protocol::{CommandKind, SagaCommand, SagaEvent, StepCompleted, StepFailed};

use crate::error::Result;
use crate::services::{InventoryService, PaymentService, ShippingService};

/// Performs one kind of saga step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Worker name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Performs the command and returns the event reporting its outcome, or
    /// `None` if this worker does not handle the command.
    ///
    /// An error means the command must be retried.
    async fn handle(&self, command: &SagaCommand) -> Result<Option<SagaEvent>>;
}

/// Handles `AuthorizePayment` and `RefundPayment`.
pub struct PaymentHandler<S> {
    service: S,
}

impl<S: PaymentService> PaymentHandler<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: PaymentService> StepHandler for PaymentHandler<S> {
    fn name(&self) -> &'static str {
        "payment"
    }

    async fn handle(&self, command: &SagaCommand) -> Result<Option<SagaEvent>> {
        let order = &command.order;
        match command.kind {
            CommandKind::AuthorizePayment => Ok(Some(match self.service.authorize(order).await {
                Ok(auth) => SagaEvent::PaymentAuthorized(
                    StepCompleted::new(&order.order_id).with_reference(auth.payment_id),
                ),
                Err(e) => SagaEvent::PaymentFailed(StepFailed::new(&order.order_id, e.reason())),
            })),
            CommandKind::RefundPayment => compensate(
                self.service.refund(order).await,
                SagaEvent::PaymentRefunded(StepCompleted::new(&order.order_id)),
            ),
            _ => Ok(None),
        }
    }
}

/// Handles `ReserveInventory` and `ReleaseInventory`.
pub struct InventoryHandler<S> {
    service: S,
}

impl<S: InventoryService> InventoryHandler<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: InventoryService> StepHandler for InventoryHandler<S> {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn handle(&self, command: &SagaCommand) -> Result<Option<SagaEvent>> {
        let order = &command.order;
        match command.kind {
            CommandKind::ReserveInventory => Ok(Some(match self.service.reserve(order).await {
                Ok(reservation) => SagaEvent::InventoryReserved(
                    StepCompleted::new(&order.order_id).with_reference(reservation.reservation_id),
                ),
                Err(e) => {
                    SagaEvent::InventoryFailed(StepFailed::new(&order.order_id, e.reason()))
                }
            })),
            CommandKind::ReleaseInventory => compensate(
                self.service.release(order).await,
                SagaEvent::InventoryReleased(StepCompleted::new(&order.order_id)),
            ),
            _ => Ok(None),
        }
    }
}

/// Handles `ArrangeShipping` and `CancelShipping`.
pub struct ShippingHandler<S> {
    service: S,
}

impl<S: ShippingService> ShippingHandler<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: ShippingService> StepHandler for ShippingHandler<S> {
    fn name(&self) -> &'static str {
        "shipping"
    }

    async fn handle(&self, command: &SagaCommand) -> Result<Option<SagaEvent>> {
        let order = &command.order;
        match command.kind {
            CommandKind::ArrangeShipping => Ok(Some(match self.service.arrange(order).await {
                Ok(shipment) => SagaEvent::ShippingArranged(
                    StepCompleted::new(&order.order_id)
                        .with_reference(shipment.tracking_number)
                        .with_carrier(shipment.carrier),
                ),
                Err(e) => SagaEvent::ShippingFailed(StepFailed::new(&order.order_id, e.reason())),
            })),
            CommandKind::CancelShipping => compensate(
                self.service.cancel(order).await,
                SagaEvent::ShippingCancelled(StepCompleted::new(&order.order_id)),
            ),
            _ => Ok(None),
        }
    }
}

fn compensate(result: Result<()>, done: SagaEvent) -> Result<Option<SagaEvent>> {
    result.map(|()| Some(done))
}
