//! Simulated step workers.
//!
//! Each worker consumes its command queue, performs the step against an
//! in-memory service and reports the outcome as one event on the events
//! exchange. Services can be told to fail so that compensation paths can be
//! exercised end to end.

pub mod error;
pub mod handlers;
pub mod services;
pub mod worker;

pub use error::{Result, WorkerError};
pub use handlers::{InventoryHandler, PaymentHandler, ShippingHandler, StepHandler};
pub use services::{
    Authorization, InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService,
    InventoryService, PaymentService, Reservation, Shipment, ShippingService,
};
pub use worker::{CommandWorker, DEFAULT_COMPENSATION_DELAY, DEFAULT_STEP_DELAY};
