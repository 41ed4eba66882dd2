//! Simulated external services behind each worker.

pub mod inventory;
pub mod payment;
pub mod shipping;

pub use inventory::{InMemoryInventoryService, InventoryService, Reservation};
pub use payment::{Authorization, InMemoryPaymentService, PaymentService};
pub use shipping::{InMemoryShippingService, Shipment, ShippingService};
