//! Broker topology names.

/// Fanout exchange every worker publishes its events to.
pub const EVENTS_EXCHANGE: &str = "saga.events";

/// Queue the orchestrator consumes events from (bound to [`EVENTS_EXCHANGE`]).
pub const ORCHESTRATOR_EVENTS_QUEUE: &str = "orchestrator.events";

/// Command queue of the payment worker.
pub const PAYMENT_COMMANDS: &str = "payment.commands";

/// Command queue of the inventory worker.
pub const INVENTORY_COMMANDS: &str = "inventory.commands";

/// Command queue of the shipping worker.
pub const SHIPPING_COMMANDS: &str = "shipping.commands";

/// All worker command queues.
pub const COMMAND_QUEUES: [&str; 3] = [PAYMENT_COMMANDS, INVENTORY_COMMANDS, SHIPPING_COMMANDS];
