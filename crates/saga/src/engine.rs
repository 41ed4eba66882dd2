//! The saga state machine.
//!
//! [`apply`] is a pure function of `(record, event)`. It performs no I/O and
//! cannot fail: domain failures arrive as ordinary events and leave the saga
//! in `Failed` with the right compensations attached.
//!
//! Two rules shape every decision:
//! - The event type alone selects the transition. The engine does not track
//!   which command is outstanding.
//! - Completion flags, not the state, decide which compensations a failure
//!   needs. Compensations run in reverse order of the forward steps.
//!
//! A success that arrives after the saga has moved past its step still sets
//! the step's flag. If the saga already failed, that step is compensated
//! right away.

use protocol::{CommandKind, SagaCommand, SagaEvent};
use saga_store::{SagaRecord, SagaState};

/// Forward steps of the order saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Payment,
    Inventory,
    Shipping,
}

impl Step {
    /// All steps in forward order.
    pub const ALL: [Step; 3] = [Step::Payment, Step::Inventory, Step::Shipping];

    /// Returns true if the record says this step succeeded.
    pub fn succeeded(&self, record: &SagaRecord) -> bool {
        match self {
            Step::Payment => record.payment_authorized(),
            Step::Inventory => record.inventory_reserved(),
            Step::Shipping => record.shipping_arranged(),
        }
    }

    /// Sets the completion flag of this step.
    pub fn mark(&self, record: &mut SagaRecord) {
        match self {
            Step::Payment => record.mark_payment_authorized(),
            Step::Inventory => record.mark_inventory_reserved(),
            Step::Shipping => record.mark_shipping_arranged(),
        }
    }

    /// The command that undoes this step.
    pub fn compensation(&self) -> CommandKind {
        match self {
            Step::Payment => CommandKind::RefundPayment,
            Step::Inventory => CommandKind::ReleaseInventory,
            Step::Shipping => CommandKind::CancelShipping,
        }
    }

    fn position(&self) -> usize {
        match self {
            Step::Payment => 0,
            Step::Inventory => 1,
            Step::Shipping => 2,
        }
    }
}

/// How an event affected the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record moved from one state to another.
    Advanced { from: SagaState, to: SagaState },
    /// A late success: its flag was set, the state stays where it is.
    Recorded { state: SagaState },
    /// A compensation acknowledgement. Nothing changes.
    Acknowledged,
    /// The event cannot move the saga from its current state.
    Stale { state: SagaState },
}

/// The result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub record: SagaRecord,
    /// Commands to dispatch, in order.
    pub commands: Vec<SagaCommand>,
    pub outcome: Outcome,
}

impl Transition {
    fn unchanged(record: SagaRecord, outcome: Outcome) -> Self {
        Self {
            record,
            commands: Vec::new(),
            outcome,
        }
    }

    /// Returns true if the record must be persisted.
    pub fn is_change(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Advanced { .. } | Outcome::Recorded { .. }
        )
    }
}

/// Computes the next record and outgoing commands for an event.
pub fn apply(record: SagaRecord, event: &SagaEvent) -> Transition {
    match event {
        SagaEvent::PaymentAuthorized(_) => advance(
            record,
            Step::Payment,
            SagaState::PaymentOk,
            Some(CommandKind::ReserveInventory),
        ),
        SagaEvent::InventoryReserved(_) => advance(
            record,
            Step::Inventory,
            SagaState::InventoryOk,
            Some(CommandKind::ArrangeShipping),
        ),
        SagaEvent::ShippingArranged(_) => advance(
            record,
            Step::Shipping,
            SagaState::Completed,
            None,
        ),
        SagaEvent::PaymentFailed(_) => fail(record, Step::Payment),
        SagaEvent::InventoryFailed(_) => fail(record, Step::Inventory),
        SagaEvent::ShippingFailed(_) => fail(record, Step::Shipping),
        SagaEvent::PaymentRefunded(_)
        | SagaEvent::InventoryReleased(_)
        | SagaEvent::ShippingCancelled(_) => Transition::unchanged(record, Outcome::Acknowledged),
    }
}

/// Compensations owed when `failed` fails: every earlier step whose flag is
/// set, latest first.
pub fn compensations(record: &SagaRecord, failed: Step) -> Vec<CommandKind> {
    Step::ALL[..failed.position()]
        .iter()
        .rev()
        .filter(|step| step.succeeded(record))
        .map(Step::compensation)
        .collect()
}

fn advance(
    mut record: SagaRecord,
    step: Step,
    to: SagaState,
    next: Option<CommandKind>,
) -> Transition {
    let from = record.state();
    if !record.transition_to(to) {
        return late_success(record, step);
    }
    step.mark(&mut record);

    let commands = next
        .map(|kind| SagaCommand::new(kind, record.order().clone()))
        .into_iter()
        .collect();
    Transition {
        record,
        commands,
        outcome: Outcome::Advanced { from, to },
    }
}

/// A success for a step the saga has already moved past. Only the flag is
/// new; a failed saga also gets the step's compensation.
fn late_success(mut record: SagaRecord, step: Step) -> Transition {
    let state = record.state();
    if step.succeeded(&record) {
        return Transition::unchanged(record, Outcome::Stale { state });
    }
    step.mark(&mut record);

    let commands = if state == SagaState::Failed {
        vec![SagaCommand::new(step.compensation(), record.order().clone())]
    } else {
        Vec::new()
    };
    Transition {
        record,
        commands,
        outcome: Outcome::Recorded { state },
    }
}

fn fail(mut record: SagaRecord, failed: Step) -> Transition {
    let from = record.state();

    // The first step has nothing before it to undo.
    let entered = if failed == Step::Payment {
        record.transition_to(SagaState::Failed)
    } else {
        record.transition_to(SagaState::Compensating) && record.transition_to(SagaState::Failed)
    };
    if !entered {
        return Transition::unchanged(record, Outcome::Stale { state: from });
    }

    let commands = compensations(&record, failed)
        .into_iter()
        .map(|kind| SagaCommand::new(kind, record.order().clone()))
        .collect();
    Transition {
        record,
        commands,
        outcome: Outcome::Advanced {
            from,
            to: SagaState::Failed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{OrderRequest, StepCompleted, StepFailed};
    use saga_store::SagaId;

    fn started() -> SagaRecord {
        SagaRecord::new(SagaId::new(), OrderRequest::new("O1", "U1", 100.0))
    }

    fn ok(kind: fn(StepCompleted) -> SagaEvent) -> SagaEvent {
        kind(StepCompleted::new("O1"))
    }

    fn failed(kind: fn(StepFailed) -> SagaEvent) -> SagaEvent {
        kind(StepFailed::new("O1", "simulated failure"))
    }

    fn kinds(transition: &Transition) -> Vec<CommandKind> {
        transition.commands.iter().map(|c| c.kind).collect()
    }

    /// Drives a record through the given events, keeping only the record.
    fn replay(events: &[SagaEvent]) -> SagaRecord {
        events
            .iter()
            .fold(started(), |record, event| apply(record, event).record)
    }

    #[test]
    fn test_payment_authorized_requests_inventory() {
        let t = apply(started(), &ok(SagaEvent::PaymentAuthorized));

        assert_eq!(t.record.state(), SagaState::PaymentOk);
        assert!(t.record.payment_authorized());
        assert_eq!(kinds(&t), vec![CommandKind::ReserveInventory]);
        assert_eq!(t.commands[0].order, *t.record.order());
        assert_eq!(
            t.outcome,
            Outcome::Advanced {
                from: SagaState::Started,
                to: SagaState::PaymentOk
            }
        );
    }

    #[test]
    fn test_inventory_reserved_requests_shipping() {
        let record = replay(&[ok(SagaEvent::PaymentAuthorized)]);
        let t = apply(record, &ok(SagaEvent::InventoryReserved));

        assert_eq!(t.record.state(), SagaState::InventoryOk);
        assert!(t.record.inventory_reserved());
        assert_eq!(kinds(&t), vec![CommandKind::ArrangeShipping]);
    }

    #[test]
    fn test_happy_path_completes_with_all_flags() {
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
        ]);
        let t = apply(record, &ok(SagaEvent::ShippingArranged));

        assert_eq!(t.record.state(), SagaState::Completed);
        assert!(t.record.payment_authorized());
        assert!(t.record.inventory_reserved());
        assert!(t.record.shipping_arranged());
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_payment_failed_fails_without_compensation() {
        let t = apply(started(), &failed(SagaEvent::PaymentFailed));

        assert_eq!(t.record.state(), SagaState::Failed);
        assert!(t.commands.is_empty());
        assert!(t.is_change());
    }

    #[test]
    fn test_inventory_failed_refunds_authorized_payment() {
        let record = replay(&[ok(SagaEvent::PaymentAuthorized)]);
        let t = apply(record, &failed(SagaEvent::InventoryFailed));

        assert_eq!(t.record.state(), SagaState::Failed);
        assert_eq!(kinds(&t), vec![CommandKind::RefundPayment]);
        assert!(t.record.payment_authorized());
    }

    #[test]
    fn test_inventory_failed_without_payment_issues_no_refund() {
        let t = apply(started(), &failed(SagaEvent::InventoryFailed));

        assert_eq!(t.record.state(), SagaState::Failed);
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_inventory_failed_never_releases_inventory() {
        // Inventory is the failing step itself; only earlier steps are undone.
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
        ]);
        let t = apply(record, &failed(SagaEvent::InventoryFailed));

        assert_eq!(kinds(&t), vec![CommandKind::RefundPayment]);
    }

    #[test]
    fn test_shipping_failed_compensates_in_reverse_order() {
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
        ]);
        let t = apply(record, &failed(SagaEvent::ShippingFailed));

        assert_eq!(t.record.state(), SagaState::Failed);
        assert_eq!(
            kinds(&t),
            vec![CommandKind::ReleaseInventory, CommandKind::RefundPayment]
        );
        assert_eq!(
            t.outcome,
            Outcome::Advanced {
                from: SagaState::InventoryOk,
                to: SagaState::Failed
            }
        );
    }

    #[test]
    fn test_flags_not_state_drive_compensation() {
        // Inventory reported before payment: the state says INVENTORY_OK but
        // only the inventory flag is set, so only inventory is released.
        let record = replay(&[ok(SagaEvent::InventoryReserved)]);
        assert_eq!(record.state(), SagaState::InventoryOk);
        assert!(!record.payment_authorized());

        let t = apply(record, &failed(SagaEvent::ShippingFailed));
        assert_eq!(kinds(&t), vec![CommandKind::ReleaseInventory]);
    }

    #[test]
    fn test_late_payment_success_is_recorded() {
        let record = replay(&[ok(SagaEvent::InventoryReserved)]);

        let t = apply(record, &ok(SagaEvent::PaymentAuthorized));
        assert_eq!(
            t.outcome,
            Outcome::Recorded {
                state: SagaState::InventoryOk
            }
        );
        assert!(t.is_change());
        assert_eq!(t.record.state(), SagaState::InventoryOk);
        assert!(t.record.payment_authorized());
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_reordered_successes_are_all_compensated() {
        let record = replay(&[
            ok(SagaEvent::InventoryReserved),
            ok(SagaEvent::PaymentAuthorized),
        ]);

        let t = apply(record, &failed(SagaEvent::ShippingFailed));
        assert_eq!(t.record.state(), SagaState::Failed);
        assert_eq!(
            kinds(&t),
            vec![CommandKind::ReleaseInventory, CommandKind::RefundPayment]
        );
    }

    #[test]
    fn test_late_success_on_failed_saga_is_compensated() {
        // Inventory failed before the payment confirmation arrived: nothing
        // was refunded at failure time, so the late payment is refunded now.
        let failed_saga = replay(&[failed(SagaEvent::InventoryFailed)]);
        assert_eq!(failed_saga.state(), SagaState::Failed);

        let t = apply(failed_saga, &ok(SagaEvent::PaymentAuthorized));
        assert_eq!(
            t.outcome,
            Outcome::Recorded {
                state: SagaState::Failed
            }
        );
        assert_eq!(t.record.state(), SagaState::Failed);
        assert!(t.record.payment_authorized());
        assert_eq!(kinds(&t), vec![CommandKind::RefundPayment]);
    }

    #[test]
    fn test_late_success_on_completed_saga_only_sets_flag() {
        let completed = replay(&[
            ok(SagaEvent::InventoryReserved),
            ok(SagaEvent::ShippingArranged),
        ]);
        assert_eq!(completed.state(), SagaState::Completed);

        let t = apply(completed, &ok(SagaEvent::PaymentAuthorized));
        assert_eq!(t.record.state(), SagaState::Completed);
        assert!(t.record.payment_authorized());
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_shipping_failed_with_only_payment_refunds() {
        let record = replay(&[ok(SagaEvent::PaymentAuthorized)]);
        let t = apply(record, &failed(SagaEvent::ShippingFailed));

        assert_eq!(kinds(&t), vec![CommandKind::RefundPayment]);
    }

    #[test]
    fn test_flags_are_never_reset() {
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            failed(SagaEvent::PaymentFailed),
            failed(SagaEvent::InventoryFailed),
            ok(SagaEvent::PaymentRefunded),
        ]);

        assert_eq!(record.state(), SagaState::Failed);
        assert!(record.payment_authorized());
    }

    #[test]
    fn test_compensation_acknowledgements_change_nothing() {
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
            failed(SagaEvent::ShippingFailed),
        ]);

        for event in [
            ok(SagaEvent::InventoryReleased),
            ok(SagaEvent::PaymentRefunded),
            ok(SagaEvent::ShippingCancelled),
        ] {
            let t = apply(record.clone(), &event);
            assert_eq!(t.outcome, Outcome::Acknowledged);
            assert_eq!(t.record, record);
            assert!(t.commands.is_empty());
            assert!(!t.is_change());
        }
    }

    #[test]
    fn test_terminal_sagas_ignore_late_events() {
        let completed = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
            ok(SagaEvent::ShippingArranged),
        ]);

        let t = apply(completed.clone(), &failed(SagaEvent::ShippingFailed));
        assert_eq!(
            t.outcome,
            Outcome::Stale {
                state: SagaState::Completed
            }
        );
        assert_eq!(t.record, completed);
        assert!(t.commands.is_empty());

        let failed_saga = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            failed(SagaEvent::InventoryFailed),
        ]);
        let t = apply(failed_saga.clone(), &ok(SagaEvent::PaymentAuthorized));
        assert!(matches!(t.outcome, Outcome::Stale { .. }));
        assert_eq!(t.record, failed_saga);
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_forward_event_never_moves_backwards() {
        let record = replay(&[
            ok(SagaEvent::PaymentAuthorized),
            ok(SagaEvent::InventoryReserved),
        ]);

        let t = apply(record, &ok(SagaEvent::PaymentAuthorized));
        assert_eq!(
            t.outcome,
            Outcome::Stale {
                state: SagaState::InventoryOk
            }
        );
        assert_eq!(t.record.state(), SagaState::InventoryOk);
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_repeated_success_is_applied_once() {
        let record = replay(&[ok(SagaEvent::PaymentAuthorized)]);
        let t = apply(record, &ok(SagaEvent::PaymentAuthorized));

        assert!(matches!(t.outcome, Outcome::Stale { .. }));
        assert!(t.commands.is_empty());
    }

    #[test]
    fn test_compensations_helper() {
        let mut record = started();
        record.mark_payment_authorized();
        record.mark_inventory_reserved();
        record.mark_shipping_arranged();

        assert!(compensations(&record, Step::Payment).is_empty());
        assert_eq!(
            compensations(&record, Step::Inventory),
            vec![CommandKind::RefundPayment]
        );
        assert_eq!(
            compensations(&record, Step::Shipping),
            vec![CommandKind::ReleaseInventory, CommandKind::RefundPayment]
        );
    }
}
