use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::address::FulfillmentMode;
use crate::flows::states::{
    DialogueEvent, DialogueState, FlowAction, GuardContext, TransitionGuard, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> DialogueState;
    fn transition(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
        context: &GuardContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The order-taking dialogue: greeting to checkout handoff.
#[derive(Clone, Debug, Default)]
pub struct DialogueFlow;

impl FlowDefinition for DialogueFlow {
    fn initial_state(&self) -> DialogueState {
        DialogueState::Greeting
    }

    fn transition(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
        context: &GuardContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_dialogue(current, event, context)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> DialogueState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
        context: &GuardContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &DialogueState,
        event: &DialogueEvent,
        context: &GuardContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "dialogue.transition_applied",
                        AuditCategory::Dialogue,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "dialogue.transition_rejected",
                        AuditCategory::Dialogue,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("from", current.as_str())
                    .with_metadata("event", format!("{event:?}"))
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<DialogueFlow> {
    fn default() -> Self {
        Self::new(DialogueFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("guard {guard:?} failed for transition from {state:?} using event {event:?}")]
    GuardFailed { state: DialogueState, event: DialogueEvent, guard: TransitionGuard },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: DialogueState, event: DialogueEvent },
}

impl FlowTransitionError {
    pub fn failed_guard(&self) -> Option<TransitionGuard> {
        match self {
            Self::GuardFailed { guard, .. } => Some(*guard),
            Self::InvalidTransition { .. } => None,
        }
    }
}

fn transition_dialogue(
    current: &DialogueState,
    event: &DialogueEvent,
    context: &GuardContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use DialogueEvent::{
        AddressResolved, BrowseRequested, CancelRequested, CartChanged, CartReviewRequested,
        CheckoutRequested, ConfirmAccepted, FulfillmentChosen, PaymentChangeRequested,
        PaymentResolved, SessionExpired,
    };
    use DialogueState::{
        AddressFlow, Browsing, CartReview, CheckoutSent, Closed, Confirmation, Greeting,
        PaymentFlow,
    };
    use FlowAction::{
        AbortSubflows, ArchiveConversation, AskFulfillment, ClearCart, DiscardDraft,
        PresentCart, PresentCatalog, PresentConfirmation, ResetCheckoutProgress,
        StartAddressFlow, StartPaymentFlow, SubmitCheckout,
    };

    let guard = |check: bool, guard: TransitionGuard| {
        if check {
            Ok(())
        } else {
            Err(FlowTransitionError::GuardFailed {
                state: *current,
                event: event.clone(),
                guard,
            })
        }
    };
    let invalid =
        || FlowTransitionError::InvalidTransition { state: *current, event: event.clone() };

    let (to, actions) = match (current, event) {
        (Greeting | Browsing | CartReview, BrowseRequested) => (Browsing, vec![PresentCatalog]),
        (Greeting | Browsing | CartReview, CartChanged) => (Browsing, Vec::new()),
        (AddressFlow | PaymentFlow | Confirmation, CartChanged) => {
            (Browsing, vec![ResetCheckoutProgress])
        }
        (Browsing | CartReview, CartReviewRequested) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            (CartReview, vec![PresentCart])
        }
        (Browsing | CartReview, CheckoutRequested) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            match context.fulfillment {
                None => (CartReview, vec![PresentCart, AskFulfillment]),
                Some(FulfillmentMode::Delivery) if !context.address_resolved => {
                    (AddressFlow, vec![StartAddressFlow])
                }
                Some(_) => (PaymentFlow, vec![StartPaymentFlow]),
            }
        }
        (
            Browsing | CartReview | AddressFlow | PaymentFlow | Confirmation,
            FulfillmentChosen(mode),
        ) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            match mode {
                FulfillmentMode::Delivery if !context.address_resolved => {
                    (AddressFlow, vec![ResetCheckoutProgress, StartAddressFlow])
                }
                _ => (PaymentFlow, vec![ResetCheckoutProgress, StartPaymentFlow]),
            }
        }
        (AddressFlow, AddressResolved) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            guard(context.address_resolved, TransitionGuard::AddressResolved)?;
            (PaymentFlow, vec![StartPaymentFlow])
        }
        (PaymentFlow, PaymentResolved) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            guard(context.payment_balanced, TransitionGuard::PaymentBalanced)?;
            (Confirmation, vec![PresentConfirmation])
        }
        (Confirmation, PaymentChangeRequested) => (PaymentFlow, vec![StartPaymentFlow]),
        (Confirmation, ConfirmAccepted) => {
            guard(context.cart_lines > 0, TransitionGuard::CartNotEmpty)?;
            guard(context.fulfillment.is_some(), TransitionGuard::FulfillmentChosen)?;
            if context.fulfillment.is_some_and(|mode| mode.requires_address()) {
                guard(context.address_resolved, TransitionGuard::AddressResolved)?;
            }
            guard(context.payment_balanced, TransitionGuard::PaymentBalanced)?;
            (CheckoutSent, vec![SubmitCheckout, ClearCart, DiscardDraft, ArchiveConversation])
        }
        (CheckoutSent | Closed, CancelRequested) => return Err(invalid()),
        (_, CancelRequested) => {
            (Closed, vec![AbortSubflows, DiscardDraft, ClearCart, ArchiveConversation])
        }
        (Closed, SessionExpired) => return Err(invalid()),
        (_, SessionExpired) => (Closed, vec![ArchiveConversation]),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::address::FulfillmentMode;
    use crate::flows::engine::{DialogueFlow, FlowEngine, FlowTransitionError};
    use crate::flows::states::{
        DialogueEvent, DialogueState, FlowAction, GuardContext, TransitionGuard,
    };

    fn ready_context(fulfillment: FulfillmentMode) -> GuardContext {
        GuardContext {
            cart_lines: 2,
            fulfillment: Some(fulfillment),
            address_resolved: fulfillment == FulfillmentMode::Delivery,
            payment_balanced: true,
        }
    }

    #[test]
    fn delivery_happy_path_reaches_checkout_sent() {
        let engine = FlowEngine::new(DialogueFlow);
        let mut context = GuardContext { cart_lines: 1, ..GuardContext::default() };
        let mut state = engine.initial_state();

        state = engine.apply(&state, &DialogueEvent::CartChanged, &context).expect("add").to;
        assert_eq!(state, DialogueState::Browsing);

        let review =
            engine.apply(&state, &DialogueEvent::CheckoutRequested, &context).expect("finish");
        assert_eq!(review.to, DialogueState::CartReview);
        assert!(review.actions.contains(&FlowAction::AskFulfillment));

        state = engine
            .apply(
                &review.to,
                &DialogueEvent::FulfillmentChosen(FulfillmentMode::Delivery),
                &context,
            )
            .expect("delivery")
            .to;
        assert_eq!(state, DialogueState::AddressFlow);

        context.fulfillment = Some(FulfillmentMode::Delivery);
        context.address_resolved = true;
        state = engine.apply(&state, &DialogueEvent::AddressResolved, &context).expect("addr").to;
        assert_eq!(state, DialogueState::PaymentFlow);

        context.payment_balanced = true;
        state = engine.apply(&state, &DialogueEvent::PaymentResolved, &context).expect("pay").to;
        assert_eq!(state, DialogueState::Confirmation);

        let sent =
            engine.apply(&state, &DialogueEvent::ConfirmAccepted, &context).expect("confirm");
        assert_eq!(sent.to, DialogueState::CheckoutSent);
        assert!(sent.actions.contains(&FlowAction::SubmitCheckout));
    }

    #[test]
    fn pickup_skips_address_flow() {
        let engine = FlowEngine::default();
        let context = GuardContext { cart_lines: 1, ..GuardContext::default() };
        let outcome = engine
            .apply(
                &DialogueState::CartReview,
                &DialogueEvent::FulfillmentChosen(FulfillmentMode::Pickup),
                &context,
            )
            .expect("pickup");
        assert_eq!(outcome.to, DialogueState::PaymentFlow);
    }

    #[test]
    fn payment_flow_requires_non_empty_cart() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &DialogueState::CartReview,
                &DialogueEvent::FulfillmentChosen(FulfillmentMode::Pickup),
                &GuardContext::default(),
            )
            .expect_err("empty cart");
        assert_eq!(error.failed_guard(), Some(TransitionGuard::CartNotEmpty));
    }

    #[test]
    fn delivery_cannot_leave_address_flow_unresolved() {
        let engine = FlowEngine::default();
        let context = GuardContext {
            cart_lines: 1,
            fulfillment: Some(FulfillmentMode::Delivery),
            ..GuardContext::default()
        };
        let error = engine
            .apply(&DialogueState::AddressFlow, &DialogueEvent::AddressResolved, &context)
            .expect_err("unresolved");
        assert_eq!(error.failed_guard(), Some(TransitionGuard::AddressResolved));
    }

    #[test]
    fn unbalanced_payment_blocks_confirmation_to_checkout() {
        let engine = FlowEngine::default();
        let mut context = ready_context(FulfillmentMode::Pickup);
        context.payment_balanced = false;
        let error = engine
            .apply(&DialogueState::Confirmation, &DialogueEvent::ConfirmAccepted, &context)
            .expect_err("unbalanced");
        assert!(matches!(
            error,
            FlowTransitionError::GuardFailed {
                state: DialogueState::Confirmation,
                guard: TransitionGuard::PaymentBalanced,
                ..
            }
        ));
    }

    #[test]
    fn cart_change_during_subflow_resets_progress() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &DialogueState::PaymentFlow,
                &DialogueEvent::CartChanged,
                &ready_context(FulfillmentMode::Pickup),
            )
            .expect("cart change");
        assert_eq!(outcome.to, DialogueState::Browsing);
        assert_eq!(outcome.actions, vec![FlowAction::ResetCheckoutProgress]);
    }

    #[test]
    fn closed_rejects_everything_but_is_reachable_by_cancel() {
        let engine = FlowEngine::default();
        let context = ready_context(FulfillmentMode::Pickup);
        let closed = engine
            .apply(&DialogueState::AddressFlow, &DialogueEvent::CancelRequested, &context)
            .expect("cancel");
        assert_eq!(closed.to, DialogueState::Closed);
        assert!(closed.actions.contains(&FlowAction::AbortSubflows));

        for event in [
            DialogueEvent::CartChanged,
            DialogueEvent::CheckoutRequested,
            DialogueEvent::ConfirmAccepted,
            DialogueEvent::CancelRequested,
        ] {
            let error = engine
                .apply(&DialogueState::Closed, &event, &context)
                .expect_err("closed is terminal");
            assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn checkout_sent_cannot_be_cancelled() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &DialogueState::CheckoutSent,
                &DialogueEvent::CancelRequested,
                &GuardContext::default(),
            )
            .expect_err("already sent");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(None, Some("web:123".to_owned()), "req-42", "dialogue");

        let _ = engine
            .apply_with_audit(
                &DialogueState::Greeting,
                &DialogueEvent::CartChanged,
                &GuardContext::default(),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &DialogueState::Greeting,
            &DialogueEvent::ConfirmAccepted,
            &GuardContext::default(),
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "dialogue.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("BROWSING"));
        assert_eq!(events[1].event_type, "dialogue.transition_rejected");
        assert_eq!(events[1].session_key.as_deref(), Some("web:123"));
    }
}
