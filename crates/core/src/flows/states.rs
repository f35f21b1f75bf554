use serde::{Deserialize, Serialize};

use crate::domain::address::FulfillmentMode;

/// Top-level dialogue state of a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogueState {
    Greeting,
    Browsing,
    CartReview,
    AddressFlow,
    PaymentFlow,
    Confirmation,
    CheckoutSent,
    Closed,
}

impl DialogueState {
    pub const ALL: [Self; 8] = [
        Self::Greeting,
        Self::Browsing,
        Self::CartReview,
        Self::AddressFlow,
        Self::PaymentFlow,
        Self::Confirmation,
        Self::CheckoutSent,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::Browsing => "BROWSING",
            Self::CartReview => "CART_REVIEW",
            Self::AddressFlow => "ADDRESS_FLOW",
            Self::PaymentFlow => "PAYMENT_FLOW",
            Self::Confirmation => "CONFIRMATION",
            Self::CheckoutSent => "CHECKOUT_SENT",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value.trim())
    }

    /// States after which the conversation only accepts a fresh start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CheckoutSent | Self::Closed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    BrowseRequested,
    CartChanged,
    CartReviewRequested,
    CheckoutRequested,
    FulfillmentChosen(FulfillmentMode),
    AddressResolved,
    PaymentResolved,
    PaymentChangeRequested,
    ConfirmAccepted,
    CancelRequested,
    SessionExpired,
}

/// Facts about the conversation the transition guards inspect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardContext {
    pub cart_lines: usize,
    pub fulfillment: Option<FulfillmentMode>,
    pub address_resolved: bool,
    pub payment_balanced: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionGuard {
    CartNotEmpty,
    FulfillmentChosen,
    AddressResolved,
    PaymentBalanced,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    PresentCatalog,
    PresentCart,
    AskFulfillment,
    StartAddressFlow,
    StartPaymentFlow,
    PresentConfirmation,
    ResetCheckoutProgress,
    SubmitCheckout,
    ClearCart,
    AbortSubflows,
    DiscardDraft,
    ArchiveConversation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: DialogueState,
    pub to: DialogueState,
    pub event: DialogueEvent,
    pub actions: Vec<FlowAction>,
}
