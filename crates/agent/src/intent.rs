use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use comanda_core::domain::address::{AddressStep, FulfillmentMode};
use comanda_core::domain::conversation::Conversation;
use comanda_core::domain::payment::{PaymentMethod, PaymentStep};
use comanda_core::flows::DialogueState;

/// One item phrase, e.g. "2 x-burguer com bacon sem cebola".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub term: String,
    pub quantity: u32,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub observation: Option<String>,
}

impl ItemRequest {
    pub fn single(term: impl Into<String>) -> Self {
        Self { term: term.into(), quantity: 1, modifiers: Vec::new(), observation: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveTarget {
    Position(usize),
    Term(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMention {
    pub method: PaymentMethod,
    pub amount: Option<Decimal>,
    pub change_for: Option<Decimal>,
}

impl PaymentMention {
    pub fn method(method: PaymentMethod) -> Self {
        Self { method, amount: None, change_for: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Greeting,
    Help,
    Browse { filter: Option<String> },
    AddItems { items: Vec<ItemRequest> },
    RemoveItem { target: RemoveTarget, quantity: Option<u32> },
    Personalize { position: usize, modifiers: Vec<String>, observation: Option<String> },
    ViewCart,
    FinishOrder,
    ChooseFulfillment(FulfillmentMode),
    NewAddress,
    AddressText(String),
    SelectOption(usize),
    SelectPayment { mentions: Vec<PaymentMention> },
    Confirm,
    Decline,
    Cancel,
    Restart,
    Unknown,
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Help => "help",
            Self::Browse { .. } => "browse",
            Self::AddItems { .. } => "add_items",
            Self::RemoveItem { .. } => "remove_item",
            Self::Personalize { .. } => "personalize",
            Self::ViewCart => "view_cart",
            Self::FinishOrder => "finish_order",
            Self::ChooseFulfillment(_) => "choose_fulfillment",
            Self::NewAddress => "new_address",
            Self::AddressText(_) => "address_text",
            Self::SelectOption(_) => "select_option",
            Self::SelectPayment { .. } => "select_payment",
            Self::Confirm => "confirm",
            Self::Decline => "decline",
            Self::Cancel => "cancel",
            Self::Restart => "restart",
            Self::Unknown => "unknown",
        }
    }

    /// Intents that change the cart, the sub-flows or the top-level state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::Greeting | Self::Help | Self::Browse { .. } | Self::ViewCart | Self::Unknown
        )
    }

    /// Intents that open a new conversation once the current one is over.
    pub fn starts_fresh_conversation(&self) -> bool {
        matches!(self, Self::Greeting | Self::Restart)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Rule,
    Context,
    Llm,
}

impl IntentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Context => "context",
            Self::Llm => "llm",
        }
    }
}

/// What the classifiers may know about the conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogueSnapshot {
    pub state: DialogueState,
    pub cart_lines: usize,
    pub has_pending: bool,
    pub address_step: Option<AddressStep>,
    pub payment_step: Option<PaymentStep>,
}

impl DialogueSnapshot {
    pub fn of(conversation: &Conversation) -> Self {
        let context = &conversation.context;
        let in_address = conversation.state == DialogueState::AddressFlow;
        let in_payment = conversation.state == DialogueState::PaymentFlow;
        Self {
            state: conversation.state,
            cart_lines: context.cart.len(),
            has_pending: context.pending.is_some(),
            address_step: context
                .address_flow
                .as_ref()
                .filter(|_| in_address)
                .map(|flow| flow.step()),
            payment_step: context
                .payment_flow
                .as_ref()
                .filter(|_| in_payment)
                .map(|flow| flow.step()),
        }
    }

    /// A bare number is an answer to a numbered question.
    pub fn expects_choice(&self) -> bool {
        self.has_pending
            || matches!(
                self.address_step,
                Some(AddressStep::AwaitChoice | AddressStep::AwaitSelection)
            )
            || matches!(self.payment_step, Some(PaymentStep::AwaitMethod))
    }

    /// Free text is address data (a search or a complement).
    pub fn expects_address_text(&self) -> bool {
        matches!(self.address_step, Some(AddressStep::Searching | AddressStep::AwaitComplement))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use comanda_core::domain::address::AddressFlowState;
    use comanda_core::domain::conversation::{Conversation, SessionKey};
    use comanda_core::flows::DialogueState;

    use super::{DialogueSnapshot, Intent};

    #[test]
    fn snapshot_ignores_subflow_left_over_from_another_state() {
        let mut conversation =
            Conversation::start(SessionKey("web:1".to_string()), "web", Utc::now());
        conversation.context.address_flow = Some(AddressFlowState::Searching);
        conversation.state = DialogueState::Browsing;

        let snapshot = DialogueSnapshot::of(&conversation);
        assert_eq!(snapshot.address_step, None);
        assert!(!snapshot.expects_address_text());

        conversation.state = DialogueState::AddressFlow;
        assert!(DialogueSnapshot::of(&conversation).expects_address_text());
    }

    #[test]
    fn read_only_intents_are_not_mutating() {
        assert!(!Intent::ViewCart.is_mutating());
        assert!(!Intent::Browse { filter: None }.is_mutating());
        assert!(Intent::Confirm.is_mutating());
        assert!(Intent::Restart.starts_fresh_conversation());
    }
}
