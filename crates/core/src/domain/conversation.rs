use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::address::{AddressFlowState, AddressSelection, FulfillmentMode};
use crate::domain::cart::{Cart, CustomizationChoice};
use crate::domain::catalog::ItemRef;
use crate::domain::order::CheckoutRecord;
use crate::domain::payment::{PaymentFlowState, PaymentSelection};
use crate::flows::states::DialogueState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Customer identity on a channel, e.g. `whatsapp:5541999990000`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub direction: MessageDirection,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    CheckoutCompleted,
    Cancelled,
    Timeout,
    Restarted,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "checkout_completed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Restarted => "restarted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "checkout_completed" => Some(Self::CheckoutCompleted),
            "cancelled" => Some(Self::Cancelled),
            "timeout" => Some(Self::Timeout),
            "restarted" => Some(Self::Restarted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationItem {
    pub item_ref: ItemRef,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarificationOption {
    pub option_id: String,
    pub label: String,
}

/// A numbered question the bot asked and is waiting on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingClarification {
    /// The resolver could not pick between close catalog matches.
    ChooseItem {
        term: String,
        quantity: u32,
        modifiers: Vec<String>,
        observation: Option<String>,
        candidates: Vec<ClarificationItem>,
    },
    /// A required customization group was left empty.
    ChooseCustomization {
        item_ref: ItemRef,
        quantity: u32,
        choices: Vec<CustomizationChoice>,
        observation: Option<String>,
        group_id: String,
        group_name: String,
        options: Vec<ClarificationOption>,
    },
    /// A remove matched several lines of the same item.
    ChooseLine { positions: Vec<usize>, quantity: Option<u32> },
}

/// Structured per-conversation state carried between turns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub cart: Cart,
    #[serde(default)]
    pub fulfillment: Option<FulfillmentMode>,
    #[serde(default)]
    pub address_flow: Option<AddressFlowState>,
    #[serde(default)]
    pub address: Option<AddressSelection>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    #[serde(default)]
    pub payment_flow: Option<PaymentFlowState>,
    #[serde(default)]
    pub payment: Option<PaymentSelection>,
    #[serde(default)]
    pub pending: Option<PendingClarification>,
    #[serde(default)]
    pub checkout: Option<CheckoutRecord>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ConversationContext {
    /// Drops every resolution that depends on the cart contents or fulfillment.
    pub fn reset_checkout_progress(&mut self) {
        self.address_flow = None;
        self.payment_flow = None;
        self.payment = None;
    }

    /// Aborts sub-flows and forgets the fulfillment choice; the cart stays.
    pub fn abort_subflows(&mut self) {
        self.reset_checkout_progress();
        self.fulfillment = None;
        self.address = None;
        self.delivery_fee = None;
        self.pending = None;
    }

    pub fn address_resolved(&self) -> bool {
        self.address.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub reason: ArchiveReason,
    pub archived_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub session_key: SessionKey,
    pub channel: String,
    pub state: DialogueState,
    pub context: ConversationContext,
    pub history: Vec<MessageRecord>,
    /// Optimistic concurrency token; incremented by the store on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub archived: Option<ArchiveRecord>,
}

impl Conversation {
    pub fn start(session_key: SessionKey, channel: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ConversationId::generate(),
            session_key,
            channel: channel.into(),
            state: DialogueState::Greeting,
            context: ConversationContext::default(),
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            archived: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived.is_some()
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_activity_at > idle_timeout
    }

    pub fn archive(&mut self, reason: ArchiveReason, now: DateTime<Utc>) {
        if self.archived.is_none() {
            self.archived = Some(ArchiveRecord { reason, archived_at: now });
        }
    }

    /// Appends a message, keeping at most `limit` entries.
    pub fn record_message(
        &mut self,
        direction: MessageDirection,
        body: impl Into<String>,
        at: DateTime<Utc>,
        limit: usize,
    ) {
        self.history.push(MessageRecord { direction, body: body.into(), occurred_at: at });
        if limit > 0 && self.history.len() > limit {
            let overflow = self.history.len() - limit;
            self.history.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ArchiveReason, Conversation, MessageDirection, SessionKey};
    use crate::flows::states::DialogueState;

    #[test]
    fn new_conversation_starts_in_greeting_with_version_zero() {
        let conversation =
            Conversation::start(SessionKey("web:abc".to_string()), "web", Utc::now());
        assert_eq!(conversation.state, DialogueState::Greeting);
        assert_eq!(conversation.version, 0);
        assert!(!conversation.is_archived());
    }

    #[test]
    fn history_is_capped_dropping_oldest() {
        let now = Utc::now();
        let mut conversation = Conversation::start(SessionKey("web:abc".to_string()), "web", now);
        for index in 0..5 {
            conversation.record_message(MessageDirection::Inbound, format!("m{index}"), now, 3);
        }
        let bodies = conversation.history.iter().map(|m| m.body.as_str()).collect::<Vec<_>>();
        assert_eq!(bodies, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn idle_detection_uses_last_activity() {
        let now = Utc::now();
        let conversation =
            Conversation::start(SessionKey("web:abc".to_string()), "web", now - Duration::minutes(90));
        assert!(conversation.is_idle(now, Duration::minutes(60)));
        assert!(!conversation.is_idle(now, Duration::minutes(120)));
    }

    #[test]
    fn archive_keeps_first_reason() {
        let now = Utc::now();
        let mut conversation = Conversation::start(SessionKey("web:abc".to_string()), "web", now);
        conversation.archive(ArchiveReason::Cancelled, now);
        conversation.archive(ArchiveReason::Timeout, now);
        assert_eq!(
            conversation.archived.map(|record| record.reason),
            Some(ArchiveReason::Cancelled)
        );
        assert_eq!(ArchiveReason::parse("timeout"), Some(ArchiveReason::Timeout));
    }
}
