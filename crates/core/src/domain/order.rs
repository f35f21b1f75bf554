use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::address::{AddressSelection, FulfillmentMode};
use crate::domain::cart::CartLine;
use crate::domain::conversation::{ConversationId, SessionKey};
use crate::domain::payment::PaymentSelection;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

/// Checkout-ready snapshot. Lives only between a confirm intent and the
/// checkout call; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub conversation_id: ConversationId,
    pub session_key: SessionKey,
    pub channel: String,
    pub lines: Vec<CartLine>,
    pub fulfillment: FulfillmentMode,
    pub address: Option<AddressSelection>,
    pub payments: PaymentSelection,
    pub totals: OrderTotals,
    pub assembled_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct DraftContent<'a> {
    lines: &'a [CartLine],
    fulfillment: FulfillmentMode,
    address: Option<&'a AddressSelection>,
    payments: &'a PaymentSelection,
    totals: &'a OrderTotals,
}

impl OrderDraft {
    /// SHA-256 over the order content. Excludes timestamps so a retried
    /// confirm over the same content hashes identically.
    pub fn content_hash(&self) -> String {
        let content = DraftContent {
            lines: &self.lines,
            fulfillment: self.fulfillment,
            address: self.address.as_ref(),
            payments: &self.payments,
            totals: &self.totals,
        };
        let encoded = serde_json::to_vec(&content).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        format!("{:x}", hasher.finalize())
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        let hash = self.content_hash();
        IdempotencyKey(format!("{}:{}", self.conversation_id.0, &hash[..32]))
    }
}

/// Result of a successful checkout, kept on the conversation for replays.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub idempotency_key: IdempotencyKey,
    pub order_id: OrderId,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}
