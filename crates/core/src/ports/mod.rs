//! Boundaries to the systems the dialogue consumes and produces data for.
//!
//! Each trait is async and object safe so the composition root can inject
//! HTTP adapters in production and the in-memory fakes from [`memory`] in
//! tests and the local chat CLI.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::address::{Address, AddressCandidate, FulfillmentMode, SavedAddress};
use crate::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
use crate::domain::conversation::{Conversation, SessionKey};
use crate::domain::order::{IdempotencyKey, OrderDraft, OrderId};
use crate::errors::Collaborator;

pub mod memory;

pub use memory::{
    InMemoryAddressBook, InMemoryCatalog, InMemoryCheckout, InMemoryGeocoder,
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("{0} timed out")]
    Timeout(Collaborator),
    #[error("{collaborator} unavailable: {message}")]
    Unavailable { collaborator: Collaborator, message: String },
    #[error("{collaborator} returned an invalid response: {message}")]
    InvalidResponse { collaborator: Collaborator, message: String },
}

impl PortError {
    pub fn collaborator(&self) -> Collaborator {
        match self {
            Self::Timeout(collaborator)
            | Self::Unavailable { collaborator, .. }
            | Self::InvalidResponse { collaborator, .. } => *collaborator,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckoutError {
    /// Business-rule failure; the reason is shown to the customer as is.
    #[error("{reason}")]
    Rejected { reason: String },
    #[error(transparent)]
    Port(#[from] PortError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("version conflict for conversation {conversation_id}: expected version {expected}")]
    Conflict { conversation_id: String, expected: u64 },
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
    #[error("conversation record could not be decoded: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Items loosely matching `term`; an empty term lists every orderable item in scope.
    async fn search(&self, term: &str, scope: CatalogScope) -> Result<Vec<CatalogItem>, PortError>;
    async fn get(&self, item_ref: &ItemRef) -> Result<Option<CatalogItem>, PortError>;
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    async fn search_address(&self, text: &str) -> Result<Vec<AddressCandidate>, PortError>;
}

#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn saved_addresses(
        &self,
        session_key: &SessionKey,
    ) -> Result<Vec<SavedAddress>, PortError>;
    async fn remember(
        &self,
        session_key: &SessionKey,
        address: &Address,
    ) -> Result<SavedAddress, PortError>;
}

#[async_trait]
pub trait DeliveryFeeProvider: Send + Sync {
    async fn quote_fee(
        &self,
        mode: FulfillmentMode,
        address: Option<&Address>,
        subtotal: Decimal,
    ) -> Result<Decimal, PortError>;
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Creates at most one order per idempotency key.
    async fn create_order(
        &self,
        draft: &OrderDraft,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderId, CheckoutError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recent conversation for the session, archived or not.
    async fn load(&self, session_key: &SessionKey) -> Result<Option<Conversation>, StoreError>;

    /// Writes the conversation if the stored version still equals
    /// `conversation.version` and returns the new version.
    async fn save(&self, conversation: &Conversation) -> Result<u64, StoreError>;
}

/// Same fee for every delivery; pickup is free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatDeliveryFee {
    fee: Decimal,
}

impl FlatDeliveryFee {
    pub fn new(fee: Decimal) -> Self {
        Self { fee: fee.max(Decimal::ZERO) }
    }
}

#[async_trait]
impl DeliveryFeeProvider for FlatDeliveryFee {
    async fn quote_fee(
        &self,
        mode: FulfillmentMode,
        _address: Option<&Address>,
        _subtotal: Decimal,
    ) -> Result<Decimal, PortError> {
        Ok(match mode {
            FulfillmentMode::Delivery => self.fee,
            FulfillmentMode::Pickup => Decimal::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{DeliveryFeeProvider, FlatDeliveryFee, PortError};
    use crate::domain::address::FulfillmentMode;
    use crate::errors::Collaborator;

    #[tokio::test]
    async fn flat_fee_applies_to_delivery_only() {
        let provider = FlatDeliveryFee::new(Decimal::new(600, 2));
        let delivery = provider
            .quote_fee(FulfillmentMode::Delivery, None, Decimal::new(5000, 2))
            .await
            .expect("delivery fee");
        let pickup = provider
            .quote_fee(FulfillmentMode::Pickup, None, Decimal::new(5000, 2))
            .await
            .expect("pickup fee");
        assert_eq!(delivery, Decimal::new(600, 2));
        assert_eq!(pickup, Decimal::ZERO);
    }

    #[test]
    fn port_error_names_collaborator() {
        let error = PortError::Timeout(Collaborator::Geocoding);
        assert_eq!(error.collaborator(), Collaborator::Geocoding);
        assert_eq!(error.to_string(), "geocoding timed out");
    }
}
