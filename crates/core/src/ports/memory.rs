use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::catalog::normalize::{normalize, tokens, typo_distance};
use crate::domain::address::{Address, AddressCandidate, SavedAddress};
use crate::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
use crate::domain::conversation::SessionKey;
use crate::domain::order::{IdempotencyKey, OrderDraft, OrderId};
use crate::errors::Collaborator;
use crate::ports::{
    AddressBook, CatalogSource, CheckoutError, CheckoutGateway, GeocodingProvider, PortError,
};

#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    items: Arc<RwLock<Vec<CatalogItem>>>,
}

impl InMemoryCatalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items: Arc::new(RwLock::new(items)) }
    }

    pub async fn upsert(&self, item: CatalogItem) {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|existing| existing.item_ref == item.item_ref) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    pub async fn items(&self) -> Vec<CatalogItem> {
        self.items.read().await.clone()
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn search(&self, term: &str, scope: CatalogScope) -> Result<Vec<CatalogItem>, PortError> {
        let query = normalize(term);
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|item| item.active && scope.includes(item.item_ref.kind()))
            .filter(|item| query.is_empty() || loosely_matches(&query, item))
            .cloned()
            .collect())
    }

    async fn get(&self, item_ref: &ItemRef) -> Result<Option<CatalogItem>, PortError> {
        Ok(self.items.read().await.iter().find(|item| &item.item_ref == item_ref).cloned())
    }
}

fn loosely_matches(query: &str, item: &CatalogItem) -> bool {
    let query_tokens = tokens(query);
    let names = std::iter::once(item.name.as_str())
        .chain(item.aliases.iter().map(String::as_str))
        .chain(item.category.as_deref())
        .map(normalize)
        .collect::<Vec<_>>();
    names.iter().any(|name| {
        tokens(name).into_iter().any(|name_token| {
            query_tokens.iter().any(|query_token| {
                name_token.starts_with(query_token)
                    || typo_distance(query_token, name_token).is_some()
            })
        })
    })
}

/// Geocoder answering from a fixed gazetteer.
#[derive(Clone, Default)]
pub struct InMemoryGeocoder {
    gazetteer: Arc<RwLock<Vec<AddressCandidate>>>,
    latency: Option<Duration>,
    unavailable: bool,
}

impl InMemoryGeocoder {
    pub fn new(gazetteer: Vec<AddressCandidate>) -> Self {
        Self { gazetteer: Arc::new(RwLock::new(gazetteer)), latency: None, unavailable: false }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }
}

#[async_trait]
impl GeocodingProvider for InMemoryGeocoder {
    async fn search_address(&self, text: &str) -> Result<Vec<AddressCandidate>, PortError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable {
            return Err(PortError::Unavailable {
                collaborator: Collaborator::Geocoding,
                message: "geocoder offline".to_owned(),
            });
        }

        let query = normalize(text);
        let query_tokens = tokens(&query);
        let gazetteer = self.gazetteer.read().await;
        let mut hits = gazetteer
            .iter()
            .filter_map(|candidate| {
                let haystack = normalize(&candidate.address.one_line());
                let haystack_tokens = tokens(&haystack);
                let matched = query_tokens
                    .iter()
                    .filter(|token| haystack_tokens.contains(token))
                    .count();
                if matched == 0 {
                    return None;
                }
                let coverage = matched as f64 / query_tokens.len() as f64;
                let mut hit = candidate.clone();
                hit.confidence = (candidate.confidence * coverage).clamp(0.0, 1.0);
                Some(hit)
            })
            .collect::<Vec<_>>();
        hits.sort_by(|left, right| {
            right.confidence.partial_cmp(&left.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAddressBook {
    entries: Arc<RwLock<HashMap<SessionKey, Vec<SavedAddress>>>>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, session_key: SessionKey, saved: Vec<SavedAddress>) {
        self.entries.write().await.insert(session_key, saved);
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn saved_addresses(
        &self,
        session_key: &SessionKey,
    ) -> Result<Vec<SavedAddress>, PortError> {
        Ok(self.entries.read().await.get(session_key).cloned().unwrap_or_default())
    }

    async fn remember(
        &self,
        session_key: &SessionKey,
        address: &Address,
    ) -> Result<SavedAddress, PortError> {
        let mut entries = self.entries.write().await;
        let saved = entries.entry(session_key.clone()).or_default();
        if let Some(existing) = saved.iter().find(|entry| &entry.address == address) {
            return Ok(existing.clone());
        }
        let entry =
            SavedAddress { id: Uuid::new_v4().to_string(), label: None, address: address.clone() };
        saved.push(entry.clone());
        Ok(entry)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedOrder {
    pub order_id: OrderId,
    pub idempotency_key: IdempotencyKey,
    pub draft: OrderDraft,
}

/// Checkout collaborator that deduplicates on the idempotency key.
#[derive(Clone, Default)]
pub struct InMemoryCheckout {
    orders: Arc<Mutex<Vec<RecordedOrder>>>,
    rejections: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl InMemoryCheckout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `create_order` call fails with this business reason.
    pub async fn reject_next(&self, reason: impl Into<String>) {
        self.rejections.lock().await.push(reason.into());
    }

    pub async fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.lock().await.clone()
    }

    pub async fn created_count(&self) -> usize {
        self.orders.lock().await.len()
    }
}

#[async_trait]
impl CheckoutGateway for InMemoryCheckout {
    async fn create_order(
        &self,
        draft: &OrderDraft,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderId, CheckoutError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut orders = self.orders.lock().await;
        let replay = orders.iter().find(|order| &order.idempotency_key == idempotency_key);
        if let Some(existing) = replay {
            return Ok(existing.order_id.clone());
        }

        let mut rejections = self.rejections.lock().await;
        if !rejections.is_empty() {
            return Err(CheckoutError::Rejected { reason: rejections.remove(0) });
        }

        let order_id = OrderId(format!("PED-{:05}", orders.len() + 1));
        orders.push(RecordedOrder {
            order_id: order_id.clone(),
            idempotency_key: idempotency_key.clone(),
            draft: draft.clone(),
        });
        Ok(order_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{InMemoryAddressBook, InMemoryCatalog, InMemoryCheckout, InMemoryGeocoder};
    use crate::domain::address::{Address, AddressCandidate, FulfillmentMode};
    use crate::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
    use crate::domain::conversation::{ConversationId, SessionKey};
    use crate::domain::order::{OrderDraft, OrderTotals};
    use crate::domain::payment::{PaymentMethod, PaymentSelection};
    use crate::ports::{
        AddressBook, CatalogSource, CheckoutError, CheckoutGateway, GeocodingProvider,
    };

    fn item(item_ref: ItemRef, name: &str) -> CatalogItem {
        CatalogItem {
            item_ref,
            name: name.to_owned(),
            aliases: Vec::new(),
            category: Some("lanches".to_owned()),
            description: None,
            price: Decimal::new(1500, 2),
            active: true,
            available: true,
            promotion_weight: 0,
            customization_groups: Vec::new(),
        }
    }

    fn draft() -> OrderDraft {
        OrderDraft {
            conversation_id: ConversationId("c-1".to_owned()),
            session_key: SessionKey("web:1".to_owned()),
            channel: "web".to_owned(),
            lines: Vec::new(),
            fulfillment: FulfillmentMode::Pickup,
            address: None,
            payments: PaymentSelection::single(PaymentMethod::Pix, Decimal::new(1500, 2)),
            totals: OrderTotals {
                subtotal: Decimal::new(1500, 2),
                delivery_fee: Decimal::ZERO,
                total: Decimal::new(1500, 2),
            },
            assembled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn catalog_search_respects_scope_and_term() {
        let catalog = InMemoryCatalog::new(vec![
            item(ItemRef::Product("x-burguer".to_owned()), "X-Burguer"),
            item(ItemRef::Combo("combo-1".to_owned()), "Combo X-Burguer + Coca"),
        ]);

        let all = catalog.search("burguer", CatalogScope::All).await.expect("search");
        assert_eq!(all.len(), 2);
        let combos = catalog.search("burguer", CatalogScope::Combos).await.expect("search");
        assert_eq!(combos.len(), 1);
        let listing = catalog.search("", CatalogScope::Products).await.expect("list");
        assert_eq!(listing.len(), 1);
        assert!(catalog.search("pizza", CatalogScope::All).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn checkout_creates_one_order_per_idempotency_key() {
        let checkout = InMemoryCheckout::new();
        let draft = draft();
        let key = draft.idempotency_key();

        let first = checkout.create_order(&draft, &key).await.expect("first");
        let second = checkout.create_order(&draft, &key).await.expect("retry");
        assert_eq!(first, second);
        assert_eq!(checkout.created_count().await, 1);
    }

    #[tokio::test]
    async fn checkout_rejection_is_consumed_once() {
        let checkout = InMemoryCheckout::new();
        checkout.reject_next("Produto esgotado: X-Burguer").await;
        let draft = draft();
        let key = draft.idempotency_key();

        let error = checkout.create_order(&draft, &key).await.expect_err("rejected");
        assert_eq!(error, CheckoutError::Rejected { reason: "Produto esgotado: X-Burguer".to_owned() });
        assert!(checkout.create_order(&draft, &key).await.is_ok());
    }

    #[tokio::test]
    async fn geocoder_ranks_by_token_coverage() {
        let geocoder = InMemoryGeocoder::new(vec![
            AddressCandidate {
                address: Address { street: "Rua das Flores".to_owned(), number: Some("120".to_owned()), ..Address::default() },
                confidence: 0.9,
                provider_ref: None,
            },
            AddressCandidate {
                address: Address { street: "Rua das Palmeiras".to_owned(), ..Address::default() },
                confidence: 0.9,
                provider_ref: None,
            },
        ]);

        let hits = geocoder.search_address("rua das flores 120").await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].address.street, "Rua das Flores");
        assert!(hits[0].confidence > hits[1].confidence);
    }

    #[tokio::test]
    async fn address_book_remembers_without_duplicates() {
        let book = InMemoryAddressBook::new();
        let session = SessionKey("web:1".to_owned());
        let address = Address { street: "Rua A".to_owned(), ..Address::default() };

        let first = book.remember(&session, &address).await.expect("remember");
        let second = book.remember(&session, &address).await.expect("remember again");
        assert_eq!(first.id, second.id);
        assert_eq!(book.saved_addresses(&session).await.expect("list").len(), 1);
    }
}
