//! reqwest adapters for the remote collaborators.
//!
//! Every adapter owns a `reqwest::Client` with the collaborator's timeout so
//! a hung upstream surfaces as [`PortError::Timeout`] instead of stalling a
//! turn.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use comanda_core::domain::address::AddressCandidate;
use comanda_core::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
use comanda_core::domain::order::{IdempotencyKey, OrderDraft, OrderId};
use comanda_core::errors::Collaborator;
use comanda_core::ports::{
    CatalogSource, CheckoutError, CheckoutGateway, GeocodingProvider, PortError,
};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

fn http_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_secs(timeout_secs.max(1))).build()
}

fn transport_error(collaborator: Collaborator, error: reqwest::Error) -> PortError {
    if error.is_timeout() {
        PortError::Timeout(collaborator)
    } else {
        PortError::Unavailable { collaborator, message: error.to_string() }
    }
}

async fn decode<T>(collaborator: Collaborator, response: Response) -> Result<T, PortError>
where
    T: for<'de> Deserialize<'de>,
{
    response.json::<T>().await.map_err(|error| PortError::InvalidResponse {
        collaborator,
        message: error.to_string(),
    })
}

fn unexpected_status(collaborator: Collaborator, status: StatusCode) -> PortError {
    warn!(
        event_name = "collaborator.http.unexpected_status",
        collaborator = collaborator.as_str(),
        status = %status,
        "collaborator answered with an unexpected status"
    );
    PortError::Unavailable { collaborator, message: format!("unexpected status {status}") }
}

fn trimmed(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

#[derive(Serialize)]
struct SearchQuery<'a> {
    q: &'a str,
    scope: CatalogScope,
}

/// Catalog service speaking `GET /items?q=&scope=` and `GET /items/{kind}/{id}`.
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        Ok(Self { client: http_client(timeout_secs)?, base_url: trimmed(base_url) })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    async fn search(&self, term: &str, scope: CatalogScope) -> Result<Vec<CatalogItem>, PortError> {
        let response = self
            .client
            .get(format!("{}/items", self.base_url))
            .query(&SearchQuery { q: term, scope })
            .send()
            .await
            .map_err(|error| transport_error(Collaborator::Catalog, error))?;

        if !response.status().is_success() {
            return Err(unexpected_status(Collaborator::Catalog, response.status()));
        }
        decode(Collaborator::Catalog, response).await
    }

    async fn get(&self, item_ref: &ItemRef) -> Result<Option<CatalogItem>, PortError> {
        let response = self
            .client
            .get(format!("{}/items/{}/{}", self.base_url, item_ref.kind().as_str(), item_ref.id()))
            .send()
            .await
            .map_err(|error| transport_error(Collaborator::Catalog, error))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                decode(Collaborator::Catalog, response).await.map(Some)
            }
            status => Err(unexpected_status(Collaborator::Catalog, status)),
        }
    }
}

#[derive(Serialize)]
struct GeocodeQuery<'a> {
    q: &'a str,
    limit: usize,
}

/// Geocoding service speaking `GET /search?q=&limit=`.
pub struct HttpGeocoder {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    max_candidates: usize,
}

impl HttpGeocoder {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout_secs: u64,
        max_candidates: usize,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: trimmed(base_url),
            api_key,
            max_candidates: max_candidates.max(1),
        })
    }
}

#[async_trait]
impl GeocodingProvider for HttpGeocoder {
    async fn search_address(&self, text: &str) -> Result<Vec<AddressCandidate>, PortError> {
        let mut request = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&GeocodeQuery { q: text, limit: self.max_candidates });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| transport_error(Collaborator::Geocoding, error))?;
        if !response.status().is_success() {
            return Err(unexpected_status(Collaborator::Geocoding, response.status()));
        }

        let mut candidates: Vec<AddressCandidate> =
            decode(Collaborator::Geocoding, response).await?;
        candidates.retain(|candidate| (0.0..=1.0).contains(&candidate.confidence));
        candidates.sort_by(|left, right| {
            right.confidence.partial_cmp(&left.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.max_candidates);
        Ok(candidates)
    }
}

#[derive(Deserialize)]
struct CreatedOrder {
    order_id: String,
}

#[derive(Deserialize)]
struct RejectedOrder {
    reason: String,
}

/// Checkout service speaking `POST /orders` with an `Idempotency-Key` header.
///
/// `409` and `422` carry a business reason that is relayed to the customer;
/// every other failure is a port error.
pub struct HttpCheckout {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpCheckout {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self { client: http_client(timeout_secs)?, base_url: trimmed(base_url), api_key })
    }
}

#[async_trait]
impl CheckoutGateway for HttpCheckout {
    async fn create_order(
        &self,
        draft: &OrderDraft,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderId, CheckoutError> {
        let mut request = self
            .client
            .post(format!("{}/orders", self.base_url))
            .header(IDEMPOTENCY_HEADER, idempotency_key.0.as_str())
            .json(draft);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| transport_error(Collaborator::Checkout, error))?;

        match response.status() {
            status if status.is_success() => {
                let created: CreatedOrder = decode(Collaborator::Checkout, response).await?;
                Ok(OrderId(created.order_id))
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let rejected: RejectedOrder = decode(Collaborator::Checkout, response).await?;
                Err(CheckoutError::Rejected { reason: rejected.reason })
            }
            status => Err(unexpected_status(Collaborator::Checkout, status).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use comanda_core::domain::address::FulfillmentMode;
    use comanda_core::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
    use comanda_core::domain::conversation::{ConversationId, SessionKey};
    use comanda_core::domain::order::{OrderDraft, OrderTotals};
    use comanda_core::domain::payment::{PaymentMethod, PaymentSelection};
    use comanda_core::errors::Collaborator;
    use comanda_core::ports::{
        CatalogSource, CheckoutError, CheckoutGateway, GeocodingProvider, PortError,
    };
    use comanda_db::{demo_catalog, demo_gazetteer};

    use super::{HttpCatalog, HttpCheckout, HttpGeocoder, IDEMPOTENCY_HEADER};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let address = listener.local_addr().expect("stub address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{address}")
    }

    fn catalog_stub() -> Router {
        async fn search(Query(params): Query<HashMap<String, String>>) -> Json<Vec<CatalogItem>> {
            let term = params.get("q").cloned().unwrap_or_default().to_lowercase();
            let scope = params.get("scope").cloned().unwrap_or_default();
            let items = demo_catalog()
                .into_iter()
                .filter(|item| item.name.to_lowercase().contains(&term))
                .filter(|item| scope != "combos" || item.item_ref.kind().as_str() == "combo")
                .collect();
            Json(items)
        }

        async fn item(
            Path((kind, id)): Path<(String, String)>,
        ) -> Result<Json<CatalogItem>, StatusCode> {
            demo_catalog()
                .into_iter()
                .find(|item| item.item_ref.kind().as_str() == kind && item.item_ref.id() == id)
                .map(Json)
                .ok_or(StatusCode::NOT_FOUND)
        }

        Router::new().route("/items", get(search)).route("/items/{kind}/{id}", get(item))
    }

    #[tokio::test]
    async fn catalog_adapter_searches_and_fetches_items() {
        let base_url = serve(catalog_stub()).await;
        let catalog = HttpCatalog::new(&base_url, 2).expect("client");

        let hits = catalog.search("x-salada", CatalogScope::All).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "X-Salada");

        let fetched = catalog.get(&hits[0].item_ref).await.expect("get");
        assert_eq!(fetched.map(|item| item.name), Some("X-Salada".to_string()));

        let missing =
            catalog.get(&ItemRef::Product("does-not-exist".to_string())).await.expect("get");
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn catalog_adapter_maps_server_errors_to_port_errors() {
        let router = Router::new().route(
            "/items",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base_url = serve(router).await;
        let catalog = HttpCatalog::new(&base_url, 2).expect("client");

        let error = catalog.search("coca", CatalogScope::All).await.expect_err("server error");
        assert_eq!(error.collaborator(), Collaborator::Catalog);
        assert!(matches!(error, PortError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn geocoder_adapter_sends_the_key_and_caps_candidates() {
        async fn search(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
            let authorized = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value == "Bearer geo-key");
            if !authorized {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(Json(serde_json::to_value(demo_gazetteer()).expect("gazetteer json")))
        }

        let base_url = serve(Router::new().route("/search", get(search))).await;
        let geocoder =
            HttpGeocoder::new(&base_url, Some(SecretString::from("geo-key".to_string())), 2, 2).expect("client");

        let candidates = geocoder.search_address("rua das flores").await.expect("candidates");
        assert!(candidates.len() <= 2);
        assert!(candidates
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));

        let anonymous = HttpGeocoder::new(&base_url, None, 2, 2).expect("client");
        let error = anonymous.search_address("rua das flores").await.expect_err("unauthorized");
        assert_eq!(error.collaborator(), Collaborator::Geocoding);
    }

    fn draft() -> OrderDraft {
        let total = Decimal::new(4500, 2);
        OrderDraft {
            conversation_id: ConversationId("conv-http".to_string()),
            session_key: SessionKey("web:http".to_string()),
            channel: "web".to_string(),
            lines: Vec::new(),
            fulfillment: FulfillmentMode::Pickup,
            address: None,
            payments: PaymentSelection::single(PaymentMethod::Pix, total),
            totals: OrderTotals { subtotal: total, delivery_fee: Decimal::ZERO, total },
            assembled_at: Utc::now(),
        }
    }

    #[derive(Clone, Default)]
    struct CheckoutStub {
        orders: Arc<Mutex<HashMap<String, String>>>,
    }

    fn checkout_stub(stub: CheckoutStub) -> Router {
        async fn create(
            State(stub): State<CheckoutStub>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            let Some(key) = headers.get(IDEMPOTENCY_HEADER).and_then(|value| value.to_str().ok())
            else {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing key" })));
            };
            if body["channel"] == "closed" {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({ "reason": "Loja fechada no momento" })),
                );
            }
            let mut orders = stub.orders.lock().await;
            let next = format!("PED-{:05}", orders.len() + 1);
            let order_id = orders.entry(key.to_string()).or_insert(next).clone();
            (StatusCode::CREATED, Json(json!({ "order_id": order_id })))
        }

        Router::new().route("/orders", post(create)).with_state(stub)
    }

    #[tokio::test]
    async fn checkout_adapter_is_idempotent_per_key() {
        let stub = CheckoutStub::default();
        let base_url = serve(checkout_stub(stub.clone())).await;
        let checkout = HttpCheckout::new(&base_url, None, 2).expect("client");
        let draft = draft();
        let key = draft.idempotency_key();

        let first = checkout.create_order(&draft, &key).await.expect("order");
        let replay = checkout.create_order(&draft, &key).await.expect("order");
        assert_eq!(first, replay);
        assert_eq!(first.0, "PED-00001");
        assert_eq!(stub.orders.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn checkout_adapter_relays_business_rejections() {
        let base_url = serve(checkout_stub(CheckoutStub::default())).await;
        let checkout = HttpCheckout::new(&base_url, None, 2).expect("client");
        let mut draft = draft();
        draft.channel = "closed".to_string();

        let error = checkout.create_order(&draft, &draft.idempotency_key()).await.expect_err("rejected");
        assert_eq!(error, CheckoutError::Rejected { reason: "Loja fechada no momento".to_string() });
    }

    #[tokio::test]
    async fn unreachable_checkout_is_a_port_error() {
        let checkout = HttpCheckout::new("http://127.0.0.1:9", None, 1).expect("client");
        let draft = draft();
        let error = checkout.create_order(&draft, &draft.idempotency_key()).await.expect_err("offline");
        assert!(matches!(
            error,
            CheckoutError::Port(port) if port.collaborator() == Collaborator::Checkout
        ));
    }
}
