//! Inbound message boundary: `POST /v1/messages`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use comanda_agent::{AgentRuntime, InboundMessage, OutboundReply};
use comanda_core::domain::conversation::SessionKey;
use comanda_core::errors::{ApplicationError, InterfaceError};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MessageRequest {
    pub session_key: String,
    pub channel: String,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new().route("/v1/messages", post(post_message)).with_state(ApiState { runtime })
}

pub async fn post_message(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<OutboundReply>, ApiError> {
    let correlation_id = correlation_id(&headers);

    let Json(request) = payload.map_err(|rejection| {
        reject(InterfaceError::BadRequest {
            message: rejection.body_text(),
            correlation_id: correlation_id.clone(),
        })
    })?;
    if request.session_key.trim().is_empty() || request.channel.trim().is_empty() {
        return Err(reject(InterfaceError::BadRequest {
            message: "session_key and channel are required".to_string(),
            correlation_id,
        }));
    }

    info!(
        event_name = "http.message.received",
        correlation_id = %correlation_id,
        session_key = %request.session_key,
        channel = %request.channel,
        inbound_chars = request.raw_text.chars().count(),
        "inbound message received"
    );

    let message = InboundMessage::new(
        SessionKey(request.session_key),
        request.channel,
        request.raw_text,
        request.timestamp,
    )
    .with_correlation_id(correlation_id.clone());

    state
        .runtime
        .handle_message(message)
        .await
        .map(Json)
        .map_err(|error| reject(ApplicationError::from(error).into_interface(correlation_id)))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn reject(error: InterfaceError) -> ApiError {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "http.message.rejected",
        correlation_id = %error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "inbound message rejected"
    );
    (
        status,
        Json(ErrorBody {
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use comanda_agent::{AgentRuntime, Collaborators, DialogueOrchestrator};
    use comanda_core::audit::InMemoryAuditSink;
    use comanda_core::config::AppConfig;
    use comanda_core::ports::{
        FlatDeliveryFee, InMemoryAddressBook, InMemoryCatalog, InMemoryCheckout, InMemoryGeocoder,
    };
    use comanda_db::{demo_catalog, demo_gazetteer, InMemoryConversationRepository};

    use super::{router, ErrorBody, CORRELATION_HEADER};

    fn app(store: Arc<InMemoryConversationRepository>) -> Router {
        let collaborators = Collaborators::new(
            Arc::new(InMemoryCatalog::new(demo_catalog())),
            Arc::new(InMemoryGeocoder::new(demo_gazetteer())),
            Arc::new(InMemoryAddressBook::new()),
            Arc::new(FlatDeliveryFee::new(Decimal::new(700, 2))),
            Arc::new(InMemoryCheckout::new()),
        );
        let orchestrator = DialogueOrchestrator::build(
            &AppConfig::default(),
            collaborators,
            Arc::new(InMemoryAuditSink::default()),
        )
        .expect("orchestrator");
        router(Arc::new(AgentRuntime::new(Arc::new(orchestrator), store)))
    }

    fn post(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .header(CORRELATION_HEADER, "req-42")
            .body(Body::from(body))
            .expect("request")
    }

    fn message(text: &str) -> String {
        json!({
            "session_key": "whatsapp:5541999990000",
            "channel": "whatsapp",
            "raw_text": text,
            "timestamp": "2026-10-19T18:30:00Z",
        })
        .to_string()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn message_is_answered_with_reply_and_side_effects() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let response = app(store).oneshot(post(message("quero 2 x-salada"))).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["reply_text"].as_str().is_some_and(|text| text.contains("X-Salada")));
        assert_eq!(body["side_effects"][0]["type"], "conversation_started");
    }

    #[tokio::test]
    async fn malformed_payload_is_a_bad_request() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let missing_timestamp =
            json!({ "session_key": "web:1", "channel": "web", "raw_text": "oi" }).to_string();

        let response = app(store).oneshot(post(missing_timestamp)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = serde_json::from_value(body_json(response).await).expect("error body");
        assert_eq!(body.correlation_id, "req-42");
    }

    #[tokio::test]
    async fn blank_session_key_is_a_bad_request() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let blank = json!({
            "session_key": "  ",
            "channel": "web",
            "raw_text": "oi",
            "timestamp": "2026-10-19T18:30:00Z",
        })
        .to_string();

        let response = app(store).oneshot(post(blank)).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_store_is_service_unavailable_with_a_safe_message() {
        let store = Arc::new(InMemoryConversationRepository::new());
        store.set_unavailable(true).await;

        let response = app(store).oneshot(post(message("oi"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ErrorBody = serde_json::from_value(body_json(response).await).expect("error body");
        assert_eq!(body.error, "The service is temporarily unavailable. Please retry shortly.");
        assert_eq!(body.correlation_id, "req-42");
    }
}
