use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use comanda_core::domain::conversation::SessionKey;
use comanda_core::errors::DialogueError;
use comanda_core::ports::{ConversationStore, StoreError};

use crate::orchestrator::{DialogueOrchestrator, SideEffect, TurnResult};

const MAX_CONFLICT_RETRIES: usize = 1;

/// One customer message as delivered by a channel adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_key: SessionKey,
    pub channel: String,
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
}

impl InboundMessage {
    pub fn new(
        session_key: SessionKey,
        channel: impl Into<String>,
        raw_text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_key,
            channel: channel.into(),
            raw_text: raw_text.into(),
            timestamp,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundReply {
    pub conversation_id: String,
    pub state: String,
    pub reply_text: String,
    pub side_effects: Vec<SideEffect>,
}

impl OutboundReply {
    fn from_turn(result: TurnResult) -> Self {
        Self {
            conversation_id: result.conversation.id.0,
            state: result.conversation.state.as_str().to_string(),
            reply_text: result.reply_text,
            side_effects: result.side_effects,
        }
    }
}

/// Serializes turns per session and persists their results.
///
/// Two messages of the same session never run concurrently inside one
/// process; writes from other processes are caught by the store's version
/// check and retried once before the customer is asked to resend.
pub struct AgentRuntime {
    orchestrator: Arc<DialogueOrchestrator>,
    store: Arc<dyn ConversationStore>,
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl AgentRuntime {
    pub fn new(orchestrator: Arc<DialogueOrchestrator>, store: Arc<dyn ConversationStore>) -> Self {
        Self { orchestrator, store, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn orchestrator(&self) -> &DialogueOrchestrator {
        &self.orchestrator
    }

    pub async fn handle_message(
        &self,
        message: InboundMessage,
    ) -> Result<OutboundReply, DialogueError> {
        let lock = self.session_lock(&message.session_key).await;
        let outcome = {
            let _turn = lock.lock().await;
            self.run_turn(&message).await
        };
        self.release_session(&message.session_key, &lock).await;
        outcome
    }

    async fn run_turn(&self, message: &InboundMessage) -> Result<OutboundReply, DialogueError> {
        let mut attempt = 0;
        loop {
            let existing = self.store.load(&message.session_key).await.map_err(store_failure)?;
            let result = self.orchestrator.process(existing, message).await;

            match self.persist(&result).await {
                Ok(()) => {
                    info!(
                        event_name = "dialogue.turn.completed",
                        correlation_id = %message.correlation_id,
                        conversation_id = %result.conversation.id.0,
                        channel = %message.channel,
                        intent = result.intent,
                        state = result.conversation.state.as_str(),
                        inbound_chars = message.raw_text.chars().count(),
                        reply_chars = result.reply_text.chars().count(),
                        "turn completed"
                    );
                    return Ok(OutboundReply::from_turn(result));
                }
                Err(StoreError::Conflict { conversation_id, expected })
                    if attempt < MAX_CONFLICT_RETRIES =>
                {
                    attempt += 1;
                    warn!(
                        event_name = "dialogue.turn.conflict_retry",
                        correlation_id = %message.correlation_id,
                        conversation_id = %conversation_id,
                        expected_version = expected,
                        attempt,
                        "concurrent update, reprocessing turn"
                    );
                }
                Err(StoreError::Conflict { conversation_id, .. }) => {
                    warn!(
                        event_name = "dialogue.turn.conflict_gave_up",
                        correlation_id = %message.correlation_id,
                        conversation_id = %conversation_id,
                        "concurrent update persisted, asking customer to resend"
                    );
                    return Ok(OutboundReply {
                        conversation_id,
                        state: result.conversation.state.as_str().to_string(),
                        reply_text: self.orchestrator.renderer().resend(),
                        side_effects: Vec::new(),
                    });
                }
                Err(other) => return Err(store_failure(other)),
            }
        }
    }

    /// Writes the retired conversation first so the store never sees two live ones.
    async fn persist(&self, result: &TurnResult) -> Result<(), StoreError> {
        if let Some(retired) = &result.retired {
            self.store.save(retired).await?;
        }
        self.store.save(&result.conversation).await?;
        Ok(())
    }

    async fn session_lock(&self, session_key: &SessionKey) -> Arc<Mutex<()>> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_key.clone()).or_default().clone()
    }

    async fn release_session(&self, session_key: &SessionKey, lock: &Arc<Mutex<()>>) {
        let mut sessions = self.sessions.lock().await;
        // the map and the caller hold the only references
        if Arc::strong_count(lock) == 2 {
            sessions.remove(session_key);
        }
    }
}

fn store_failure(error: StoreError) -> DialogueError {
    error!(event_name = "dialogue.store.failed", error = %error, "conversation store failed");
    DialogueError::StoreUnavailable(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use comanda_core::audit::InMemoryAuditSink;
    use comanda_core::config::AppConfig;
    use comanda_core::domain::conversation::{Conversation, SessionKey};
    use comanda_core::flows::DialogueState;
    use comanda_core::ports::{
        ConversationStore, FlatDeliveryFee, InMemoryAddressBook, InMemoryCatalog, InMemoryCheckout,
        InMemoryGeocoder, StoreError,
    };
    use comanda_db::{demo_catalog, demo_gazetteer, InMemoryConversationRepository};

    use super::{AgentRuntime, InboundMessage};
    use crate::orchestrator::{Collaborators, DialogueOrchestrator};

    /// Every save loses the race against another writer.
    #[derive(Default)]
    struct ContendedStore {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl ConversationStore for ContendedStore {
        async fn load(
            &self,
            _session_key: &SessionKey,
        ) -> Result<Option<Conversation>, StoreError> {
            Ok(None)
        }

        async fn save(&self, conversation: &Conversation) -> Result<u64, StoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Conflict {
                conversation_id: conversation.id.0.clone(),
                expected: conversation.version,
            })
        }
    }

    fn runtime(store: Arc<dyn ConversationStore>) -> AgentRuntime {
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
        AgentRuntime::new(Arc::new(orchestrator), store)
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage::new(SessionKey("web:runtime".to_string()), "web", text, Utc::now())
    }

    #[tokio::test]
    async fn turns_are_persisted_between_messages() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let runtime = runtime(store.clone());

        let first = runtime.handle_message(message("quero 1 x-salada")).await.expect("turn");
        let second = runtime.handle_message(message("carrinho")).await.expect("turn");
        assert_eq!(first.conversation_id, second.conversation_id);
        assert_eq!(second.state, DialogueState::CartReview.as_str());
        assert!(second.reply_text.contains("X-Salada"));

        let stored = store.conversations(&SessionKey("web:runtime".to_string())).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].version, 2);
        assert_eq!(stored[0].history.len(), 4);
    }

    #[tokio::test]
    async fn restart_keeps_a_single_live_conversation() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let runtime = runtime(store.clone());

        runtime.handle_message(message("quero 1 x-salada")).await.expect("turn");
        let restarted = runtime.handle_message(message("novo pedido")).await.expect("turn");
        assert_eq!(restarted.state, DialogueState::Greeting.as_str());

        let stored = store.conversations(&SessionKey("web:runtime".to_string())).await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.iter().filter(|conversation| !conversation.is_archived()).count(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_turn() {
        let store = Arc::new(InMemoryConversationRepository::new());
        store.set_unavailable(true).await;
        let runtime = runtime(store);

        let error = runtime.handle_message(message("oi")).await.expect_err("store down");
        assert_eq!(error.kind(), "store_unavailable");
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn persistent_conflict_is_retried_once_then_asks_to_resend() {
        let store = Arc::new(ContendedStore::default());
        let runtime = runtime(store.clone());

        let reply = runtime.handle_message(message("quero 1 x-salada")).await.expect("reply");
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
        assert_eq!(reply.reply_text, runtime.orchestrator().renderer().resend());
        assert!(reply.side_effects.is_empty());
    }

    #[tokio::test]
    async fn concurrent_messages_of_one_session_are_serialized() {
        let store = Arc::new(InMemoryConversationRepository::new());
        let runtime = Arc::new(runtime(store.clone()));

        let handles = ["quero 1 x-salada", "quero 1 suco de laranja", "quero 1 x-bacon"]
            .into_iter()
            .map(|text| {
                let runtime = runtime.clone();
                let message = message(text);
                tokio::spawn(async move { runtime.handle_message(message).await })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.expect("join").expect("turn");
        }

        let stored = store.conversations(&SessionKey("web:runtime".to_string())).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].context.cart.len(), 3);
    }
}
