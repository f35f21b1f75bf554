use std::collections::HashMap;

use tokio::sync::RwLock;

use comanda_core::domain::conversation::{Conversation, SessionKey};
use comanda_core::ports::{ConversationStore, StoreError};

/// Keeps every conversation ever saved, grouped per session, with the same
/// version and single-live-conversation rules as the SQL repository.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    sessions: RwLock<HashMap<SessionKey, Vec<Conversation>>>,
    unavailable: RwLock<bool>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with `StoreError::Unavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }

    pub async fn conversations(&self, session_key: &SessionKey) -> Vec<Conversation> {
        self.sessions.read().await.get(session_key).cloned().unwrap_or_default()
    }

    async fn ensure_available(&self) -> Result<(), StoreError> {
        if *self.unavailable.read().await {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationRepository {
    async fn load(&self, session_key: &SessionKey) -> Result<Option<Conversation>, StoreError> {
        self.ensure_available().await?;
        let sessions = self.sessions.read().await;
        let Some(conversations) = sessions.get(session_key) else {
            return Ok(None);
        };

        let live = conversations.iter().find(|conversation| !conversation.is_archived());
        let latest = live.or_else(|| {
            conversations.iter().max_by_key(|conversation| conversation.updated_at)
        });
        Ok(latest.cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, StoreError> {
        self.ensure_available().await?;
        let mut sessions = self.sessions.write().await;
        let conversations = sessions.entry(conversation.session_key.clone()).or_default();
        let conflict = || StoreError::Conflict {
            conversation_id: conversation.id.0.clone(),
            expected: conversation.version,
        };

        let next = conversation.version + 1;
        let mut stored = conversation.clone();
        stored.version = next;

        match conversations.iter().position(|existing| existing.id == conversation.id) {
            Some(index) => {
                if conversations[index].version != conversation.version {
                    return Err(conflict());
                }
                conversations[index] = stored;
            }
            None => {
                let another_live = conversations.iter().any(|existing| !existing.is_archived());
                if conversation.version != 0 || (another_live && !conversation.is_archived()) {
                    return Err(conflict());
                }
                conversations.push(stored);
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use comanda_core::domain::conversation::{ArchiveReason, Conversation, SessionKey};
    use comanda_core::flows::DialogueState;
    use comanda_core::ports::{ConversationStore, StoreError};

    use super::InMemoryConversationRepository;

    fn session() -> SessionKey {
        SessionKey("whatsapp:5541988887777".to_string())
    }

    #[tokio::test]
    async fn in_memory_conversation_round_trip_bumps_version() {
        let repo = InMemoryConversationRepository::new();
        let mut conversation = Conversation::start(session(), "whatsapp", Utc::now());

        conversation.version = repo.save(&conversation).await.expect("insert");
        conversation.state = DialogueState::Browsing;
        conversation.version = repo.save(&conversation).await.expect("update");

        let loaded = repo.load(&session()).await.expect("load").expect("present");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.state, DialogueState::Browsing);
    }

    #[tokio::test]
    async fn in_memory_store_rejects_stale_writer() {
        let repo = InMemoryConversationRepository::new();
        let mut conversation = Conversation::start(session(), "whatsapp", Utc::now());
        conversation.version = repo.save(&conversation).await.expect("insert");

        repo.save(&conversation).await.expect("first writer");
        let error = repo.save(&conversation).await.expect_err("stale writer");
        assert!(matches!(error, StoreError::Conflict { expected: 1, .. }));
    }

    #[tokio::test]
    async fn in_memory_store_prefers_live_conversation_over_archived() {
        let repo = InMemoryConversationRepository::new();
        let mut old = Conversation::start(session(), "whatsapp", Utc::now());
        old.version = repo.save(&old).await.expect("insert");
        old.archive(ArchiveReason::Timeout, Utc::now());
        repo.save(&old).await.expect("archive");

        let fresh = Conversation::start(session(), "whatsapp", Utc::now());
        repo.save(&fresh).await.expect("insert fresh");

        let loaded = repo.load(&session()).await.expect("load").expect("present");
        assert_eq!(loaded.id, fresh.id);
        assert_eq!(repo.conversations(&session()).await.len(), 2);
    }

    #[tokio::test]
    async fn switched_off_store_reports_unavailable() {
        let repo = InMemoryConversationRepository::new();
        repo.set_unavailable(true).await;

        let error = repo.load(&session()).await.expect_err("unavailable");
        assert!(matches!(error, StoreError::Unavailable(_)));
    }
}
