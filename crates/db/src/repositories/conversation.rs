use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use comanda_core::domain::conversation::{
    ArchiveReason, ArchiveRecord, Conversation, ConversationContext, ConversationId,
    MessageRecord, SessionKey,
};
use comanda_core::flows::DialogueState;
use comanda_core::ports::{ConversationStore, StoreError};

use super::RepositoryError;
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_latest(
        &self,
        session_key: &SessionKey,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                session_key,
                channel,
                state,
                context_json,
                history_json,
                version,
                created_at,
                updated_at,
                last_activity_at,
                archived_at,
                archive_reason
             FROM conversation
             WHERE session_key = ?
             ORDER BY (archived_at IS NULL) DESC, updated_at DESC
             LIMIT 1",
        )
        .bind(&session_key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn insert(&self, conversation: &Conversation) -> Result<u64, StoreError> {
        let encoded = EncodedConversation::encode(conversation)?;
        let result = sqlx::query(
            "INSERT INTO conversation (
                id,
                session_key,
                channel,
                state,
                context_json,
                history_json,
                version,
                created_at,
                updated_at,
                last_activity_at,
                archived_at,
                archive_reason
             ) VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.session_key.0)
        .bind(&conversation.channel)
        .bind(conversation.state.as_str())
        .bind(&encoded.context_json)
        .bind(&encoded.history_json)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .bind(conversation.last_activity_at.to_rfc3339())
        .bind(encoded.archived_at.as_deref())
        .bind(encoded.archive_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(1),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(StoreError::Conflict {
                    conversation_id: conversation.id.0.clone(),
                    expected: 0,
                })
            }
            Err(error) => Err(RepositoryError::from(error).into()),
        }
    }

    async fn update(&self, conversation: &Conversation) -> Result<u64, StoreError> {
        let encoded = EncodedConversation::encode(conversation)?;
        let expected = conversation.version;
        let next = expected + 1;
        let result = sqlx::query(
            "UPDATE conversation SET
                state = ?,
                context_json = ?,
                history_json = ?,
                version = ?,
                updated_at = ?,
                last_activity_at = ?,
                archived_at = ?,
                archive_reason = ?
             WHERE id = ? AND version = ?",
        )
        .bind(conversation.state.as_str())
        .bind(&encoded.context_json)
        .bind(&encoded.history_json)
        .bind(to_i64(next)?)
        .bind(conversation.updated_at.to_rfc3339())
        .bind(conversation.last_activity_at.to_rfc3339())
        .bind(encoded.archived_at.as_deref())
        .bind(encoded.archive_reason)
        .bind(&conversation.id.0)
        .bind(to_i64(expected)?)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                conversation_id: conversation.id.0.clone(),
                expected,
            });
        }
        Ok(next)
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqlConversationRepository {
    async fn load(&self, session_key: &SessionKey) -> Result<Option<Conversation>, StoreError> {
        Ok(self.find_latest(session_key).await?)
    }

    async fn save(&self, conversation: &Conversation) -> Result<u64, StoreError> {
        let version = if conversation.version == 0 {
            self.insert(conversation).await?
        } else {
            self.update(conversation).await?
        };

        tracing::debug!(
            event_name = "persistence.conversation.saved",
            conversation_id = %conversation.id.0,
            session_key = %conversation.session_key.0,
            state = conversation.state.as_str(),
            version,
            "conversation saved"
        );
        Ok(version)
    }
}

struct EncodedConversation {
    context_json: String,
    history_json: String,
    archived_at: Option<String>,
    archive_reason: Option<&'static str>,
}

impl EncodedConversation {
    fn encode(conversation: &Conversation) -> Result<Self, StoreError> {
        let context_json = serde_json::to_string(&conversation.context)
            .map_err(|error| StoreError::Corrupt(format!("context encode failed: {error}")))?;
        let history_json = serde_json::to_string(&conversation.history)
            .map_err(|error| StoreError::Corrupt(format!("history encode failed: {error}")))?;

        Ok(Self {
            context_json,
            history_json,
            archived_at: conversation
                .archived
                .as_ref()
                .map(|record| record.archived_at.to_rfc3339()),
            archive_reason: conversation.archived.as_ref().map(|record| record.reason.as_str()),
        })
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = DialogueState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown dialogue state `{state_raw}`")))?;

    let context_raw = row.try_get::<String, _>("context_json")?;
    let context = serde_json::from_str::<ConversationContext>(&context_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid context_json: {error}")))?;

    let history_raw = row.try_get::<String, _>("history_json")?;
    let history = serde_json::from_str::<Vec<MessageRecord>>(&history_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid history_json: {error}")))?;

    let archived_at = parse_optional_timestamp("archived_at", row.try_get("archived_at")?)?;
    let archive_reason = row
        .try_get::<Option<String>, _>("archive_reason")?
        .map(|value| {
            ArchiveReason::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown archive reason `{value}`")))
        })
        .transpose()?;
    let archived = match (archived_at, archive_reason) {
        (Some(archived_at), Some(reason)) => Some(ArchiveRecord { reason, archived_at }),
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(
                "archived_at and archive_reason must be set together".to_string(),
            ))
        }
    };

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        session_key: SessionKey(row.try_get("session_key")?),
        channel: row.try_get("channel")?,
        state,
        context,
        history,
        version: parse_version(row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        archived,
    })
}

fn to_i64(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Corrupt(format!("version {version} does not fit in storage")))
}

fn parse_version(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `version` (expected positive): {value}"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use comanda_core::domain::conversation::{
        ArchiveReason, Conversation, MessageDirection, SessionKey,
    };
    use comanda_core::flows::DialogueState;
    use comanda_core::ports::{ConversationStore, StoreError};

    use super::SqlConversationRepository;
    use crate::fixtures::demo_catalog;
    use crate::migrations;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_conversation_round_trip_keeps_cart_and_history() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T18:00:00Z");

        let mut conversation = Conversation::start(session("whatsapp:5541"), "whatsapp", now);
        let burger = demo_catalog().into_iter().next().expect("fixture item");
        conversation.context.cart.add(&burger, 2, &[], None).expect("add");
        conversation.record_message(MessageDirection::Inbound, "oi", now, 50);
        conversation.state = DialogueState::Browsing;

        let version = repo.save(&conversation).await.expect("insert");
        assert_eq!(version, 1);

        let loaded = repo.load(&session("whatsapp:5541")).await.expect("load").expect("present");
        conversation.version = 1;
        assert_eq!(loaded, conversation);
        assert_eq!(
            loaded.context.cart.compute_subtotal(),
            burger.price * Decimal::from(2)
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn stale_version_is_rejected_as_conflict() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T18:00:00Z");

        let mut conversation = Conversation::start(session("tg:42"), "telegram", now);
        conversation.version = repo.save(&conversation).await.expect("insert");

        let mut first = conversation.clone();
        first.state = DialogueState::Browsing;
        assert_eq!(repo.save(&first).await.expect("first writer"), 2);

        let mut second = conversation.clone();
        second.state = DialogueState::CartReview;
        let error = repo.save(&second).await.expect_err("second writer must conflict");
        assert!(matches!(error, StoreError::Conflict { expected: 1, .. }));

        let stored = repo.load(&session("tg:42")).await.expect("load").expect("present");
        assert_eq!(stored.state, DialogueState::Browsing);
        assert_eq!(stored.version, 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn archived_conversation_frees_session_for_a_fresh_one() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let started = parse_ts("2026-03-02T18:00:00Z");
        let later = parse_ts("2026-03-02T18:30:00Z");

        let mut old = Conversation::start(session("web:7"), "web", started);
        old.version = repo.save(&old).await.expect("insert old");

        let duplicate = Conversation::start(session("web:7"), "web", started);
        let error = repo.save(&duplicate).await.expect_err("second live conversation");
        assert!(matches!(error, StoreError::Conflict { .. }));

        old.archive(ArchiveReason::Cancelled, later);
        old.state = DialogueState::Closed;
        old.version = repo.save(&old).await.expect("archive old");

        let fresh = Conversation::start(session("web:7"), "web", later);
        repo.save(&fresh).await.expect("insert fresh");

        let loaded = repo.load(&session("web:7")).await.expect("load").expect("present");
        assert_eq!(loaded.id, fresh.id);
        assert!(!loaded.is_archived());

        pool.close().await;
    }

    #[tokio::test]
    async fn archived_conversation_is_returned_when_it_is_the_latest() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T18:00:00Z");

        let mut conversation = Conversation::start(session("web:9"), "web", now);
        conversation.version = repo.save(&conversation).await.expect("insert");
        conversation.state = DialogueState::CheckoutSent;
        conversation.archive(ArchiveReason::CheckoutCompleted, now);
        repo.save(&conversation).await.expect("archive");

        let loaded = repo.load(&session("web:9")).await.expect("load").expect("present");
        assert_eq!(
            loaded.archived.as_ref().map(|record| record.reason),
            Some(ArchiveReason::CheckoutCompleted)
        );
        assert!(repo.load(&session("web:unknown")).await.expect("load").is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn corrupt_state_column_surfaces_as_corrupt_error() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-03-02T18:00:00Z");

        let conversation = Conversation::start(session("web:corrupt"), "web", now);
        repo.save(&conversation).await.expect("insert");
        sqlx::query("UPDATE conversation SET state = 'DANCING' WHERE id = ?")
            .bind(&conversation.id.0)
            .execute(&pool)
            .await
            .expect("corrupt row");

        let error = repo.load(&session("web:corrupt")).await.expect_err("corrupt row");
        assert!(matches!(error, StoreError::Corrupt(ref message) if message.contains("DANCING")));

        pool.close().await;
    }

    fn session(value: &str) -> SessionKey {
        SessionKey(value.to_string())
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }
}
