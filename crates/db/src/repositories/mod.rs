use comanda_core::ports::StoreError;
use thiserror::Error;

pub mod conversation;
pub mod memory;

pub use conversation::SqlConversationRepository;
pub use memory::InMemoryConversationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => StoreError::Unavailable(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Corrupt(message),
        }
    }
}
