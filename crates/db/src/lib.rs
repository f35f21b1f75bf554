pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{demo_catalog, demo_gazetteer, demo_synonyms, DemoDataset, VerificationResult};
pub use repositories::{InMemoryConversationRepository, RepositoryError, SqlConversationRepository};
