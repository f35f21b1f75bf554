pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ports;
pub mod pricing;

pub use catalog::{CatalogResolver, Resolution, SynonymTable};
pub use domain::cart::{Cart, CartLine};
pub use domain::catalog::{CatalogItem, ItemRef};
pub use domain::conversation::{Conversation, ConversationId, SessionKey};
pub use errors::{ApplicationError, DialogueError, DomainError, InterfaceError};
pub use flows::{DialogueEvent, DialogueState, FlowEngine};
