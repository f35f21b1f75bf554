use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{domain::cart::CartError, flows::FlowTransitionError};

/// External systems the dialogue talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Catalog,
    Llm,
    Geocoding,
    AddressBook,
    DeliveryFee,
    Checkout,
    ConversationStore,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Llm => "llm",
            Self::Geocoding => "geocoding",
            Self::AddressBook => "address_book",
            Self::DeliveryFee => "delivery_fee",
            Self::Checkout => "checkout",
            Self::ConversationStore => "conversation_store",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure taxonomy of a single dialogue turn.
///
/// Every variant except [`DialogueError::StoreUnavailable`] is rendered as a
/// reply to the customer; the store variant aborts the turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DialogueError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("ambiguous catalog match for `{term}` ({candidates} candidates)")]
    ResolutionAmbiguous { term: String, candidates: usize },
    #[error("{collaborator} did not answer within {timeout_ms}ms")]
    ExternalTimeout { collaborator: Collaborator, timeout_ms: u64 },
    #[error("concurrent update detected for conversation {conversation_id}")]
    Conflict { conversation_id: String },
    #[error("checkout rejected: {reason}")]
    CheckoutRejected { reason: String },
    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),
}

impl DialogueError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ResolutionAmbiguous { .. } => "resolution_ambiguous",
            Self::ExternalTimeout { .. } => "external_timeout",
            Self::Conflict { .. } => "conflict",
            Self::CheckoutRejected { .. } => "checkout_rejected",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<CartError> for DialogueError {
    fn from(value: CartError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Dialogue(#[from] DialogueError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_) => {
                Self::BadRequest { message: "domain validation failed".to_owned(), correlation_id: unassigned() }
            }
            ApplicationError::Dialogue(
                error @ (DialogueError::StoreUnavailable(_)
                | DialogueError::ExternalTimeout { .. }
                | DialogueError::Conflict { .. }),
            ) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            ApplicationError::Dialogue(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::cart::CartError;
    use crate::errors::{
        ApplicationError, Collaborator, DialogueError, DomainError, InterfaceError,
    };

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "cart line without item".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn store_unavailable_is_the_only_fatal_dialogue_error() {
        let fatal = DialogueError::StoreUnavailable("pool timed out".to_owned());
        assert!(fatal.is_fatal());
        assert!(!DialogueError::Conflict { conversation_id: "c-1".to_owned() }.is_fatal());
        assert!(!DialogueError::ExternalTimeout {
            collaborator: Collaborator::Checkout,
            timeout_ms: 5_000
        }
        .is_fatal());

        let interface = ApplicationError::from(fatal).into_interface("req-3");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn cart_errors_become_validation_failures() {
        let error = DialogueError::from(CartError::ZeroQuantity);
        assert_eq!(error.kind(), "validation");
        assert_eq!(error.to_string(), "validation failed: quantity must be at least 1");
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("invalid checkout api key".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
