//! Delivery address sub-flow: saved address, geocoded search, complement.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use comanda_core::catalog::normalize;
use comanda_core::domain::address::{Address, AddressFlowState, AddressSelection, SavedAddress};
use comanda_core::domain::conversation::SessionKey;
use comanda_core::ports::{AddressBook, GeocodingProvider, PortError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressInput {
    Select(usize),
    NewAddress,
    Text(String),
}

/// Why a step did not advance, for the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressNotice {
    NoMatches,
    LookupUnavailable,
    InvalidChoice { max: usize },
    NeedAddressText,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AddressAdvance {
    pub state: AddressFlowState,
    pub notice: Option<AddressNotice>,
}

impl AddressAdvance {
    fn to(state: AddressFlowState) -> Self {
        Self { state, notice: None }
    }

    fn stay(state: &AddressFlowState, notice: AddressNotice) -> Self {
        Self { state: state.clone(), notice: Some(notice) }
    }

    pub fn selection(&self) -> Option<&AddressSelection> {
        match &self.state {
            AddressFlowState::Resolved { selection } => Some(selection),
            _ => None,
        }
    }
}

pub struct AddressFlowController {
    geocoder: Arc<dyn GeocodingProvider>,
    address_book: Arc<dyn AddressBook>,
    timeout: Duration,
    max_candidates: usize,
}

impl AddressFlowController {
    pub fn new(
        geocoder: Arc<dyn GeocodingProvider>,
        address_book: Arc<dyn AddressBook>,
        timeout: Duration,
        max_candidates: usize,
    ) -> Self {
        Self { geocoder, address_book, timeout, max_candidates: max_candidates.max(1) }
    }

    /// Offers saved addresses when the customer has any.
    pub async fn start(&self, session_key: &SessionKey) -> AddressFlowState {
        match self.saved_addresses(session_key).await {
            saved if saved.is_empty() => AddressFlowState::Searching,
            saved => AddressFlowState::AwaitChoice { saved },
        }
    }

    pub async fn advance(
        &self,
        state: &AddressFlowState,
        input: AddressInput,
        session_key: &SessionKey,
    ) -> AddressAdvance {
        match (state, input) {
            (AddressFlowState::Resolved { .. }, _) => AddressAdvance::to(state.clone()),
            (_, AddressInput::NewAddress) => AddressAdvance::to(AddressFlowState::Searching),

            (AddressFlowState::AwaitChoice { saved }, AddressInput::Select(choice)) => {
                match choice {
                    n if (1..=saved.len()).contains(&n) => {
                        let entry = &saved[n - 1];
                        AddressAdvance::to(AddressFlowState::Resolved {
                            selection: AddressSelection::Saved {
                                address_id: entry.id.clone(),
                                address: entry.address.clone(),
                            },
                        })
                    }
                    n if n == saved.len() + 1 => AddressAdvance::to(AddressFlowState::Searching),
                    _ => AddressAdvance::stay(
                        state,
                        AddressNotice::InvalidChoice { max: saved.len() + 1 },
                    ),
                }
            }
            (AddressFlowState::AwaitSelection { candidates }, AddressInput::Select(choice)) => {
                match choice {
                    n if (1..=candidates.len()).contains(&n) => {
                        AddressAdvance::to(AddressFlowState::AwaitComplement {
                            chosen: candidates[n - 1].address.clone(),
                        })
                    }
                    n if n == candidates.len() + 1 => {
                        AddressAdvance::to(AddressFlowState::Searching)
                    }
                    _ => AddressAdvance::stay(
                        state,
                        AddressNotice::InvalidChoice { max: candidates.len() + 1 },
                    ),
                }
            }
            (AddressFlowState::Searching, AddressInput::Select(_)) => {
                AddressAdvance::stay(state, AddressNotice::NeedAddressText)
            }

            (AddressFlowState::AwaitComplement { chosen }, AddressInput::Text(text)) => {
                self.complete(chosen, &text, session_key).await
            }
            (AddressFlowState::AwaitComplement { chosen }, AddressInput::Select(number)) => {
                self.complete(chosen, &number.to_string(), session_key).await
            }

            (_, AddressInput::Text(text)) => self.search(state, &text).await,
        }
    }

    async fn complete(
        &self,
        chosen: &Address,
        complement: &str,
        session_key: &SessionKey,
    ) -> AddressAdvance {
        let mut address = chosen.clone();
        address.complement = parse_complement(complement);
        self.remember(session_key, &address).await;
        AddressAdvance::to(AddressFlowState::Resolved {
            selection: AddressSelection::New { address },
        })
    }

    async fn search(&self, state: &AddressFlowState, text: &str) -> AddressAdvance {
        let text = text.trim();
        if text.is_empty() {
            return AddressAdvance::stay(state, AddressNotice::NeedAddressText);
        }

        let lookup = tokio::time::timeout(self.timeout, self.geocoder.search_address(text)).await;
        let mut candidates = match lookup {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(error)) => {
                warn!(
                    event_name = "dialogue.address.lookup_failed",
                    collaborator = %error.collaborator(),
                    error = %error,
                    "address lookup failed"
                );
                return AddressAdvance::stay(state, AddressNotice::LookupUnavailable);
            }
            Err(_) => {
                warn!(
                    event_name = "dialogue.address.lookup_timeout",
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "address lookup timed out"
                );
                return AddressAdvance::stay(state, AddressNotice::LookupUnavailable);
            }
        };

        if candidates.is_empty() {
            return AddressAdvance {
                state: AddressFlowState::Searching,
                notice: Some(AddressNotice::NoMatches),
            };
        }
        candidates.sort_by(|left, right| {
            right.confidence.partial_cmp(&left.confidence).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.max_candidates);
        AddressAdvance::to(AddressFlowState::AwaitSelection { candidates })
    }

    async fn saved_addresses(&self, session_key: &SessionKey) -> Vec<SavedAddress> {
        let lookup = self.address_book.saved_addresses(session_key);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(saved)) => saved,
            Ok(Err(error)) => {
                log_address_book_failure(&error);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    event_name = "dialogue.address.book_timeout",
                    "saved address lookup timed out"
                );
                Vec::new()
            }
        }
    }

    async fn remember(&self, session_key: &SessionKey, address: &Address) {
        let write = self.address_book.remember(session_key, address);
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => log_address_book_failure(&error),
            Err(_) => warn!(
                event_name = "dialogue.address.book_timeout",
                "saving address timed out"
            ),
        }
    }
}

fn log_address_book_failure(error: &PortError) {
    warn!(
        event_name = "dialogue.address.book_failed",
        error = %error,
        "address book unavailable, continuing without saved addresses"
    );
}

/// `None` when the customer says there is no complement.
pub fn parse_complement(text: &str) -> Option<String> {
    let normalized = normalize(text);
    let none = matches!(
        normalized.as_str(),
        "" | "sem complemento" | "nao tem" | "nao" | "nenhum" | "n a" | "na" | "nada" | "sem"
            | "nao tem complemento" | "nao possui"
    );
    (!none).then(|| text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use comanda_core::domain::address::{
        Address, AddressCandidate, AddressFlowState, AddressSelection, SavedAddress,
    };
    use comanda_core::domain::conversation::SessionKey;
    use comanda_core::ports::{AddressBook, InMemoryAddressBook, InMemoryGeocoder};

    use super::{parse_complement, AddressFlowController, AddressInput, AddressNotice};

    fn flores() -> Address {
        Address {
            street: "Rua das Flores".to_string(),
            number: Some("120".to_string()),
            neighborhood: Some("Centro".to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("PR".to_string()),
            ..Address::default()
        }
    }

    fn gazetteer() -> Vec<AddressCandidate> {
        vec![
            AddressCandidate { address: flores(), confidence: 0.9, provider_ref: None },
            AddressCandidate {
                address: Address { street: "Rua das Flores".to_string(), city: Some("Pinhais".to_string()), ..Address::default() },
                confidence: 0.6,
                provider_ref: None,
            },
        ]
    }

    fn controller(
        geocoder: InMemoryGeocoder,
        book: Arc<InMemoryAddressBook>,
    ) -> AddressFlowController {
        AddressFlowController::new(Arc::new(geocoder), book, Duration::from_millis(50), 5)
    }

    fn key() -> SessionKey {
        SessionKey("web:addr".to_string())
    }

    #[tokio::test]
    async fn search_select_and_complement_resolves_a_new_address() {
        let book = Arc::new(InMemoryAddressBook::new());
        let flow = controller(InMemoryGeocoder::new(gazetteer()), book.clone());

        let state = flow.start(&key()).await;
        assert_eq!(state, AddressFlowState::Searching);

        let found = flow.advance(&state, AddressInput::Text("rua das flores 120".to_string()), &key()).await;
        let AddressFlowState::AwaitSelection { candidates } = &found.state else {
            panic!("expected candidates, got {:?}", found.state);
        };
        assert_eq!(candidates[0].address, flores());

        let picked = flow.advance(&found.state, AddressInput::Select(1), &key()).await;
        assert!(matches!(picked.state, AddressFlowState::AwaitComplement { .. }));

        let done = flow.advance(&picked.state, AddressInput::Text("apto 32".to_string()), &key()).await;
        let Some(AddressSelection::New { address }) = done.selection() else {
            panic!("expected resolved address");
        };
        assert_eq!(address.complement.as_deref(), Some("apto 32"));
        assert_eq!(book.saved_addresses(&key()).await.expect("saved").len(), 1);
    }

    #[tokio::test]
    async fn saved_address_is_offered_first() {
        let book = Arc::new(InMemoryAddressBook::new());
        book.seed(
            key(),
            vec![SavedAddress { id: "casa".to_string(), label: Some("Casa".to_string()), address: flores() }],
        )
        .await;
        let flow = controller(InMemoryGeocoder::new(gazetteer()), book);

        let state = flow.start(&key()).await;
        let chosen = flow.advance(&state, AddressInput::Select(1), &key()).await;
        assert_eq!(
            chosen.selection(),
            Some(&AddressSelection::Saved { address_id: "casa".to_string(), address: flores() })
        );

        let other = flow.advance(&state, AddressInput::Select(2), &key()).await;
        assert_eq!(other.state, AddressFlowState::Searching);

        let invalid = flow.advance(&state, AddressInput::Select(7), &key()).await;
        assert_eq!(invalid.notice, Some(AddressNotice::InvalidChoice { max: 2 }));
    }

    #[tokio::test]
    async fn geocoder_outage_keeps_the_customer_in_search() {
        let flow =
            controller(InMemoryGeocoder::unavailable(), Arc::new(InMemoryAddressBook::new()));
        let result = flow
            .advance(&AddressFlowState::Searching, AddressInput::Text("rua x".to_string()), &key())
            .await;
        assert_eq!(result.state, AddressFlowState::Searching);
        assert_eq!(result.notice, Some(AddressNotice::LookupUnavailable));

        let slow = controller(
            InMemoryGeocoder::new(gazetteer()).with_latency(Duration::from_millis(300)),
            Arc::new(InMemoryAddressBook::new()),
        );
        let timed_out = slow
            .advance(&AddressFlowState::Searching, AddressInput::Text("rua das flores".to_string()), &key())
            .await;
        assert_eq!(timed_out.notice, Some(AddressNotice::LookupUnavailable));
    }

    #[tokio::test]
    async fn unknown_street_asks_again() {
        let flow =
            controller(InMemoryGeocoder::new(gazetteer()), Arc::new(InMemoryAddressBook::new()));
        let result = flow
            .advance(
                &AddressFlowState::Searching,
                AddressInput::Text("avenida inexistente".to_string()),
                &key(),
            )
            .await;
        assert_eq!(result.notice, Some(AddressNotice::NoMatches));
    }

    #[test]
    fn complement_refusals_map_to_none() {
        assert_eq!(parse_complement("sem complemento"), None);
        assert_eq!(parse_complement("Não tem"), None);
        assert_eq!(parse_complement(" bloco B "), Some("bloco B".to_string()));
    }
}
