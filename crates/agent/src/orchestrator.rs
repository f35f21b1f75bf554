//! Turn processing: interpret one message, drive the dialogue state machine
//! and its sub-flows, and render the reply.
//!
//! The orchestrator never fails a turn. Collaborator trouble and rejected
//! transitions become replies; only the runtime around it deals with the
//! conversation store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use comanda_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use comanda_core::catalog::{normalize, CatalogResolver, Resolution, SynonymTable};
use comanda_core::config::AppConfig;
use comanda_core::domain::address::{AddressFlowState, FulfillmentMode};
use comanda_core::domain::cart::{Cart, CustomizationChoice, LineSelector, RemoveOutcome};
use comanda_core::domain::catalog::{CatalogItem, CatalogScope, ItemRef};
use comanda_core::domain::conversation::{
    ArchiveReason, ClarificationItem, ClarificationOption, Conversation, ConversationContext,
    MessageDirection, PendingClarification,
};
use comanda_core::domain::order::CheckoutRecord;
use comanda_core::domain::payment::AllocationCheck;
use comanda_core::errors::{ApplicationError, Collaborator, DialogueError};
use comanda_core::flows::{
    DialogueEvent, DialogueFlow, DialogueState, FlowAction, FlowEngine, FlowTransitionError,
    GuardContext, TransitionGuard,
};
use comanda_core::ports::{
    AddressBook, CatalogSource, CheckoutGateway, DeliveryFeeProvider, GeocodingProvider, PortError,
};
use comanda_core::pricing::price_order;

use crate::address_flow::{AddressFlowController, AddressInput};
use crate::checkout::OrderAssembler;
use crate::guardrails::GuardrailPolicy;
use crate::intent::{DialogueSnapshot, Intent, ItemRequest, PaymentMention, RemoveTarget};
use crate::interpreter::{IntentInterpreter, Interpretation};
use crate::llm::{ClassifierContext, LlmClassifier};
use crate::payment_flow::{PaymentFlowController, PaymentInput};
use crate::reply::ReplyRenderer;
use crate::rules::RuleClassifier;
use crate::runtime::InboundMessage;

const RECENT_MESSAGES: usize = 6;
const CATALOG_PROBE_MAX_WORDS: usize = 4;
const AUDIT_ACTOR: &str = "customer";

/// External systems a turn may call.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSource>,
    pub geocoder: Arc<dyn GeocodingProvider>,
    pub address_book: Arc<dyn AddressBook>,
    pub delivery_fee: Arc<dyn DeliveryFeeProvider>,
    pub checkout: Arc<dyn CheckoutGateway>,
    pub llm: Option<Arc<dyn LlmClassifier>>,
}

impl Collaborators {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        geocoder: Arc<dyn GeocodingProvider>,
        address_book: Arc<dyn AddressBook>,
        delivery_fee: Arc<dyn DeliveryFeeProvider>,
        checkout: Arc<dyn CheckoutGateway>,
    ) -> Self {
        Self { catalog, geocoder, address_book, delivery_fee, checkout, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClassifier>) -> Self {
        self.llm = Some(llm);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogueSettings {
    pub idle_timeout: chrono::Duration,
    pub history_limit: usize,
    pub max_item_quantity: u32,
    pub payment_tolerance: Decimal,
    pub catalog_timeout: Duration,
}

impl DialogueSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            idle_timeout: chrono::Duration::minutes(
                i64::try_from(config.dialogue.idle_timeout_mins).unwrap_or(i64::MAX / 60_000),
            ),
            history_limit: config.dialogue.history_limit,
            max_item_quantity: config.dialogue.max_item_quantity,
            payment_tolerance: config.dialogue.payment_tolerance,
            catalog_timeout: Duration::from_secs(config.catalog.timeout_secs),
        }
    }
}

/// Observable consequences of a turn besides the reply text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    ConversationStarted { conversation_id: String },
    OrderCreated { order_id: String, idempotency_key: String, total: Decimal },
    ConversationArchived { conversation_id: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnResult {
    /// The conversation the next message will continue.
    pub conversation: Conversation,
    /// A conversation closed by this turn in favour of `conversation`.
    pub retired: Option<Conversation>,
    pub reply_text: String,
    pub side_effects: Vec<SideEffect>,
    pub intent: &'static str,
}

struct Turn {
    conversation: Conversation,
    retired: Option<Conversation>,
    effects: Vec<SideEffect>,
    audit: AuditContext,
    correlation_id: String,
    now: DateTime<Utc>,
}

impl Turn {
    fn new(conversation: Conversation, message: &InboundMessage) -> Self {
        let audit = audit_context(&conversation, &message.correlation_id);
        Self {
            conversation,
            retired: None,
            effects: Vec::new(),
            audit,
            correlation_id: message.correlation_id.clone(),
            now: message.timestamp,
        }
    }

    fn context(&mut self) -> &mut ConversationContext {
        &mut self.conversation.context
    }
}

fn audit_context(conversation: &Conversation, correlation_id: &str) -> AuditContext {
    AuditContext::new(
        Some(conversation.id.clone()),
        Some(conversation.session_key.0.clone()),
        correlation_id,
        AUDIT_ACTOR,
    )
}

enum Setback {
    Flow(FlowTransitionError),
    Dialogue(DialogueError),
}

enum Placement {
    Added(String),
    Question(String),
    Rejected(String),
}

enum CartMatch {
    Item(ItemRef),
    Lines(Vec<usize>),
    Missing,
}

pub struct DialogueOrchestrator {
    engine: FlowEngine<DialogueFlow>,
    interpreter: IntentInterpreter,
    resolver: CatalogResolver,
    address: AddressFlowController,
    payment: PaymentFlowController,
    assembler: OrderAssembler,
    renderer: ReplyRenderer,
    collaborators: Collaborators,
    audit: Arc<dyn AuditSink>,
    settings: DialogueSettings,
}

impl DialogueOrchestrator {
    pub fn build(
        config: &AppConfig,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ApplicationError> {
        let rules = RuleClassifier::new().map_err(|error| {
            ApplicationError::Configuration(format!("intent rules failed to compile: {error}"))
        })?;
        let mut interpreter =
            IntentInterpreter::new(rules, GuardrailPolicy::new(config.dialogue.max_item_quantity));
        if let Some(llm) = collaborators.llm.clone() {
            interpreter = interpreter.with_llm(
                llm,
                Duration::from_secs(config.llm.timeout_secs),
                config.llm.min_confidence,
            );
        }

        let resolver = CatalogResolver::new(SynonymTable::from_pairs(&config.catalog.synonyms))
            .with_ambiguity_margin(config.catalog.ambiguity_margin);
        let address = AddressFlowController::new(
            collaborators.geocoder.clone(),
            collaborators.address_book.clone(),
            Duration::from_secs(config.geocoding.timeout_secs),
            config.geocoding.max_candidates,
        );
        let assembler = OrderAssembler::new(
            collaborators.checkout.clone(),
            Duration::from_secs(config.checkout.timeout_secs),
        );

        Ok(Self {
            engine: FlowEngine::default(),
            interpreter,
            resolver,
            address,
            payment: PaymentFlowController::new(config.dialogue.payment_tolerance),
            assembler,
            renderer: ReplyRenderer::new(config.dialogue.currency_symbol.clone()),
            collaborators,
            audit,
            settings: DialogueSettings::from_config(config),
        })
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    pub fn renderer(&self) -> &ReplyRenderer {
        &self.renderer
    }

    /// Runs one inbound message against the stored conversation, if any.
    pub async fn process(
        &self,
        existing: Option<Conversation>,
        message: &InboundMessage,
    ) -> TurnResult {
        let now = message.timestamp;
        let mut turn = match existing {
            Some(conversation) => Turn::new(conversation, message),
            None => {
                let conversation =
                    Conversation::start(message.session_key.clone(), message.channel.clone(), now);
                let mut turn = Turn::new(conversation, message);
                turn.effects.push(SideEffect::ConversationStarted {
                    conversation_id: turn.conversation.id.0.clone(),
                });
                turn
            }
        };

        if !turn.conversation.is_archived()
            && turn.conversation.is_idle(now, self.settings.idle_timeout)
        {
            self.expire(&mut turn).await;
            let expired = self.open(&mut turn);
            turn.retired = Some(expired);
        }

        let mut interpretation = self.interpret(&turn.conversation, &message.raw_text).await;

        if let Some(archived) = turn.conversation.archived.clone() {
            let stale = now - archived.archived_at > self.settings.idle_timeout;
            if stale || interpretation.intent.starts_fresh_conversation() {
                self.open(&mut turn);
                if !interpretation.intent.starts_fresh_conversation() {
                    interpretation = self.interpret(&turn.conversation, &message.raw_text).await;
                }
            }
        }

        let intent = interpretation.intent.kind();
        let source = interpretation.source;
        let from = turn.conversation.state;
        let reply_text = if turn.conversation.is_archived() {
            self.closed_reply(&turn.conversation, &interpretation.intent).await
        } else {
            self.dispatch(&mut turn, interpretation, &message.raw_text).await
        };

        let limit = self.settings.history_limit;
        turn.conversation.record_message(MessageDirection::Inbound, &message.raw_text, now, limit);
        turn.conversation.record_message(MessageDirection::Outbound, &reply_text, now, limit);
        turn.conversation.last_activity_at = now;
        turn.conversation.updated_at = now;

        info!(
            event_name = "dialogue.turn.processed",
            correlation_id = %turn.correlation_id,
            conversation_id = %turn.conversation.id.0,
            intent,
            source = source.as_str(),
            from = from.as_str(),
            to = turn.conversation.state.as_str(),
            side_effects = turn.effects.len(),
            "dialogue turn processed"
        );

        TurnResult {
            conversation: turn.conversation,
            retired: turn.retired,
            reply_text,
            side_effects: turn.effects,
            intent,
        }
    }

    async fn interpret(&self, conversation: &Conversation, raw: &str) -> Interpretation {
        let snapshot = DialogueSnapshot::of(conversation);
        let context = self.classifier_context(conversation);
        self.interpreter.interpret(raw, &snapshot, &context).await
    }

    fn classifier_context(&self, conversation: &Conversation) -> ClassifierContext {
        let history = &conversation.history;
        let recent = &history[history.len().saturating_sub(RECENT_MESSAGES)..];
        ClassifierContext {
            state: Some(conversation.state),
            cart_summary: conversation
                .context
                .cart
                .lines()
                .iter()
                .enumerate()
                .map(|(index, line)| self.renderer.line(index + 1, line))
                .collect(),
            recent_messages: recent.iter().map(|record| record.body.clone()).collect(),
            catalog_hint: Vec::new(),
        }
    }

    /// Replaces the turn's conversation with a fresh one and returns the old one.
    fn open(&self, turn: &mut Turn) -> Conversation {
        let fresh = Conversation::start(
            turn.conversation.session_key.clone(),
            turn.conversation.channel.clone(),
            turn.now,
        );
        turn.effects.push(SideEffect::ConversationStarted { conversation_id: fresh.id.0.clone() });
        turn.audit = audit_context(&fresh, &turn.correlation_id);
        std::mem::replace(&mut turn.conversation, fresh)
    }

    async fn expire(&self, turn: &mut Turn) {
        if self
            .advance_as(turn, DialogueEvent::SessionExpired, ArchiveReason::Timeout)
            .await
            .is_err()
        {
            self.archive(turn, ArchiveReason::Timeout);
        }
        info!(
            event_name = "dialogue.conversation.expired",
            conversation_id = %turn.conversation.id.0,
            idle_minutes = self.settings.idle_timeout.num_minutes(),
            "idle conversation archived"
        );
    }

    async fn closed_reply(&self, conversation: &Conversation, intent: &Intent) -> String {
        match intent {
            Intent::Confirm => match &conversation.context.checkout {
                Some(record) => self.renderer.order_already_sent(&record.order_id),
                None => self.renderer.conversation_over(),
            },
            Intent::Help => self.renderer.help(),
            Intent::Browse { filter } => {
                match self.search(filter.as_deref().unwrap_or_default()).await {
                    Ok(items) => self.renderer.catalog(&items, filter.as_deref()),
                    Err(error) => self.error_reply(conversation, &error),
                }
            }
            _ => self.renderer.conversation_over(),
        }
    }

    async fn dispatch(&self, turn: &mut Turn, interpretation: Interpretation, raw: &str) -> String {
        if let Some(pending) = turn.conversation.context.pending.clone() {
            let answer = match &interpretation.intent {
                Intent::SelectOption(choice) => Some(*choice),
                Intent::AddItems { .. } | Intent::Unknown => match_pending_label(&pending, raw),
                _ => None,
            };
            if let Some(choice) = answer {
                return self.answer_pending(turn, pending, choice).await;
            }
            turn.context().pending = None;
        }

        let state = turn.conversation.state;
        match interpretation.intent {
            Intent::Greeting => self.greet(turn),
            Intent::Help => {
                with_prompt(self.renderer.help(), self.current_prompt(&turn.conversation))
            }
            Intent::Browse { filter } => self.browse(turn, filter).await,
            Intent::AddItems { items } => self.add_items(turn, items).await,
            Intent::RemoveItem { target, quantity } => {
                self.remove_item(turn, target, quantity).await
            }
            Intent::Personalize { position, modifiers, observation } => {
                self.personalize(turn, position, modifiers, observation).await
            }
            Intent::ViewCart => self.view_cart(turn).await,
            Intent::FinishOrder => self.finish_order(turn).await,
            Intent::ChooseFulfillment(mode) => self.choose_fulfillment(turn, mode).await,
            Intent::NewAddress => self.new_address(turn).await,
            Intent::AddressText(text) if state == DialogueState::AddressFlow => {
                self.address_step(turn, AddressInput::Text(text)).await
            }
            Intent::SelectOption(choice) if state == DialogueState::AddressFlow => {
                self.address_step(turn, AddressInput::Select(choice)).await
            }
            Intent::SelectOption(choice) if state == DialogueState::PaymentFlow => {
                self.payment_step(turn, PaymentInput::Select(choice)).await
            }
            Intent::SelectPayment { mentions } => self.select_payment(turn, mentions).await,
            Intent::Confirm => self.confirm(turn).await,
            Intent::Decline => self.decline(turn).await,
            Intent::Cancel => self.cancel(turn).await,
            Intent::Restart => self.restart(turn).await,
            Intent::AddressText(_) | Intent::SelectOption(_) => {
                self.fallback(turn, raw, None).await
            }
            Intent::Unknown => self.fallback(turn, raw, interpretation.notice).await,
        }
    }

    fn greet(&self, turn: &Turn) -> String {
        let cart = &turn.conversation.context.cart;
        if cart.is_empty() {
            return self.renderer.greeting();
        }
        let greeting = format!("{}\n\n{}", self.renderer.greeting(), self.renderer.cart(cart));
        with_prompt(greeting, self.current_prompt(&turn.conversation))
    }

    async fn browse(&self, turn: &mut Turn, filter: Option<String>) -> String {
        let items = match self.search(filter.as_deref().unwrap_or_default()).await {
            Ok(items) => items,
            Err(error) => return self.error_reply(&turn.conversation, &error),
        };
        if matches!(
            turn.conversation.state,
            DialogueState::Greeting | DialogueState::Browsing | DialogueState::CartReview
        ) {
            if let Err(Setback::Flow(error)) =
                self.advance(turn, DialogueEvent::BrowseRequested).await
            {
                debug!(event_name = "dialogue.browse.transition_skipped", error = %error, "browse kept state");
            }
        }
        self.renderer.catalog(&items, filter.as_deref())
    }

    async fn add_items(&self, turn: &mut Turn, requests: Vec<ItemRequest>) -> String {
        let mut added = Vec::new();
        let mut notes = Vec::new();
        let mut question = None;

        for request in requests {
            if request.quantity > self.settings.max_item_quantity {
                notes.push(self.renderer.quantity_too_large(self.settings.max_item_quantity));
                continue;
            }
            let resolution = match self.lookup(&request.term).await {
                Ok(resolution) => resolution,
                Err(error) => {
                    notes.push(self.error_reply(&turn.conversation, &error));
                    break;
                }
            };
            match resolution {
                Resolution::NotFound { .. } => {
                    notes.push(self.renderer.item_not_found(&request.term))
                }
                Resolution::Ambiguous { candidates, .. } if question.is_none() => {
                    let options = candidates
                        .iter()
                        .map(|candidate| ClarificationItem {
                            item_ref: candidate.item.item_ref.clone(),
                            label: format!(
                                "{} ({})",
                                candidate.item.name,
                                self.renderer.money(candidate.item.price)
                            ),
                        })
                        .collect::<Vec<_>>();
                    question = Some(self.renderer.choose_item(&request.term, &options));
                    turn.context().pending = Some(PendingClarification::ChooseItem {
                        term: request.term,
                        quantity: request.quantity,
                        modifiers: request.modifiers,
                        observation: request.observation,
                        candidates: options,
                    });
                }
                Resolution::Ambiguous { .. } => notes.push(self.renderer.ask_again(&request.term)),
                Resolution::Matched { candidate } => {
                    let needs_choice = candidate
                        .item
                        .customization_groups
                        .iter()
                        .any(|group| group.effective_min() > 0);
                    if question.is_some() && needs_choice {
                        notes.push(self.renderer.ask_again(&request.term));
                        continue;
                    }
                    match self.place(
                        turn,
                        &candidate.item,
                        request.quantity,
                        &request.modifiers,
                        Vec::new(),
                        request.observation,
                    ) {
                        Placement::Added(label) => added.push(label),
                        Placement::Question(text) => question = Some(text),
                        Placement::Rejected(text) => notes.push(text),
                    }
                }
            }
        }

        self.report_additions(turn, added, notes, question).await
    }

    /// Resolves modifiers and adds the item, or asks for a missing required group.
    fn place(
        &self,
        turn: &mut Turn,
        item: &CatalogItem,
        quantity: u32,
        modifiers: &[String],
        mut choices: Vec<CustomizationChoice>,
        observation: Option<String>,
    ) -> Placement {
        for modifier in modifiers {
            let Some((group, option)) = self.resolver.resolve_option(modifier, item) else {
                return Placement::Rejected(self.renderer.option_not_found(modifier, &item.name));
            };
            let choice = CustomizationChoice::new(group.id.as_str(), option.id.as_str());
            if !choices.contains(&choice) {
                choices.push(choice);
            }
        }

        let missing = item.customization_groups.iter().find(|group| {
            group.effective_min() > 0 && !choices.iter().any(|choice| choice.group_id == group.id)
        });
        if let Some(group) = missing {
            let options = group
                .options
                .iter()
                .filter(|option| option.available)
                .map(|option| ClarificationOption {
                    option_id: option.id.clone(),
                    label: if option.price_delta > Decimal::ZERO {
                        format!("{} (+{})", option.name, self.renderer.money(option.price_delta))
                    } else {
                        option.name.clone()
                    },
                })
                .collect::<Vec<_>>();
            let text = self.renderer.choose_customization(&item.name, &group.name, &options);
            turn.context().pending = Some(PendingClarification::ChooseCustomization {
                item_ref: item.item_ref.clone(),
                quantity,
                choices,
                observation,
                group_id: group.id.clone(),
                group_name: group.name.clone(),
                options,
            });
            return Placement::Question(text);
        }

        match turn.context().cart.add(item, quantity, &choices, observation) {
            Ok(_) => Placement::Added(format!("{quantity}x {}", item.name)),
            Err(error) => {
                debug!(
                    event_name = "dialogue.cart.add_rejected",
                    item = %item.name,
                    code = error.code(),
                    "cart refused the item"
                );
                Placement::Rejected(self.renderer.cart_error(&error))
            }
        }
    }

    async fn report_additions(
        &self,
        turn: &mut Turn,
        added: Vec<String>,
        notes: Vec<String>,
        question: Option<String>,
    ) -> String {
        let mut parts = Vec::new();
        if !added.is_empty() {
            self.cart_changed(turn).await;
            self.audit.emit(
                AuditEvent::from_context(&turn.audit, "cart.items_added", AuditCategory::Cart, AuditOutcome::Success)
                    .with_metadata("items", added.join(", ")),
            );
            parts.push(self.renderer.added(&turn.conversation.context.cart, &added));
        }
        parts.extend(notes);
        parts.extend(question);
        if parts.is_empty() {
            parts.push(self.renderer.unknown());
        }
        parts.join("\n\n")
    }

    async fn answer_pending(
        &self,
        turn: &mut Turn,
        pending: PendingClarification,
        choice: usize,
    ) -> String {
        match pending {
            PendingClarification::ChooseItem {
                term,
                quantity,
                modifiers,
                observation,
                candidates,
            } => {
                let Some(candidate) = candidates.get(choice.wrapping_sub(1)) else {
                    return self.renderer.invalid_choice(candidates.len());
                };
                turn.context().pending = None;
                let item = match self.fetch_item(&candidate.item_ref).await {
                    Ok(Some(item)) => item,
                    Ok(None) => return self.renderer.item_not_found(&term),
                    Err(error) => return self.error_reply(&turn.conversation, &error),
                };
                let placement =
                    self.place(turn, &item, quantity, &modifiers, Vec::new(), observation);
                self.report_placement(turn, placement).await
            }
            PendingClarification::ChooseCustomization {
                item_ref,
                quantity,
                mut choices,
                observation,
                group_id,
                options,
                ..
            } => {
                let Some(option) = options.get(choice.wrapping_sub(1)) else {
                    return self.renderer.invalid_choice(options.len());
                };
                turn.context().pending = None;
                let item = match self.fetch_item(&item_ref).await {
                    Ok(Some(item)) => item,
                    Ok(None) => return self.renderer.item_not_found(item_ref.id()),
                    Err(error) => return self.error_reply(&turn.conversation, &error),
                };
                choices.push(CustomizationChoice::new(group_id, option.option_id.clone()));
                let placement = self.place(turn, &item, quantity, &[], choices, observation);
                self.report_placement(turn, placement).await
            }
            PendingClarification::ChooseLine { positions, quantity } => {
                let Some(position) = positions.get(choice.wrapping_sub(1)).copied() else {
                    return self.renderer.invalid_choice(positions.len());
                };
                turn.context().pending = None;
                self.apply_remove(turn, LineSelector::Position(position), quantity, &format!("item {position}"))
                    .await
            }
        }
    }

    async fn report_placement(&self, turn: &mut Turn, placement: Placement) -> String {
        match placement {
            Placement::Added(label) => {
                self.report_additions(turn, vec![label], Vec::new(), None).await
            }
            Placement::Question(text) | Placement::Rejected(text) => text,
        }
    }

    async fn remove_item(
        &self,
        turn: &mut Turn,
        target: RemoveTarget,
        quantity: Option<u32>,
    ) -> String {
        let (selector, label) = match target {
            RemoveTarget::Position(position) => {
                (LineSelector::Position(position), format!("item {position}"))
            }
            RemoveTarget::Term(term) => {
                let found = self.match_in_cart(&turn.conversation.context.cart, &term).await;
                match found {
                    CartMatch::Item(item_ref) => (LineSelector::Item(item_ref), term),
                    CartMatch::Lines(positions) => return self.ask_line(turn, positions, quantity),
                    CartMatch::Missing => return self.renderer.not_in_cart(&term),
                }
            }
        };
        self.apply_remove(turn, selector, quantity, &label).await
    }

    async fn apply_remove(
        &self,
        turn: &mut Turn,
        selector: LineSelector,
        quantity: Option<u32>,
        label: &str,
    ) -> String {
        let outcome = turn.context().cart.remove(&selector, quantity);
        match outcome {
            RemoveOutcome::Removed { line } => {
                self.cart_changed(turn).await;
                self.renderer.removed(&line.name, &turn.conversation.context.cart)
            }
            RemoveOutcome::Decremented { line_id, remaining } => {
                self.cart_changed(turn).await;
                let cart = &turn.conversation.context.cart;
                let name = cart
                    .lines()
                    .iter()
                    .find(|line| line.line_id == line_id)
                    .map(|line| line.name.clone())
                    .unwrap_or_else(|| label.to_string());
                self.renderer.decremented(&name, remaining, cart)
            }
            RemoveOutcome::NotFound => self.renderer.not_in_cart(label),
            RemoveOutcome::Ambiguous { positions } => self.ask_line(turn, positions, quantity),
        }
    }

    fn ask_line(&self, turn: &mut Turn, positions: Vec<usize>, quantity: Option<u32>) -> String {
        let text = self.renderer.choose_line(&turn.conversation.context.cart, &positions);
        turn.context().pending = Some(PendingClarification::ChooseLine { positions, quantity });
        text
    }

    /// Resolves a removal term against the items already in the cart.
    async fn match_in_cart(&self, cart: &Cart, term: &str) -> CartMatch {
        let mut items: Vec<CatalogItem> = Vec::new();
        for line in cart.lines() {
            if items.iter().any(|item| item.item_ref == line.item_ref) {
                continue;
            }
            let mut item = match self.fetch_item(&line.item_ref).await {
                Ok(Some(item)) => item,
                _ => CatalogItem {
                    item_ref: line.item_ref.clone(),
                    name: line.name.clone(),
                    aliases: Vec::new(),
                    category: None,
                    description: None,
                    price: line.unit_price,
                    active: true,
                    available: true,
                    promotion_weight: 0,
                    customization_groups: Vec::new(),
                },
            };
            item.active = true;
            items.push(item);
        }

        match self.resolver.resolve(term, &items) {
            Resolution::Matched { candidate } => CartMatch::Item(candidate.item.item_ref),
            Resolution::Ambiguous { candidates, .. } => {
                let positions = cart
                    .lines()
                    .iter()
                    .enumerate()
                    .filter(|(_, line)| {
                        candidates.iter().any(|candidate| candidate.item.item_ref == line.item_ref)
                    })
                    .map(|(index, _)| index + 1)
                    .collect::<Vec<_>>();
                match positions.as_slice() {
                    [] => CartMatch::Missing,
                    [position] => match cart.line_at(*position) {
                        Some(line) => CartMatch::Item(line.item_ref.clone()),
                        None => CartMatch::Missing,
                    },
                    _ => CartMatch::Lines(positions),
                }
            }
            Resolution::NotFound { .. } => CartMatch::Missing,
        }
    }

    async fn personalize(
        &self,
        turn: &mut Turn,
        position: usize,
        modifiers: Vec<String>,
        observation: Option<String>,
    ) -> String {
        let Some(line) = turn.conversation.context.cart.line_at(position).cloned() else {
            return self.renderer.not_in_cart(&format!("item {position}"));
        };
        let item = match self.fetch_item(&line.item_ref).await {
            Ok(Some(item)) => item,
            Ok(None) => return self.renderer.item_not_found(&line.name),
            Err(error) => return self.error_reply(&turn.conversation, &error),
        };

        let mut choices =
            line.customizations.iter().map(|applied| applied.choice()).collect::<Vec<_>>();
        for modifier in &modifiers {
            let Some((group, option)) = self.resolver.resolve_option(modifier, &item) else {
                return self.renderer.option_not_found(modifier, &item.name);
            };
            let choice = CustomizationChoice::new(group.id.as_str(), option.id.as_str());
            if !choices.contains(&choice) {
                choices.push(choice);
            }
        }

        let observation = observation.or(line.observation);
        let personalized = turn.context().cart.personalize(position, &item, &choices, observation);
        match personalized {
            Ok(outcome) => {
                self.cart_changed(turn).await;
                let cart = &turn.conversation.context.cart;
                let shown = outcome
                    .merged_into
                    .and_then(|line_id| {
                        cart.lines().iter().position(|line| line.line_id == line_id)
                    })
                    .map(|index| index + 1)
                    .unwrap_or(position);
                self.renderer.personalized(shown, cart)
            }
            Err(error) => self.renderer.cart_error(&error),
        }
    }

    async fn view_cart(&self, turn: &mut Turn) -> String {
        let reviewable = matches!(
            turn.conversation.state,
            DialogueState::Browsing | DialogueState::CartReview
        );
        if turn.conversation.context.cart.is_empty() || !reviewable {
            let cart = self.renderer.cart(&turn.conversation.context.cart);
            return with_prompt(cart, self.current_prompt(&turn.conversation));
        }
        match self.advance(turn, DialogueEvent::CartReviewRequested).await {
            Ok(mut fragments) => {
                fragments.push(self.renderer.finish_hint());
                fragments.join("\n")
            }
            Err(setback) => self.setback_reply(turn, setback),
        }
    }

    async fn finish_order(&self, turn: &mut Turn) -> String {
        if turn.conversation.context.cart.is_empty() {
            return self.renderer.empty_cart_checkout();
        }
        match turn.conversation.state {
            DialogueState::Greeting | DialogueState::Browsing | DialogueState::CartReview => {
                match self.advance(turn, DialogueEvent::CheckoutRequested).await {
                    Ok(fragments) => fragments.join("\n"),
                    Err(setback) => self.setback_reply(turn, setback),
                }
            }
            _ => self
                .current_prompt(&turn.conversation)
                .unwrap_or_else(|| self.renderer.not_now()),
        }
    }

    async fn choose_fulfillment(&self, turn: &mut Turn, mode: FulfillmentMode) -> String {
        if turn.conversation.context.cart.is_empty() {
            return self.renderer.empty_cart_checkout();
        }
        let before = turn.conversation.clone();
        let context = turn.context();
        context.fulfillment = Some(mode);
        if !mode.requires_address() {
            context.address = None;
        }
        match self.advance(turn, DialogueEvent::FulfillmentChosen(mode)).await {
            Ok(fragments) => fragments.join("\n"),
            Err(setback) => {
                turn.conversation = before;
                self.setback_reply(turn, setback)
            }
        }
    }

    async fn new_address(&self, turn: &mut Turn) -> String {
        match turn.conversation.state {
            DialogueState::AddressFlow => {
                return self.address_step(turn, AddressInput::NewAddress).await;
            }
            DialogueState::Browsing
            | DialogueState::CartReview
            | DialogueState::PaymentFlow
            | DialogueState::Confirmation => {}
            _ => return self.renderer.not_now(),
        }
        if turn.conversation.context.cart.is_empty() {
            return self.renderer.empty_cart_checkout();
        }

        let before = turn.conversation.clone();
        let context = turn.context();
        context.fulfillment = Some(FulfillmentMode::Delivery);
        context.address = None;
        let event = DialogueEvent::FulfillmentChosen(FulfillmentMode::Delivery);
        match self.advance(turn, event).await {
            Ok(_) => {
                turn.context().address_flow = Some(AddressFlowState::Searching);
                self.renderer.address_prompt(&AddressFlowState::Searching)
            }
            Err(setback) => {
                turn.conversation = before;
                self.setback_reply(turn, setback)
            }
        }
    }

    async fn address_step(&self, turn: &mut Turn, input: AddressInput) -> String {
        let key = turn.conversation.session_key.clone();
        let flow = match turn.conversation.context.address_flow.clone() {
            Some(flow) => flow,
            None => self.address.start(&key).await,
        };
        let step = self.address.advance(&flow, input, &key).await;
        turn.context().address_flow = Some(step.state.clone());

        if let Some(selection) = step.selection().cloned() {
            turn.context().address = Some(selection);
            return match self.advance(turn, DialogueEvent::AddressResolved).await {
                Ok(fragments) => {
                    let mut parts = vec![self.renderer.address_prompt(&step.state)];
                    parts.extend(fragments);
                    parts.join("\n")
                }
                Err(setback) => self.setback_reply(turn, setback),
            };
        }

        let prompt = self.renderer.address_prompt(&step.state);
        match step.notice {
            Some(notice) => format!("{}\n{}", self.renderer.address_notice(&notice), prompt),
            None => prompt,
        }
    }

    async fn payment_step(&self, turn: &mut Turn, input: PaymentInput) -> String {
        let flow = match turn.conversation.context.payment_flow.clone() {
            Some(flow) => flow,
            None => self.payment.start(self.order_total(&turn.conversation.context)),
        };
        let step = self.payment.advance(&flow, input);
        turn.context().payment_flow = Some(step.state.clone());

        if let Some(selection) = step.selection().cloned() {
            turn.context().payment = Some(selection);
            return match self.advance(turn, DialogueEvent::PaymentResolved).await {
                Ok(fragments) => fragments.join("\n"),
                Err(setback) => self.setback_reply(turn, setback),
            };
        }

        let prompt = self.renderer.payment_prompt(&step.state);
        match step.notice {
            Some(notice) => format!("{}\n{}", self.renderer.payment_notice(&notice), prompt),
            None => prompt,
        }
    }

    async fn select_payment(&self, turn: &mut Turn, mentions: Vec<PaymentMention>) -> String {
        match turn.conversation.state {
            DialogueState::PaymentFlow => {
                self.payment_step(turn, PaymentInput::Mentions(mentions)).await
            }
            DialogueState::Confirmation => {
                // a rejected split keeps the confirmed payment and the state
                let fresh = self.payment.start(self.order_total(&turn.conversation.context));
                let trial = self.payment.advance(&fresh, PaymentInput::Mentions(mentions.clone()));
                if let Some(notice) = trial.notice.as_ref().filter(|notice| notice.is_rejection()) {
                    return with_prompt(
                        self.renderer.payment_notice(notice),
                        self.current_prompt(&turn.conversation),
                    );
                }
                if let Err(setback) =
                    self.advance(turn, DialogueEvent::PaymentChangeRequested).await
                {
                    return self.setback_reply(turn, setback);
                }
                self.payment_step(turn, PaymentInput::Mentions(mentions)).await
            }
            _ => with_prompt(self.renderer.not_now(), self.current_prompt(&turn.conversation)),
        }
    }

    async fn confirm(&self, turn: &mut Turn) -> String {
        let has_cart = !turn.conversation.context.cart.is_empty();
        match turn.conversation.state {
            DialogueState::Confirmation => self.checkout(turn).await,
            DialogueState::Browsing | DialogueState::CartReview if has_cart => {
                self.finish_order(turn).await
            }
            DialogueState::Greeting | DialogueState::Browsing | DialogueState::CartReview => {
                self.renderer.nothing_to_confirm()
            }
            _ => with_prompt(self.renderer.not_now(), self.current_prompt(&turn.conversation)),
        }
    }

    async fn checkout(&self, turn: &mut Turn) -> String {
        let guard = self.guard_context(&turn.conversation);
        if let Err(error) =
            self.engine.apply(&turn.conversation.state, &DialogueEvent::ConfirmAccepted, &guard)
        {
            return self.setback_reply(turn, Setback::Flow(error));
        }
        let draft = match self.assembler.assemble(
            &turn.conversation,
            self.settings.payment_tolerance,
            turn.now,
        ) {
            Ok(draft) => draft,
            Err(error) => return self.error_reply(&turn.conversation, &error),
        };

        let key = draft.idempotency_key();
        let total = draft.totals.total;
        self.audit.emit(
            AuditEvent::from_context(&turn.audit, "checkout.attempted", AuditCategory::Checkout, AuditOutcome::Success)
                .with_metadata("idempotency_key", key.0.clone())
                .with_metadata("total", total.to_string()),
        );

        match self.assembler.submit(&draft, &key).await {
            Ok(order_id) => {
                self.audit.emit(
                    AuditEvent::from_context(&turn.audit, "checkout.completed", AuditCategory::Checkout, AuditOutcome::Success)
                        .with_metadata("order_id", order_id.0.clone())
                        .with_metadata("idempotency_key", key.0.clone()),
                );
                turn.context().checkout = Some(CheckoutRecord {
                    idempotency_key: key.clone(),
                    order_id: order_id.clone(),
                    total,
                    created_at: turn.now,
                });
                turn.effects.push(SideEffect::OrderCreated {
                    order_id: order_id.0.clone(),
                    idempotency_key: key.0.clone(),
                    total,
                });
                if self
                    .advance_as(
                        turn,
                        DialogueEvent::ConfirmAccepted,
                        ArchiveReason::CheckoutCompleted,
                    )
                    .await
                    .is_err()
                {
                    warn!(
                        event_name = "dialogue.checkout.transition_failed",
                        order_id = %order_id.0,
                        "order created but transition was refused; closing anyway"
                    );
                    turn.conversation.state = DialogueState::CheckoutSent;
                    turn.context().cart.clear();
                    self.archive(turn, ArchiveReason::CheckoutCompleted);
                }
                info!(
                    event_name = "dialogue.checkout.completed",
                    conversation_id = %turn.conversation.id.0,
                    order_id = %order_id.0,
                    total = %total,
                    "order handed to checkout"
                );
                self.renderer.order_sent(&order_id, total)
            }
            Err(error) => {
                let outcome = match error {
                    DialogueError::CheckoutRejected { .. } => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                self.audit.emit(
                    AuditEvent::from_context(&turn.audit, "checkout.failed", AuditCategory::Checkout, outcome)
                        .with_metadata("idempotency_key", key.0.clone())
                        .with_metadata("error", error.to_string()),
                );
                self.error_reply(&turn.conversation, &error)
            }
        }
    }

    async fn decline(&self, turn: &mut Turn) -> String {
        if turn.conversation.state != DialogueState::Confirmation {
            return with_prompt(self.renderer.not_now(), self.current_prompt(&turn.conversation));
        }
        match self.advance(turn, DialogueEvent::PaymentChangeRequested).await {
            Ok(fragments) => fragments.join("\n"),
            Err(setback) => self.setback_reply(turn, setback),
        }
    }

    async fn cancel(&self, turn: &mut Turn) -> String {
        if turn.conversation.state == DialogueState::Greeting
            && turn.conversation.context.cart.is_empty()
        {
            return self.renderer.nothing_to_cancel();
        }
        let cancelled =
            self.advance_as(turn, DialogueEvent::CancelRequested, ArchiveReason::Cancelled).await;
        match cancelled {
            Ok(_) => self.renderer.cancelled(),
            Err(setback) => self.setback_reply(turn, setback),
        }
    }

    async fn restart(&self, turn: &mut Turn) -> String {
        if turn.conversation.state == DialogueState::Greeting
            && turn.conversation.context.cart.is_empty()
        {
            return self.renderer.greeting();
        }
        let restarted =
            self.advance_as(turn, DialogueEvent::CancelRequested, ArchiveReason::Restarted).await;
        match restarted {
            Ok(_) => {
                let previous = self.open(turn);
                turn.retired = Some(previous);
                self.renderer.greeting()
            }
            Err(setback) => self.setback_reply(turn, setback),
        }
    }

    /// Short unclassified text may still be an item name.
    async fn fallback(&self, turn: &mut Turn, raw: &str, notice: Option<String>) -> String {
        let text = raw.trim();
        let browsing = matches!(
            turn.conversation.state,
            DialogueState::Greeting | DialogueState::Browsing | DialogueState::CartReview
        );
        if notice.is_none()
            && browsing
            && !text.is_empty()
            && text.split_whitespace().count() <= CATALOG_PROBE_MAX_WORDS
        {
            if let Ok(Resolution::Matched { .. } | Resolution::Ambiguous { .. }) =
                self.lookup(text).await
            {
                return self.add_items(turn, vec![ItemRequest::single(text)]).await;
            }
        }
        let message = notice.unwrap_or_else(|| self.renderer.unknown());
        with_prompt(message, self.current_prompt(&turn.conversation))
    }

    async fn cart_changed(&self, turn: &mut Turn) {
        if let Err(Setback::Flow(error)) = self.advance(turn, DialogueEvent::CartChanged).await {
            debug!(event_name = "dialogue.cart.transition_skipped", error = %error, "cart change kept state");
        }
    }

    async fn advance(&self, turn: &mut Turn, event: DialogueEvent) -> Result<Vec<String>, Setback> {
        let reason = match event {
            DialogueEvent::SessionExpired => ArchiveReason::Timeout,
            DialogueEvent::ConfirmAccepted => ArchiveReason::CheckoutCompleted,
            _ => ArchiveReason::Cancelled,
        };
        self.advance_as(turn, event, reason).await
    }

    /// Applies `event` and runs the resulting actions. A failing action
    /// restores the conversation as it was before the event.
    async fn advance_as(
        &self,
        turn: &mut Turn,
        event: DialogueEvent,
        reason: ArchiveReason,
    ) -> Result<Vec<String>, Setback> {
        let before = turn.conversation.clone();
        let guard = self.guard_context(&turn.conversation);
        let outcome = self
            .engine
            .apply_with_audit(
                &turn.conversation.state,
                &event,
                &guard,
                self.audit.as_ref(),
                &turn.audit,
            )
            .map_err(Setback::Flow)?;
        turn.conversation.state = outcome.to;

        match self.perform(turn, &outcome.actions, reason).await {
            Ok(fragments) => Ok(fragments),
            Err(error) => {
                warn!(
                    event_name = "dialogue.transition.reverted",
                    conversation_id = %turn.conversation.id.0,
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    error = %error,
                    "transition actions failed"
                );
                turn.conversation = before;
                Err(Setback::Dialogue(error))
            }
        }
    }

    async fn perform(
        &self,
        turn: &mut Turn,
        actions: &[FlowAction],
        reason: ArchiveReason,
    ) -> Result<Vec<String>, DialogueError> {
        let mut fragments = Vec::new();
        for action in actions {
            match action {
                FlowAction::PresentCatalog
                | FlowAction::SubmitCheckout
                | FlowAction::DiscardDraft => {}
                FlowAction::PresentCart => {
                    if !actions.contains(&FlowAction::AskFulfillment) {
                        fragments.push(self.renderer.cart(&turn.conversation.context.cart));
                    }
                }
                FlowAction::AskFulfillment => {
                    fragments.push(self.renderer.ask_fulfillment(&turn.conversation.context.cart));
                }
                FlowAction::StartAddressFlow => {
                    let flow = self.address.start(&turn.conversation.session_key).await;
                    fragments.push(self.renderer.address_prompt(&flow));
                    turn.context().address_flow = Some(flow);
                }
                FlowAction::StartPaymentFlow => {
                    let fee = self.quote_fee(&turn.conversation.context).await?;
                    turn.context().delivery_fee = Some(fee);
                    let flow = self.payment.start(self.order_total(&turn.conversation.context));
                    fragments.push(self.renderer.payment_prompt(&flow));
                    let context = turn.context();
                    context.payment_flow = Some(flow);
                    context.payment = None;
                }
                FlowAction::PresentConfirmation => {
                    let draft = self.assembler.assemble(
                        &turn.conversation,
                        self.settings.payment_tolerance,
                        turn.now,
                    )?;
                    fragments.push(self.renderer.confirmation(&draft));
                }
                FlowAction::ResetCheckoutProgress => turn.context().reset_checkout_progress(),
                FlowAction::ClearCart => turn.context().cart.clear(),
                FlowAction::AbortSubflows => turn.context().abort_subflows(),
                FlowAction::ArchiveConversation => self.archive(turn, reason),
            }
        }
        Ok(fragments)
    }

    fn archive(&self, turn: &mut Turn, reason: ArchiveReason) {
        if turn.conversation.is_archived() {
            return;
        }
        turn.conversation.archive(reason, turn.now);
        turn.effects.push(SideEffect::ConversationArchived {
            conversation_id: turn.conversation.id.0.clone(),
            reason: reason.as_str().to_string(),
        });
        self.audit.emit(
            AuditEvent::from_context(&turn.audit, "conversation.archived", AuditCategory::Dialogue, AuditOutcome::Success)
                .with_metadata("reason", reason.as_str()),
        );
        info!(
            event_name = "dialogue.conversation.archived",
            conversation_id = %turn.conversation.id.0,
            reason = reason.as_str(),
            "conversation archived"
        );
    }

    async fn quote_fee(&self, context: &ConversationContext) -> Result<Decimal, DialogueError> {
        let mode = context.fulfillment.unwrap_or(FulfillmentMode::Pickup);
        let address = context
            .address
            .as_ref()
            .map(|selection| selection.address())
            .filter(|_| mode.requires_address());
        let subtotal = context.cart.compute_subtotal();
        bounded(
            Collaborator::DeliveryFee,
            self.settings.catalog_timeout,
            self.collaborators.delivery_fee.quote_fee(mode, address, subtotal),
        )
        .await
    }

    fn order_total(&self, context: &ConversationContext) -> Decimal {
        let fee = match context.fulfillment {
            Some(mode) if mode.requires_address() => context.delivery_fee.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };
        price_order(&context.cart, fee).totals.total
    }

    fn guard_context(&self, conversation: &Conversation) -> GuardContext {
        let context = &conversation.context;
        let payment_balanced = context.payment.as_ref().is_some_and(|payment| {
            payment.check(self.order_total(context), self.settings.payment_tolerance)
                == AllocationCheck::Balanced
        });
        GuardContext {
            cart_lines: context.cart.len(),
            fulfillment: context.fulfillment,
            address_resolved: context.address_resolved(),
            payment_balanced,
        }
    }

    async fn search(&self, term: &str) -> Result<Vec<CatalogItem>, DialogueError> {
        bounded(
            Collaborator::Catalog,
            self.settings.catalog_timeout,
            self.collaborators.catalog.search(term, CatalogScope::All),
        )
        .await
    }

    async fn fetch_item(&self, item_ref: &ItemRef) -> Result<Option<CatalogItem>, DialogueError> {
        bounded(
            Collaborator::Catalog,
            self.settings.catalog_timeout,
            self.collaborators.catalog.get(item_ref),
        )
        .await
    }

    /// Searches the raw term and its synonym, then ranks the union.
    async fn lookup(&self, term: &str) -> Result<Resolution, DialogueError> {
        let mut queries = vec![term.to_string()];
        if let Some(canonical) = self.resolver.synonyms().expand(&normalize(term)) {
            queries.push(canonical);
        }
        let mut items: Vec<CatalogItem> = Vec::new();
        for query in &queries {
            for item in self.search(query).await? {
                if !items.iter().any(|known| known.item_ref == item.item_ref) {
                    items.push(item);
                }
            }
        }
        Ok(self.resolver.resolve(term, &items))
    }

    /// What the customer is expected to answer next, if anything.
    fn current_prompt(&self, conversation: &Conversation) -> Option<String> {
        let context = &conversation.context;
        match conversation.state {
            DialogueState::CartReview if !context.cart.is_empty() => {
                Some(self.renderer.ask_fulfillment(&context.cart))
            }
            DialogueState::AddressFlow => {
                context.address_flow.as_ref().map(|flow| self.renderer.address_prompt(flow))
            }
            DialogueState::PaymentFlow => {
                context.payment_flow.as_ref().map(|flow| self.renderer.payment_prompt(flow))
            }
            DialogueState::Confirmation => self
                .assembler
                .assemble(conversation, self.settings.payment_tolerance, conversation.updated_at)
                .ok()
                .map(|draft| self.renderer.confirmation(&draft)),
            _ => None,
        }
    }

    fn setback_reply(&self, turn: &Turn, setback: Setback) -> String {
        let conversation = &turn.conversation;
        match setback {
            Setback::Flow(error) => {
                debug!(event_name = "dialogue.transition.refused", error = %error, "transition refused");
                match error.failed_guard() {
                    Some(TransitionGuard::CartNotEmpty) => self.renderer.empty_cart_checkout(),
                    Some(TransitionGuard::FulfillmentChosen) => {
                        self.renderer.ask_fulfillment(&conversation.context.cart)
                    }
                    Some(TransitionGuard::AddressResolved | TransitionGuard::PaymentBalanced)
                    | None => {
                        with_prompt(self.renderer.not_now(), self.current_prompt(conversation))
                    }
                }
            }
            Setback::Dialogue(error) => self.error_reply(conversation, &error),
        }
    }

    fn error_reply(&self, conversation: &Conversation, error: &DialogueError) -> String {
        debug!(event_name = "dialogue.turn.error", kind = error.kind(), error = %error, "turn error rendered");
        match error {
            DialogueError::ExternalTimeout { collaborator, .. } => {
                self.renderer.collaborator_timeout(*collaborator)
            }
            DialogueError::CheckoutRejected { reason } => self.renderer.checkout_rejected(reason),
            DialogueError::Conflict { .. } | DialogueError::StoreUnavailable(_) => {
                self.renderer.resend()
            }
            DialogueError::Validation(_) | DialogueError::ResolutionAmbiguous { .. } => {
                with_prompt(self.renderer.not_now(), self.current_prompt(conversation))
            }
        }
    }
}

/// Runs a collaborator call under a deadline; any failure reads as a timeout
/// of that collaborator.
async fn bounded<T, F>(
    collaborator: Collaborator,
    limit: Duration,
    call: F,
) -> Result<T, DialogueError>
where
    F: Future<Output = Result<T, PortError>>,
{
    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            warn!(
                event_name = "dialogue.collaborator.failed",
                collaborator = collaborator.as_str(),
                error = %error,
                "collaborator call failed"
            );
            Err(DialogueError::ExternalTimeout { collaborator, timeout_ms })
        }
        Err(_) => {
            warn!(
                event_name = "dialogue.collaborator.timeout",
                collaborator = collaborator.as_str(),
                timeout_ms,
                "collaborator call timed out"
            );
            Err(DialogueError::ExternalTimeout { collaborator, timeout_ms })
        }
    }
}

fn with_prompt(message: String, prompt: Option<String>) -> String {
    match prompt {
        Some(prompt) => format!("{message}\n\n{prompt}"),
        None => message,
    }
}

/// Maps an answer like "média" onto the numbered option it names.
fn match_pending_label(pending: &PendingClarification, raw: &str) -> Option<usize> {
    let wanted = normalize(raw);
    if wanted.is_empty() {
        return None;
    }
    let labels = match pending {
        PendingClarification::ChooseItem { candidates, .. } => {
            candidates.iter().map(|candidate| candidate.label.as_str()).collect::<Vec<_>>()
        }
        PendingClarification::ChooseCustomization { options, .. } => {
            options.iter().map(|option| option.label.as_str()).collect::<Vec<_>>()
        }
        PendingClarification::ChooseLine { .. } => return None,
    };
    let hits = labels
        .iter()
        .enumerate()
        .filter(|(_, label)| {
            let name = normalize(label.split(" (").next().unwrap_or(label));
            name == wanted || name.split(' ').any(|token| token == wanted)
        })
        .map(|(index, _)| index + 1)
        .collect::<Vec<_>>();
    match hits.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
