//! Optional LLM fallback for messages the rules could not classify.
//!
//! The model only proposes an intent as JSON. [`translate_guess`] turns that
//! proposal into an [`Intent`]; nothing the model says reaches the cart,
//! prices or the checkout without going through the same handlers as a
//! rule-classified message.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use comanda_core::domain::address::FulfillmentMode;
use comanda_core::domain::payment::PaymentMethod;
use comanda_core::flows::DialogueState;

use crate::intent::{Intent, ItemRequest, PaymentMention, RemoveTarget};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// What the classifier prompt may reveal about the conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassifierContext {
    pub state: Option<DialogueState>,
    pub cart_summary: Vec<String>,
    pub recent_messages: Vec<String>,
    pub catalog_hint: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub observation: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawPayment {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub change_for: Option<String>,
}

/// Model output, parsed leniently. Unknown fields are ignored.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RawIntentGuess {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub payments: Vec<RawPayment>,
    #[serde(default)]
    pub fulfillment: Option<String>,
    #[serde(default)]
    pub option: Option<i64>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(&self, message: &str, context: &ClassifierContext) -> Result<RawIntentGuess>;
}

/// Classifier backed by any completion client.
pub struct PromptClassifier<C> {
    client: C,
}

impl<C> PromptClassifier<C>
where
    C: LlmClient,
{
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn build_prompt(message: &str, context: &ClassifierContext) -> String {
        let mut prompt = String::from(
            "Você classifica mensagens de clientes de uma lanchonete.\n\
             Responda somente com um objeto JSON com os campos: intent, confidence (0 a 1), \
             items [{term, quantity, modifiers, observation}], payments [{method, amount, change_for}], \
             fulfillment (delivery|pickup), option, filter, address, position.\n\
             Intents válidas: greeting, help, browse, add_items, remove_item, personalize, \
             view_cart, finish_order, choose_fulfillment, new_address, address_text, \
             select_option, select_payment, unknown.\n\
             Nunca invente preços nem confirme pedidos.\n",
        );
        if let Some(state) = context.state {
            prompt.push_str(&format!("Estado atual: {}\n", state.as_str()));
        }
        if !context.cart_summary.is_empty() {
            prompt.push_str("Carrinho:\n");
            for line in &context.cart_summary {
                prompt.push_str(&format!("- {line}\n"));
            }
        }
        if !context.catalog_hint.is_empty() {
            prompt.push_str(&format!("Itens do cardápio: {}\n", context.catalog_hint.join(", ")));
        }
        if !context.recent_messages.is_empty() {
            prompt.push_str("Mensagens recentes:\n");
            for recent in &context.recent_messages {
                prompt.push_str(&format!("> {recent}\n"));
            }
        }
        prompt.push_str(&format!("Mensagem: {message}\nJSON:"));
        prompt
    }
}

#[async_trait]
impl<C> LlmClassifier for PromptClassifier<C>
where
    C: LlmClient,
{
    async fn classify(&self, message: &str, context: &ClassifierContext) -> Result<RawIntentGuess> {
        let prompt = Self::build_prompt(message, context);
        let reply = self.client.complete(&prompt).await.context("llm completion failed")?;
        parse_guess(&reply)
    }
}

/// Extracts the first JSON object from a model reply, tolerating code fences
/// and prose around it.
pub fn parse_guess(reply: &str) -> Result<RawIntentGuess> {
    let start = reply.find('{').ok_or_else(|| anyhow!("llm reply has no JSON object"))?;
    let end = reply.rfind('}').ok_or_else(|| anyhow!("llm reply has no JSON object"))?;
    if end < start {
        return Err(anyhow!("llm reply has no JSON object"));
    }
    serde_json::from_str(&reply[start..=end]).context("llm reply is not a valid intent object")
}

/// Maps a model guess to an intent. Commitments (confirm, cancel, restart)
/// are passed through so the guardrails can refuse them explicitly.
pub fn translate_guess(guess: &RawIntentGuess) -> Intent {
    match guess.intent.trim().to_ascii_lowercase().as_str() {
        "greeting" => Intent::Greeting,
        "help" => Intent::Help,
        "browse" => Intent::Browse {
            filter: guess.filter.clone().filter(|filter| !filter.trim().is_empty()),
        },
        "add_items" => {
            let items = guess
                .items
                .iter()
                .filter(|item| !item.term.trim().is_empty())
                .map(|item| ItemRequest {
                    term: item.term.trim().to_string(),
                    quantity: clamp_quantity(item.quantity),
                    modifiers: item.modifiers.clone(),
                    observation: item.observation.clone(),
                })
                .collect::<Vec<_>>();
            if items.is_empty() {
                Intent::Unknown
            } else {
                Intent::AddItems { items }
            }
        }
        "remove_item" => match (positive(guess.position), guess.items.first()) {
            (Some(position), _) => {
                Intent::RemoveItem { target: RemoveTarget::Position(position), quantity: None }
            }
            (None, Some(item)) if !item.term.trim().is_empty() => Intent::RemoveItem {
                target: RemoveTarget::Term(item.term.trim().to_string()),
                quantity: item.quantity.map(|_| clamp_quantity(item.quantity)),
            },
            _ => Intent::Unknown,
        },
        "personalize" => match (positive(guess.position), guess.items.first()) {
            (Some(position), Some(item)) => Intent::Personalize {
                position,
                modifiers: item.modifiers.clone(),
                observation: item.observation.clone(),
            },
            _ => Intent::Unknown,
        },
        "view_cart" => Intent::ViewCart,
        "finish_order" => Intent::FinishOrder,
        "choose_fulfillment" => match guess.fulfillment.as_deref() {
            Some("delivery") => Intent::ChooseFulfillment(FulfillmentMode::Delivery),
            Some("pickup") => Intent::ChooseFulfillment(FulfillmentMode::Pickup),
            _ => Intent::Unknown,
        },
        "new_address" => Intent::NewAddress,
        "address_text" => match guess.address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => Intent::AddressText(address.to_string()),
            _ => Intent::Unknown,
        },
        "select_option" => positive(guess.option).map(Intent::SelectOption).unwrap_or(Intent::Unknown),
        "select_payment" => {
            let mentions = guess
                .payments
                .iter()
                .filter_map(|payment| {
                    let method = PaymentMethod::parse(&payment.method)?;
                    Some(PaymentMention {
                        method,
                        amount: payment.amount.as_deref().and_then(parse_amount),
                        change_for: payment.change_for.as_deref().and_then(parse_amount),
                    })
                })
                .collect::<Vec<_>>();
            if mentions.is_empty() {
                Intent::Unknown
            } else {
                Intent::SelectPayment { mentions }
            }
        }
        "confirm" => Intent::Confirm,
        "decline" => Intent::Decline,
        "cancel" => Intent::Cancel,
        "restart" => Intent::Restart,
        _ => Intent::Unknown,
    }
}

fn clamp_quantity(quantity: Option<i64>) -> u32 {
    quantity
        .filter(|value| *value > 0)
        .map(|value| u32::try_from(value).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

fn positive(value: Option<i64>) -> Option<usize> {
    value.filter(|value| *value > 0).map(|value| value as usize)
}

fn parse_amount(text: &str) -> Option<Decimal> {
    let cleaned = text.trim().trim_start_matches("R$").trim().replace(',', ".");
    Decimal::from_str(&cleaned).ok().filter(|amount| *amount > Decimal::ZERO)
}

/// Test double that replays queued replies and records every call.
#[derive(Default)]
pub struct ScriptedLlmClassifier {
    replies: Mutex<VecDeque<Result<RawIntentGuess, String>>>,
    calls: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedLlmClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_guess(&self, guess: RawIntentGuess) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(guess));
        }
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(message.into()));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClassifier for ScriptedLlmClassifier {
    async fn classify(
        &self,
        message: &str,
        _context: &ClassifierContext,
    ) -> Result<RawIntentGuess> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(message.to_string());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.replies.lock().ok().and_then(|mut replies| replies.pop_front());
        match next {
            Some(Ok(guess)) => Ok(guess),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(RawIntentGuess { intent: "unknown".to_string(), ..RawIntentGuess::default() }),
        }
    }
}
