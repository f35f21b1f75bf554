//! Dialogue agent: turns customer messages into cart, address, payment and
//! checkout operations.
//!
//! # Turn pipeline
//!
//! 1. **Interpretation** (`rules`, `llm`, `interpreter`) - deterministic
//!    Portuguese rules first, an optional LLM classifier for what they miss.
//! 2. **Guardrails** (`guardrails`) - LLM guesses never commit or cancel an
//!    order and never carry absurd quantities.
//! 3. **Orchestration** (`orchestrator`) - drives the dialogue state machine
//!    from `comanda-core` plus the address and payment sub-flows.
//! 4. **Checkout** (`checkout`) - re-validates and hands an idempotent order
//!    snapshot to the checkout collaborator.
//! 5. **Reply** (`reply`) - renders customer-facing text.
//!
//! `runtime` wraps the orchestrator with per-session serialization and
//! optimistic persistence.
//!
//! # Safety Principle
//!
//! The LLM is strictly a translator. It never prices, never resolves catalog
//! items and never confirms an order; those are deterministic decisions made
//! by the core.

pub mod address_flow;
pub mod checkout;
pub mod guardrails;
pub mod intent;
pub mod interpreter;
pub mod llm;
pub mod orchestrator;
pub mod payment_flow;
pub mod reply;
pub mod rules;
pub mod runtime;

pub use orchestrator::{
    Collaborators, DialogueOrchestrator, DialogueSettings, SideEffect, TurnResult,
};
pub use runtime::{AgentRuntime, InboundMessage, OutboundReply};
