//! Local chat against the demo catalog.
//!
//! Every collaborator is an in-memory fake and conversations live only for
//! the duration of the process, so the full dialogue can be walked without a
//! database or network.

use std::io::{BufRead, Write};
use std::sync::Arc;

use chrono::Utc;
use comanda_agent::{
    AgentRuntime, Collaborators, DialogueOrchestrator, InboundMessage, OutboundReply, SideEffect,
};
use comanda_core::audit::TracingAuditSink;
use comanda_core::config::{AppConfig, LoadOptions};
use comanda_core::domain::conversation::SessionKey;
use comanda_core::errors::{ApplicationError, DialogueError};
use comanda_core::ports::{
    FlatDeliveryFee, InMemoryAddressBook, InMemoryCatalog, InMemoryCheckout, InMemoryGeocoder,
};
use comanda_db::fixtures::demo_saved_address;
use comanda_db::{demo_catalog, demo_gazetteer, demo_synonyms, InMemoryConversationRepository};

use crate::commands::{current_thread_runtime, CommandResult};

const CHANNEL: &str = "cli";
const QUIT: &[&str] = &["/sair", "/quit"];

pub struct ChatSession {
    runtime: AgentRuntime,
    session_key: SessionKey,
}

impl ChatSession {
    pub async fn start(config: &AppConfig, session: &str) -> Result<Self, ApplicationError> {
        let mut config = config.clone();
        for (term, canonical) in demo_synonyms() {
            config.catalog.synonyms.entry(term).or_insert(canonical);
        }

        let session_key = SessionKey(session.to_string());
        let address_book = InMemoryAddressBook::new();
        address_book.seed(session_key.clone(), vec![demo_saved_address()]).await;

        let collaborators = Collaborators::new(
            Arc::new(InMemoryCatalog::new(demo_catalog())),
            Arc::new(InMemoryGeocoder::new(demo_gazetteer())),
            Arc::new(address_book),
            Arc::new(FlatDeliveryFee::new(config.dialogue.delivery_fee)),
            Arc::new(InMemoryCheckout::new()),
        );
        let orchestrator =
            DialogueOrchestrator::build(&config, collaborators, Arc::new(TracingAuditSink))?;
        let store = Arc::new(InMemoryConversationRepository::new());

        Ok(Self { runtime: AgentRuntime::new(Arc::new(orchestrator), store), session_key })
    }

    pub async fn send(&self, text: &str) -> Result<OutboundReply, DialogueError> {
        let message = InboundMessage::new(self.session_key.clone(), CHANNEL, text, Utc::now());
        self.runtime.handle_message(message).await
    }
}

pub fn run<R: BufRead, W: Write>(session: &str, input: R, mut output: W) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let outcome = runtime.block_on(async {
        let chat = ChatSession::start(&config, session)
            .await
            .map_err(|error| ("dialogue_setup", error.to_string(), 4u8))?;
        converse(&chat, input, &mut output)
            .await
            .map_err(|error| ("io", error.to_string(), 6u8))?
            .map_err(|error| ("store_unavailable", error.to_string(), 5u8))
    });

    match outcome {
        Ok(()) => CommandResult::quiet(),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("chat", error_class, message, exit_code)
        }
    }
}

async fn converse<R: BufRead, W: Write>(
    chat: &ChatSession,
    input: R,
    output: &mut W,
) -> std::io::Result<Result<(), DialogueError>> {
    writeln!(output, "comanda chat ({}). Digite /sair para encerrar.", chat.session_key.0)?;
    let mut lines = input.lines();
    loop {
        write!(output, "> ")?;
        output.flush()?;
        let Some(line) = lines.next() else {
            writeln!(output)?;
            return Ok(Ok(()));
        };
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if QUIT.contains(&text) {
            return Ok(Ok(()));
        }

        let reply = match chat.send(text).await {
            Ok(reply) => reply,
            Err(error) => return Ok(Err(error)),
        };
        writeln!(output, "{}", reply.reply_text)?;
        for effect in &reply.side_effects {
            if let Some(note) = describe(effect) {
                writeln!(output, "  [{note}]")?;
            }
        }
    }
}

fn describe(effect: &SideEffect) -> Option<String> {
    match effect {
        SideEffect::ConversationStarted { .. } => None,
        SideEffect::OrderCreated { order_id, total, .. } => {
            Some(format!("pedido {order_id} criado, total {total}"))
        }
        SideEffect::ConversationArchived { reason, .. } => {
            Some(format!("conversa arquivada ({reason})"))
        }
    }
}

#[cfg(test)]
mod tests {
    use comanda_core::config::AppConfig;
    use comanda_core::flows::DialogueState;

    use super::ChatSession;

    #[tokio::test]
    async fn chat_session_walks_a_pickup_order() {
        let chat = ChatSession::start(&AppConfig::default(), "cli:test").await.expect("session");

        let added = chat.send("quero 2 x-burguer").await.expect("turn");
        assert!(added.reply_text.contains("X-Burguer"));

        chat.send("finalizar pedido").await.expect("turn");
        let pickup = chat.send("retirada").await.expect("turn");
        assert_eq!(pickup.state, DialogueState::PaymentFlow.as_str());
    }
}
