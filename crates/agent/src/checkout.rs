use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use comanda_core::domain::conversation::Conversation;
use comanda_core::domain::order::{IdempotencyKey, OrderDraft, OrderId};
use comanda_core::domain::payment::AllocationCheck;
use comanda_core::errors::{Collaborator, DialogueError};
use comanda_core::ports::{CheckoutError, CheckoutGateway};
use comanda_core::pricing::price_order;

/// Builds the checkout snapshot from a conversation and hands it to the
/// checkout collaborator.
pub struct OrderAssembler {
    gateway: Arc<dyn CheckoutGateway>,
    timeout: Duration,
}

impl OrderAssembler {
    pub fn new(gateway: Arc<dyn CheckoutGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Re-validates everything a confirmation depends on and prices the cart
    /// from scratch.
    pub fn assemble(
        &self,
        conversation: &Conversation,
        tolerance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<OrderDraft, DialogueError> {
        let context = &conversation.context;
        if context.cart.is_empty() {
            return Err(DialogueError::Validation("cart is empty".to_string()));
        }
        let fulfillment = context
            .fulfillment
            .ok_or_else(|| DialogueError::Validation("fulfillment not chosen".to_string()))?;
        if fulfillment.requires_address() && context.address.is_none() {
            return Err(DialogueError::Validation("delivery address not resolved".to_string()));
        }
        let payments = context
            .payment
            .clone()
            .ok_or_else(|| DialogueError::Validation("payment not selected".to_string()))?;

        let fee = if fulfillment.requires_address() {
            context.delivery_fee.unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        let priced = price_order(&context.cart, fee);
        match payments.check(priced.totals.total, tolerance) {
            AllocationCheck::Balanced => {}
            AllocationCheck::Shortfall(missing) => {
                return Err(DialogueError::Validation(format!(
                    "payment short of the total by {missing}"
                )))
            }
            AllocationCheck::Excess(extra) => {
                return Err(DialogueError::Validation(format!(
                    "payment exceeds the total by {extra}"
                )))
            }
        }

        Ok(OrderDraft {
            conversation_id: conversation.id.clone(),
            session_key: conversation.session_key.clone(),
            channel: conversation.channel.clone(),
            lines: context.cart.lines().to_vec(),
            fulfillment,
            address: if fulfillment.requires_address() { context.address.clone() } else { None },
            payments,
            totals: priced.totals,
            assembled_at: now,
        })
    }

    pub async fn submit(
        &self,
        draft: &OrderDraft,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderId, DialogueError> {
        let call = self.gateway.create_order(draft, idempotency_key);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(order_id)) => Ok(order_id),
            Ok(Err(CheckoutError::Rejected { reason })) => {
                Err(DialogueError::CheckoutRejected { reason })
            }
            Ok(Err(CheckoutError::Port(error))) => {
                warn!(
                    event_name = "checkout.submit.failed",
                    idempotency_key = %idempotency_key.0,
                    error = %error,
                    "checkout collaborator failed"
                );
                Err(DialogueError::ExternalTimeout {
                    collaborator: Collaborator::Checkout,
                    timeout_ms: self.timeout_ms(),
                })
            }
            Err(_) => {
                warn!(
                    event_name = "checkout.submit.timeout",
                    idempotency_key = %idempotency_key.0,
                    timeout_ms = self.timeout_ms(),
                    "checkout collaborator timed out"
                );
                Err(DialogueError::ExternalTimeout {
                    collaborator: Collaborator::Checkout,
                    timeout_ms: self.timeout_ms(),
                })
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use comanda_core::domain::address::FulfillmentMode;
    use comanda_core::domain::conversation::{Conversation, SessionKey};
    use comanda_core::domain::payment::{PaymentMethod, PaymentSelection};
    use comanda_core::errors::{Collaborator, DialogueError};
    use comanda_core::ports::InMemoryCheckout;
    use comanda_db::demo_catalog;

    use super::OrderAssembler;

    fn ready_conversation(payment: Decimal) -> Conversation {
        let mut conversation = Conversation::start(SessionKey("web:checkout".to_string()), "web", Utc::now());
        let catalog = demo_catalog();
        let burger = catalog.iter().find(|item| item.name == "X-Burguer").expect("burger");
        conversation.context.cart.add(burger, 2, &[], None).expect("add");
        conversation.context.fulfillment = Some(FulfillmentMode::Pickup);
        conversation.context.payment = Some(PaymentSelection::single(PaymentMethod::Pix, payment));
        conversation
    }

    #[tokio::test]
    async fn same_content_yields_same_key_and_one_order() {
        let checkout = Arc::new(InMemoryCheckout::new());
        let assembler = OrderAssembler::new(checkout.clone(), Duration::from_secs(1));
        let conversation = ready_conversation(Decimal::new(4500, 2));

        let first = assembler.assemble(&conversation, Decimal::ZERO, Utc::now()).expect("draft");
        let second = assembler.assemble(&conversation, Decimal::ZERO, Utc::now()).expect("draft");
        assert_eq!(first.idempotency_key(), second.idempotency_key());
        assert_eq!(first.totals.total, Decimal::new(4500, 2));

        let order = assembler.submit(&first, &first.idempotency_key()).await.expect("order");
        let replay = assembler.submit(&second, &second.idempotency_key()).await.expect("order");
        assert_eq!(order, replay);
        assert_eq!(checkout.created_count().await, 1);
    }

    #[tokio::test]
    async fn stale_payment_fails_revalidation() {
        let assembler =
            OrderAssembler::new(Arc::new(InMemoryCheckout::new()), Duration::from_secs(1));
        let conversation = ready_conversation(Decimal::new(4000, 2));
        let error = assembler.assemble(&conversation, Decimal::ZERO, Utc::now()).expect_err("short");
        assert_eq!(error.kind(), "validation");
    }

    #[tokio::test]
    async fn rejection_reason_is_kept_and_timeouts_are_typed() {
        let checkout = Arc::new(InMemoryCheckout::new());
        checkout.reject_next("Loja fechada no momento").await;
        let assembler = OrderAssembler::new(checkout, Duration::from_secs(1));
        let draft = assembler
            .assemble(&ready_conversation(Decimal::new(4500, 2)), Decimal::ZERO, Utc::now())
            .expect("draft");

        let rejected = assembler.submit(&draft, &draft.idempotency_key()).await;
        assert_eq!(
            rejected,
            Err(DialogueError::CheckoutRejected { reason: "Loja fechada no momento".to_string() })
        );

        let slow = OrderAssembler::new(
            Arc::new(InMemoryCheckout::new().with_latency(Duration::from_millis(200))),
            Duration::from_millis(20),
        );
        let timed_out = slow.submit(&draft, &draft.idempotency_key()).await;
        assert_eq!(
            timed_out,
            Err(DialogueError::ExternalTimeout {
                collaborator: Collaborator::Checkout,
                timeout_ms: 20
            })
        );
    }
}
