use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::intent::{DialogueSnapshot, Intent, IntentSource};
use crate::llm::{translate_guess, ClassifierContext, LlmClassifier};
use crate::rules::RuleClassifier;

/// Classified message plus an optional note for the reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interpretation {
    pub intent: Intent,
    pub source: IntentSource,
    pub notice: Option<String>,
}

impl Interpretation {
    fn new(intent: Intent, source: IntentSource) -> Self {
        Self { intent, source, notice: None }
    }
}

/// Rules first; the LLM only sees messages the rules gave up on.
pub struct IntentInterpreter {
    rules: RuleClassifier,
    llm: Option<Arc<dyn LlmClassifier>>,
    llm_timeout: Duration,
    min_confidence: f32,
    guardrails: GuardrailPolicy,
}

impl IntentInterpreter {
    pub fn new(rules: RuleClassifier, guardrails: GuardrailPolicy) -> Self {
        Self {
            rules,
            llm: None,
            llm_timeout: Duration::from_secs(8),
            min_confidence: 0.6,
            guardrails,
        }
    }

    pub fn with_llm(
        mut self,
        llm: Arc<dyn LlmClassifier>,
        timeout: Duration,
        min_confidence: f32,
    ) -> Self {
        self.llm = Some(llm);
        self.llm_timeout = timeout;
        self.min_confidence = min_confidence;
        self
    }

    pub fn rules(&self) -> &RuleClassifier {
        &self.rules
    }

    pub async fn interpret(
        &self,
        raw: &str,
        snapshot: &DialogueSnapshot,
        context: &ClassifierContext,
    ) -> Interpretation {
        if let Some(intent) = self.rules.classify(raw, snapshot) {
            let source = if snapshot.expects_choice() || snapshot.expects_address_text() {
                IntentSource::Context
            } else {
                IntentSource::Rule
            };
            return Interpretation::new(intent, source);
        }

        let Some(llm) = self.llm.as_ref() else {
            return Interpretation::new(Intent::Unknown, IntentSource::Rule);
        };

        let guess = match tokio::time::timeout(self.llm_timeout, llm.classify(raw, context)).await {
            Ok(Ok(guess)) => guess,
            Ok(Err(error)) => {
                warn!(
                    event_name = "dialogue.intent.llm_failed",
                    error = %error,
                    "llm classification failed, continuing with rules only"
                );
                return Interpretation::new(Intent::Unknown, IntentSource::Rule);
            }
            Err(_) => {
                warn!(
                    event_name = "dialogue.intent.llm_timeout",
                    timeout_ms = u64::try_from(self.llm_timeout.as_millis()).unwrap_or(u64::MAX),
                    "llm classification timed out, continuing with rules only"
                );
                return Interpretation::new(Intent::Unknown, IntentSource::Rule);
            }
        };

        if guess.confidence < self.min_confidence {
            debug!(
                event_name = "dialogue.intent.llm_low_confidence",
                confidence = guess.confidence,
                intent = %guess.intent,
                "discarding low confidence llm guess"
            );
            return Interpretation::new(Intent::Unknown, IntentSource::Llm);
        }

        let intent = translate_guess(&guess);
        match self.guardrails.evaluate(&intent, IntentSource::Llm) {
            GuardrailDecision::Allow => Interpretation::new(intent, IntentSource::Llm),
            GuardrailDecision::Deny { reason_code, user_message, fallback_path }
            | GuardrailDecision::Degrade { reason_code, user_message, fallback_path } => {
                debug!(
                    event_name = "dialogue.intent.guardrail",
                    reason_code,
                    fallback_path,
                    "llm intent blocked by guardrail"
                );
                Interpretation {
                    intent: Intent::Unknown,
                    source: IntentSource::Llm,
                    notice: Some(user_message),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use comanda_core::flows::DialogueState;

    use super::IntentInterpreter;
    use crate::guardrails::GuardrailPolicy;
    use crate::intent::{DialogueSnapshot, Intent, IntentSource, ItemRequest};
    use crate::llm::{ClassifierContext, RawIntentGuess, RawItem, ScriptedLlmClassifier};
    use crate::rules::RuleClassifier;

    fn browsing() -> DialogueSnapshot {
        DialogueSnapshot {
            state: DialogueState::Browsing,
            cart_lines: 0,
            has_pending: false,
            address_step: None,
            payment_step: None,
        }
    }

    fn interpreter(llm: Arc<ScriptedLlmClassifier>, timeout: Duration) -> IntentInterpreter {
        IntentInterpreter::new(RuleClassifier::new().expect("rules"), GuardrailPolicy::default())
            .with_llm(llm, timeout, 0.6)
    }

    #[tokio::test]
    async fn rules_short_circuit_the_llm() {
        let llm = Arc::new(ScriptedLlmClassifier::new());
        let interpreter = interpreter(llm.clone(), Duration::from_secs(1));

        let result = interpreter
            .interpret("quero 1 coca lata", &browsing(), &ClassifierContext::default())
            .await;
        assert_eq!(result.source, IntentSource::Rule);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn llm_fills_in_when_rules_give_up() {
        let llm = Arc::new(ScriptedLlmClassifier::new());
        llm.push_guess(RawIntentGuess {
            intent: "add_items".to_string(),
            confidence: 0.9,
            items: vec![RawItem { term: "batata frita".to_string(), ..RawItem::default() }],
            ..RawIntentGuess::default()
        });
        let interpreter = interpreter(llm.clone(), Duration::from_secs(1));

        let result = interpreter
            .interpret("aquela batatinha", &browsing(), &ClassifierContext::default())
            .await;
        assert_eq!(result.source, IntentSource::Llm);
        assert_eq!(result.intent, Intent::AddItems { items: vec![ItemRequest::single("batata frita")] });
        assert_eq!(llm.calls(), vec!["aquela batatinha".to_string()]);
    }

    #[tokio::test]
    async fn slow_llm_degrades_to_unknown() {
        let llm = Arc::new(ScriptedLlmClassifier::new().with_latency(Duration::from_millis(200)));
        let interpreter = interpreter(llm, Duration::from_millis(20));

        let result = interpreter
            .interpret("aquela batatinha", &browsing(), &ClassifierContext::default())
            .await;
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.notice, None);
    }

    #[tokio::test]
    async fn llm_commitments_and_low_confidence_are_refused() {
        let llm = Arc::new(ScriptedLlmClassifier::new());
        llm.push_guess(RawIntentGuess {
            intent: "confirm".to_string(),
            confidence: 0.95,
            ..RawIntentGuess::default()
        });
        llm.push_guess(RawIntentGuess {
            intent: "view_cart".to_string(),
            confidence: 0.2,
            ..RawIntentGuess::default()
        });
        let interpreter = interpreter(llm, Duration::from_secs(1));

        let confirm = interpreter
            .interpret("manda ver então", &browsing(), &ClassifierContext::default())
            .await;
        assert_eq!(confirm.intent, Intent::Unknown);
        assert!(confirm.notice.is_some_and(|notice| notice.contains("confirmar")));

        let low = interpreter
            .interpret("hmm talvez", &browsing(), &ClassifierContext::default())
            .await;
        assert_eq!(low.intent, Intent::Unknown);
    }
}
