use crate::intent::{Intent, IntentSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(reason_code),
        }
    }
}

/// Limits on what an LLM-proposed intent may do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_item_quantity: u32,
    pub llm_can_commit: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_item_quantity: 50, llm_can_commit: false }
    }
}

impl GuardrailPolicy {
    pub fn new(max_item_quantity: u32) -> Self {
        Self { max_item_quantity, ..Self::default() }
    }

    pub fn evaluate(&self, intent: &Intent, source: IntentSource) -> GuardrailDecision {
        if source != IntentSource::Llm {
            return GuardrailDecision::Allow;
        }

        match intent {
            Intent::Confirm | Intent::Cancel | Intent::Restart if !self.llm_can_commit => {
                GuardrailDecision::Degrade {
                    reason_code: "llm_commitment_disallowed",
                    user_message:
                        "Para confirmar ou cancelar, responda com \"confirmar\" ou \"cancelar\"."
                            .to_string(),
                    fallback_path: "explicit_commitment",
                }
            }
            Intent::AddItems { items }
                if items.iter().any(|item| item.quantity > self.max_item_quantity) =>
            {
                GuardrailDecision::Deny {
                    reason_code: "llm_quantity_out_of_range",
                    user_message: format!(
                        "Consigo adicionar no máximo {} unidades de cada item por mensagem.",
                        self.max_item_quantity
                    ),
                    fallback_path: "restate_quantity",
                }
            }
            Intent::RemoveItem { quantity: Some(quantity), .. }
                if *quantity > self.max_item_quantity =>
            {
                GuardrailDecision::Deny {
                    reason_code: "llm_quantity_out_of_range",
                    user_message: "Não entendi a quantidade a remover. Pode repetir?".to_string(),
                    fallback_path: "restate_quantity",
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}
