//! Customer-facing text. Everything the bot says is built here.

use rust_decimal::Decimal;

use comanda_core::domain::address::{AddressCandidate, AddressFlowState, SavedAddress};
use comanda_core::domain::cart::{Cart, CartError, CartLine};
use comanda_core::domain::catalog::CatalogItem;
use comanda_core::domain::conversation::{ClarificationItem, ClarificationOption};
use comanda_core::domain::order::{OrderDraft, OrderId};
use comanda_core::domain::payment::{round_cents, PaymentFlowState, PaymentMethod, PaymentSelection};
use comanda_core::errors::Collaborator;

use crate::address_flow::AddressNotice;
use crate::payment_flow::PaymentNotice;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyRenderer {
    currency_symbol: String,
}

impl Default for ReplyRenderer {
    fn default() -> Self {
        Self::new("R$")
    }
}

impl ReplyRenderer {
    pub fn new(currency_symbol: impl Into<String>) -> Self {
        Self { currency_symbol: currency_symbol.into() }
    }

    /// "R$ 1.234,50"
    pub fn money(&self, value: Decimal) -> String {
        let rounded = round_cents(value);
        let negative = rounded < Decimal::ZERO;
        let text = format!("{:.2}", rounded.abs());
        let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (index, digit) in whole.chars().enumerate() {
            if index > 0 && (whole.len() - index) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(digit);
        }
        let sign = if negative { "-" } else { "" };
        format!("{sign}{} {grouped},{cents}", self.currency_symbol)
    }

    pub fn greeting(&self) -> String {
        "Olá! Eu anoto seu pedido por aqui. Diga o que deseja (ex.: \"quero 2 x-burguer com bacon\") \
         ou peça o cardápio."
            .to_string()
    }

    pub fn help(&self) -> String {
        [
            "Posso ajudar com:",
            "- \"cardápio\" para ver os itens",
            "- \"quero 2 x-burguer com bacon\" para adicionar",
            "- \"tira o item 2\" para remover",
            "- \"carrinho\" para revisar o pedido",
            "- \"finalizar pedido\" para escolher entrega e pagamento",
            "- \"cancelar\" para desistir do pedido",
        ]
        .join("\n")
    }

    pub fn catalog(&self, items: &[CatalogItem], filter: Option<&str>) -> String {
        let orderable = items.iter().filter(|item| item.is_orderable()).collect::<Vec<_>>();
        if orderable.is_empty() {
            return match filter {
                Some(filter) => format!("Não encontrei itens para \"{filter}\" no cardápio."),
                None => "O cardápio está indisponível no momento.".to_string(),
            };
        }

        let mut text = match filter {
            Some(filter) => format!("Cardápio ({filter}):"),
            None => "Cardápio:".to_string(),
        };
        let mut category: Option<&str> = None;
        for item in orderable {
            if item.category.as_deref() != category {
                category = item.category.as_deref();
                if let Some(name) = category {
                    text.push_str(&format!("\n\n*{name}*"));
                }
            }
            text.push_str(&format!("\n- {} ({})", item.name, self.money(item.price)));
        }
        text
    }

    pub fn line(&self, position: usize, line: &CartLine) -> String {
        let mut text = format!("{}. {}x {}", position, line.quantity, line.name);
        if !line.customizations.is_empty() {
            let names =
                line.customizations.iter().map(|applied| applied.name.as_str()).collect::<Vec<_>>();
            text.push_str(&format!(" com {}", names.join(", ")));
        }
        if let Some(observation) = line.observation.as_deref().filter(|value| !value.is_empty()) {
            text.push_str(&format!(" ({observation})"));
        }
        text.push_str(&format!(" - {}", self.money(line.line_total())));
        text
    }

    pub fn cart(&self, cart: &Cart) -> String {
        if cart.is_empty() {
            return "Seu carrinho está vazio.".to_string();
        }
        let mut text = "Seu pedido:".to_string();
        for (index, line) in cart.lines().iter().enumerate() {
            text.push('\n');
            text.push_str(&self.line(index + 1, line));
        }
        text.push_str(&format!("\nSubtotal: {}", self.money(cart.compute_subtotal())));
        text
    }

    pub fn added(&self, cart: &Cart, added: &[String]) -> String {
        format!(
            "Adicionado: {}.\n{}\nQuer mais alguma coisa ou posso finalizar?",
            added.join(", "),
            self.cart(cart)
        )
    }

    pub fn removed(&self, name: &str, cart: &Cart) -> String {
        format!("Removido: {name}.\n{}", self.cart(cart))
    }

    pub fn decremented(&self, name: &str, remaining: u32, cart: &Cart) -> String {
        format!("Agora são {remaining}x {name}.\n{}", self.cart(cart))
    }

    pub fn personalized(&self, position: usize, cart: &Cart) -> String {
        format!("Item {position} atualizado.\n{}", self.cart(cart))
    }

    pub fn not_in_cart(&self, what: &str) -> String {
        format!("Não encontrei \"{what}\" no seu carrinho.")
    }

    pub fn item_not_found(&self, term: &str) -> String {
        format!("Não encontrei \"{term}\" no cardápio. Quer ver o cardápio?")
    }

    pub fn option_not_found(&self, modifier: &str, item: &str) -> String {
        format!("\"{modifier}\" não é uma opção disponível para {item}.")
    }

    pub fn cart_error(&self, error: &CartError) -> String {
        match error {
            CartError::ZeroQuantity => "A quantidade precisa ser pelo menos 1.".to_string(),
            CartError::Inactive { item } | CartError::Unavailable { item } => {
                format!("{item} não está disponível no momento.")
            }
            CartError::OptionUnavailable { option, .. } => {
                format!("{option} está em falta no momento.")
            }
            CartError::MissingRequiredGroup { group, .. } => {
                format!("Preciso que você escolha: {group}.")
            }
            CartError::TooFewSelections { group, min, .. } => {
                format!("Escolha pelo menos {min} opção(ões) em {group}.")
            }
            CartError::TooManySelections { group, max, .. } => {
                format!("Você pode escolher no máximo {max} opção(ões) em {group}.")
            }
            other => format!("Não consegui alterar o carrinho: {other}."),
        }
    }

    pub fn quantity_too_large(&self, max: u32) -> String {
        format!("Consigo anotar no máximo {max} unidades de cada item.")
    }

    pub fn choose_item(&self, term: &str, candidates: &[ClarificationItem]) -> String {
        let mut text = format!("Encontrei mais de uma opção para \"{term}\". Qual delas?");
        for (index, candidate) in candidates.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", index + 1, candidate.label));
        }
        text
    }

    pub fn choose_customization(
        &self,
        item: &str,
        group: &str,
        options: &[ClarificationOption],
    ) -> String {
        let mut text = format!("Para {item}, escolha {group}:");
        for (index, option) in options.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", index + 1, option.label));
        }
        text
    }

    pub fn choose_line(&self, cart: &Cart, positions: &[usize]) -> String {
        let mut text = "Esse item aparece mais de uma vez. Qual linha?".to_string();
        for position in positions {
            if let Some(line) = cart.line_at(*position) {
                text.push('\n');
                text.push_str(&self.line(*position, line));
            }
        }
        text
    }

    pub fn invalid_choice(&self, max: usize) -> String {
        format!("Escolha um número de 1 a {max}.")
    }

    pub fn ask_again(&self, term: &str) -> String {
        format!("Ainda não anotei \"{term}\". Peça de novo depois de responder a pergunta acima.")
    }

    pub fn finish_hint(&self) -> String {
        "Para finalizar, diga \"finalizar pedido\".".to_string()
    }

    pub fn ask_fulfillment(&self, cart: &Cart) -> String {
        format!("{}\nVai ser entrega ou retirada no local?", self.cart(cart))
    }

    pub fn empty_cart_checkout(&self) -> String {
        "Seu carrinho está vazio. Diga o que deseja pedir primeiro.".to_string()
    }

    pub fn address_prompt(&self, state: &AddressFlowState) -> String {
        match state {
            AddressFlowState::AwaitChoice { saved } => self.saved_addresses(saved),
            AddressFlowState::Searching => {
                "Qual o endereço de entrega? (rua e número)".to_string()
            }
            AddressFlowState::AwaitSelection { candidates } => self.address_candidates(candidates),
            AddressFlowState::AwaitComplement { chosen } => format!(
                "Endereço: {}.\nTem complemento (apto, bloco)? Se não tiver, responda \"sem complemento\".",
                chosen.one_line()
            ),
            AddressFlowState::Resolved { selection } => {
                format!("Entrega em: {}.", selection.address().one_line())
            }
        }
    }

    fn saved_addresses(&self, saved: &[SavedAddress]) -> String {
        let mut text = "Para onde entregamos?".to_string();
        for (index, entry) in saved.iter().enumerate() {
            let label = entry.label.as_deref().map(|label| format!("{label}: ")).unwrap_or_default();
            text.push_str(&format!("\n{}. {label}{}", index + 1, entry.address.one_line()));
        }
        text.push_str(&format!("\n{}. Outro endereço", saved.len() + 1));
        text
    }

    fn address_candidates(&self, candidates: &[AddressCandidate]) -> String {
        let mut text = "Encontrei estes endereços:".to_string();
        for (index, candidate) in candidates.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", index + 1, candidate.address.one_line()));
        }
        text.push_str(&format!("\n{}. Nenhum desses", candidates.len() + 1));
        text
    }

    pub fn address_notice(&self, notice: &AddressNotice) -> String {
        match notice {
            AddressNotice::NoMatches => {
                "Não encontrei esse endereço. Pode mandar rua, número e bairro?".to_string()
            }
            AddressNotice::LookupUnavailable => {
                "Não consegui consultar o endereço agora. Tente novamente em instantes.".to_string()
            }
            AddressNotice::InvalidChoice { max } => self.invalid_choice(*max),
            AddressNotice::NeedAddressText => "Digite o endereço (rua e número).".to_string(),
        }
    }

    pub fn payment_prompt(&self, state: &PaymentFlowState) -> String {
        match state {
            PaymentFlowState::AwaitMethod { total } => {
                let mut text = format!("Total: {}. Como vai pagar?", self.money(*total));
                for (index, method) in PaymentMethod::ALL.iter().enumerate() {
                    text.push_str(&format!("\n{}. {}", index + 1, method.label()));
                }
                text.push_str("\nPode dividir, ex.: \"50 no pix e 20 em dinheiro\".");
                text
            }
            PaymentFlowState::AwaitAllocation { total, methods } => format!(
                "Total: {}. Quanto vai em cada forma ({})?",
                self.money(*total),
                methods.iter().map(PaymentMethod::label).collect::<Vec<_>>().join(", ")
            ),
            PaymentFlowState::Resolved { selection, .. } => self.payment_summary(selection),
        }
    }

    pub fn payment_summary(&self, selection: &PaymentSelection) -> String {
        selection
            .allocations
            .iter()
            .map(|allocation| {
                let mut text = format!("{} {}", allocation.method.label(), self.money(allocation.amount));
                if let Some(change_for) = allocation.change_for {
                    text.push_str(&format!(" (troco para {})", self.money(change_for)));
                }
                text
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }

    pub fn payment_notice(&self, notice: &PaymentNotice) -> String {
        match notice {
            PaymentNotice::InvalidChoice { max } => self.invalid_choice(*max),
            PaymentNotice::AmountsNeeded { methods } => format!(
                "Quanto vai em cada forma? ({})",
                methods.iter().map(PaymentMethod::label).collect::<Vec<_>>().join(", ")
            ),
            PaymentNotice::Shortfall { missing } => format!(
                "Os valores informados somam {} a menos que o total. Pode ajustar?",
                self.money(*missing)
            ),
            PaymentNotice::Excess { extra } => format!(
                "Os valores informados passam {} do total. Pode ajustar?",
                self.money(*extra)
            ),
            PaymentNotice::ChangeBelowAmount { change_for, amount } => format!(
                "O troco para {} é menor que o valor em dinheiro ({}).",
                self.money(*change_for),
                self.money(*amount)
            ),
            PaymentNotice::InvalidAmount => "Os valores precisam ser maiores que zero.".to_string(),
        }
    }

    pub fn confirmation(&self, draft: &OrderDraft) -> String {
        let mut text = "Confira seu pedido:".to_string();
        for (index, line) in draft.lines.iter().enumerate() {
            text.push('\n');
            text.push_str(&self.line(index + 1, line));
        }
        text.push_str(&format!("\nSubtotal: {}", self.money(draft.totals.subtotal)));
        match &draft.address {
            Some(selection) => {
                text.push_str(&format!("\nTaxa de entrega: {}", self.money(draft.totals.delivery_fee)));
                text.push_str(&format!("\nEntrega em: {}", selection.address().one_line()));
            }
            None => text.push_str("\nRetirada no local"),
        }
        text.push_str(&format!("\nTotal: {}", self.money(draft.totals.total)));
        text.push_str(&format!("\nPagamento: {}", self.payment_summary(&draft.payments)));
        text.push_str("\nResponda \"confirmar\" para enviar ou \"mudar pagamento\".");
        text
    }

    pub fn order_sent(&self, order_id: &OrderId, total: Decimal) -> String {
        format!(
            "Pedido {} enviado! Total {}. Obrigado pela preferência.",
            order_id.0,
            self.money(total)
        )
    }

    pub fn order_already_sent(&self, order_id: &OrderId) -> String {
        format!("Seu pedido {} já foi enviado.", order_id.0)
    }

    pub fn checkout_rejected(&self, reason: &str) -> String {
        format!("Não foi possível enviar o pedido: {reason}")
    }

    pub fn collaborator_timeout(&self, collaborator: Collaborator) -> String {
        match collaborator {
            Collaborator::Checkout => {
                "Não consegui enviar o pedido agora. Responda \"confirmar\" para tentar de novo.".to_string()
            }
            Collaborator::Catalog => {
                "Não consegui consultar o cardápio agora. Tente novamente em instantes.".to_string()
            }
            _ => "Tive um problema temporário. Tente novamente em instantes.".to_string(),
        }
    }

    pub fn cancelled(&self) -> String {
        "Pedido cancelado. Quando quiser, é só mandar um oi para começar de novo.".to_string()
    }

    pub fn conversation_over(&self) -> String {
        "Esse atendimento foi encerrado. Envie \"novo pedido\" para começar outro.".to_string()
    }

    pub fn nothing_to_confirm(&self) -> String {
        "Não há nada para confirmar ainda. Diga o que deseja pedir.".to_string()
    }

    pub fn nothing_to_cancel(&self) -> String {
        "Não há pedido em andamento para cancelar.".to_string()
    }

    pub fn not_now(&self) -> String {
        "Não consigo fazer isso nesta etapa. Diga \"carrinho\" para revisar ou \"ajuda\" para ver as opções."
            .to_string()
    }

    pub fn unknown(&self) -> String {
        "Não entendi. Você pode pedir um item (ex.: \"quero 1 x-salada\"), ver o \"cardápio\" ou pedir \"ajuda\"."
            .to_string()
    }

    pub fn resend(&self) -> String {
        "Recebi mensagens ao mesmo tempo e não consegui processar esta. Pode reenviar?".to_string()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use comanda_core::domain::payment::PaymentFlowState;

    use super::ReplyRenderer;
    use crate::payment_flow::PaymentNotice;

    #[test]
    fn money_uses_brazilian_separators() {
        let renderer = ReplyRenderer::default();
        assert_eq!(renderer.money(Decimal::new(6100, 2)), "R$ 61,00");
        assert_eq!(renderer.money(Decimal::new(123450, 2)), "R$ 1.234,50");
        assert_eq!(renderer.money(Decimal::new(5, 1)), "R$ 0,50");
    }

    #[test]
    fn payment_prompt_lists_methods_and_shortfall_names_amount() {
        let renderer = ReplyRenderer::default();
        let prompt =
            renderer.payment_prompt(&PaymentFlowState::AwaitMethod { total: Decimal::new(70, 0) });
        assert!(prompt.contains("Total: R$ 70,00"));
        assert!(prompt.contains("1. Pix"));

        let notice =
            renderer.payment_notice(&PaymentNotice::Shortfall { missing: Decimal::new(1, 0) });
        assert!(notice.contains("R$ 1,00 a menos"));
    }
}
