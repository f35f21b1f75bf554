//! Deterministic classifier for the high-frequency intents.
//!
//! Matching runs on folded text (lowercase, no diacritics). Commitments such
//! as confirm and cancel are only ever produced here, never by the LLM path.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;

use comanda_core::catalog::{fold_text, normalize};
use comanda_core::domain::address::FulfillmentMode;
use comanda_core::domain::payment::PaymentMethod;

use crate::intent::{DialogueSnapshot, Intent, ItemRequest, PaymentMention, RemoveTarget};

const MAX_FULFILLMENT_TOKENS: usize = 6;

pub struct RuleClassifier {
    cancel: Regex,
    restart: Regex,
    help: Regex,
    finish: Regex,
    view_cart: Regex,
    confirm: Regex,
    decline: Regex,
    delivery: Regex,
    pickup: Regex,
    new_address: Regex,
    address_like: Regex,
    number_choice: Regex,
    browse: Regex,
    greeting: Regex,
    remove: Regex,
    position: Regex,
    personalize: Regex,
    add_verb: Regex,
    leading_quantity: Regex,
    payment_method: Regex,
    change_for: Regex,
    no_change: Regex,
    amount: Regex,
    decimal_comma: Regex,
    payment_separator: Regex,
}

impl RuleClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            cancel: Regex::new(
                r"^(?:quero |pode |vou )?(?:cancelar|cancela|cancele|desisto|desistir|desiste)(?: (?:de |do |da )?(?:o |a |meu |minha )?(?:pedido|compra|tudo|isso))?$",
            )?,
            restart: Regex::new(
                r"\b(?:novo pedido|outro pedido|recomecar|recomeca|comecar de novo|do zero)\b",
            )?,
            help: Regex::new(r"^(?:ajuda|help|socorro|como funciona|o que voce faz|comandos)\b")?,
            finish: Regex::new(
                r"\b(?:fechar|finalizar|finaliza|fecha|concluir|conclui|encerrar)(?: o| a| meu| minha)? (?:pedido|compra|conta)\b|^(?:so isso|e so|e so isso|pode fechar|finalizar|fechar|acabou|terminei)$",
            )?,
            view_cart: Regex::new(
                r"\b(?:carrinho|meu pedido|ver pedido|ver o pedido|resumo|o que eu pedi|como esta o pedido)\b",
            )?,
            confirm: Regex::new(
                r"^(?:sim|s|ok|okay|isso|isso mesmo|correto|certo|beleza|fechado|pode ser)$|^(?:sim |ok )?(?:confirmo|confirmar|confirma|confirmado|pode mandar|pode enviar|manda)(?: (?:o )?pedido)?$",
            )?,
            decline: Regex::new(
                r"^(?:nao|n|errado|negativo|nao quero|nao obrigado|ainda nao)$|\b(?:mudar|trocar|alterar) (?:o |a )?(?:forma de )?pagamento\b",
            )?,
            delivery: Regex::new(r"\b(?:entrega|entregar|entregue|delivery|em casa)\b")?,
            pickup: Regex::new(
                r"\b(?:retirada|retiro|retirar no local|retirar na loja|buscar|busco|balcao|pra viagem|para viagem|vou ai|passo ai)\b|^retirar$",
            )?,
            new_address: Regex::new(
                r"\b(?:novo endereco|outro endereco|endereco novo|endereco diferente|(?:mudar|trocar) (?:o )?endereco)\b",
            )?,
            address_like: Regex::new(
                r"^(?:rua|r|av|avenida|alameda|al|travessa|tv|rodovia|estrada|praca)\b",
            )?,
            number_choice: Regex::new(r"^(?:opcao |numero |o |a |item )?(\d{1,2})$")?,
            browse: Regex::new(
                r"\b(?:cardapio|menu|opcoes|o que (?:voces )?tem|quais (?:sao )?(?:os |as )?(?:produtos|lanches|itens|bebidas))\b(?: (?:de|do|da|dos|das) (.+))?",
            )?,
            greeting: Regex::new(
                r"^(?:oi+|ola|bom dia|boa tarde|boa noite|e ai|eai|opa|hello|hi|hey|salve)\b[\s,!.]*(.*)$",
            )?,
            remove: Regex::new(
                r"^(?:pode )?(?:tira|tirar|tire|retira|retire|remove|remover|remova|exclui|excluir|exclua|apaga|apagar|apague|cancela|cancelar|cancele)\b ?(.*)$",
            )?,
            position: Regex::new(r"^(?:o |a )?(?:item |linha |numero )?(\d{1,2})$")?,
            personalize: Regex::new(
                r"^(?:adiciona|adicione|acrescenta|acrescente|coloca|coloque|poe|ponha|bota|bote|quero)? ?(.+?) (?:no|na|ao|pro|pra|para o|para a) (?:item|linha|lanche|numero) ?(\d{1,2})$",
            )?,
            add_verb: Regex::new(
                r"^\s*(?:eu\s+)?(?:quero|queria|gostaria de|gostaria|vou querer|vou de|me ve|me da|me manda|manda|mande|adiciona|adicione|adicionar|acrescenta|acrescente|coloca|coloque|inclui|incluir|inclua|pede|pedir|traz|traga|mais|tambem)\b[\s,:]*(.*)$",
            )?,
            leading_quantity: Regex::new(
                r"^\s*(?:\d{1,3}x?|um|uma|dois|duas|tres|quatro|cinco|seis|sete|oito|nove|dez)\s+\S",
            )?,
            payment_method: Regex::new(
                r"\b(pix|dinheiro|especie|cash|cartao de credito|cartao de debito|credito|debito|cartao|vale[- ]refeicao|vale[- ]alimentacao|vr|ticket)\b",
            )?,
            change_for: Regex::new(
                r"troco\s*(?:pra|para|de|p/)?\s*(?:r\$\s*)?(\d+(?:\.\d{1,2})?)",
            )?,
            no_change: Regex::new(r"\b(?:sem troco|nao precisa de troco|nao preciso de troco)\b")?,
            amount: Regex::new(r"(?:r\$\s*)?(\d+(?:\.\d{1,2})?)")?,
            decimal_comma: Regex::new(r"(\d),(\d)")?,
            payment_separator: Regex::new(r"\s*(?:,|;|\+|\be\b|\bmais\b)\s*")?,
        })
    }

    /// Returns `None` when no rule is confident; the caller may then ask the LLM.
    pub fn classify(&self, raw: &str, snapshot: &DialogueSnapshot) -> Option<Intent> {
        let folded = fold_text(raw.trim());
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Some(Intent::Unknown);
        }

        if self.cancel.is_match(&normalized) {
            return Some(Intent::Cancel);
        }
        if self.restart.is_match(&normalized) {
            return Some(Intent::Restart);
        }
        if self.help.is_match(&normalized) {
            return Some(Intent::Help);
        }

        if snapshot.expects_address_text() {
            if self.new_address.is_match(&normalized) {
                return Some(Intent::NewAddress);
            }
            if self.view_cart.is_match(&normalized) {
                return Some(Intent::ViewCart);
            }
            return Some(Intent::AddressText(raw.trim().to_string()));
        }

        if snapshot.expects_choice() {
            if let Some(choice) = self.number_choice(&normalized) {
                return Some(Intent::SelectOption(choice));
            }
        }

        if self.finish.is_match(&normalized) {
            return Some(Intent::FinishOrder);
        }
        if self.view_cart.is_match(&normalized) {
            return Some(Intent::ViewCart);
        }
        if self.new_address.is_match(&normalized) {
            return Some(Intent::NewAddress);
        }
        if self.confirm.is_match(&normalized) {
            return Some(Intent::Confirm);
        }
        if let Some(mentions) = self.payment_mentions(&folded) {
            return Some(Intent::SelectPayment { mentions });
        }
        if self.decline.is_match(&normalized) {
            return Some(Intent::Decline);
        }
        if let Some(mode) = self.fulfillment(&normalized) {
            return Some(Intent::ChooseFulfillment(mode));
        }
        if snapshot.address_step.is_some() && self.address_like.is_match(&normalized) {
            return Some(Intent::AddressText(raw.trim().to_string()));
        }

        self.classify_cart_phrase(&folded, &normalized)
    }

    /// Personalize, remove, browse, greeting and add, in that order.
    fn classify_cart_phrase(&self, folded: &str, normalized: &str) -> Option<Intent> {
        if let Some(intent) = self.personalize(normalized) {
            return Some(intent);
        }
        if let Some(intent) = self.remove(normalized) {
            return Some(intent);
        }
        if let Some(captures) = self.browse.captures(normalized) {
            let filter = captures
                .get(1)
                .map(|filter| filter.as_str().trim().to_string())
                .filter(|filter| !filter.is_empty());
            return Some(Intent::Browse { filter });
        }
        if let Some(captures) = self.greeting.captures(folded) {
            let remainder = captures.get(1).map(|rest| rest.as_str().trim()).unwrap_or_default();
            let remainder_normalized = normalize(remainder);
            if remainder_normalized.is_empty() || is_courtesy(&remainder_normalized) {
                return Some(Intent::Greeting);
            }
            return self
                .classify_cart_phrase(remainder, &remainder_normalized)
                .or(Some(Intent::Greeting));
        }
        self.add_items(folded)
    }

    pub fn number_choice(&self, normalized: &str) -> Option<usize> {
        self.number_choice
            .captures(normalized)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<usize>().ok())
            .filter(|value| *value > 0)
    }

    fn fulfillment(&self, normalized: &str) -> Option<FulfillmentMode> {
        if normalized.split_whitespace().count() > MAX_FULFILLMENT_TOKENS {
            return None;
        }
        if self.pickup.is_match(normalized) {
            return Some(FulfillmentMode::Pickup);
        }
        if self.delivery.is_match(normalized) {
            return Some(FulfillmentMode::Delivery);
        }
        None
    }

    fn personalize(&self, normalized: &str) -> Option<Intent> {
        let captures = self.personalize.captures(normalized)?;
        let position = captures.get(2)?.as_str().parse::<usize>().ok()?;
        let phrase = captures.get(1)?.as_str();

        let mut modifiers = Vec::new();
        let mut observations = Vec::new();
        for part in phrase.split(" e ").map(str::trim).filter(|part| !part.is_empty()) {
            if let Some(without) = part.strip_prefix("sem ") {
                observations.push(format!("sem {}", without.trim()));
            } else {
                let modifier = part.strip_prefix("com ").unwrap_or(part).trim();
                let modifier = strip_article(modifier);
                if !modifier.is_empty() {
                    modifiers.push(modifier.to_string());
                }
            }
        }
        if modifiers.is_empty() && observations.is_empty() {
            return None;
        }

        let observation = (!observations.is_empty()).then(|| observations.join(", "));
        Some(Intent::Personalize { position, modifiers, observation })
    }

    fn remove(&self, normalized: &str) -> Option<Intent> {
        let captures = self.remove.captures(normalized)?;
        let rest = captures.get(1).map(|rest| rest.as_str().trim()).unwrap_or_default();
        if rest.is_empty() {
            return None;
        }

        if let Some(position) = self
            .position
            .captures(rest)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<usize>().ok())
        {
            return Some(Intent::RemoveItem {
                target: RemoveTarget::Position(position),
                quantity: None,
            });
        }

        let mut words = rest.split_whitespace().peekable();
        let mut quantity = None;
        if let Some(first) = words.peek() {
            if let Some(value) = parse_quantity(first) {
                quantity = Some(value);
                words.next();
            } else if matches!(*first, "o" | "a" | "os" | "as") {
                words.next();
            }
        }
        let term = words.collect::<Vec<_>>().join(" ");
        let term = term.strip_prefix("de ").unwrap_or(&term).trim().to_string();
        if term.is_empty() {
            return None;
        }
        // "tira um x-burguer" removes one unit; a bare article removes the line
        let quantity = quantity.filter(|_| !rest.starts_with("o ") && !rest.starts_with("a "));
        Some(Intent::RemoveItem { target: RemoveTarget::Term(term), quantity })
    }

    fn add_items(&self, folded: &str) -> Option<Intent> {
        let body = match self.add_verb.captures(folded) {
            Some(captures) => captures.get(1).map(|rest| rest.as_str()).unwrap_or_default(),
            None if self.leading_quantity.is_match(folded) => folded,
            None => return None,
        };
        // "manda ver" is an idiom; only "manda 2 ..." orders something
        let loose_verb = matches!(folded.split_whitespace().next(), Some("manda" | "mande"));
        if loose_verb && !self.leading_quantity.is_match(body) {
            return None;
        }

        let items = parse_item_list(body);
        if items.is_empty() {
            return None;
        }
        Some(Intent::AddItems { items })
    }

    /// Payment methods with optional amounts and cash change, or `None` when
    /// the text names no method and asks for no change.
    pub fn payment_mentions(&self, folded: &str) -> Option<Vec<PaymentMention>> {
        let text = self.decimal_comma.replace_all(folded, "$1.$2").to_string();

        let mut change_for = None;
        let without_change = match self.change_for.captures(&text) {
            Some(captures) => {
                change_for =
                    captures.get(1).and_then(|value| Decimal::from_str(value.as_str()).ok());
                let span = captures.get(0).map(|whole| whole.range()).unwrap_or(0..0);
                format!("{} {}", &text[..span.start], &text[span.end..])
            }
            None => text.clone(),
        };
        let without_change = self.no_change.replace_all(&without_change, " ").to_string();

        let mut mentions: Vec<PaymentMention> = Vec::new();
        let mut orphan_amount: Option<Decimal> = None;
        for segment in self.payment_separator.split(&without_change) {
            let method = self
                .payment_method
                .captures(segment)
                .and_then(|captures| captures.get(1))
                .and_then(|value| method_from_word(value.as_str()));
            let amount = self
                .amount
                .captures(segment)
                .and_then(|captures| captures.get(1))
                .and_then(|value| Decimal::from_str(value.as_str()).ok());

            match (method, amount) {
                (Some(method), amount) => {
                    let amount = amount.or_else(|| orphan_amount.take());
                    mentions.push(PaymentMention { method, amount, change_for: None });
                }
                (None, Some(amount)) => match mentions.last_mut() {
                    Some(last) if last.amount.is_none() => last.amount = Some(amount),
                    _ => orphan_amount = Some(amount),
                },
                (None, None) => {}
            }
        }

        if let Some(change) = change_for {
            let no_mentions = mentions.is_empty();
            match mentions.iter_mut().find(|mention| mention.method == PaymentMethod::Cash) {
                Some(cash) => cash.change_for = Some(change),
                None if no_mentions => mentions.push(PaymentMention {
                    method: PaymentMethod::Cash,
                    amount: None,
                    change_for: Some(change),
                }),
                None => {}
            }
        }

        (!mentions.is_empty()).then_some(mentions)
    }
}

/// Splits an order phrase into item requests.
///
/// Pieces break on commas and on "e"/"mais"/"+" when the next word is a
/// quantity; a comma inside a "com ..." list separates modifiers instead.
pub fn parse_item_list(body: &str) -> Vec<ItemRequest> {
    let cleaned = body
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .replace("por favor", " ")
        .replace(',', " , ");
    let words = cleaned
        .split_whitespace()
        .filter(|word| !matches!(*word, "pfv" | "pf" | "pls"))
        .collect::<Vec<_>>();

    let mut pieces: Vec<Vec<&str>> = vec![Vec::new()];
    for (index, word) in words.iter().enumerate() {
        let next_is_quantity =
            words.get(index + 1).is_some_and(|next| parse_quantity(next).is_some());
        let current = pieces.last().map(Vec::as_slice).unwrap_or_default();
        let in_modifier_list = current.contains(&"com") || current.contains(&"sem");
        let boundary = !current.is_empty()
            && match *word {
                "," | "e" | "mais" | "+" => next_is_quantity || !in_modifier_list,
                _ => false,
            };
        if boundary {
            pieces.push(Vec::new());
            continue;
        }
        if let Some(piece) = pieces.last_mut() {
            piece.push(word);
        }
    }

    pieces.iter().filter_map(|piece| parse_item_piece(piece)).collect()
}

/// Parses "2 x-burguer com bacon e cheddar sem cebola".
pub fn parse_item_piece(words: &[&str]) -> Option<ItemRequest> {
    let mut words = words
        .iter()
        .copied()
        .skip_while(|word| matches!(*word, "," | "mais" | "tambem"))
        .peekable();
    let mut quantity = 1;
    if let Some(first) = words.peek() {
        if let Some(value) = parse_quantity(first) {
            quantity = value;
            words.next();
            if words.peek().is_some_and(|word| matches!(*word, "de" | "unidades" | "un")) {
                words.next();
            }
        } else if matches!(*first, "o" | "a" | "os" | "as") {
            words.next();
        }
    }

    #[derive(PartialEq)]
    enum Section {
        Term,
        With,
        Without,
    }

    let mut section = Section::Term;
    let mut term = Vec::new();
    let mut modifiers = Vec::new();
    let mut current_modifier = Vec::new();
    let mut observations = Vec::new();
    let mut current_observation = Vec::new();

    for word in words {
        match word {
            "com" => {
                flush(&mut current_modifier, &mut modifiers);
                flush_observation(&mut current_observation, &mut observations);
                section = Section::With;
            }
            "sem" => {
                flush(&mut current_modifier, &mut modifiers);
                flush_observation(&mut current_observation, &mut observations);
                section = Section::Without;
            }
            "e" | "," | "+" if section == Section::With => flush(&mut current_modifier, &mut modifiers),
            "e" | "," if section == Section::Without => {
                flush_observation(&mut current_observation, &mut observations)
            }
            "," => {}
            _ => match section {
                Section::Term => term.push(word),
                Section::With => current_modifier.push(word),
                Section::Without => current_observation.push(word),
            },
        }
    }
    flush(&mut current_modifier, &mut modifiers);
    flush_observation(&mut current_observation, &mut observations);

    let term = term.join(" ").trim_matches(|c: char| c == ',' || c.is_whitespace()).to_string();
    if term.is_empty() {
        return None;
    }
    let observation = (!observations.is_empty()).then(|| observations.join(", "));
    Some(ItemRequest { term, quantity, modifiers, observation })
}

fn flush(current: &mut Vec<&str>, into: &mut Vec<String>) {
    let phrase = strip_article(&current.join(" ")).to_string();
    if !phrase.is_empty() {
        into.push(phrase);
    }
    current.clear();
}

fn flush_observation(current: &mut Vec<&str>, into: &mut Vec<String>) {
    let phrase = current.join(" ");
    if !phrase.trim().is_empty() {
        into.push(format!("sem {}", phrase.trim()));
    }
    current.clear();
}

fn strip_article(text: &str) -> &str {
    let text = text.trim();
    for article in ["o ", "a ", "os ", "as ", "um ", "uma ", "mais "] {
        if let Some(rest) = text.strip_prefix(article) {
            return rest.trim();
        }
    }
    text
}

/// "2", "2x", "dois", "uma".
pub fn parse_quantity(word: &str) -> Option<u32> {
    let word = word.trim();
    let digits = word.strip_suffix('x').unwrap_or(word);
    if !digits.is_empty() && digits.len() <= 3 && digits.chars().all(|c| c.is_ascii_digit()) {
        return digits.parse::<u32>().ok().filter(|value| *value > 0);
    }
    match word {
        "um" | "uma" => Some(1),
        "dois" | "duas" => Some(2),
        "tres" => Some(3),
        "quatro" => Some(4),
        "cinco" => Some(5),
        "seis" => Some(6),
        "sete" => Some(7),
        "oito" => Some(8),
        "nove" => Some(9),
        "dez" => Some(10),
        _ => None,
    }
}

fn method_from_word(word: &str) -> Option<PaymentMethod> {
    match word {
        "pix" => Some(PaymentMethod::Pix),
        "dinheiro" | "especie" | "cash" => Some(PaymentMethod::Cash),
        "cartao de credito" | "credito" | "cartao" => Some(PaymentMethod::CreditCard),
        "cartao de debito" | "debito" => Some(PaymentMethod::DebitCard),
        "vr" | "ticket" => Some(PaymentMethod::MealVoucher),
        other if other.starts_with("vale") => Some(PaymentMethod::MealVoucher),
        _ => None,
    }
}

fn is_courtesy(normalized: &str) -> bool {
    matches!(
        normalized,
        "tudo bem" | "tudo bom" | "tudo bem com voce" | "como vai" | "boa" | "bom" | "td bem"
    )
}
