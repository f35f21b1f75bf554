use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::normalize::{compact, normalize, tokens, typo_distance};
use crate::domain::catalog::{CatalogItem, CustomizationGroup, CustomizationOption};

pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.08;
pub const DEFAULT_MIN_SCORE: f64 = 0.6;
const MAX_PROMOTION_BONUS: f64 = 0.1;

/// Term -> canonical term table, both sides normalized on insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynonymTable {
    entries: BTreeMap<String, String>,
}

impl SynonymTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut table = Self::new();
        for (term, canonical) in pairs {
            table.insert(term.as_ref(), canonical.as_ref());
        }
        table
    }

    pub fn insert(&mut self, term: &str, canonical: &str) {
        let term = normalize(term);
        let canonical = normalize(canonical);
        if !term.is_empty() && !canonical.is_empty() {
            self.entries.insert(term, canonical);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites a normalized term, first as a whole, then token by token.
    pub fn expand(&self, normalized: &str) -> Option<String> {
        if let Some(canonical) = self.entries.get(normalized) {
            return Some(canonical.clone());
        }
        let mut changed = false;
        let rewritten = tokens(normalized)
            .into_iter()
            .map(|token| match self.entries.get(token) {
                Some(canonical) => {
                    changed = true;
                    canonical.as_str()
                }
                None => token,
            })
            .collect::<Vec<_>>()
            .join(" ");
        changed.then_some(rewritten)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub item: CatalogItem,
    pub score: f64,
    /// The term equals the item name or one of its aliases after normalization.
    pub exact: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    Matched { candidate: ScoredCandidate },
    Ambiguous { term: String, candidates: Vec<ScoredCandidate> },
    NotFound { term: String },
}

impl Resolution {
    pub fn matched(&self) -> Option<&CatalogItem> {
        match self {
            Self::Matched { candidate } => Some(&candidate.item),
            _ => None,
        }
    }
}

/// Ranks catalog entries against free text.
#[derive(Clone, Debug)]
pub struct CatalogResolver {
    synonyms: SynonymTable,
    ambiguity_margin: f64,
    min_score: f64,
    max_candidates: usize,
}

impl Default for CatalogResolver {
    fn default() -> Self {
        Self::new(SynonymTable::default())
    }
}

impl CatalogResolver {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self {
            synonyms,
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            min_score: DEFAULT_MIN_SCORE,
            max_candidates: 5,
        }
    }

    pub fn with_ambiguity_margin(mut self, margin: f64) -> Self {
        self.ambiguity_margin = margin.max(0.0);
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(2);
        self
    }

    pub fn synonyms(&self) -> &SynonymTable {
        &self.synonyms
    }

    /// Candidates above the minimum score, best first.
    pub fn rank(&self, term: &str, items: &[CatalogItem]) -> Vec<ScoredCandidate> {
        let queries = self.queries(term);
        if queries.is_empty() {
            return Vec::new();
        }

        let mut ranked = items
            .iter()
            .filter(|item| item.active)
            .filter_map(|item| {
                let (relevance, exact) = queries
                    .iter()
                    .map(|query| score_names(query, &item.name, &item.aliases))
                    .fold((0.0_f64, false), |(best, exact), (score, is_exact)| {
                        (best.max(score), exact || is_exact)
                    });
                if relevance < self.min_score {
                    return None;
                }
                Some(ScoredCandidate {
                    item: item.clone(),
                    score: relevance + promotion_bonus(item.promotion_weight),
                    exact,
                })
            })
            .collect::<Vec<_>>();

        ranked.sort_by(compare_candidates);
        ranked
    }

    pub fn resolve(&self, term: &str, items: &[CatalogItem]) -> Resolution {
        let normalized = normalize(term);
        let mut ranked = self.rank(term, items);
        if ranked.is_empty() {
            return Resolution::NotFound { term: normalized };
        }

        let exact_count = ranked.iter().filter(|candidate| candidate.exact).count();
        if exact_count == 1 {
            if let Some(index) = ranked.iter().position(|candidate| candidate.exact) {
                return Resolution::Matched { candidate: ranked.swap_remove(index) };
            }
        }

        let top_score = ranked[0].score;
        let close = ranked
            .iter()
            .take_while(|candidate| top_score - candidate.score < self.ambiguity_margin)
            .count();
        if close > 1 && exact_count != 1 {
            ranked.truncate(close.min(self.max_candidates));
            return Resolution::Ambiguous { term: normalized, candidates: ranked };
        }

        Resolution::Matched { candidate: ranked.swap_remove(0) }
    }

    /// Finds the customization option a modifier phrase refers to.
    pub fn resolve_option<'a>(
        &self,
        term: &str,
        item: &'a CatalogItem,
    ) -> Option<(&'a CustomizationGroup, &'a CustomizationOption)> {
        let queries = self.queries(term);
        let mut best: Option<(f64, &CustomizationGroup, &CustomizationOption)> = None;
        for group in &item.customization_groups {
            for option in &group.options {
                let score = queries
                    .iter()
                    .map(|query| score_names(query, &option.name, &option.aliases).0)
                    .fold(0.0_f64, f64::max);
                if score < self.min_score {
                    continue;
                }
                if best.map_or(true, |(current, _, _)| score > current) {
                    best = Some((score, group, option));
                }
            }
        }
        best.map(|(_, group, option)| (group, option))
    }

    fn queries(&self, term: &str) -> Vec<String> {
        let normalized = normalize(term);
        if normalized.is_empty() {
            return Vec::new();
        }
        let mut queries = vec![normalized.clone()];
        if let Some(expanded) = self.synonyms.expand(&normalized) {
            if expanded != normalized {
                queries.push(expanded);
            }
        }
        queries
    }
}

fn compare_candidates(left: &ScoredCandidate, right: &ScoredCandidate) -> Ordering {
    right
        .score
        .partial_cmp(&left.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| right.exact.cmp(&left.exact))
        .then_with(|| right.item.promotion_weight.cmp(&left.item.promotion_weight))
        .then_with(|| left.item.name.cmp(&right.item.name))
}

fn promotion_bonus(weight: u8) -> f64 {
    (f64::from(weight) / 1000.0).min(MAX_PROMOTION_BONUS)
}

fn score_names(query: &str, name: &str, aliases: &[String]) -> (f64, bool) {
    std::iter::once(name)
        .chain(aliases.iter().map(String::as_str))
        .map(|candidate| score_text(query, &normalize(candidate)))
        .fold((0.0, false), |(best, exact), (score, is_exact)| {
            (best.max(score), exact || is_exact)
        })
}

/// Relevance in `[0, 1]` of a normalized query against a normalized name.
fn score_text(query: &str, name: &str) -> (f64, bool) {
    if name.is_empty() {
        return (0.0, false);
    }
    if query == name || compact(query) == compact(name) {
        return (1.0, true);
    }

    let query_tokens = tokens(query);
    let name_tokens = tokens(name);
    let mut matched_name_tokens = vec![false; name_tokens.len()];
    let mut token_total = 0.0;
    for query_token in &query_tokens {
        let mut best = 0.0_f64;
        let mut best_index = None;
        for (index, name_token) in name_tokens.iter().enumerate() {
            let score = token_score(query_token, name_token);
            if score > best {
                best = score;
                best_index = Some(index);
            }
        }
        if let Some(index) = best_index {
            matched_name_tokens[index] = true;
        }
        token_total += best;
    }

    let query_coverage = token_total / query_tokens.len() as f64;
    let name_coverage = matched_name_tokens.iter().filter(|matched| **matched).count() as f64
        / name_tokens.len() as f64;
    let token_based = if query_coverage < 0.5 {
        0.0
    } else {
        0.7 * query_coverage + 0.3 * name_coverage
    };

    let whole = typo_distance(&compact(query), &compact(name))
        .map(|distance| 0.95 - 0.05 * distance as f64)
        .unwrap_or(0.0);

    (token_based.max(whole), false)
}

fn token_score(query: &str, name: &str) -> f64 {
    if query == name {
        return 1.0;
    }
    if query.chars().count() >= 3 && name.starts_with(query) {
        return 0.85;
    }
    match typo_distance(query, name) {
        Some(distance) => 1.0 - 0.15 * distance as f64,
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CatalogResolver, Resolution, SynonymTable};
    use crate::domain::catalog::{
        CatalogItem, CustomizationGroup, CustomizationOption, ItemRef,
    };

    fn item(id: &str, name: &str, aliases: &[&str], promotion_weight: u8) -> CatalogItem {
        CatalogItem {
            item_ref: ItemRef::Product(id.to_owned()),
            name: name.to_owned(),
            aliases: aliases.iter().map(|alias| (*alias).to_owned()).collect(),
            category: None,
            description: None,
            price: Decimal::new(1000, 2),
            active: true,
            available: true,
            promotion_weight,
            customization_groups: Vec::new(),
        }
    }

    fn menu() -> Vec<CatalogItem> {
        vec![
            item("x-burguer", "X-Burguer", &["xis burguer"], 0),
            item("x-bacon", "X-Bacon", &[], 0),
            item("x-salada", "X-Salada", &[], 0),
            item("coca-lata", "Coca-Cola Lata 350ml", &[], 0),
            item("coca-2l", "Coca-Cola 2L", &[], 0),
            item("guarana", "Guaraná Antarctica Lata", &["guarana"], 0),
        ]
    }

    #[test]
    fn exact_name_matches_directly() {
        let resolver = CatalogResolver::default();
        let resolution = resolver.resolve("x-burguer", &menu());
        assert_eq!(resolution.matched().map(|item| item.name.as_str()), Some("X-Burguer"));
    }

    #[test]
    fn typos_and_missing_accents_still_match() {
        let resolver = CatalogResolver::default();
        assert_eq!(
            resolver.resolve("x burger", &menu()).matched().map(|item| item.name.as_str()),
            Some("X-Burguer")
        );
        assert_eq!(
            resolver.resolve("GUARANA", &menu()).matched().map(|item| item.name.as_str()),
            Some("Guaraná Antarctica Lata")
        );
    }

    #[test]
    fn close_candidates_are_ambiguous() {
        let resolver = CatalogResolver::default();
        match resolver.resolve("coca", &menu()) {
            Resolution::Ambiguous { term, candidates } => {
                assert_eq!(term, "coca");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn promotion_weight_breaks_near_ties_in_ranking() {
        let mut items = menu();
        items[4].promotion_weight = 100;
        let ranked = CatalogResolver::default().rank("coca", &items);
        assert_eq!(ranked[0].item.name, "Coca-Cola 2L");
    }

    #[test]
    fn synonyms_expand_before_matching() {
        let resolver = CatalogResolver::new(SynonymTable::from_pairs([("refri", "coca cola 2l")]));
        assert_eq!(
            resolver.resolve("refri", &menu()).matched().map(|item| item.name.as_str()),
            Some("Coca-Cola 2L")
        );
    }

    #[test]
    fn unknown_terms_are_not_found() {
        let resolver = CatalogResolver::default();
        assert!(matches!(resolver.resolve("pizza", &menu()), Resolution::NotFound { .. }));
        assert!(matches!(resolver.resolve("   ", &menu()), Resolution::NotFound { .. }));
    }

    #[test]
    fn inactive_items_are_never_candidates() {
        let mut items = menu();
        items[0].active = false;
        let ranked = CatalogResolver::default().rank("x-burguer", &items);
        assert!(ranked.iter().all(|candidate| candidate.item.name != "X-Burguer"));
    }

    #[test]
    fn modifier_resolves_to_customization_option() {
        let mut burger = item("x-burguer", "X-Burguer", &[], 0);
        burger.customization_groups.push(CustomizationGroup {
            id: "extras".to_owned(),
            name: "Adicionais".to_owned(),
            required: false,
            min_select: 0,
            max_select: 3,
            options: vec![
                CustomizationOption {
                    id: "bacon".to_owned(),
                    name: "Bacon".to_owned(),
                    aliases: Vec::new(),
                    price_delta: Decimal::new(400, 2),
                    available: true,
                },
                CustomizationOption {
                    id: "cheddar".to_owned(),
                    name: "Cheddar".to_owned(),
                    aliases: vec!["queijo cheddar".to_owned()],
                    price_delta: Decimal::new(300, 2),
                    available: true,
                },
            ],
        });

        let resolver = CatalogResolver::default();
        let (group, option) = resolver.resolve_option("bacon", &burger).expect("bacon");
        assert_eq!((group.id.as_str(), option.id.as_str()), ("extras", "bacon"));
        assert!(resolver.resolve_option("picles", &burger).is_none());
    }
}
