//! Deterministic demo data for the local chat session and for tests.
//!
//! The catalog is owned by an external system in production; these fixtures
//! stand in for it so the dialogue can be exercised end to end offline.

use rust_decimal::Decimal;

use comanda_core::domain::address::{Address, AddressCandidate, Coordinates, SavedAddress};
use comanda_core::domain::catalog::{
    CatalogItem, CustomizationGroup, CustomizationOption, ItemRef,
};

pub struct DemoDataset;

impl DemoDataset {
    pub fn catalog() -> Vec<CatalogItem> {
        demo_catalog()
    }

    pub fn synonyms() -> Vec<(String, String)> {
        demo_synonyms()
    }

    pub fn gazetteer() -> Vec<AddressCandidate> {
        demo_gazetteer()
    }

    /// Checks the catalog against the rules the cart relies on.
    pub fn verify() -> VerificationResult {
        let catalog = demo_catalog();
        let mut checks = Vec::new();

        let mut refs = catalog.iter().map(|item| item.item_ref.clone()).collect::<Vec<_>>();
        refs.sort();
        refs.dedup();
        checks.push(("unique-item-refs", refs.len() == catalog.len()));
        checks.push((
            "non-negative-prices",
            catalog.iter().all(|item| item.price >= Decimal::ZERO),
        ));
        checks.push((
            "group-bounds",
            catalog.iter().flat_map(|item| &item.customization_groups).all(|group| {
                group.effective_min() <= group.max_select
                    && group.max_select as usize <= group.options.len().max(1)
            }),
        ));
        checks.push(("has-inactive-item", catalog.iter().any(|item| !item.active)));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        VerificationResult { all_present, checks }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

pub fn demo_catalog() -> Vec<CatalogItem> {
    vec![
        burger(
            "x-burguer",
            "X-Burguer",
            &["xis burguer", "x burger"],
            money(2250),
            0,
        ),
        burger("x-salada", "X-Salada", &["xis salada"], money(2400), 0),
        burger("x-bacon", "X-Bacon", &["xis bacon"], money(2700), 10),
        CatalogItem {
            item_ref: ItemRef::Recipe("batata-frita".to_string()),
            name: "Batata Frita".to_string(),
            aliases: vec!["fritas".to_string(), "batata".to_string()],
            category: Some("Porções".to_string()),
            description: Some("Porção de batata frita crocante".to_string()),
            price: money(1400),
            active: true,
            available: true,
            promotion_weight: 0,
            customization_groups: vec![CustomizationGroup {
                id: "tamanho".to_string(),
                name: "Tamanho".to_string(),
                required: true,
                min_select: 1,
                max_select: 1,
                options: vec![
                    option("pequena", "Pequena", &["p"], 0),
                    option("media", "Média", &["m"], 400),
                    option("grande", "Grande", &["g"], 800),
                ],
            }],
        },
        drink("coca-lata", "Coca-Cola Lata 350ml", &["coca lata"], money(600)),
        drink("coca-2l", "Coca-Cola 2L", &["coca dois litros"], money(1400)),
        drink("guarana-lata", "Guaraná Antarctica Lata 350ml", &["guarana lata"], money(550)),
        drink("suco-laranja", "Suco de Laranja 500ml", &["suco"], money(900)),
        CatalogItem {
            item_ref: ItemRef::Combo("combo-burguer".to_string()),
            name: "Combo X-Burguer".to_string(),
            aliases: vec!["combo".to_string()],
            category: Some("Combos".to_string()),
            description: Some("X-Burguer, batata frita pequena e refrigerante lata".to_string()),
            price: money(3490),
            active: true,
            available: true,
            promotion_weight: 50,
            customization_groups: vec![CustomizationGroup {
                id: "bebida".to_string(),
                name: "Bebida do combo".to_string(),
                required: true,
                min_select: 1,
                max_select: 1,
                options: vec![
                    option("combo-coca", "Coca-Cola Lata", &["coca"], 0),
                    option("combo-guarana", "Guaraná Lata", &["guarana"], 0),
                ],
            }],
        },
        CatalogItem {
            item_ref: ItemRef::Product("x-tudo".to_string()),
            name: "X-Tudo".to_string(),
            aliases: Vec::new(),
            category: Some("Lanches".to_string()),
            description: Some("Fora do cardápio".to_string()),
            price: money(3200),
            active: false,
            available: false,
            promotion_weight: 0,
            customization_groups: Vec::new(),
        },
        CatalogItem {
            item_ref: ItemRef::Product("milkshake".to_string()),
            name: "Milkshake de Chocolate".to_string(),
            aliases: vec!["milk shake".to_string()],
            category: Some("Sobremesas".to_string()),
            description: None,
            price: money(1600),
            active: true,
            available: false,
            promotion_weight: 0,
            customization_groups: Vec::new(),
        },
    ]
}

pub fn demo_synonyms() -> Vec<(String, String)> {
    [("refri", "coca cola lata 350ml"), ("hamburguer", "x burguer"), ("lanche", "x burguer")]
        .into_iter()
        .map(|(term, canonical)| (term.to_string(), canonical.to_string()))
        .collect()
}

pub fn demo_gazetteer() -> Vec<AddressCandidate> {
    vec![
        candidate("Rua das Flores", "120", "Centro", -25.4297, -49.2711, 0.95),
        candidate("Rua das Flores", "450", "Centro", -25.4301, -49.2730, 0.9),
        candidate("Avenida Sete de Setembro", "2775", "Rebouças", -25.4416, -49.2764, 0.92),
        candidate("Rua XV de Novembro", "1000", "Centro", -25.4284, -49.2672, 0.88),
    ]
}

pub fn demo_saved_address() -> SavedAddress {
    SavedAddress {
        id: "addr-home".to_string(),
        label: Some("Casa".to_string()),
        address: Address {
            street: "Rua Padre Anchieta".to_string(),
            number: Some("1500".to_string()),
            complement: Some("apto 71".to_string()),
            neighborhood: Some("Bigorrilho".to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("PR".to_string()),
            postal_code: Some("80730-000".to_string()),
            coordinates: Some(Coordinates { latitude: -25.4320, longitude: -49.2890 }),
        },
    }
}

fn burger(
    id: &str,
    name: &str,
    aliases: &[&str],
    price: Decimal,
    promotion_weight: u8,
) -> CatalogItem {
    CatalogItem {
        item_ref: ItemRef::Product(id.to_string()),
        name: name.to_string(),
        aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
        category: Some("Lanches".to_string()),
        description: None,
        price,
        active: true,
        available: true,
        promotion_weight,
        customization_groups: vec![CustomizationGroup {
            id: "adicionais".to_string(),
            name: "Adicionais".to_string(),
            required: false,
            min_select: 0,
            max_select: 3,
            options: vec![
                option("bacon", "Bacon", &[], 450),
                option("cheddar", "Cheddar", &["queijo cheddar"], 350),
                option("ovo", "Ovo", &[], 250),
                option("cebola-caramelizada", "Cebola caramelizada", &["cebola"], 300),
            ],
        }],
    }
}

fn drink(id: &str, name: &str, aliases: &[&str], price: Decimal) -> CatalogItem {
    CatalogItem {
        item_ref: ItemRef::Product(id.to_string()),
        name: name.to_string(),
        aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
        category: Some("Bebidas".to_string()),
        description: None,
        price,
        active: true,
        available: true,
        promotion_weight: 0,
        customization_groups: Vec::new(),
    }
}

fn option(id: &str, name: &str, aliases: &[&str], cents: i64) -> CustomizationOption {
    CustomizationOption {
        id: id.to_string(),
        name: name.to_string(),
        aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
        price_delta: money(cents),
        available: true,
    }
}

fn candidate(
    street: &str,
    number: &str,
    neighborhood: &str,
    latitude: f64,
    longitude: f64,
    confidence: f64,
) -> AddressCandidate {
    AddressCandidate {
        address: Address {
            street: street.to_string(),
            number: Some(number.to_string()),
            complement: None,
            neighborhood: Some(neighborhood.to_string()),
            city: Some("Curitiba".to_string()),
            state: Some("PR".to_string()),
            postal_code: None,
            coordinates: Some(Coordinates { latitude, longitude }),
        },
        confidence,
        provider_ref: Some(format!("demo:{}-{number}", street.to_lowercase().replace(' ', "-"))),
    }
}

fn money(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
