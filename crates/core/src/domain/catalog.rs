use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Reference to exactly one purchasable catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ItemRef {
    Product(String),
    Recipe(String),
    Combo(String),
}

impl ItemRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Product(id) | Self::Recipe(id) | Self::Combo(id) => id,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Product(_) => ItemKind::Product,
            Self::Recipe(_) => ItemKind::Recipe,
            Self::Combo(_) => ItemKind::Combo,
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.id())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Product,
    Recipe,
    Combo,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Recipe => "recipe",
            Self::Combo => "combo",
        }
    }
}

/// Narrows a catalog search to one kind of entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogScope {
    #[default]
    All,
    Products,
    Recipes,
    Combos,
}

impl CatalogScope {
    pub fn includes(&self, kind: ItemKind) -> bool {
        matches!(
            (self, kind),
            (Self::All, _)
                | (Self::Products, ItemKind::Product)
                | (Self::Recipes, ItemKind::Recipe)
                | (Self::Combos, ItemKind::Combo)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizationOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub price_delta: Decimal,
    #[serde(default = "default_true")]
    pub available: bool,
}

/// Named set of modifiers attached to a catalog item ("Adicionais", "Ponto da carne").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomizationGroup {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub min_select: u32,
    pub max_select: u32,
    pub options: Vec<CustomizationOption>,
}

impl CustomizationGroup {
    pub fn option(&self, option_id: &str) -> Option<&CustomizationOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    /// Minimum number of selections, accounting for `required` with a zero minimum.
    pub fn effective_min(&self) -> u32 {
        if self.required {
            self.min_select.max(1)
        } else {
            self.min_select
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_ref: ItemRef,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_true")]
    pub available: bool,
    /// Ranking bonus for promoted items; 0 is neutral.
    #[serde(default)]
    pub promotion_weight: u8,
    #[serde(default)]
    pub customization_groups: Vec<CustomizationGroup>,
}

impl CatalogItem {
    pub fn group(&self, group_id: &str) -> Option<&CustomizationGroup> {
        self.customization_groups.iter().find(|group| group.id == group_id)
    }

    /// Finds the group that owns `option_id`.
    pub fn locate_option(
        &self,
        option_id: &str,
    ) -> Option<(&CustomizationGroup, &CustomizationOption)> {
        self.customization_groups
            .iter()
            .find_map(|group| group.option(option_id).map(|option| (group, option)))
    }

    pub fn is_orderable(&self) -> bool {
        self.active && self.available
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        CatalogItem, CatalogScope, CustomizationGroup, CustomizationOption, ItemKind, ItemRef,
    };

    #[test]
    fn item_ref_serializes_as_tagged_reference() {
        let json = serde_json::to_string(&ItemRef::Combo("combo-1".to_string())).expect("json");
        assert_eq!(json, r#"{"kind":"combo","id":"combo-1"}"#);
        assert_eq!(ItemRef::Recipe("r-9".to_string()).to_string(), "recipe:r-9");
    }

    #[test]
    fn scope_filters_by_kind() {
        assert!(CatalogScope::All.includes(ItemKind::Combo));
        assert!(CatalogScope::Products.includes(ItemKind::Product));
        assert!(!CatalogScope::Products.includes(ItemKind::Recipe));
    }

    #[test]
    fn locate_option_finds_owning_group() {
        let item = CatalogItem {
            item_ref: ItemRef::Product("x-burguer".to_string()),
            name: "X-Burguer".to_string(),
            aliases: Vec::new(),
            category: None,
            description: None,
            price: Decimal::new(2000, 2),
            active: true,
            available: true,
            promotion_weight: 0,
            customization_groups: vec![CustomizationGroup {
                id: "extras".to_string(),
                name: "Adicionais".to_string(),
                required: false,
                min_select: 0,
                max_select: 3,
                options: vec![CustomizationOption {
                    id: "bacon".to_string(),
                    name: "Bacon".to_string(),
                    aliases: Vec::new(),
                    price_delta: Decimal::new(400, 2),
                    available: true,
                }],
            }],
        };

        let (group, option) = item.locate_option("bacon").expect("bacon option");
        assert_eq!(group.id, "extras");
        assert_eq!(option.price_delta, Decimal::new(400, 2));
        assert!(item.locate_option("cheddar").is_none());
    }

    #[test]
    fn required_group_with_zero_minimum_still_needs_one_choice() {
        let group = CustomizationGroup {
            id: "ponto".to_string(),
            name: "Ponto da carne".to_string(),
            required: true,
            min_select: 0,
            max_select: 1,
            options: Vec::new(),
        };
        assert_eq!(group.effective_min(), 1);
    }
}
