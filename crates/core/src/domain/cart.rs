//! Cart aggregate.
//!
//! Lines are keyed by `(item reference, customization set)`. Adding a pair
//! that already exists increments that line instead of appending a new one,
//! so the cart never holds two lines with the same identity.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::catalog::{CatalogItem, ItemRef};

/// A requested modifier: option `option_id` inside group `group_id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CustomizationChoice {
    pub group_id: String,
    pub option_id: String,
}

impl CustomizationChoice {
    pub fn new(group_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self { group_id: group_id.into(), option_id: option_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCustomization {
    pub group_id: String,
    pub option_id: String,
    pub name: String,
    pub price_delta: Decimal,
}

impl AppliedCustomization {
    pub fn choice(&self) -> CustomizationChoice {
        CustomizationChoice::new(self.group_id.clone(), self.option_id.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub line_id: u32,
    pub item_ref: ItemRef,
    pub name: String,
    pub quantity: u32,
    /// Base price captured when the line was first added.
    pub unit_price: Decimal,
    pub customizations: Vec<AppliedCustomization>,
    pub observation: Option<String>,
}

impl CartLine {
    pub fn customization_set(&self) -> BTreeSet<CustomizationChoice> {
        self.customizations.iter().map(AppliedCustomization::choice).collect()
    }

    pub fn unit_total(&self) -> Decimal {
        let deltas = self
            .customizations
            .iter()
            .map(|customization| customization.price_delta)
            .sum::<Decimal>();
        self.unit_price + deltas
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_total() * Decimal::from(self.quantity)
    }

    fn has_identity(&self, item_ref: &ItemRef, set: &BTreeSet<CustomizationChoice>) -> bool {
        &self.item_ref == item_ref && &self.customization_set() == set
    }
}

/// Typed validation failure; names the first constraint that was violated.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartError {
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("`{item}` is not part of the active catalog")]
    Inactive { item: String },
    #[error("`{item}` is currently unavailable")]
    Unavailable { item: String },
    #[error("`{item}` has no customization option `{option_id}` in group `{group_id}`")]
    UnknownOption { item: String, group_id: String, option_id: String },
    #[error("customization `{option}` for `{item}` is currently unavailable")]
    OptionUnavailable { item: String, option: String },
    #[error("group `{group}` of `{item}` is required")]
    MissingRequiredGroup { item: String, group_id: String, group: String },
    #[error("group `{group}` of `{item}` needs at least {min} selection(s), got {selected}")]
    TooFewSelections { item: String, group: String, min: u32, selected: u32 },
    #[error("group `{group}` of `{item}` allows at most {max} selection(s), got {selected}")]
    TooManySelections { item: String, group: String, max: u32, selected: u32 },
    #[error("cart line {position} does not exist")]
    LineNotFound { position: usize },
    #[error("catalog item `{expected}` does not match cart line item `{actual}`")]
    ItemMismatch { expected: ItemRef, actual: ItemRef },
}

impl CartError {
    /// Stable code used in logs and audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ZeroQuantity => "ZERO_QUANTITY",
            Self::Inactive { .. } => "ITEM_INACTIVE",
            Self::Unavailable { .. } => "ITEM_UNAVAILABLE",
            Self::UnknownOption { .. } => "UNKNOWN_OPTION",
            Self::OptionUnavailable { .. } => "OPTION_UNAVAILABLE",
            Self::MissingRequiredGroup { .. } => "MISSING_REQUIRED_GROUP",
            Self::TooFewSelections { .. } => "TOO_FEW_SELECTIONS",
            Self::TooManySelections { .. } => "TOO_MANY_SELECTIONS",
            Self::LineNotFound { .. } => "LINE_NOT_FOUND",
            Self::ItemMismatch { .. } => "ITEM_MISMATCH",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddOutcome {
    pub line_id: u32,
    pub position: usize,
    pub quantity: u32,
    pub merged: bool,
}

/// Addresses a line either by its 1-based display position or by item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineSelector {
    Position(usize),
    Item(ItemRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { line: CartLine },
    Decremented { line_id: u32, remaining: u32 },
    NotFound,
    /// Several lines hold the item with different customizations.
    Ambiguous { positions: Vec<usize> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersonalizeOutcome {
    pub line_id: u32,
    /// Set when the new customization set collided with another line.
    pub merged_into: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    next_line_id: u32,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn line_at(&self, position: usize) -> Option<&CartLine> {
        position.checked_sub(1).and_then(|index| self.lines.get(index))
    }

    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn add(
        &mut self,
        item: &CatalogItem,
        quantity: u32,
        choices: &[CustomizationChoice],
        observation: Option<String>,
    ) -> Result<AddOutcome, CartError> {
        if quantity == 0 {
            return Err(CartError::ZeroQuantity);
        }
        if !item.active {
            return Err(CartError::Inactive { item: item.name.clone() });
        }
        if !item.available {
            return Err(CartError::Unavailable { item: item.name.clone() });
        }

        let applied = validate_customizations(item, choices)?;
        let set = applied.iter().map(AppliedCustomization::choice).collect::<BTreeSet<_>>();
        let observation = observation.filter(|text| !text.trim().is_empty());

        if let Some(index) =
            self.lines.iter().position(|line| line.has_identity(&item.item_ref, &set))
        {
            let line = &mut self.lines[index];
            line.quantity = line.quantity.saturating_add(quantity);
            if observation.is_some() {
                line.observation = observation;
            }
            return Ok(AddOutcome {
                line_id: line.line_id,
                position: index + 1,
                quantity: line.quantity,
                merged: true,
            });
        }

        self.next_line_id += 1;
        let line_id = self.next_line_id;
        self.lines.push(CartLine {
            line_id,
            item_ref: item.item_ref.clone(),
            name: item.name.clone(),
            quantity,
            unit_price: item.price,
            customizations: applied,
            observation,
        });

        Ok(AddOutcome { line_id, position: self.lines.len(), quantity, merged: false })
    }

    /// Removes `quantity` units (or the whole line when `None`) from the selected line.
    pub fn remove(&mut self, selector: &LineSelector, quantity: Option<u32>) -> RemoveOutcome {
        let index = match selector {
            LineSelector::Position(position) => {
                match position.checked_sub(1).filter(|index| *index < self.lines.len()) {
                    Some(index) => index,
                    None => return RemoveOutcome::NotFound,
                }
            }
            LineSelector::Item(item_ref) => {
                let positions = self
                    .lines
                    .iter()
                    .enumerate()
                    .filter(|(_, line)| &line.item_ref == item_ref)
                    .map(|(index, _)| index)
                    .collect::<Vec<_>>();
                match positions.as_slice() {
                    [] => return RemoveOutcome::NotFound,
                    [index] => *index,
                    many => {
                        return RemoveOutcome::Ambiguous {
                            positions: many.iter().map(|index| index + 1).collect(),
                        }
                    }
                }
            }
        };

        match quantity {
            Some(units) if units > 0 && units < self.lines[index].quantity => {
                let line = &mut self.lines[index];
                line.quantity -= units;
                RemoveOutcome::Decremented { line_id: line.line_id, remaining: line.quantity }
            }
            _ => RemoveOutcome::Removed { line: self.lines.remove(index) },
        }
    }

    /// Replaces the customization set (and optionally the observation) of a line.
    pub fn personalize(
        &mut self,
        position: usize,
        item: &CatalogItem,
        choices: &[CustomizationChoice],
        observation: Option<String>,
    ) -> Result<PersonalizeOutcome, CartError> {
        let index = position
            .checked_sub(1)
            .filter(|index| *index < self.lines.len())
            .ok_or(CartError::LineNotFound { position })?;

        if self.lines[index].item_ref != item.item_ref {
            return Err(CartError::ItemMismatch {
                expected: item.item_ref.clone(),
                actual: self.lines[index].item_ref.clone(),
            });
        }

        let applied = validate_customizations(item, choices)?;
        let set = applied.iter().map(AppliedCustomization::choice).collect::<BTreeSet<_>>();
        let observation = observation.filter(|text| !text.trim().is_empty());

        let collision = self
            .lines
            .iter()
            .enumerate()
            .find(|(other, line)| *other != index && line.has_identity(&item.item_ref, &set))
            .map(|(other, _)| other);

        if let Some(target) = collision {
            let moved = self.lines.remove(index);
            let target = if target > index { target - 1 } else { target };
            let line = &mut self.lines[target];
            line.quantity = line.quantity.saturating_add(moved.quantity);
            if observation.is_some() {
                line.observation = observation;
            }
            return Ok(PersonalizeOutcome {
                line_id: moved.line_id,
                merged_into: Some(line.line_id),
            });
        }

        let line = &mut self.lines[index];
        line.customizations = applied;
        if observation.is_some() {
            line.observation = observation;
        }
        Ok(PersonalizeOutcome { line_id: line.line_id, merged_into: None })
    }

    /// Σ (unit price + customization deltas) × quantity.
    pub fn compute_subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }
}

fn validate_customizations(
    item: &CatalogItem,
    choices: &[CustomizationChoice],
) -> Result<Vec<AppliedCustomization>, CartError> {
    let mut seen = BTreeSet::new();
    let mut applied = Vec::with_capacity(choices.len());

    for choice in choices {
        if !seen.insert(choice.clone()) {
            continue;
        }
        let option = item
            .group(&choice.group_id)
            .and_then(|group| group.option(&choice.option_id))
            .ok_or_else(|| CartError::UnknownOption {
                item: item.name.clone(),
                group_id: choice.group_id.clone(),
                option_id: choice.option_id.clone(),
            })?;
        if !option.available {
            return Err(CartError::OptionUnavailable {
                item: item.name.clone(),
                option: option.name.clone(),
            });
        }
        applied.push(AppliedCustomization {
            group_id: choice.group_id.clone(),
            option_id: option.id.clone(),
            name: option.name.clone(),
            price_delta: option.price_delta,
        });
    }

    for group in &item.customization_groups {
        let selected = applied.iter().filter(|entry| entry.group_id == group.id).count();
        let selected = u32::try_from(selected).unwrap_or(u32::MAX);
        if selected > group.max_select {
            return Err(CartError::TooManySelections {
                item: item.name.clone(),
                group: group.name.clone(),
                max: group.max_select,
                selected,
            });
        }
        let min = group.effective_min();
        if selected < min {
            if selected == 0 && group.required {
                return Err(CartError::MissingRequiredGroup {
                    item: item.name.clone(),
                    group_id: group.id.clone(),
                    group: group.name.clone(),
                });
            }
            return Err(CartError::TooFewSelections {
                item: item.name.clone(),
                group: group.name.clone(),
                min,
                selected,
            });
        }
    }

    Ok(applied)
}
