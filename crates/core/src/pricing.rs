use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::domain::order::OrderTotals;
use crate::domain::payment::round_cents;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    pub totals: OrderTotals,
    pub steps: Vec<PricingTraceStep>,
}

/// Subtotal of the cart plus the delivery fee, rounded to cents.
pub fn price_order(cart: &Cart, delivery_fee: Decimal) -> PricingResult {
    let base = cart
        .lines()
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum::<Decimal>();
    let customizations = cart
        .lines()
        .iter()
        .map(|line| {
            let deltas = line
                .customizations
                .iter()
                .map(|customization| customization.price_delta)
                .sum::<Decimal>();
            deltas * Decimal::from(line.quantity)
        })
        .sum::<Decimal>();
    let subtotal = round_cents(cart.compute_subtotal());
    let delivery_fee = round_cents(delivery_fee.max(Decimal::ZERO));
    let total = subtotal + delivery_fee;

    PricingResult {
        totals: OrderTotals { subtotal, delivery_fee, total },
        steps: vec![
            PricingTraceStep {
                stage: "items".to_string(),
                detail: "sum(unit_price * quantity)".to_string(),
                amount: base,
            },
            PricingTraceStep {
                stage: "customizations".to_string(),
                detail: "sum(price_delta * quantity)".to_string(),
                amount: customizations,
            },
            PricingTraceStep {
                stage: "delivery_fee".to_string(),
                detail: "fee quoted for the fulfillment mode".to_string(),
                amount: delivery_fee,
            },
            PricingTraceStep { stage: "total".to_string(), detail: "subtotal + delivery_fee".to_string(), amount: total },
        ],
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::price_order;
    use crate::domain::cart::{Cart, CustomizationChoice};
    use crate::domain::catalog::{CatalogItem, CustomizationGroup, CustomizationOption, ItemRef};

    fn burger() -> CatalogItem {
        CatalogItem {
            item_ref: ItemRef::Product("x-burguer".to_string()),
            name: "X-Burguer".to_string(),
            aliases: Vec::new(),
            category: None,
            description: None,
            price: Decimal::new(2250, 2),
            active: true,
            available: true,
            promotion_weight: 0,
            customization_groups: vec![CustomizationGroup {
                id: "extras".to_string(),
                name: "Adicionais".to_string(),
                required: false,
                min_select: 0,
                max_select: 2,
                options: vec![CustomizationOption {
                    id: "bacon".to_string(),
                    name: "Bacon".to_string(),
                    aliases: Vec::new(),
                    price_delta: Decimal::new(450, 2),
                    available: true,
                }],
            }],
        }
    }

    #[test]
    fn totals_include_customizations_and_fee() {
        let mut cart = Cart::new();
        cart.add(&burger(), 2, &[CustomizationChoice::new("extras", "bacon")], None)
            .expect("add");

        let result = price_order(&cart, Decimal::new(700, 2));
        assert_eq!(result.totals.subtotal, Decimal::new(5400, 2));
        assert_eq!(result.totals.delivery_fee, Decimal::new(700, 2));
        assert_eq!(result.totals.total, Decimal::new(6100, 2));
        assert_eq!(result.steps[0].amount, Decimal::new(4500, 2));
        assert_eq!(result.steps[1].amount, Decimal::new(900, 2));
    }

    #[test]
    fn negative_fee_is_clamped_to_zero() {
        let result = price_order(&Cart::new(), Decimal::new(-100, 2));
        assert_eq!(result.totals.total, Decimal::ZERO);
    }
}
