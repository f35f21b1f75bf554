use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Cash,
    CreditCard,
    DebitCard,
    MealVoucher,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] =
        [Self::Pix, Self::Cash, Self::CreditCard, Self::DebitCard, Self::MealVoucher];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Cash => "cash",
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::MealVoucher => "meal_voucher",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pix" => Some(Self::Pix),
            "cash" | "dinheiro" => Some(Self::Cash),
            "credit_card" | "credit" | "credito" => Some(Self::CreditCard),
            "debit_card" | "debit" | "debito" => Some(Self::DebitCard),
            "meal_voucher" | "voucher" | "vale" => Some(Self::MealVoucher),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pix => "Pix",
            Self::Cash => "Dinheiro",
            Self::CreditCard => "Cartão de crédito",
            Self::DebitCard => "Cartão de débito",
            Self::MealVoucher => "Vale-refeição",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub method: PaymentMethod,
    pub amount: Decimal,
    /// Cash only: the note the customer will pay with.
    #[serde(default)]
    pub change_for: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCheck {
    Balanced,
    Shortfall(Decimal),
    Excess(Decimal),
}

impl AllocationCheck {
    pub fn is_balanced(&self) -> bool {
        matches!(self, Self::Balanced)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSelection {
    pub allocations: Vec<PaymentAllocation>,
}

impl PaymentSelection {
    pub fn single(method: PaymentMethod, amount: Decimal) -> Self {
        Self { allocations: vec![PaymentAllocation { method, amount, change_for: None }] }
    }

    pub fn allocated(&self) -> Decimal {
        self.allocations.iter().map(|allocation| allocation.amount).sum()
    }

    pub fn is_split(&self) -> bool {
        self.allocations.len() > 1
    }

    /// Compares the allocated sum with `total` after rounding both to cents.
    /// Differences up to `tolerance` (inclusive) count as balanced.
    pub fn check(&self, total: Decimal, tolerance: Decimal) -> AllocationCheck {
        let allocated = round_cents(self.allocated());
        let total = round_cents(total);
        let difference = allocated - total;
        if difference.abs() <= tolerance.abs() {
            AllocationCheck::Balanced
        } else if difference < Decimal::ZERO {
            AllocationCheck::Shortfall(-difference)
        } else {
            AllocationCheck::Excess(difference)
        }
    }
}

pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStep {
    AwaitMethod,
    AwaitAllocation,
    Resolved,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PaymentFlowState {
    AwaitMethod { total: Decimal },
    AwaitAllocation { total: Decimal, methods: Vec<PaymentMethod> },
    Resolved { total: Decimal, selection: PaymentSelection },
}

impl PaymentFlowState {
    pub fn step(&self) -> PaymentStep {
        match self {
            Self::AwaitMethod { .. } => PaymentStep::AwaitMethod,
            Self::AwaitAllocation { .. } => PaymentStep::AwaitAllocation,
            Self::Resolved { .. } => PaymentStep::Resolved,
        }
    }

    pub fn total(&self) -> Decimal {
        match self {
            Self::AwaitMethod { total }
            | Self::AwaitAllocation { total, .. }
            | Self::Resolved { total, .. } => *total,
        }
    }
}
