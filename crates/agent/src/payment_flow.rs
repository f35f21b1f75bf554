//! Payment sub-flow: one method or a split across several.

use rust_decimal::Decimal;

use comanda_core::domain::payment::{
    round_cents, AllocationCheck, PaymentAllocation, PaymentFlowState, PaymentMethod,
    PaymentSelection,
};

use crate::intent::PaymentMention;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentInput {
    /// Position in [`PaymentMethod::ALL`], 1-based.
    Select(usize),
    Mentions(Vec<PaymentMention>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentNotice {
    InvalidChoice { max: usize },
    AmountsNeeded { methods: Vec<PaymentMethod> },
    Shortfall { missing: Decimal },
    Excess { extra: Decimal },
    ChangeBelowAmount { change_for: Decimal, amount: Decimal },
    InvalidAmount,
}

impl PaymentNotice {
    /// Amounts were given but cannot be accepted, as opposed to input that
    /// is merely incomplete.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Shortfall { .. }
                | Self::Excess { .. }
                | Self::ChangeBelowAmount { .. }
                | Self::InvalidAmount
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentAdvance {
    pub state: PaymentFlowState,
    pub notice: Option<PaymentNotice>,
}

impl PaymentAdvance {
    fn to(state: PaymentFlowState) -> Self {
        Self { state, notice: None }
    }

    fn stay(state: &PaymentFlowState, notice: PaymentNotice) -> Self {
        Self { state: state.clone(), notice: Some(notice) }
    }

    pub fn selection(&self) -> Option<&PaymentSelection> {
        match &self.state {
            PaymentFlowState::Resolved { selection, .. } => Some(selection),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentFlowController {
    tolerance: Decimal,
}

impl PaymentFlowController {
    pub fn new(tolerance: Decimal) -> Self {
        Self { tolerance: tolerance.abs() }
    }

    pub fn start(&self, total: Decimal) -> PaymentFlowState {
        PaymentFlowState::AwaitMethod { total: round_cents(total) }
    }

    pub fn advance(&self, state: &PaymentFlowState, input: PaymentInput) -> PaymentAdvance {
        let total = state.total();
        match (state, input) {
            (PaymentFlowState::AwaitAllocation { methods, .. }, PaymentInput::Select(_)) => {
                let notice = PaymentNotice::AmountsNeeded { methods: methods.clone() };
                PaymentAdvance::stay(state, notice)
            }
            (_, PaymentInput::Select(choice)) => {
                match PaymentMethod::ALL.get(choice.wrapping_sub(1)) {
                    Some(method) => PaymentAdvance::to(PaymentFlowState::Resolved {
                        total,
                        selection: PaymentSelection::single(*method, total),
                    }),
                    None => PaymentAdvance::stay(
                        state,
                        PaymentNotice::InvalidChoice { max: PaymentMethod::ALL.len() },
                    ),
                }
            }
            (
                PaymentFlowState::AwaitAllocation { methods, .. },
                PaymentInput::Mentions(mentions),
            ) => {
                let mut merged = mentions;
                for method in methods {
                    if !merged.iter().any(|mention| mention.method == *method) {
                        merged.push(PaymentMention::method(*method));
                    }
                }
                self.allocate(state, total, merged)
            }
            (_, PaymentInput::Mentions(mentions)) => self.allocate(state, total, mentions),
        }
    }

    fn allocate(
        &self,
        state: &PaymentFlowState,
        total: Decimal,
        mentions: Vec<PaymentMention>,
    ) -> PaymentAdvance {
        let mentions = merge_same_method(mentions);
        if mentions.is_empty() {
            return PaymentAdvance::stay(
                state,
                PaymentNotice::InvalidChoice { max: PaymentMethod::ALL.len() },
            );
        }
        let non_positive =
            |mention: &PaymentMention| mention.amount.is_some_and(|amount| amount <= Decimal::ZERO);
        if mentions.iter().any(non_positive) {
            return PaymentAdvance::stay(state, PaymentNotice::InvalidAmount);
        }

        let missing = mentions.iter().filter(|mention| mention.amount.is_none()).count();
        let given = mentions.iter().filter_map(|mention| mention.amount).sum::<Decimal>();
        if missing > 1 {
            return PaymentAdvance::to(PaymentFlowState::AwaitAllocation {
                total,
                methods: mentions.iter().map(|mention| mention.method).collect(),
            })
            .with_notice(PaymentNotice::AmountsNeeded {
                methods: mentions
                    .iter()
                    .filter(|mention| mention.amount.is_none())
                    .map(|mention| mention.method)
                    .collect(),
            });
        }

        let remainder = round_cents(total - given);
        let mut allocations = Vec::with_capacity(mentions.len());
        for mention in &mentions {
            let amount = match mention.amount {
                Some(amount) => round_cents(amount),
                None if remainder > Decimal::ZERO => remainder,
                // the named amounts already cover the total
                None => continue,
            };
            allocations.push(PaymentAllocation {
                method: mention.method,
                amount,
                change_for: mention.change_for.filter(|_| mention.method == PaymentMethod::Cash),
            });
        }

        if let Some(cash) = allocations.iter().find(|allocation| {
            allocation.change_for.is_some_and(|change_for| change_for < allocation.amount)
        }) {
            return PaymentAdvance::stay(
                state,
                PaymentNotice::ChangeBelowAmount {
                    change_for: cash.change_for.unwrap_or_default(),
                    amount: cash.amount,
                },
            );
        }

        let selection = PaymentSelection { allocations };
        match selection.check(total, self.tolerance) {
            AllocationCheck::Balanced => {
                PaymentAdvance::to(PaymentFlowState::Resolved { total, selection })
            }
            AllocationCheck::Shortfall(missing) => {
                PaymentAdvance::stay(state, PaymentNotice::Shortfall { missing })
            }
            AllocationCheck::Excess(extra) => {
                PaymentAdvance::stay(state, PaymentNotice::Excess { extra })
            }
        }
    }
}

impl PaymentAdvance {
    fn with_notice(mut self, notice: PaymentNotice) -> Self {
        self.notice = Some(notice);
        self
    }
}

fn merge_same_method(mentions: Vec<PaymentMention>) -> Vec<PaymentMention> {
    let mut merged: Vec<PaymentMention> = Vec::with_capacity(mentions.len());
    for mention in mentions {
        match merged.iter_mut().find(|existing| existing.method == mention.method) {
            Some(existing) => {
                existing.amount = match (existing.amount, mention.amount) {
                    (Some(left), Some(right)) => Some(left + right),
                    (left, right) => left.or(right),
                };
                existing.change_for = existing.change_for.or(mention.change_for);
            }
            None => merged.push(mention),
        }
    }
    merged
}
