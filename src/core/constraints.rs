use std::collections::BTreeMap;

use tracing::debug;

use super::layout::{Layout, PlanContext};
use super::types::{
    Account, EARLY_WITHDRAWAL_PENALTY, PENALTY_FREE_AGE, ROTH_SEASONING_YEARS, rmd_divisor,
};

/// Sparse linear expression over the decision vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    terms: BTreeMap<usize, f64>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `coeff` to the coefficient at `index`, merging repeated indices.
    pub fn add(&mut self, index: usize, coeff: f64) -> &mut Self {
        if coeff != 0.0 {
            *self.terms.entry(index).or_insert(0.0) += coeff;
        }
        self
    }

    pub fn with(mut self, index: usize, coeff: f64) -> Self {
        self.add(index, coeff);
        self
    }

    pub fn coefficient(&self, index: usize) -> f64 {
        self.terms.get(&index).copied().unwrap_or(0.0)
    }

    pub fn terms(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.terms
            .iter()
            .filter(|(_, c)| **c != 0.0)
            .map(|(&i, &c)| (i, c))
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.terms().map(|(i, c)| c * x[i]).sum()
    }

    /// Sum of the absolute term values at `x`.
    pub fn magnitude(&self, x: &[f64]) -> f64 {
        self.terms().map(|(i, c)| (c * x[i]).abs()).sum()
    }

    fn negated(mut self) -> Self {
        for c in self.terms.values_mut() {
            *c = -*c;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub row: Row,
    pub bound: f64,
}

/// `upper` rows read `row · x <= bound`, `equal` rows read `row · x == bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSystem {
    width: usize,
    pub upper: Vec<Constraint>,
    pub equal: Vec<Constraint>,
}

impl ConstraintSystem {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            upper: Vec::new(),
            equal: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn push_le(&mut self, row: Row, bound: f64) {
        debug_assert!(row.terms().all(|(i, _)| i < self.width));
        self.upper.push(Constraint { row, bound });
    }

    pub fn push_ge(&mut self, row: Row, bound: f64) {
        self.push_le(row.negated(), -bound);
    }

    pub fn push_eq(&mut self, row: Row, bound: f64) {
        debug_assert!(row.terms().all(|(i, _)| i < self.width));
        self.equal.push(Constraint { row, bound });
    }

    pub fn row_count(&self) -> usize {
        self.upper.len() + self.equal.len()
    }

    /// Largest violation of any row by `x`, each relative to the row's size at `x`.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let scale = |c: &Constraint| 1.0 + c.bound.abs() + c.row.magnitude(x);
        let upper = self
            .upper
            .iter()
            .map(|c| (c.row.evaluate(x) - c.bound).max(0.0) / scale(c));
        let equal = self
            .equal
            .iter()
            .map(|c| (c.row.evaluate(x) - c.bound).abs() / scale(c));
        upper.chain(equal).fold(0.0, f64::max)
    }
}

pub fn build_constraints(ctx: &PlanContext<'_>) -> ConstraintSystem {
    let mut system = ConstraintSystem::new(ctx.layout.len());

    sepp_gate(ctx, &mut system);
    accumulation_caps(ctx, &mut system);
    for year in 0..ctx.layout.num_years() {
        tax_decomposition(ctx, year, &mut system);
        cash_flow(ctx, year, &mut system);
    }
    terminal_balances(ctx, &mut system);
    sepp_ring_fence(ctx, &mut system);
    roth_ladder(ctx, &mut system);
    roth_positivity(ctx, &mut system);
    required_distributions(ctx, &mut system);

    debug!(
        variables = system.width(),
        upper_rows = system.upper.len(),
        equality_rows = system.equal.len(),
        "assembled constraint system"
    );
    system
}

pub(crate) fn sepp_gate(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    if !ctx.options.sepp_enabled {
        system.push_eq(Row::new().with(Layout::SEPP, 1.0), 0.0);
    }
}

pub(crate) fn accumulation_caps(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let prep = &ctx.config.accumulation;
    for w in 0..layout.work_years() {
        let scale = if prep.inflate_caps {
            (1.0 + ctx.config.inflation_rate).powi(w as i32)
        } else {
            1.0
        };

        let total = Row::new()
            .with(layout.contribution(w, Account::AfterTax), prep.gross_up)
            .with(layout.contribution(w, Account::TaxDeferred), 1.0)
            .with(layout.contribution(w, Account::TaxFree), prep.gross_up);
        system.push_le(total, prep.max_save * scale);

        system.push_le(
            Row::new().with(layout.contribution(w, Account::TaxDeferred), 1.0),
            ctx.config.ira.max_contribution * scale,
        );
        system.push_le(
            Row::new().with(layout.contribution(w, Account::TaxFree), 1.0),
            ctx.config.roth.max_contribution * scale,
        );
    }
}

/// Bracket capacities plus the three equalities that pin the year's tax slot.
pub(crate) fn tax_decomposition(ctx: &PlanContext<'_>, year: usize, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let taxes = &ctx.config.taxes;
    let table = &taxes.table;
    let scale = ctx.inflation_index(year);

    system.push_le(
        Row::new().with(layout.deduction(year), 1.0),
        taxes.standard_deduction * scale,
    );
    for k in 0..table.len() {
        if let Some(cap) = table.capacity(k, scale) {
            system.push_le(Row::new().with(layout.bracket(year, k), 1.0), cap);
        }
    }

    // ordinary income lands in the deduction or a bracket
    let mut income = Row::new()
        .with(layout.withdrawal(year, Account::TaxDeferred), 1.0)
        .with(layout.conversion(year), 1.0)
        .with(Layout::SEPP, ctx.sepp_rate(year))
        .with(layout.deduction(year), -1.0);
    for k in 0..table.len() {
        income.add(layout.bracket(year, k), -1.0);
    }
    system.push_eq(income, -ctx.config.schedule.taxable_income[year]);

    let mut state = Row::new().with(layout.state(year), 1.0);
    for k in 1..table.len() {
        state.add(layout.bracket(year, k), -1.0);
    }
    system.push_eq(state, 0.0);

    let mut tax = Row::new()
        .with(layout.tax(year), 1.0)
        .with(
            layout.withdrawal(year, Account::AfterTax),
            -ctx.gain_fraction(year) * taxes.total_capital_gains_rate(),
        )
        .with(layout.state(year), -table.state_rate());
    if ctx.age(year) < PENALTY_FREE_AGE {
        tax.add(
            layout.withdrawal(year, Account::TaxDeferred),
            -EARLY_WITHDRAWAL_PENALTY,
        );
    }
    for k in 0..table.len() {
        tax.add(layout.bracket(year, k), -table.federal_rate(k));
    }
    system.push_eq(tax, 0.0);
}

/// Spendable cash after tax and net expenses must cover the inflated spending floor.
pub(crate) fn cash_flow(ctx: &PlanContext<'_>, year: usize, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let schedule = &ctx.config.schedule;
    let row = Row::new()
        .with(layout.withdrawal(year, Account::AfterTax), 1.0)
        .with(layout.withdrawal(year, Account::TaxDeferred), 1.0)
        .with(layout.withdrawal(year, Account::TaxFree), 1.0)
        .with(Layout::SEPP, ctx.sepp_rate(year))
        .with(layout.tax(year), -1.0)
        .with(Layout::GOAL, -ctx.inflation_index(year));
    system.push_ge(row, schedule.expense[year] - schedule.income[year]);
}

pub(crate) fn terminal_balances(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let n = layout.num_years();
    let w_years = layout.work_years();

    let mut after_tax = Row::new();
    let mut ira = Row::new();
    for y in 0..n {
        let g = ctx.growth(n - y);
        after_tax.add(layout.withdrawal(y, Account::AfterTax), g);
        ira.add(layout.withdrawal(y, Account::TaxDeferred), g);
        ira.add(layout.conversion(y), g);
        ira.add(Layout::SEPP, ctx.sepp_rate(y) * g);
    }
    for w in 0..w_years {
        let g = ctx.growth(n + w_years - w);
        after_tax.add(layout.contribution(w, Account::AfterTax), -g);
        ira.add(layout.contribution(w, Account::TaxDeferred), -g);
    }

    let horizon = ctx.growth(w_years + n);
    system.push_le(after_tax, ctx.config.after_tax.balance * horizon);
    system.push_le(ira, ctx.config.ira.balance * horizon);
}

/// IRA money outside the SEPP reserve must last until the reserve is released.
pub(crate) fn sepp_ring_fence(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let horizon = ctx.config.sepp.first_eligible_year as usize;
    let w_years = layout.work_years();

    let mut row = Row::new().with(Layout::SEPP, ctx.growth(horizon));
    for y in 0..horizon.min(layout.num_years()) {
        let g = ctx.growth(horizon - y);
        row.add(layout.withdrawal(y, Account::TaxDeferred), g);
        row.add(layout.conversion(y), g);
    }
    for w in 0..w_years {
        row.add(
            layout.contribution(w, Account::TaxDeferred),
            -ctx.growth(horizon + w_years - w),
        );
    }
    system.push_le(row, ctx.config.ira.balance * ctx.growth(w_years + horizon));
}

/// Before 59, Roth withdrawals may only draw on principal that has aged five years.
pub(crate) fn roth_ladder(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let w_years = layout.work_years();
    let seasoning = ROTH_SEASONING_YEARS as usize;
    let early_years = PENALTY_FREE_AGE.saturating_sub(ctx.retire_age) as usize;

    for y in 0..early_years.min(layout.num_years()) {
        let mut row = Row::new();
        for t in 0..=y {
            row.add(layout.withdrawal(t, Account::TaxFree), 1.0);
            if t + seasoning <= y {
                row.add(layout.conversion(t), -1.0);
            }
        }
        for w in 0..w_years {
            if w_years - w + y >= seasoning {
                row.add(layout.contribution(w, Account::TaxFree), -1.0);
            }
        }

        let seasoned: f64 = ctx
            .config
            .roth
            .contributions
            .iter()
            .filter(|c| c.age + ROTH_SEASONING_YEARS <= ctx.age(y))
            .map(|c| c.amount)
            .sum();
        system.push_le(row, seasoned);
    }
}

/// From 59 on, compounded Roth withdrawals stay within the compounded balance.
pub(crate) fn roth_positivity(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let n = layout.num_years();
    let w_years = layout.work_years();
    let seasoning = ROTH_SEASONING_YEARS as usize;
    let first = PENALTY_FREE_AGE.saturating_sub(ctx.retire_age) as usize;

    for y in first..=n {
        let mut row = Row::new();
        for t in 0..y {
            let g = ctx.growth(y - t);
            row.add(layout.withdrawal(t, Account::TaxFree), g);
            if t + seasoning <= y {
                row.add(layout.conversion(t), -g);
            }
        }
        for w in 0..w_years {
            row.add(
                layout.contribution(w, Account::TaxFree),
                -ctx.growth(w_years + y - w),
            );
        }
        system.push_le(row, ctx.config.roth.balance * ctx.growth(w_years + y));
    }
}

/// IRA draw (SEPP included) times the age divisor must reach the projected balance.
pub(crate) fn required_distributions(ctx: &PlanContext<'_>, system: &mut ConstraintSystem) {
    let layout = &ctx.layout;
    let w_years = layout.work_years();

    for y in 0..layout.num_years() {
        let Some(divisor) = rmd_divisor(ctx.age(y)) else {
            continue;
        };

        let mut row = Row::new();
        for t in 0..y {
            let g = ctx.growth(y - t);
            row.add(layout.withdrawal(t, Account::TaxDeferred), -g);
            row.add(layout.conversion(t), -g);
            row.add(Layout::SEPP, -ctx.sepp_rate(t) * g);
        }
        for w in 0..w_years {
            row.add(
                layout.contribution(w, Account::TaxDeferred),
                ctx.growth(w_years + y - w),
            );
        }
        row.add(layout.withdrawal(y, Account::TaxDeferred), -divisor);
        row.add(Layout::SEPP, -divisor * ctx.sepp_rate(y));

        system.push_le(row, -ctx.config.ira.balance * ctx.growth(w_years + y));
    }
}
