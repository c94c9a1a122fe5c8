//! Shared configuration builders for the core test suites.

use super::tax::TaxTable;
use super::types::{
    Accumulation, AfterTaxAccount, PlanConfig, Schedule, SeppTerms, TaxDeferredAccount,
    TaxFreeAccount, TaxPolicy,
};

pub(crate) fn joint_2023_table(state_rate: f64) -> TaxTable {
    TaxTable::new(
        &[
            (0.0, 0.10),
            (22_000.0, 0.12),
            (89_450.0, 0.22),
            (190_750.0, 0.24),
            (364_200.0, 0.32),
            (462_500.0, 0.35),
            (693_750.0, 0.37),
        ],
        state_rate,
    )
    .expect("valid table")
}

/// Empty accounts, no growth, no inflation, 2023 joint brackets.
pub(crate) fn base_config(start_age: u32, work_years: u32, end_age: u32) -> PlanConfig {
    let retire_age = start_age + work_years;
    let num_years = end_age.saturating_sub(retire_age) as usize;
    PlanConfig {
        start_age,
        end_age,
        inflation_rate: 0.0,
        return_rate: 0.0,
        taxes: TaxPolicy {
            table: joint_2023_table(0.0),
            standard_deduction: 27_700.0,
            capital_gains_rate: 0.15,
            state_capital_gains_rate: 0.0,
        },
        accumulation: Accumulation {
            work_years,
            max_save: 60_000.0,
            inflate_caps: false,
            gross_up: 1.25,
        },
        after_tax: AfterTaxAccount {
            balance: 0.0,
            basis: 0.0,
        },
        ira: TaxDeferredAccount {
            balance: 0.0,
            max_contribution: 33_500.0,
        },
        roth: TaxFreeAccount {
            balance: 0.0,
            max_contribution: 14_000.0,
            contributions: Vec::new(),
        },
        schedule: Schedule {
            income: vec![0.0; num_years],
            expense: vec![0.0; num_years],
            taxable_income: vec![0.0; num_years],
        },
        sepp: SeppTerms::for_retirement_age(retire_age, 25.0),
    }
}

pub(crate) fn set_schedule(config: &mut PlanConfig, mut f: impl FnMut(usize, &mut Schedule)) {
    for year in 0..config.num_years() as usize {
        f(year, &mut config.schedule);
    }
}
