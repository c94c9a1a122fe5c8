use tracing::{debug, info};

use super::constraints::build_constraints;
use super::error::PlanError;
use super::layout::{Layout, PlanContext};
use super::objective::build_objective;
use super::solver::{LinearProgram, LpOracle, MicrolpOracle, OracleError};
use super::types::{
    Account, AccumulationYearResult, EARLY_WITHDRAWAL_PENALTY, PENALTY_FREE_AGE, PlanConfig,
    PlanOptions, PlanReport, PlanTotals, RetirementYearResult,
};

/// Solver values smaller than this are treated as zero.
const RESIDUE: f64 = 1e-4;
/// Absolute part of the allowed gap between the solved and replayed tax.
const TAX_CHECK_ABS: f64 = 0.5;
const TAX_CHECK_REL: f64 = 1e-7;

/// Builds the linear program for `config` without solving it.
pub fn build_program(ctx: &PlanContext<'_>) -> LinearProgram {
    LinearProgram {
        cost: build_objective(ctx),
        constraints: build_constraints(ctx),
    }
}

/// Solves the plan with the bundled simplex oracle.
pub fn solve_plan(config: &PlanConfig, options: &PlanOptions) -> Result<PlanReport, PlanError> {
    let oracle = MicrolpOracle {
        tolerance: options.tolerance,
    };
    run_plan(config, options, &oracle)
}

pub fn run_plan(
    config: &PlanConfig,
    options: &PlanOptions,
    oracle: &dyn LpOracle,
) -> Result<PlanReport, PlanError> {
    config.validate()?;
    let ctx = PlanContext::new(config, options);
    debug!(
        retire_age = ctx.retire_age,
        work_years = ctx.layout.work_years(),
        years = ctx.layout.num_years(),
        brackets = ctx.layout.bracket_count(),
        sepp = options.sepp_enabled,
        "planning"
    );

    let program = build_program(&ctx);
    let x = oracle.solve(&program).map_err(|err| match err {
        OracleError::Infeasible(msg) => PlanError::ModelInfeasible(msg),
        OracleError::NonConvergence(msg) => PlanError::NumericNonconvergence(msg),
    })?;

    let report = interpret(&ctx, &x)?;
    info!(
        spending_floor = report.spending_floor,
        sepp = report.sepp_amount,
        "solved plan"
    );
    Ok(report)
}

fn clean(v: f64) -> f64 {
    if v.abs() < RESIDUE { 0.0 } else { v }
}

/// Replays the solved vector through the account and tax rules and assembles the report.
///
/// The tax of every year is recomputed from the withdrawals and must agree with the tax
/// slot the solver settled on.
pub fn interpret(ctx: &PlanContext<'_>, raw: &[f64]) -> Result<PlanReport, PlanError> {
    let x: Vec<f64> = raw.iter().map(|v| clean(*v)).collect();
    let config = ctx.config;
    let layout = &ctx.layout;
    let taxes = &config.taxes;
    let growth = 1.0 + config.return_rate;
    let real = ctx.options.real_dollars;

    let mut after_tax = config.after_tax.balance;
    let mut ira = config.ira.balance;
    let mut roth = config.roth.balance;

    let mut accumulation_years = Vec::with_capacity(layout.work_years());
    for w in 0..layout.work_years() {
        let deflator = if real {
            (1.0 + config.inflation_rate).powi(w as i32)
        } else {
            1.0
        };
        let c_at = x[layout.contribution(w, Account::AfterTax)];
        let c_ira = x[layout.contribution(w, Account::TaxDeferred)];
        let c_roth = x[layout.contribution(w, Account::TaxFree)];
        accumulation_years.push(AccumulationYearResult {
            age: config.start_age + w as u32,
            after_tax_balance: after_tax / deflator,
            after_tax_contribution: c_at / deflator,
            ira_balance: ira / deflator,
            ira_contribution: c_ira / deflator,
            roth_balance: roth / deflator,
            roth_contribution: c_roth / deflator,
        });
        after_tax = (after_tax + c_at) * growth;
        ira = (ira + c_ira) * growth;
        roth = (roth + c_roth) * growth;
    }

    let goal = x[Layout::GOAL];
    let sepp_amount = x[Layout::SEPP];
    let cg_rate = taxes.total_capital_gains_rate();

    let mut retirement_years = Vec::with_capacity(layout.num_years());
    let mut total_spending = 0.0;
    let mut total_tax = 0.0;
    for y in 0..layout.num_years() {
        let age = ctx.age(y);
        let index = ctx.inflation_index(y);
        let w_at = x[layout.withdrawal(y, Account::AfterTax)];
        let w_ira = x[layout.withdrawal(y, Account::TaxDeferred)];
        let w_roth = x[layout.withdrawal(y, Account::TaxFree)];
        let conversion = x[layout.conversion(y)];
        let sepp = sepp_amount * ctx.sepp_rate(y);
        let income = config.schedule.income[y];
        let expense = config.schedule.expense[y];

        let ordinary = w_ira + conversion + sepp + config.schedule.taxable_income[y];
        let taxable = (ordinary - taxes.standard_deduction * index).max(0.0);
        let mut tax = taxes.table.tax(taxable, index) + ctx.gain_fraction(y) * cg_rate * w_at;
        if age < PENALTY_FREE_AGE {
            tax += EARLY_WITHDRAWAL_PENALTY * w_ira;
        }

        let solved = x[layout.tax(y)];
        if (solved - tax).abs() > TAX_CHECK_ABS + TAX_CHECK_REL * tax.abs() {
            return Err(PlanError::InternalInconsistency {
                age,
                solved,
                recomputed: tax,
            });
        }

        let extra = expense - income;
        let spending = w_at + w_ira + w_roth + sepp - tax - extra;
        total_spending += (spending + extra) / index;
        total_tax += tax / index;

        let deflator = if real { index } else { 1.0 };
        retirement_years.push(RetirementYearResult {
            age,
            after_tax_balance: clean(after_tax) / deflator,
            after_tax_withdrawal: w_at / deflator,
            ira_balance: clean(ira) / deflator,
            ira_withdrawal: w_ira / deflator,
            sepp_payout: sepp / deflator,
            roth_balance: clean(roth) / deflator,
            roth_withdrawal: w_roth / deflator,
            roth_conversion: conversion / deflator,
            marginal_rate: taxes.table.marginal_rate(taxable, index),
            tax: tax / deflator,
            spending: spending / deflator,
            extra: extra / deflator,
            income: income / deflator,
            expense: expense / deflator,
        });

        after_tax = (after_tax - w_at) * growth;
        ira = (ira - w_ira - sepp - conversion) * growth;
        roth = (roth - w_roth + conversion) * growth;
    }

    let tax_percent = if total_spending + total_tax > 0.0 {
        100.0 * total_tax / (total_spending + total_tax)
    } else {
        0.0
    };

    Ok(PlanReport {
        spending_floor: goal,
        sepp_amount,
        sepp_payout: sepp_amount / config.sepp.divisor,
        real_dollars: real,
        starting_after_tax: config.after_tax.balance,
        starting_basis: config.after_tax.basis,
        starting_ira: config.ira.balance,
        starting_roth: config.roth.balance,
        accumulation_years,
        retirement_years,
        totals: PlanTotals {
            spending: total_spending,
            tax: total_tax,
            tax_percent,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constraints::{ConstraintSystem, sepp_ring_fence};
    use crate::core::testing::{base_config, set_schedule};
    use crate::core::types::{RothContribution, rmd_divisor};
    use proptest::prelude::{ProptestConfig, prop_assert, proptest};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn solve(config: &PlanConfig, options: &PlanOptions) -> PlanReport {
        solve_plan(config, options).expect("plan should solve")
    }

    fn sepp_on() -> PlanOptions {
        PlanOptions {
            sepp_enabled: true,
            ..PlanOptions::default()
        }
    }

    fn early_retiree_with_ira() -> PlanConfig {
        let mut config = base_config(50, 0, 75);
        config.return_rate = 0.05;
        config.ira.balance = 800_000.0;
        config.after_tax.balance = 100_000.0;
        config.after_tax.basis = 60_000.0;
        config
    }

    /// After-tax money carries the first five years, then seasoned Roth principal takes over.
    #[test]
    fn after_tax_bridges_until_roth_is_seasoned() {
        let r: f64 = 1.03;
        let mut config = base_config(50, 0, 100);
        config.return_rate = r - 1.0;
        config.taxes.capital_gains_rate = 0.0;
        config.after_tax.balance = (0..5).map(|k| 100_000.0 * r.powi(-k)).sum();
        let roth_balance: f64 = (5..50).map(|t| 100_000.0 * r.powi(-t)).sum();
        config.roth.balance = roth_balance;
        config.roth.contributions = vec![RothContribution {
            age: 50,
            amount: roth_balance,
        }];

        let report = solve(&config, &PlanOptions::default());
        assert_close(report.spending_floor, 100_000.0, 0.01);
        for (y, year) in report.retirement_years.iter().enumerate() {
            if y < 5 {
                assert_close(year.after_tax_withdrawal, 100_000.0, 0.05);
                assert_close(year.roth_withdrawal, 0.0, 0.05);
            } else {
                assert_close(year.after_tax_withdrawal, 0.0, 0.05);
                assert_close(year.roth_withdrawal, 100_000.0, 0.05);
            }
            assert_close(year.tax, 0.0, 1e-6);
        }
    }

    #[test]
    fn unaffordable_expenses_are_infeasible() {
        let mut config = base_config(60, 0, 70);
        config.ira.balance = 100_000.0;
        set_schedule(&mut config, |year, s| s.expense[year] = 1e9);
        let err = solve_plan(&config, &PlanOptions::default()).expect_err("cannot be funded");
        assert!(matches!(err, PlanError::ModelInfeasible(_)), "{err:?}");
    }

    #[test]
    fn mismatched_schedule_is_a_config_error() {
        let mut config = base_config(60, 0, 70);
        config.schedule.expense.pop();
        let err = solve_plan(&config, &PlanOptions::default()).expect_err("short schedule");
        assert!(matches!(err, PlanError::Config(_)));
    }

    #[test]
    fn disabled_sepp_has_no_reserve() {
        let report = solve(&early_retiree_with_ira(), &PlanOptions::default());
        assert_eq!(report.sepp_amount, 0.0);
        assert!(report.retirement_years.iter().all(|y| y.sepp_payout == 0.0));
    }

    #[test]
    fn enabling_sepp_never_lowers_the_floor() {
        let config = early_retiree_with_ira();
        let off = solve(&config, &PlanOptions::default());
        let on = solve(&config, &sepp_on());
        assert!(
            on.spending_floor >= off.spending_floor - 1e-6 * off.spending_floor.abs() - 1e-3,
            "on {} < off {}",
            on.spending_floor,
            off.spending_floor
        );
        assert!(on.sepp_amount > 0.0);
        let payout_years = on.retirement_years.iter().filter(|y| y.sepp_payout > 0.0).count();
        assert_eq!(payout_years, 9);
    }

    /// With only IRA money before 59, every unpenalized dollar comes from the reserve, so
    /// the reserve grows until the ring-fence row has no slack left.
    #[test]
    fn ira_only_early_retiree_fills_the_ring_fence() {
        let mut config = base_config(50, 0, 75);
        config.return_rate = 0.05;
        config.ira.balance = 800_000.0;

        let off = solve(&config, &PlanOptions::default());
        let options = sepp_on();
        let ctx = PlanContext::new(&config, &options);
        let x = MicrolpOracle::default()
            .solve(&build_program(&ctx))
            .expect("plan should solve");
        let on = interpret(&ctx, &x).expect("replayed tax agrees");

        assert!(on.sepp_amount > 0.0);
        assert!(
            on.spending_floor > off.spending_floor + 1.0,
            "on {} vs off {}",
            on.spending_floor,
            off.spending_floor
        );

        let mut fence = ConstraintSystem::new(ctx.layout.len());
        sepp_ring_fence(&ctx, &mut fence);
        let row = &fence.upper[0];
        let slack = row.bound - row.row.evaluate(&x);
        assert!(slack >= -1e-6 * row.bound, "ring-fence violated by {}", -slack);
        assert!(slack <= 1e-6 * row.bound, "ring-fence slack {slack}");
    }

    /// Large pre-tax balances reaching RMD age must solve; bounds in the millions against
    /// divisors near 27 once tripped the simplex tolerances.
    #[test]
    fn large_ira_through_rmd_age_solves() {
        let mut config = base_config(55, 0, 90);
        config.return_rate = 0.05;
        config.ira.balance = 500_000.0;
        config.roth.balance = 100_000.0;
        let report = solve(&config, &PlanOptions::default());
        assert!(report.spending_floor > 30_000.0, "{}", report.spending_floor);
        let at_seventy = &report.retirement_years[15];
        assert_eq!(at_seventy.age, 70);
        let divisor = rmd_divisor(70).expect("table starts at 70");
        assert!(at_seventy.ira_withdrawal + 1e-2 >= at_seventy.ira_balance / divisor);
    }

    #[test]
    fn roth_withdrawals_before_59_stay_within_seasoned_principal() {
        let mut config = early_retiree_with_ira();
        config.roth.balance = 40_000.0;
        config.roth.contributions = vec![RothContribution {
            age: 46,
            amount: 30_000.0,
        }];
        let options = PlanOptions {
            weights: crate::core::types::ObjectiveWeights {
                roth_bias: 1e-5,
                ..Default::default()
            },
            ..PlanOptions::default()
        };
        let report = solve(&config, &options);
        let years = &report.retirement_years;
        for y in 0..years.len() {
            if years[y].age >= PENALTY_FREE_AGE {
                break;
            }
            let withdrawn: f64 = years[..=y].iter().map(|r| r.roth_withdrawal).sum();
            let seasoned_conversions: f64 = years[..=y]
                .iter()
                .enumerate()
                .filter(|(t, _)| t + 5 <= y)
                .map(|(_, r)| r.roth_conversion)
                .sum();
            let history: f64 = if years[y].age >= 51 { 30_000.0 } else { 0.0 };
            assert!(
                withdrawn <= seasoned_conversions + history + 1e-3,
                "age {}: withdrew {withdrawn}, seasoned {}",
                years[y].age,
                seasoned_conversions + history
            );
        }
    }

    #[test]
    fn required_distributions_are_taken_from_seventy() {
        let mut config = base_config(66, 0, 90);
        config.return_rate = 0.06;
        config.ira.balance = 1_500_000.0;
        config.roth.balance = 200_000.0;
        let report = solve(&config, &PlanOptions::default());
        for year in &report.retirement_years {
            let Some(divisor) = rmd_divisor(year.age) else {
                continue;
            };
            let draw = year.ira_withdrawal + year.sepp_payout;
            assert!(
                draw + 1e-2 >= year.ira_balance / divisor,
                "age {}: drew {draw} from {}",
                year.age,
                year.ira_balance
            );
        }
    }

    #[test]
    fn interpreter_tax_matches_solved_slots() {
        let mut config = early_retiree_with_ira();
        config.inflation_rate = 0.025;
        set_schedule(&mut config, |year, s| {
            if year >= 12 {
                s.income[year] = 30_000.0;
                s.taxable_income[year] = 25_000.0;
            }
        });
        let options = sepp_on();
        let ctx = PlanContext::new(&config, &options);
        let program = build_program(&ctx);
        let x = MicrolpOracle::default()
            .solve(&program)
            .expect("plan should solve");
        let report = interpret(&ctx, &x).expect("replayed tax agrees");
        for (y, year) in report.retirement_years.iter().enumerate() {
            assert_close(year.tax, x[ctx.layout.tax(y)], TAX_CHECK_ABS + 1e-3);
        }
    }

    #[test]
    fn tampered_tax_slot_is_reported() {
        let config = early_retiree_with_ira();
        let options = PlanOptions::default();
        let ctx = PlanContext::new(&config, &options);
        let mut x = MicrolpOracle::default()
            .solve(&build_program(&ctx))
            .expect("plan should solve");
        x[ctx.layout.tax(3)] += 1_000.0;
        let err = interpret(&ctx, &x).expect_err("mismatch");
        assert!(matches!(err, PlanError::InternalInconsistency { age: 53, .. }));
    }

    #[test]
    fn real_dollars_hold_the_floor_constant() {
        let mut config = early_retiree_with_ira();
        config.inflation_rate = 0.03;
        let options = PlanOptions {
            real_dollars: true,
            ..PlanOptions::default()
        };
        let report = solve(&config, &options);
        assert!(report.real_dollars);
        for year in &report.retirement_years {
            assert!(year.spending + 1e-2 >= report.spending_floor);
        }
    }

    #[test]
    fn work_years_replay_contributions() {
        let mut config = base_config(45, 3, 70);
        config.return_rate = 0.04;
        let report = solve(&config, &PlanOptions::default());
        assert_eq!(report.accumulation_years.len(), 3);
        assert_eq!(report.accumulation_years[2].age, 47);
        assert_eq!(report.retirement_years[0].age, 48);
        let last = &report.accumulation_years[2];
        let first_ira = (last.ira_balance + last.ira_contribution) * 1.04;
        assert_close(report.retirement_years[0].ira_balance, first_ira, 1e-3);
        assert!(report.spending_floor > 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_more_savings_never_lowers_the_floor(
            after_tax in 0.0f64..400_000.0,
            ira in 0.0f64..1_500_000.0,
            roth in 0.0f64..300_000.0,
            account in 0usize..3,
            extra in 1_000.0f64..200_000.0
        ) {
            // runs past 70 so required distributions are in play
            let mut config = base_config(58, 0, 80);
            config.return_rate = 0.04;
            config.after_tax.balance = after_tax;
            config.ira.balance = ira;
            config.roth.balance = roth;
            let base = solve(&config, &PlanOptions::default()).spending_floor;

            match Account::ALL[account] {
                Account::AfterTax => config.after_tax.balance += extra,
                Account::TaxDeferred => config.ira.balance += extra,
                Account::TaxFree => config.roth.balance += extra,
            }
            let more = solve(&config, &PlanOptions::default()).spending_floor;
            prop_assert!(more >= base - 1e-6 * base.abs() - 1e-3, "{more} < {base}");
        }
    }
}
