use serde::Serialize;

use super::error::ConfigError;
use super::tax::TaxTable;

/// Age at which early-withdrawal penalties and the Roth seasoning rule stop applying.
pub const PENALTY_FREE_AGE: u32 = 59;
/// First age with a required minimum distribution.
pub const RMD_START_AGE: u32 = 70;
/// Years a Roth contribution or conversion must age before it can be withdrawn early.
pub const ROTH_SEASONING_YEARS: u32 = 5;
/// Minimum number of years a SEPP schedule must run.
pub const SEPP_MIN_YEARS: u32 = 5;
pub const EARLY_WITHDRAWAL_PENALTY: f64 = 0.10;

/// Uniform lifetime divisors, indexed from age 70.
const RMD_DIVISORS: [f64; 50] = [
    27.4, 26.5, 25.6, 24.7, 23.8, 22.9, 22.0, 21.2, 20.3, 19.5, // 70-79
    18.7, 17.9, 17.1, 16.3, 15.5, 14.8, 14.1, 13.4, 12.7, 12.0, // 80-89
    11.4, 10.8, 10.2, 9.6, 9.1, 8.6, 8.1, 7.6, 7.1, 6.7, // 90-99
    6.3, 5.9, 5.5, 5.2, 4.9, 4.5, 4.2, 3.9, 3.7, 3.4, // 100-109
    3.1, 2.9, 2.6, 2.4, 2.1, 1.9, 1.9, 1.9, 1.9, 1.9, // 110-119
];

pub fn rmd_divisor(age: u32) -> Option<f64> {
    if age < RMD_START_AGE {
        return None;
    }
    let idx = ((age - RMD_START_AGE) as usize).min(RMD_DIVISORS.len() - 1);
    Some(RMD_DIVISORS[idx])
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Account {
    AfterTax,
    TaxDeferred,
    TaxFree,
}

impl Account {
    pub const ALL: [Account; 3] = [Account::AfterTax, Account::TaxDeferred, Account::TaxFree];

    pub(crate) fn offset(self) -> usize {
        match self {
            Account::AfterTax => 0,
            Account::TaxDeferred => 1,
            Account::TaxFree => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxPolicy {
    pub table: TaxTable,
    pub standard_deduction: f64,
    pub capital_gains_rate: f64,
    pub state_capital_gains_rate: f64,
}

impl TaxPolicy {
    pub fn total_capital_gains_rate(&self) -> f64 {
        self.capital_gains_rate + self.state_capital_gains_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulation {
    pub work_years: u32,
    pub max_save: f64,
    pub inflate_caps: bool,
    /// Pre-tax dollars needed per dollar saved into after-tax and Roth accounts.
    pub gross_up: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AfterTaxAccount {
    pub balance: f64,
    pub basis: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxDeferredAccount {
    pub balance: f64,
    pub max_contribution: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RothContribution {
    pub age: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaxFreeAccount {
    pub balance: f64,
    pub max_contribution: f64,
    pub contributions: Vec<RothContribution>,
}

/// External cash flows per retirement year, already inflated to nominal dollars.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schedule {
    pub income: Vec<f64>,
    pub expense: Vec<f64>,
    pub taxable_income: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeppTerms {
    /// Retirement year from which SEPP-reserved money is free again.
    pub first_eligible_year: u32,
    pub divisor: f64,
}

impl SeppTerms {
    pub fn for_retirement_age(retire_age: u32, divisor: f64) -> Self {
        Self {
            first_eligible_year: SEPP_MIN_YEARS.max(PENALTY_FREE_AGE.saturating_sub(retire_age)),
            divisor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanConfig {
    pub start_age: u32,
    pub end_age: u32,
    pub inflation_rate: f64,
    pub return_rate: f64,
    pub taxes: TaxPolicy,
    pub accumulation: Accumulation,
    pub after_tax: AfterTaxAccount,
    pub ira: TaxDeferredAccount,
    pub roth: TaxFreeAccount,
    pub schedule: Schedule,
    pub sepp: SeppTerms,
}

impl PlanConfig {
    pub fn work_years(&self) -> u32 {
        self.accumulation.work_years
    }

    pub fn retire_age(&self) -> u32 {
        self.start_age + self.accumulation.work_years
    }

    pub fn num_years(&self) -> u32 {
        self.end_age.saturating_sub(self.retire_age())
    }

    /// Inflation multiplier for retirement year `year`, measured from the start of the plan.
    pub fn inflation_index(&self, year: u32) -> f64 {
        (1.0 + self.inflation_rate).powi((year + self.work_years()) as i32)
    }

    /// Growth factor of one dollar invested for `years` years.
    pub fn growth(&self, years: u32) -> f64 {
        (1.0 + self.return_rate).powi(years as i32)
    }

    /// Checks the shape invariants the model builder indexes by.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let years = self.num_years() as usize;
        if years == 0 {
            return Err(ConfigError::invalid(
                "endage",
                format!(
                    "{} leaves no retirement years after age {}",
                    self.end_age,
                    self.retire_age()
                ),
            ));
        }
        let schedule = &self.schedule;
        for (name, values) in [
            ("income", &schedule.income),
            ("expense", &schedule.expense),
            ("taxable income", &schedule.taxable_income),
        ] {
            if values.len() != years {
                return Err(ConfigError::invalid(
                    "schedule",
                    format!("{name} covers {} years, plan has {years}", values.len()),
                ));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ConfigError::invalid(
                    "schedule",
                    format!("{name} holds a non-finite amount"),
                ));
            }
        }
        if !(self.sepp.divisor.is_finite() && self.sepp.divisor > 0.0) {
            return Err(ConfigError::invalid("sepp.divisor", "must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub tax_tie_break: f64,
    pub roth_bias: f64,
    pub smoothing: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            tax_tie_break: 1e-4,
            roth_bias: 0.0,
            smoothing: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    pub sepp_enabled: bool,
    pub real_dollars: bool,
    pub weights: ObjectiveWeights,
    pub tolerance: f64,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            sepp_enabled: false,
            real_dollars: false,
            weights: ObjectiveWeights::default(),
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulationYearResult {
    pub age: u32,
    pub after_tax_balance: f64,
    pub after_tax_contribution: f64,
    pub ira_balance: f64,
    pub ira_contribution: f64,
    pub roth_balance: f64,
    pub roth_contribution: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementYearResult {
    pub age: u32,
    pub after_tax_balance: f64,
    pub after_tax_withdrawal: f64,
    pub ira_balance: f64,
    pub ira_withdrawal: f64,
    pub sepp_payout: f64,
    pub roth_balance: f64,
    pub roth_withdrawal: f64,
    pub roth_conversion: f64,
    pub marginal_rate: f64,
    pub tax: f64,
    pub spending: f64,
    pub extra: f64,
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTotals {
    pub spending: f64,
    pub tax: f64,
    pub tax_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub spending_floor: f64,
    pub sepp_amount: f64,
    pub sepp_payout: f64,
    pub real_dollars: bool,
    pub starting_after_tax: f64,
    pub starting_basis: f64,
    pub starting_ira: f64,
    pub starting_roth: f64,
    pub accumulation_years: Vec<AccumulationYearResult>,
    pub retirement_years: Vec<RetirementYearResult>,
    pub totals: PlanTotals,
}
