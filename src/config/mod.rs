//! Plan documents as written by users, and their conversion into a [`PlanConfig`].
//!
//! Percentages are written as percents (`2.5` for 2.5 %) and converted to fractions here.
//! Anything a document leaves out falls back to the 2023 married-filing-jointly defaults.

mod ages;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::core::{
    Accumulation, AfterTaxAccount, ConfigError, PlanConfig, RothContribution, Schedule,
    SeppTerms, TaxDeferredAccount, TaxFreeAccount, TaxPolicy, TaxTable,
};

pub use ages::{OPEN_RANGE_END, parse_ages};

pub const DEFAULT_TAX_RATES: [(f64, f64); 7] = [
    (0.0, 10.0),
    (22_000.0, 12.0),
    (89_450.0, 22.0),
    (190_750.0, 24.0),
    (364_200.0, 32.0),
    (462_500.0, 35.0),
    (693_750.0, 37.0),
];
pub const DEFAULT_STANDARD_DEDUCTION: f64 = 27_700.0;
pub const DEFAULT_CAPITAL_GAINS_RATE: f64 = 15.0;
pub const DEFAULT_RETURNS: f64 = 6.0;
pub const DEFAULT_WORK_TAX_RATE: f64 = 25.0;
pub const DEFAULT_IRA_MAX_CONTRIBUTION: f64 = 19_500.0 + 7_000.0 * 2.0;
pub const DEFAULT_ROTH_MAX_CONTRIBUTION: f64 = 7_000.0 * 2.0;
pub const DEFAULT_SEPP_DIVISOR: f64 = 25.0;
const MIN_END_AGE: u32 = 96;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanDocument {
    pub startage: Option<u32>,
    pub endage: Option<u32>,
    pub inflation: Option<f64>,
    pub returns: Option<f64>,
    pub taxes: Option<TaxesSection>,
    pub prep: Option<PrepSection>,
    pub aftertax: Option<AfterTaxSection>,
    #[serde(rename = "IRA", alias = "ira")]
    pub ira: Option<IraSection>,
    pub roth: Option<RothSection>,
    pub sepp: Option<SeppSection>,
    #[serde(default)]
    pub expense: BTreeMap<String, ExpenseEntry>,
    #[serde(default)]
    pub income: BTreeMap<String, IncomeEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaxesSection {
    pub taxrates: Option<Vec<(f64, f64)>>,
    pub stded: Option<f64>,
    pub state_rate: Option<f64>,
    pub state_cg_rate: Option<f64>,
    pub cg_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrepSection {
    pub workyears: Option<u32>,
    pub maxsave: Option<f64>,
    pub inflation: Option<bool>,
    pub tax_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AfterTaxSection {
    pub bal: Option<f64>,
    pub basis: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IraSection {
    pub bal: Option<f64>,
    pub maxcontrib: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RothSection {
    pub bal: Option<f64>,
    pub maxcontrib: Option<f64>,
    /// `[age, amount]` pairs of past contributions and conversions.
    #[serde(default)]
    pub contributions: Vec<(u32, f64)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeppSection {
    pub divisor: Option<f64>,
}

/// An age list written either as a bare number or as a `"N,N-M,N-"` string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AgeSpec {
    Age(u32),
    List(String),
}

impl AgeSpec {
    pub fn ages(&self) -> Result<Vec<u32>, ConfigError> {
        match self {
            AgeSpec::Age(age) => Ok(vec![*age]),
            AgeSpec::List(spec) => parse_ages(spec),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseEntry {
    pub age: AgeSpec,
    pub amount: f64,
    #[serde(default)]
    pub inflation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomeEntry {
    pub age: AgeSpec,
    pub amount: f64,
    #[serde(default)]
    pub inflation: bool,
    #[serde(default)]
    pub tax: bool,
}

pub fn from_toml_str(text: &str) -> Result<PlanDocument, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn from_json_str(text: &str) -> Result<PlanDocument, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Reads a plan document; `.json` files are parsed as JSON, everything else as TOML.
pub fn load_file(path: &Path) -> Result<PlanDocument, ConfigError> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        from_json_str(&text)
    } else {
        from_toml_str(&text)
    }
}

pub fn load_plan(path: &Path) -> Result<PlanConfig, ConfigError> {
    load_file(path)?.into_plan()
}

fn percent(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value <= -100.0 {
        return Err(ConfigError::invalid(
            field,
            format!("{value} is not a usable percentage"),
        ));
    }
    Ok(value / 100.0)
}

fn rate(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !(0.0..100.0).contains(&value) {
        return Err(ConfigError::invalid(
            field,
            format!("{value} is outside [0, 100)"),
        ));
    }
    Ok(value / 100.0)
}

fn amount(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(
            field,
            format!("{value} must be a nonnegative amount"),
        ));
    }
    Ok(value)
}

impl PlanDocument {
    /// Applies defaults, converts percentages and validates the result.
    pub fn into_plan(self) -> Result<PlanConfig, ConfigError> {
        let start_age = self.startage.ok_or(ConfigError::Missing("startage"))?;
        let end_age = match self.endage {
            Some(age) => age,
            None => start_age
                .checked_add(5)
                .map(|min| MIN_END_AGE.max(min))
                .ok_or_else(|| ConfigError::invalid("startage", format!("{start_age} is out of range")))?,
        };
        let inflation_rate = percent("inflation", self.inflation.unwrap_or(0.0))?;
        let return_rate = percent("returns", self.returns.unwrap_or(DEFAULT_RETURNS))?;

        let taxes = self.taxes.unwrap_or_default();
        let state_rate = taxes.state_rate.unwrap_or(0.0);
        let table_pct = taxes
            .taxrates
            .unwrap_or_else(|| DEFAULT_TAX_RATES.to_vec());
        let table: Vec<(f64, f64)> = table_pct
            .iter()
            .map(|&(threshold, rate)| (threshold, rate / 100.0))
            .collect();
        let taxes = TaxPolicy {
            table: TaxTable::new(&table, state_rate / 100.0)?,
            standard_deduction: amount(
                "taxes.stded",
                taxes.stded.unwrap_or(DEFAULT_STANDARD_DEDUCTION),
            )?,
            capital_gains_rate: rate(
                "taxes.cg_rate",
                taxes.cg_rate.unwrap_or(DEFAULT_CAPITAL_GAINS_RATE),
            )?,
            state_capital_gains_rate: rate(
                "taxes.state_cg_rate",
                taxes.state_cg_rate.unwrap_or(state_rate),
            )?,
        };

        let accumulation = match self.prep {
            Some(prep) => Accumulation {
                work_years: prep.workyears.ok_or(ConfigError::Missing("prep.workyears"))?,
                max_save: amount(
                    "prep.maxsave",
                    prep.maxsave.ok_or(ConfigError::Missing("prep.maxsave"))?,
                )?,
                inflate_caps: prep.inflation.unwrap_or(true),
                gross_up: 1.0 + rate("prep.tax_rate", prep.tax_rate.unwrap_or(DEFAULT_WORK_TAX_RATE))?,
            },
            None => Accumulation {
                work_years: 0,
                max_save: 0.0,
                inflate_caps: true,
                gross_up: 1.0 + DEFAULT_WORK_TAX_RATE / 100.0,
            },
        };
        let retire_age = start_age
            .checked_add(accumulation.work_years)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "prep.workyears",
                    format!(
                        "{} work years from age {start_age} is out of range",
                        accumulation.work_years
                    ),
                )
            })?;
        if end_age <= retire_age {
            return Err(ConfigError::invalid(
                "endage",
                format!("{end_age} must be later than the retirement age {retire_age}"),
            ));
        }

        let after_tax = match self.aftertax {
            Some(section) => {
                let balance = amount(
                    "aftertax.bal",
                    section.bal.ok_or(ConfigError::Missing("aftertax.bal"))?,
                )?;
                let basis = amount("aftertax.basis", section.basis.unwrap_or(0.0))?;
                if basis > balance {
                    return Err(ConfigError::invalid(
                        "aftertax.basis",
                        format!("{basis} exceeds the balance {balance}"),
                    ));
                }
                AfterTaxAccount { balance, basis }
            }
            None => AfterTaxAccount {
                balance: 0.0,
                basis: 0.0,
            },
        };

        let ira = match self.ira {
            Some(section) => TaxDeferredAccount {
                balance: amount("IRA.bal", section.bal.ok_or(ConfigError::Missing("IRA.bal"))?)?,
                max_contribution: amount(
                    "IRA.maxcontrib",
                    section.maxcontrib.unwrap_or(DEFAULT_IRA_MAX_CONTRIBUTION),
                )?,
            },
            None => TaxDeferredAccount {
                balance: 0.0,
                max_contribution: DEFAULT_IRA_MAX_CONTRIBUTION,
            },
        };

        let roth = match self.roth {
            Some(section) => {
                let contributions = section
                    .contributions
                    .iter()
                    .map(|&(age, value)| {
                        Ok(RothContribution {
                            age,
                            amount: amount("roth.contributions", value)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                TaxFreeAccount {
                    balance: amount("roth.bal", section.bal.ok_or(ConfigError::Missing("roth.bal"))?)?,
                    max_contribution: amount(
                        "roth.maxcontrib",
                        section.maxcontrib.unwrap_or(DEFAULT_ROTH_MAX_CONTRIBUTION),
                    )?,
                    contributions,
                }
            }
            None => TaxFreeAccount {
                balance: 0.0,
                max_contribution: DEFAULT_ROTH_MAX_CONTRIBUTION,
                contributions: Vec::new(),
            },
        };

        let divisor = self
            .sepp
            .and_then(|s| s.divisor)
            .unwrap_or(DEFAULT_SEPP_DIVISOR);
        if !divisor.is_finite() || divisor <= 0.0 {
            return Err(ConfigError::invalid(
                "sepp.divisor",
                format!("{divisor} must be positive"),
            ));
        }

        let mut config = PlanConfig {
            start_age,
            end_age,
            inflation_rate,
            return_rate,
            taxes,
            accumulation,
            after_tax,
            ira,
            roth,
            schedule: Schedule::default(),
            sepp: SeppTerms::for_retirement_age(retire_age, divisor),
        };
        config.schedule = build_schedule(&config, &self.expense, &self.income)?;

        debug!(
            start_age,
            retire_age,
            end_age,
            expenses = self.expense.len(),
            incomes = self.income.len(),
            "loaded plan document"
        );
        Ok(config)
    }
}

/// Places every expense and income entry on the retirement years its ages cover.
fn build_schedule(
    config: &PlanConfig,
    expenses: &BTreeMap<String, ExpenseEntry>,
    incomes: &BTreeMap<String, IncomeEntry>,
) -> Result<Schedule, ConfigError> {
    let years = config.num_years() as usize;
    let retire_age = config.retire_age();
    let mut schedule = Schedule {
        income: vec![0.0; years],
        expense: vec![0.0; years],
        taxable_income: vec![0.0; years],
    };

    let placements = |spec: &AgeSpec, value: f64, inflate: bool| -> Result<Vec<(usize, f64)>, ConfigError> {
        let ages = spec.ages()?;
        Ok(ages
            .into_iter()
            .filter(|age| *age >= retire_age)
            .map(|age| (age - retire_age) as usize)
            .filter(|year| *year < years)
            .map(|year| {
                let scale = if inflate {
                    config.inflation_index(year as u32)
                } else {
                    1.0
                };
                (year, value * scale)
            })
            .collect())
    };

    for entry in expenses.values() {
        for (year, value) in placements(&entry.age, entry.amount, entry.inflation)? {
            schedule.expense[year] += value;
        }
    }
    for entry in incomes.values() {
        for (year, value) in placements(&entry.age, entry.amount, entry.inflation)? {
            schedule.income[year] += value;
            if entry.tax {
                schedule.taxable_income[year] += value;
            }
        }
    }
    Ok(schedule)
}
