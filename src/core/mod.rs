mod constraints;
mod engine;
mod error;
mod layout;
mod objective;
mod solver;
mod tax;
#[cfg(test)]
mod testing;
mod types;

pub use constraints::{Constraint, ConstraintSystem, Row, build_constraints};
pub use engine::{build_program, interpret, run_plan, solve_plan};
pub use error::{ConfigError, PlanError};
pub use layout::{Layout, PlanContext};
pub use objective::{MAX_SECONDARY_WEIGHT, build_objective};
pub use solver::{LinearProgram, LpOracle, MicrolpOracle, OracleError};
pub use tax::{Bracket, TaxTable};
pub use types::{
    Account, Accumulation, AccumulationYearResult, AfterTaxAccount, EARLY_WITHDRAWAL_PENALTY,
    ObjectiveWeights, PENALTY_FREE_AGE, PlanConfig, PlanOptions, PlanReport, PlanTotals,
    RMD_START_AGE, ROTH_SEASONING_YEARS, RetirementYearResult, RothContribution, SEPP_MIN_YEARS,
    Schedule, SeppTerms, TaxDeferredAccount, TaxFreeAccount, TaxPolicy, rmd_divisor,
};
