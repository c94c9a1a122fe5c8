use microlp::{ComparisonOp, OptimizationDirection, Problem, Variable};
use tracing::debug;

use super::constraints::{Constraint, ConstraintSystem};

/// `min cost·x` subject to the constraint system and `x >= 0`.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    pub cost: Vec<f64>,
    pub constraints: ConstraintSystem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleError {
    Infeasible(String),
    NonConvergence(String),
}

/// Anything able to solve a [`LinearProgram`] to optimality.
///
/// Implementations may return interior or vertex solutions; callers clean small residues.
pub trait LpOracle {
    fn solve(&self, program: &LinearProgram) -> Result<Vec<f64>, OracleError>;
}

/// Simplex oracle backed by `microlp`.
///
/// `tolerance` caps the scaled row violation accepted in a returned vector; a vector that
/// misses it is reported as non-convergence rather than handed on.
#[derive(Debug, Clone, Copy)]
pub struct MicrolpOracle {
    pub tolerance: f64,
}

impl Default for MicrolpOracle {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

/// Dollars per model unit inside microlp. Its pivoting tolerances are absolute, so
/// bounds are handed over in thousands and the solution is scaled back to dollars.
const MONEY_UNIT: f64 = 1e3;

/// Rows without terms never reach microlp; one that cannot hold makes the program infeasible.
fn add_rows(
    problem: &mut Problem,
    vars: &[Variable],
    rows: &[Constraint],
    op: ComparisonOp,
) -> Result<(), OracleError> {
    for c in rows {
        let bound = c.bound / MONEY_UNIT;
        let expr: Vec<(Variable, f64)> = c.row.terms().map(|(i, coef)| (vars[i], coef)).collect();
        if expr.is_empty() {
            let holds = match op {
                ComparisonOp::Eq => bound == 0.0,
                ComparisonOp::Le => bound >= 0.0,
                ComparisonOp::Ge => bound <= 0.0,
            };
            if !holds {
                return Err(OracleError::Infeasible(format!(
                    "constant row requires 0 against bound {}",
                    c.bound
                )));
            }
            continue;
        }
        problem.add_constraint(expr, op, bound);
    }
    Ok(())
}

impl LpOracle for MicrolpOracle {
    fn solve(&self, program: &LinearProgram) -> Result<Vec<f64>, OracleError> {
        validate_program(program)?;

        let mut problem = Problem::new(OptimizationDirection::Minimize);
        let vars: Vec<Variable> = program
            .cost
            .iter()
            .map(|&c| problem.add_var(c, (0.0, f64::INFINITY)))
            .collect();
        add_rows(&mut problem, &vars, &program.constraints.upper, ComparisonOp::Le)?;
        add_rows(&mut problem, &vars, &program.constraints.equal, ComparisonOp::Eq)?;

        let solution = problem.solve().map_err(|err| match err {
            microlp::Error::Infeasible => OracleError::Infeasible(err.to_string()),
            _ => OracleError::NonConvergence(err.to_string()),
        })?;
        debug!(objective = solution.objective(), "microlp finished");

        let x: Vec<f64> = vars.iter().map(|&v| solution[v] * MONEY_UNIT).collect();
        check_solution(program, &x, self.tolerance)?;
        Ok(x)
    }
}

pub(crate) fn check_solution(
    program: &LinearProgram,
    x: &[f64],
    tolerance: f64,
) -> Result<(), OracleError> {
    if x.len() != program.cost.len() {
        return Err(OracleError::NonConvergence(format!(
            "solution has {} entries, expected {}",
            x.len(),
            program.cost.len()
        )));
    }
    if let Some(idx) = x.iter().position(|v| !v.is_finite() || *v < -tolerance) {
        return Err(OracleError::NonConvergence(format!(
            "variable {idx} is {} in the returned solution",
            x[idx]
        )));
    }
    let violation = program.constraints.max_violation(x);
    if violation > tolerance {
        return Err(OracleError::NonConvergence(format!(
            "returned solution violates a constraint by {violation:.3e} (tolerance {tolerance:.1e})"
        )));
    }
    Ok(())
}

fn validate_program(program: &LinearProgram) -> Result<(), OracleError> {
    if program.cost.len() != program.constraints.width() {
        return Err(OracleError::NonConvergence(format!(
            "cost vector has {} entries but constraints span {}",
            program.cost.len(),
            program.constraints.width()
        )));
    }
    let rows = program
        .constraints
        .upper
        .iter()
        .chain(&program.constraints.equal);
    for c in rows {
        if !c.bound.is_finite() || c.row.terms().any(|(_, coef)| !coef.is_finite()) {
            return Err(OracleError::NonConvergence(
                "non-finite coefficient in constraint system".to_string(),
            ));
        }
    }
    Ok(())
}
