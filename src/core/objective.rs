use tracing::warn;

use super::layout::{Layout, PlanContext};
use super::types::Account;

/// Largest weight a secondary term may carry against the unit weight on the spending floor.
pub const MAX_SECONDARY_WEIGHT: f64 = 1e-4;

fn secondary(name: &str, weight: f64) -> f64 {
    if !weight.is_finite() || weight < 0.0 {
        warn!(term = name, weight, "ignoring invalid objective weight");
        return 0.0;
    }
    if weight > MAX_SECONDARY_WEIGHT {
        warn!(term = name, weight, cap = MAX_SECONDARY_WEIGHT, "clamping objective weight");
        return MAX_SECONDARY_WEIGHT;
    }
    weight
}

/// Cost vector for `min c·x`: maximize the floor, then break ties by the secondary terms.
///
/// Secondary terms are deflated to start-of-plan dollars so a dollar counts the same in
/// every year.
pub fn build_objective(ctx: &PlanContext<'_>) -> Vec<f64> {
    let layout = &ctx.layout;
    let weights = &ctx.options.weights;
    let tie_break = secondary("tax_tie_break", weights.tax_tie_break);
    let roth_bias = secondary("roth_bias", weights.roth_bias);
    let smoothing = secondary("smoothing", weights.smoothing);

    let mut cost = vec![0.0; layout.len()];
    cost[Layout::GOAL] = -1.0;

    for y in 0..layout.num_years() {
        let deflator = 1.0 / ctx.inflation_index(y);
        cost[layout.tax(y)] += (tie_break + smoothing) * deflator;
        cost[layout.withdrawal(y, Account::TaxFree)] -= roth_bias * deflator;
        for account in Account::ALL {
            cost[layout.withdrawal(y, account)] -= smoothing * deflator;
        }
    }
    cost
}
