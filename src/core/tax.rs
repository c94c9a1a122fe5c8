use serde::Serialize;

use super::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bracket {
    pub threshold: f64,
    pub rate: f64,
}

/// Progressive income-tax schedule with an explicit zero-rate bracket at the front.
///
/// Thresholds are stated in start-of-plan dollars and scaled per year by the caller's
/// inflation multiplier; rates never scale. The flat state rate rides on top of every
/// bracket except the synthetic one.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxTable {
    brackets: Vec<Bracket>,
    state_rate: f64,
}

impl TaxTable {
    /// Builds a table from `(threshold, rate)` pairs given as fractions, lowest first.
    pub fn new(pairs: &[(f64, f64)], state_rate: f64) -> Result<Self, ConfigError> {
        if pairs.is_empty() {
            return Err(ConfigError::invalid("taxes.taxrates", "must not be empty"));
        }
        if !(0.0..1.0).contains(&state_rate) {
            return Err(ConfigError::invalid(
                "taxes.state_rate",
                format!("{} is outside [0, 100)", state_rate * 100.0),
            ));
        }

        let mut brackets = Vec::with_capacity(pairs.len() + 1);
        brackets.push(Bracket {
            threshold: 0.0,
            rate: 0.0,
        });
        for (idx, &(threshold, rate)) in pairs.iter().enumerate() {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::invalid(
                    "taxes.taxrates",
                    format!("threshold {threshold} must be a nonnegative number"),
                ));
            }
            if !(0.0..1.0).contains(&rate) {
                return Err(ConfigError::invalid(
                    "taxes.taxrates",
                    format!("rate {} is outside [0, 100)", rate * 100.0),
                ));
            }
            if idx > 0 {
                let (prev_threshold, prev_rate) = pairs[idx - 1];
                if threshold <= prev_threshold {
                    return Err(ConfigError::invalid(
                        "taxes.taxrates",
                        format!("thresholds must increase ({prev_threshold} then {threshold})"),
                    ));
                }
                if rate < prev_rate {
                    return Err(ConfigError::invalid(
                        "taxes.taxrates",
                        "rates must not decrease from one bracket to the next",
                    ));
                }
            }
            brackets.push(Bracket { threshold, rate });
        }

        Ok(Self {
            brackets,
            state_rate,
        })
    }

    /// Number of brackets, synthetic one included.
    pub fn len(&self) -> usize {
        self.brackets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    pub fn state_rate(&self) -> f64 {
        self.state_rate
    }

    pub fn federal_rate(&self, bracket: usize) -> f64 {
        self.brackets[bracket].rate
    }

    /// Federal plus state rate for `bracket`.
    pub fn combined_rate(&self, bracket: usize) -> f64 {
        if bracket == 0 {
            self.brackets[0].rate
        } else {
            self.brackets[bracket].rate + self.state_rate
        }
    }

    /// Width of `bracket` at the given threshold scale; `None` for the open top bracket.
    pub fn capacity(&self, bracket: usize, scale: f64) -> Option<f64> {
        self.brackets
            .get(bracket + 1)
            .map(|next| (next.threshold - self.brackets[bracket].threshold) * scale)
    }

    /// Tax owed on income reaching exactly each bracket's threshold.
    pub fn bases(&self, scale: f64) -> Vec<f64> {
        let mut bases = Vec::with_capacity(self.brackets.len());
        let mut acc = 0.0;
        bases.push(acc);
        for k in 1..self.brackets.len() {
            let width = (self.brackets[k].threshold - self.brackets[k - 1].threshold) * scale;
            acc += width * self.combined_rate(k - 1);
            bases.push(acc);
        }
        bases
    }

    fn bracket_index(&self, income: f64, scale: f64) -> usize {
        self.brackets
            .iter()
            .rposition(|b| b.threshold * scale <= income)
            .unwrap_or(0)
    }

    /// Combined federal and state tax on ordinary income already net of the deduction.
    pub fn tax(&self, income: f64, scale: f64) -> f64 {
        if income <= 0.0 {
            return 0.0;
        }
        let k = self.bracket_index(income, scale);
        let base = self.bases(scale)[k];
        base + (income - self.brackets[k].threshold * scale) * self.combined_rate(k)
    }

    /// Combined marginal rate that applies to the last dollar of `income`.
    pub fn marginal_rate(&self, income: f64, scale: f64) -> f64 {
        if income <= 0.0 {
            return 0.0;
        }
        self.combined_rate(self.bracket_index(income, scale))
    }

    /// Splits `income` across brackets, lowest first.
    ///
    /// This is the allocation the linear program settles on: the slots sum to `income` and
    /// weighting each by its combined rate reproduces [`TaxTable::tax`].
    pub fn decompose(&self, income: f64, scale: f64) -> Vec<f64> {
        let mut remaining = income.max(0.0);
        (0..self.brackets.len())
            .map(|k| {
                let take = match self.capacity(k, scale) {
                    Some(cap) => remaining.min(cap),
                    None => remaining,
                };
                remaining -= take;
                take
            })
            .collect()
    }
}
