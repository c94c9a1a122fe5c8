use super::types::{Account, PlanConfig, PlanOptions};

const FIXED_SLOTS: usize = 2;
const ACCUMULATION_STRIDE: usize = 3;
/// Three withdrawals, one conversion, one deduction slot.
const RETIREMENT_LEADING_SLOTS: usize = 5;
/// State slot and tax-total slot after the brackets.
const RETIREMENT_TRAILING_SLOTS: usize = 2;

/// Positions of every quantity in the flat decision vector.
///
/// ```text
/// [G, P | (at, ira, roth) x work_years | (at, ira, roth, conv, ded, b_0..b_n, state, tax) x num_years]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    work_years: usize,
    num_years: usize,
    bracket_count: usize,
}

impl Layout {
    pub const GOAL: usize = 0;
    pub const SEPP: usize = 1;

    pub fn new(work_years: u32, num_years: u32, bracket_count: usize) -> Self {
        Self {
            work_years: work_years as usize,
            num_years: num_years as usize,
            bracket_count,
        }
    }

    pub fn work_years(&self) -> usize {
        self.work_years
    }

    pub fn num_years(&self) -> usize {
        self.num_years
    }

    pub fn bracket_count(&self) -> usize {
        self.bracket_count
    }

    pub fn retirement_stride(&self) -> usize {
        RETIREMENT_LEADING_SLOTS + self.bracket_count + RETIREMENT_TRAILING_SLOTS
    }

    fn retirement_base(&self, year: usize) -> usize {
        debug_assert!(year < self.num_years, "retirement year {year} out of range");
        FIXED_SLOTS + ACCUMULATION_STRIDE * self.work_years + self.retirement_stride() * year
    }

    pub fn contribution(&self, year: usize, account: Account) -> usize {
        debug_assert!(year < self.work_years, "work year {year} out of range");
        FIXED_SLOTS + ACCUMULATION_STRIDE * year + account.offset()
    }

    pub fn withdrawal(&self, year: usize, account: Account) -> usize {
        self.retirement_base(year) + account.offset()
    }

    pub fn conversion(&self, year: usize) -> usize {
        self.retirement_base(year) + 3
    }

    pub fn deduction(&self, year: usize) -> usize {
        self.retirement_base(year) + 4
    }

    pub fn bracket(&self, year: usize, bracket: usize) -> usize {
        debug_assert!(bracket < self.bracket_count);
        self.retirement_base(year) + RETIREMENT_LEADING_SLOTS + bracket
    }

    pub fn state(&self, year: usize) -> usize {
        self.retirement_base(year) + RETIREMENT_LEADING_SLOTS + self.bracket_count
    }

    pub fn tax(&self, year: usize) -> usize {
        self.state(year) + 1
    }

    pub fn len(&self) -> usize {
        FIXED_SLOTS
            + ACCUMULATION_STRIDE * self.work_years
            + self.retirement_stride() * self.num_years
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Everything one solve derives from its configuration.
///
/// Built once per run and handed by reference to the constraint generator, the objective
/// builder and the interpreter so none of them recomputes offsets on its own.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub config: &'a PlanConfig,
    pub options: &'a PlanOptions,
    pub layout: Layout,
    pub retire_age: u32,
    /// Retirement years that pay out SEPP income.
    pub sepp_years: usize,
}

impl<'a> PlanContext<'a> {
    pub fn new(config: &'a PlanConfig, options: &'a PlanOptions) -> Self {
        let layout = Layout::new(
            config.work_years(),
            config.num_years(),
            config.taxes.table.len(),
        );
        let sepp_years = (config.sepp.first_eligible_year as usize).min(layout.num_years());
        Self {
            config,
            options,
            layout,
            retire_age: config.retire_age(),
            sepp_years,
        }
    }

    pub fn age(&self, year: usize) -> u32 {
        self.retire_age + year as u32
    }

    /// SEPP payout per dollar of the SEPP variable in retirement year `year`.
    pub fn sepp_rate(&self, year: usize) -> f64 {
        if year < self.sepp_years {
            1.0 / self.config.sepp.divisor
        } else {
            0.0
        }
    }

    pub fn inflation_index(&self, year: usize) -> f64 {
        self.config.inflation_index(year as u32)
    }

    pub fn growth(&self, years: usize) -> f64 {
        self.config.growth(years as u32)
    }

    /// Taxable share of an after-tax withdrawal in retirement year `year`.
    pub fn gain_fraction(&self, year: usize) -> f64 {
        let account = &self.config.after_tax;
        if account.basis <= 0.0 || account.balance <= 0.0 {
            return 1.0;
        }
        let grown = account.balance * self.growth(year + self.layout.work_years());
        (1.0 - account.basis / grown).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};
    use std::collections::HashSet;

    #[test]
    fn offsets_follow_documented_order() {
        let layout = Layout::new(2, 3, 4);
        assert_eq!(layout.retirement_stride(), 11);
        assert_eq!(layout.contribution(0, Account::AfterTax), 2);
        assert_eq!(layout.contribution(1, Account::TaxFree), 7);
        assert_eq!(layout.withdrawal(0, Account::AfterTax), 8);
        assert_eq!(layout.conversion(0), 11);
        assert_eq!(layout.deduction(0), 12);
        assert_eq!(layout.bracket(0, 0), 13);
        assert_eq!(layout.state(0), 17);
        assert_eq!(layout.tax(0), 18);
        assert_eq!(layout.withdrawal(1, Account::AfterTax), 19);
        assert_eq!(layout.tax(2), layout.len() - 1);
    }

    proptest! {
        #[test]
        fn prop_every_slot_is_unique_and_in_range(
            work_years in 0u32..6,
            num_years in 1u32..8,
            bracket_count in 1usize..9
        ) {
            let layout = Layout::new(work_years, num_years, bracket_count);
            let expected = 2
                + 3 * work_years as usize
                + (7 + bracket_count) * num_years as usize;
            prop_assert_eq!(layout.len(), expected);

            let mut seen = HashSet::new();
            seen.insert(Layout::GOAL);
            seen.insert(Layout::SEPP);
            for w in 0..work_years as usize {
                for account in Account::ALL {
                    prop_assert!(seen.insert(layout.contribution(w, account)));
                }
            }
            for y in 0..num_years as usize {
                for account in Account::ALL {
                    prop_assert!(seen.insert(layout.withdrawal(y, account)));
                }
                prop_assert!(seen.insert(layout.conversion(y)));
                prop_assert!(seen.insert(layout.deduction(y)));
                for k in 0..bracket_count {
                    prop_assert!(seen.insert(layout.bracket(y, k)));
                }
                prop_assert!(seen.insert(layout.state(y)));
                prop_assert!(seen.insert(layout.tax(y)));
            }
            prop_assert_eq!(seen.len(), layout.len());
            prop_assert!(seen.iter().all(|&idx| idx < layout.len()));
        }
    }
}
