use std::fmt::{self, Write};

use anyhow::Context;

use crate::core::PlanReport;

/// Solver noise tolerated below a round figure before flooring.
const FLOOR_SNAP: f64 = 1e-4;

fn thousands(value: f64) -> f64 {
    value / 1000.0
}

fn floor_snapped(value: f64) -> f64 {
    (value + FLOOR_SNAP).floor()
}

fn round_down_to_hundred(value: f64) -> f64 {
    ((value + FLOOR_SNAP) / 100.0).floor() * 100.0
}

/// Fixed-width table of the plan, amounts in thousands.
pub fn render_table(report: &PlanReport) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_table(&mut out, report)?;
    Ok(out)
}

fn write_table(out: &mut String, report: &PlanReport) -> fmt::Result {
    let sepp = round_down_to_hundred(report.sepp_amount);
    writeln!(
        out,
        "Yearly spending <= {:.0}",
        round_down_to_hundred(report.spending_floor)
    )?;
    writeln!(
        out,
        "SEPP amount = {sepp:.0} ({:.0} per year)",
        report.sepp_payout
    )?;
    if report.real_dollars {
        writeln!(out, "(amounts in start-of-plan dollars)")?;
    }
    writeln!(out)?;

    if !report.accumulation_years.is_empty() {
        writeln!(
            out,
            " age {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "save", "+save", "IRA", "+IRA", "Roth", "+Roth"
        )?;
        for year in &report.accumulation_years {
            writeln!(
                out,
                " {:>3}: {:>5.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0}",
                year.age,
                thousands(year.after_tax_balance),
                thousands(year.after_tax_contribution),
                thousands(year.ira_balance),
                thousands(year.ira_contribution),
                thousands(year.roth_balance),
                thousands(year.roth_contribution),
            )?;
        }
        writeln!(out)?;
    }

    writeln!(
        out,
        " age {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}",
        "save", "-save", "IRA", "-IRA", "SEPP", "Roth", "-Roth", "IRA2R", "rate", "tax", "spend",
        "extra"
    )?;
    for year in &report.retirement_years {
        writeln!(
            out,
            " {:>3}: {:>5.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0} {:>6.0}",
            year.age,
            thousands(year.after_tax_balance),
            thousands(year.after_tax_withdrawal),
            thousands(year.ira_balance),
            thousands(year.ira_withdrawal),
            thousands(year.sepp_payout),
            thousands(year.roth_balance),
            thousands(year.roth_withdrawal),
            thousands(year.roth_conversion),
            year.marginal_rate * 100.0,
            thousands(year.tax),
            thousands(year.spending),
            thousands(year.extra),
        )?;
    }

    let totals = &report.totals;
    writeln!(out)?;
    writeln!(out, "total spending: {:.0}", totals.spending)?;
    writeln!(
        out,
        "total tax: {:.0} ({:.1}%)",
        totals.tax, totals.tax_percent
    )
}

fn whole(value: f64) -> String {
    format!("{value:.0}")
}

/// Withdrawal schedule as CSV: four header lines with the goal and starting balances,
/// then one row per retirement year.
pub fn render_csv(report: &PlanReport) -> anyhow::Result<String> {
    // the header block has rows of differing widths
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(["spend goal".to_string(), whole(floor_snapped(report.spending_floor))])?;
    writer.write_record([
        "savings".to_string(),
        whole(report.starting_after_tax),
        whole(report.starting_basis),
    ])?;
    writer.write_record(["ira".to_string(), whole(report.starting_ira)])?;
    writer.write_record(["roth".to_string(), whole(report.starting_roth)])?;
    writer.write_record(["age", "fsave", "fIRA", "fROTH", "IRA2R", "income", "expense"])?;
    for year in &report.retirement_years {
        writer.write_record([
            year.age.to_string(),
            whole(year.after_tax_withdrawal),
            whole(year.ira_withdrawal),
            whole(year.roth_withdrawal),
            whole(year.roth_conversion),
            whole(year.income),
            whole(year.expense),
        ])?;
    }
    let bytes = writer.into_inner().context("flushing CSV output")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}
