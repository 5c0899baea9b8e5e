// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Text, table and JSON renderings of a dry run.

use std::io::{self, Write};

use avb_oracle_core::{Emission, Expectation, StepOutcome, StepPlan, StepReport, Watch};
use comfy_table::Table;
use serde::Serialize;

/// Short label for a step outcome.
pub fn outcome_label(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Committed => "committed",
        StepOutcome::Pending => "pending",
        StepOutcome::Failed { .. } => "failed",
    }
}

fn sends(report: &StepReport) -> usize {
    report
        .plan
        .emissions
        .iter()
        .filter(|e| matches!(e, Emission::Send { .. }))
        .count()
}

fn leaves(report: &StepReport) -> usize {
    let awaited: usize = report
        .plan
        .emissions
        .iter()
        .filter_map(|e| match e {
            Emission::Await(tree) => Some(tree.leaves().len()),
            _ => None,
        })
        .sum();
    awaited + report.plan.expected.as_ref().map_or(0, |t| t.leaves().len())
}

fn write_tree<W: Write>(out: &mut W, indent: &str, tree: &Expectation) -> io::Result<()> {
    for line in tree.to_string().lines() {
        writeln!(out, "{indent}{line}")?;
    }
    Ok(())
}

fn write_emissions<W: Write>(out: &mut W, emissions: &[Emission]) -> io::Result<()> {
    for emission in emissions {
        match emission {
            Emission::Send { process, line } => writeln!(out, "  {process} <- {line}")?,
            Emission::Sleep(d) => writeln!(out, "  sleep {}ms", d.as_millis())?,
            Emission::ClearHistory(process) => writeln!(out, "  clear {process}")?,
            Emission::Await(tree) => {
                writeln!(out, "  await")?;
                write_tree(out, "    ", tree)?;
            }
        }
    }
    Ok(())
}

/// Writes the boot block that precedes step 0.
pub fn write_startup<W: Write>(out: &mut W, plan: &StepPlan) -> io::Result<()> {
    writeln!(out, "[startup]")?;
    write_emissions(out, &plan.emissions)
}

/// Writes one step: header, emissions in order, then its prediction.
pub fn write_step<W: Write>(out: &mut W, report: &StepReport) -> io::Result<()> {
    writeln!(out, "[{}] {}", report.index, report.action)?;
    write_emissions(out, &report.plan.emissions)?;
    if let Some(tree) = &report.plan.expected {
        writeln!(out, "  expect")?;
        write_tree(out, "    ", tree)?;
    }
    match &report.outcome {
        StepOutcome::Committed => writeln!(out, "  -- checkpoint")?,
        StepOutcome::Failed { reason } => writeln!(out, "  -- failed: {reason}")?,
        StepOutcome::Pending => {}
    }
    Ok(())
}

/// One row per step.
pub fn summary_table(reports: &[StepReport]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Step", "Action", "Sends", "Leaves", "Outcome"]);
    for report in reports {
        table.add_row(vec![
            report.index.to_string(),
            report.action.to_string(),
            sends(report).to_string(),
            leaves(report).to_string(),
            outcome_label(&report.outcome).to_owned(),
        ]);
    }
    table
}

/// Machine-readable form of a step.
#[derive(Debug, Serialize)]
pub struct StepDoc<'a> {
    /// Position in the resolved plan.
    pub index: usize,
    /// Action in plan syntax.
    pub action: String,
    /// `committed`, `pending` or `failed`.
    pub outcome: &'static str,
    /// Matcher explanation for a failed step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
    /// Effects in order.
    pub emissions: &'a [Emission],
    /// Contribution to the checkpoint batch.
    pub expected: Option<&'a Expectation>,
}

impl<'a> From<&'a StepReport> for StepDoc<'a> {
    fn from(report: &'a StepReport) -> Self {
        let reason = match &report.outcome {
            StepOutcome::Failed { reason } => Some(reason.as_str()),
            _ => None,
        };
        Self {
            index: report.index,
            action: report.action.to_string(),
            outcome: outcome_label(&report.outcome),
            reason,
            emissions: &report.plan.emissions,
            expected: report.plan.expected.as_ref(),
        }
    }
}

/// Machine-readable form of a whole dry run.
#[derive(Debug, Serialize)]
pub struct PredictionDoc<'a> {
    /// Seed random generators were expanded with.
    pub seed: u64,
    /// Boot predictions, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup: Option<&'a [Emission]>,
    /// Checkpoints reached.
    pub checkpoints: usize,
    /// Every step.
    pub steps: Vec<StepDoc<'a>>,
    /// Watches still armed at the end.
    pub armed: Vec<&'a Watch>,
    /// Final confirmed registry, drawn.
    pub state: Vec<String>,
}
