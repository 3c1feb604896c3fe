//! Output formatting for `plan` and `analyze`
//!
//! JSON for machines and human-readable text for terminals. Both formatters
//! take already-computed plans and reports; nothing here touches a port.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

use crate::batch::Batch;
use crate::pipeline::{FileOutcome, PipelineReport};
use crate::unit::{AggregateKey, LineRange, UnitGraph, UnitId, UnitKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Human,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitView {
    pub id: UnitId,
    pub kind: UnitKind,
    pub range: LineRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tokens: usize,
    pub analyzable: bool,
    pub leaf_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateKey>,
}

/// Units and batches planned for one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePlan {
    pub file: String,
    pub token_limit: usize,
    pub units: Vec<UnitView>,
    pub batches: Vec<Batch>,
}

impl FilePlan {
    pub fn new(file: impl Into<String>, token_limit: usize, graph: &UnitGraph, batches: Vec<Batch>) -> Self {
        let units = graph
            .units()
            .iter()
            .map(|unit| UnitView {
                id: unit.id,
                kind: unit.kind,
                range: unit.range,
                name: unit.name.clone(),
                tokens: unit.token_weight,
                analyzable: unit.analyzable,
                leaf_data: unit.is_leaf_data_unit,
                aggregate: unit.aggregate,
            })
            .collect();
        Self {
            file: file.into(),
            token_limit,
            units,
            batches,
        }
    }
}

#[derive(Serialize)]
struct OutcomeView<'a> {
    status: &'static str,
    #[serde(flatten)]
    report: Option<&'a PipelineReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a FileOutcome> for OutcomeView<'a> {
    fn from(outcome: &'a FileOutcome) -> Self {
        match &outcome.result {
            Ok(report) => Self {
                status: "ok",
                report: Some(report),
                file: None,
                error: None,
            },
            Err(err) => Self {
                status: "failed",
                report: None,
                file: Some(&outcome.file),
                error: Some(err.to_string()),
            },
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plans(&self, plans: &[FilePlan]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(plans).context("Failed to serialize plans to JSON")
            }
            OutputFormat::Human => Ok(plans
                .iter()
                .map(format_plan_human)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }

    pub fn format_outcomes(&self, outcomes: &[FileOutcome]) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let views: Vec<OutcomeView<'_>> = outcomes.iter().map(OutcomeView::from).collect();
                serde_json::to_string_pretty(&views).context("Failed to serialize reports to JSON")
            }
            OutputFormat::Human => Ok(outcomes
                .iter()
                .map(format_outcome_human)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}

fn format_plan_human(plan: &FilePlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", plan.file);
    let _ = writeln!(
        out,
        "  {} units, {} batches (token limit {})",
        plan.units.len(),
        plan.batches.len(),
        plan.token_limit
    );

    let _ = writeln!(out, "\n  Units:");
    for unit in &plan.units {
        let mut flags = Vec::new();
        if !unit.analyzable {
            flags.push("skipped");
        }
        if unit.leaf_data {
            flags.push("data");
        }
        let _ = writeln!(
            out,
            "    {:<5} {:<12} lines {:<9} {:>6} tokens{}{}",
            unit.id.to_string(),
            unit.kind.as_str(),
            unit.range.to_string(),
            unit.tokens,
            unit.name
                .as_deref()
                .map(|name| format!("  {}", name))
                .unwrap_or_default(),
            if flags.is_empty() {
                String::new()
            } else {
                format!("  [{}]", flags.join(", "))
            }
        );
    }

    let _ = writeln!(out, "\n  Batches:");
    for batch in &plan.batches {
        let ids: Vec<String> = batch.units.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "    {:<5} {}", batch.id.to_string(), ids.join(" "));
    }
    out
}

fn format_outcome_human(outcome: &FileOutcome) -> String {
    let mut out = String::new();
    match &outcome.result {
        Ok(report) => {
            let status = if report.is_clean() { "✓" } else { "!" };
            let _ = writeln!(out, "{} {}", status, report.file);
            let _ = writeln!(
                out,
                "  Units:      {} ({} analyzable)",
                report.units, report.analyzable_units
            );
            let _ = writeln!(
                out,
                "  Batches:    {}/{} applied, {} degraded",
                report.applied_batches,
                report.batches,
                report.analysis_errors()
            );
            let _ = writeln!(
                out,
                "  Aggregates: {}/{} finalized",
                report.finalized_aggregates, report.aggregates
            );
            let _ = writeln!(out, "  Duration:   {:.2}s", report.duration.as_secs_f64());

            for degraded in &report.degraded {
                let _ = writeln!(out, "  ! batch {}: {}", degraded.batch_id, degraded.error);
            }
            for failure in &report.aggregation_failures {
                let _ = writeln!(
                    out,
                    "  ! aggregate {} ({}): {}",
                    failure.key, failure.name, failure.error
                );
            }
        }
        Err(err) => {
            let _ = writeln!(out, "✗ {}", outcome.file);
            for line in err.help_message().lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
    }
    out
}
