//! Case outcomes, the aggregated eval report, and report sinks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use metacoder_core::{CoderIdentity, EvalCase, ExecutionResult, InvocationError, ModelSpec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MetricError;
use crate::metrics::MetricResult;

/// Case runner state machine phases, recorded in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Locked,
    Invoking,
    Scoring,
    Done,
    Aborted,
}

/// First reason a triple did not score cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortCause {
    LockTimeout { waited_ms: u64 },
    Invocation { error: InvocationError },
    Scoring { metric: String, error: MetricError },
    UnknownCoder { coder: String },
    Workspace { detail: String },
    Cancelled,
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortCause::LockTimeout { waited_ms } => {
                write!(f, "lock timeout after {waited_ms}ms")
            }
            AbortCause::Invocation { error } => write!(f, "invocation error: {error}"),
            AbortCause::Scoring { metric, error } => write!(f, "metric {metric}: {error}"),
            AbortCause::UnknownCoder { coder } => write!(f, "coder not registered: {coder}"),
            AbortCause::Workspace { detail } => write!(f, "workspace error: {detail}"),
            AbortCause::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Scored,
    Aborted { cause: AbortCause },
    Unsupported { reason: String },
}

impl OutcomeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeStatus::Scored => "scored",
            OutcomeStatus::Aborted { .. } => "aborted",
            OutcomeStatus::Unsupported { .. } => "unsupported",
        }
    }
}

/// Result of one (coder, model, case) triple. Never mutated once reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub coder: CoderIdentity,
    pub model: ModelSpec,
    pub case: EvalCase,
    pub execution: ExecutionResult,
    /// Exactly one entry per metric the case names, in case order.
    pub metrics: Vec<MetricResult>,
    pub status: OutcomeStatus,
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CaseOutcome {
    pub fn is_scored(&self) -> bool {
        matches!(self.status, OutcomeStatus::Scored)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, OutcomeStatus::Aborted { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.status, OutcomeStatus::Unsupported { .. })
    }

    pub fn abort_cause(&self) -> Option<&AbortCause> {
        match &self.status {
            OutcomeStatus::Aborted { cause } => Some(cause),
            _ => None,
        }
    }

    /// Scored with every metric passing.
    pub fn passed(&self) -> bool {
        self.is_scored() && self.metrics.iter().all(|m| m.passed)
    }

    pub fn metrics_passed(&self) -> usize {
        self.metrics.iter().filter(|m| m.passed).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassRate {
    pub passed: usize,
    pub total: usize,
    pub rate: f64,
}

impl PassRate {
    fn record(&mut self, passed: bool) {
        self.total += 1;
        if passed {
            self.passed += 1;
        }
        self.rate = self.passed as f64 / self.total as f64;
    }
}

/// Aggregate statistics. Unsupported outcomes are excluded from pass rates;
/// aborted outcomes count as failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub scored: usize,
    pub aborted: usize,
    pub unsupported: usize,
    pub by_coder: BTreeMap<String, PassRate>,
    pub by_model: BTreeMap<String, PassRate>,
    pub by_metric: BTreeMap<String, PassRate>,
}

impl ReportSummary {
    pub fn from_outcomes(outcomes: &[CaseOutcome]) -> Self {
        let mut summary = ReportSummary {
            total: outcomes.len(),
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Scored => summary.scored += 1,
                OutcomeStatus::Aborted { .. } => summary.aborted += 1,
                OutcomeStatus::Unsupported { .. } => {
                    summary.unsupported += 1;
                    continue;
                }
            }

            let passed = outcome.passed();
            summary
                .by_coder
                .entry(outcome.coder.to_string())
                .or_default()
                .record(passed);
            summary
                .by_model
                .entry(outcome.model.label())
                .or_default()
                .record(passed);
            for metric in &outcome.metrics {
                summary
                    .by_metric
                    .entry(metric.metric.clone())
                    .or_default()
                    .record(metric.passed);
            }
        }
        summary
    }
}

/// Ordered outcomes of one matrix run plus summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub run_id: Uuid,
    pub plan_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    outcomes: Vec<CaseOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReportSummary>,
    #[serde(default)]
    pub cancelled: bool,
}

impl EvalReport {
    pub fn new(plan_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_name: plan_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            summary: None,
            cancelled: false,
        }
    }

    /// Append an outcome. Outcomes already in the report are never touched.
    pub fn push(&mut self, outcome: CaseOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[CaseOutcome] {
        &self.outcomes
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Compute the summary and stamp the finish time.
    pub fn finalize(&mut self) {
        self.summary = Some(ReportSummary::from_outcomes(&self.outcomes));
        self.finished_at = Some(Utc::now());
    }

    pub fn find(&self, coder: CoderIdentity, model: &str, case: &str) -> Option<&CaseOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.coder == coder && o.model.label() == model && o.case.name == case)
    }
}

/// Destination for a finalized report.
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &EvalReport) -> anyhow::Result<()>;
}

/// Writes the report as pretty JSON.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonFileSink {
    fn publish(&self, report: &EvalReport) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(report).context("serialize eval report")?;
        write_file(&self.path, &content)
    }
}

/// Writes a Markdown summary table.
#[derive(Debug, Clone)]
pub struct MarkdownSummarySink {
    path: PathBuf,
}

impl MarkdownSummarySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for MarkdownSummarySink {
    fn publish(&self, report: &EvalReport) -> anyhow::Result<()> {
        write_file(&self.path, &render_summary_md(report))
    }
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a Markdown summary for PR comments or CI job output.
pub fn render_summary_md(report: &EvalReport) -> String {
    let summary = report
        .summary
        .clone()
        .unwrap_or_else(|| ReportSummary::from_outcomes(report.outcomes()));

    let mut out = String::new();
    out.push_str(&format!("# Eval Report: {}\n\n", report.plan_name));
    if report.cancelled {
        out.push_str("> Run was cancelled; results are partial.\n\n");
    }
    out.push_str(&format!(
        "- outcomes: {}\n- scored: {}\n- aborted: {}\n- unsupported: {}\n\n",
        summary.total, summary.scored, summary.aborted, summary.unsupported
    ));

    for (title, rates) in [
        ("Coder", &summary.by_coder),
        ("Model", &summary.by_model),
        ("Metric", &summary.by_metric),
    ] {
        if rates.is_empty() {
            continue;
        }
        out.push_str(&format!("## By {}\n\n| {} | passed | total | rate |\n|---|---|---|---|\n", title, title.to_lowercase()));
        for (key, rate) in rates {
            out.push_str(&format!(
                "| `{}` | {} | {} | {:.1}% |\n",
                key,
                rate.passed,
                rate.total,
                rate.rate * 100.0
            ));
        }
        out.push('\n');
    }

    let problems: Vec<&CaseOutcome> = report
        .outcomes()
        .iter()
        .filter(|o| !o.is_scored())
        .collect();
    if !problems.is_empty() {
        out.push_str("## Not Scored\n\n");
        for o in problems {
            let why = match &o.status {
                OutcomeStatus::Aborted { cause } => cause.to_string(),
                OutcomeStatus::Unsupported { reason } => format!("unsupported: {reason}"),
                OutcomeStatus::Scored => continue,
            };
            out.push_str(&format!(
                "- `{}` / `{}` / `{}`: {}\n",
                o.coder,
                o.model.label(),
                o.case.name,
                why
            ));
        }
    }
    out
}
