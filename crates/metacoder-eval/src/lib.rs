//! Metacoder Eval - matrixed evaluation of AI coding assistants
//!
//! Runs every (coder, model, case) triple of an [`EvalPlan`]:
//! - One triple at a time per working directory, guarded by the core lock
//! - Metrics scored per case, unknown names recorded as failures
//! - Outcomes reported in enumeration order with per-coder, per-model and
//!   per-metric pass rates

pub mod case_runner;
pub mod config;
pub mod error;
pub mod matrix;
pub mod metrics;
pub mod report;

// Re-export key types
pub use case_runner::{aborted_before_start, CaseRunner};
pub use config::{CaseRunnerConfig, EvalPlan, MatrixConfig, MatrixFilter, RunnerConfig, WorkdirLayout};
pub use error::{EvalError, MetricError, Result};
pub use matrix::{EvalMatrixRunner, Triple};
pub use metrics::{
    JudgeControls, JudgeError, JudgeMetric, JudgeVerdict, LlmJudge, Metric, MetricEngine,
    MetricResult, MetricScore, ScoringInput,
};
pub use report::{
    render_summary_md, AbortCause, CaseOutcome, EvalReport, JsonFileSink, MarkdownSummarySink,
    OutcomeStatus, PassRate, Phase, ReportSink, ReportSummary,
};
