//! Error types for metric scoring and matrix runs.

use metacoder_core::CoreError;
use serde::{Deserialize, Serialize};

use crate::report::EvalReport;

/// Why a metric produced no real score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricError {
    /// The case names a metric nobody registered. Scored as a failure; the
    /// case itself is not aborted.
    #[error("unknown metric: {name}")]
    UnknownMetric { name: String },

    #[error("metric {metric} failed to compute: {reason}")]
    ComputationFailed { metric: String, reason: String },

    #[error("judge for {metric} failed after {attempts} attempt(s): {reason}")]
    JudgeFailed {
        metric: String,
        attempts: u32,
        reason: String,
    },
}

impl MetricError {
    pub fn kind(&self) -> &'static str {
        match self {
            MetricError::UnknownMetric { .. } => "unknown_metric",
            MetricError::ComputationFailed { .. } => "computation_failed",
            MetricError::JudgeFailed { .. } => "judge_failed",
        }
    }

    /// Whether this failure marks the whole case as aborted.
    pub fn aborts_case(&self) -> bool {
        !matches!(self, MetricError::UnknownMetric { .. })
    }
}

/// Errors surfaced by the eval runners.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The caller cancelled the matrix. Carries the finalized partial report.
    #[error("matrix aborted by cancellation after {} outcome(s)", .partial.outcomes().len())]
    MatrixAbort { partial: Box<EvalReport> },

    /// The report was built but the sink could not publish it.
    #[error("report sink failed: {error:#}")]
    Sink {
        error: anyhow::Error,
        report: Box<EvalReport>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for eval operations.
pub type Result<T> = std::result::Result<T, EvalError>;
