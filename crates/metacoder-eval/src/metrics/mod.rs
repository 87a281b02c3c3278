//! Metric engine: named scoring functions applied to transcripts.
//!
//! Every metric maps a [`ScoringInput`] to a score in `[0, 1]` plus a short
//! rationale. The engine turns that into a [`MetricResult`] with the case's
//! threshold applied, and never fails: unknown names and computation errors
//! become zero-score results carrying the error.

pub mod builtin;
pub mod judge;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use metacoder_core::{EvalCase, ExecutionResult};
use serde::{Deserialize, Serialize};

use crate::error::MetricError;

pub use builtin::{
    Contains, ExactMatch, ExecutionSuccess, FuzzyMatch, NormalizedMatch, RegexMatch, ToolUsage,
};
pub use judge::{JudgeControls, JudgeError, JudgeMetric, JudgeVerdict, LlmJudge};

/// What a metric sees. Shared references only.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub actual: &'a str,
    pub expected: Option<&'a str>,
    pub transcript: &'a ExecutionResult,
}

impl<'a> ScoringInput<'a> {
    pub fn new(case: &'a EvalCase, transcript: &'a ExecutionResult) -> Self {
        Self {
            actual: &transcript.output,
            expected: case.expected_output.as_deref(),
            transcript,
        }
    }

    /// The expected output, or a computation failure naming `metric`.
    pub fn require_expected(&self, metric: &str) -> Result<&'a str, MetricError> {
        self.expected.ok_or_else(|| MetricError::ComputationFailed {
            metric: metric.to_string(),
            reason: "case has no expected_output".into(),
        })
    }
}

/// Raw output of a metric before thresholding.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricScore {
    pub score: f64,
    pub rationale: String,
}

impl MetricScore {
    pub fn new(score: f64, rationale: impl Into<String>) -> Self {
        Self {
            score,
            rationale: rationale.into(),
        }
    }

    pub fn binary(ok: bool, rationale: impl Into<String>) -> Self {
        Self::new(if ok { 1.0 } else { 0.0 }, rationale)
    }
}

#[async_trait]
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError>;
}

/// One (case, metric) judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: String,
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MetricError>,
}

impl MetricResult {
    fn scored(metric: &str, score: MetricScore, threshold: f64) -> Self {
        Self {
            metric: metric.to_string(),
            score: score.score,
            passed: score.score >= threshold,
            threshold,
            rationale: score.rationale,
            error: None,
        }
    }

    pub fn failed(metric: &str, threshold: f64, error: MetricError) -> Self {
        Self {
            metric: metric.to_string(),
            score: 0.0,
            passed: false,
            threshold,
            rationale: error.to_string(),
            error: Some(error),
        }
    }

    /// Zero score for a metric that was never run (aborted or unsupported case).
    pub fn not_run(metric: &str, threshold: f64, reason: &str) -> Self {
        Self {
            metric: metric.to_string(),
            score: 0.0,
            passed: false,
            threshold,
            rationale: format!("not scored: {reason}"),
            error: None,
        }
    }
}

/// Registry of metrics by name.
#[derive(Clone, Default)]
pub struct MetricEngine {
    metrics: BTreeMap<String, Arc<dyn Metric>>,
}

impl std::fmt::Debug for MetricEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricEngine")
            .field("metrics", &self.names())
            .finish()
    }
}

impl MetricEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with every built-in metric registered.
    pub fn with_builtins() -> Self {
        Self::new()
            .with(Arc::new(ExactMatch))
            .with(Arc::new(NormalizedMatch))
            .with(Arc::new(Contains))
            .with(Arc::new(FuzzyMatch))
            .with(Arc::new(RegexMatch))
            .with(Arc::new(ExecutionSuccess))
            .with(Arc::new(ToolUsage))
    }

    pub fn register(&mut self, metric: Arc<dyn Metric>) {
        self.metrics.insert(metric.name().to_string(), metric);
    }

    pub fn with(mut self, metric: Arc<dyn Metric>) -> Self {
        self.register(metric);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.keys().map(String::as_str).collect()
    }

    /// Score one metric. Never fails; problems are recorded in the result.
    pub async fn score(&self, metric_name: &str, input: &ScoringInput<'_>, threshold: f64) -> MetricResult {
        let Some(metric) = self.metrics.get(metric_name) else {
            tracing::warn!(metric = %metric_name, "unknown metric");
            return MetricResult::failed(
                metric_name,
                threshold,
                MetricError::UnknownMetric {
                    name: metric_name.to_string(),
                },
            );
        };

        match metric.compute(input).await {
            Ok(score) if score.score.is_nan() => MetricResult::failed(
                metric_name,
                threshold,
                MetricError::ComputationFailed {
                    metric: metric_name.to_string(),
                    reason: "score is NaN".into(),
                },
            ),
            Ok(mut score) => {
                score.score = score.score.clamp(0.0, 1.0);
                MetricResult::scored(metric_name, score, threshold)
            }
            Err(error) => {
                tracing::warn!(metric = %metric_name, error = %error, "metric failed");
                MetricResult::failed(metric_name, threshold, error)
            }
        }
    }

    /// Score every metric the case names, in order. One result per name.
    pub async fn score_case(&self, case: &EvalCase, transcript: &ExecutionResult) -> Vec<MetricResult> {
        let input = ScoringInput::new(case, transcript);
        let mut results = Vec::with_capacity(case.metrics.len());
        for name in &case.metrics {
            results.push(self.score(name, &input, case.threshold).await);
        }
        results
    }

    /// Zero-score results for a case whose metrics were never run.
    pub fn unscored(case: &EvalCase, reason: &str) -> Vec<MetricResult> {
        case.metrics
            .iter()
            .map(|name| MetricResult::not_run(name, case.threshold, reason))
            .collect()
    }
}
