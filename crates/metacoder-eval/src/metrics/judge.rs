//! LLM-judged metrics: timeout, retry with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Metric, MetricScore, ScoringInput};
use crate::error::MetricError;

/// Upper bound on a single backoff delay.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Timeout and retry controls for judge calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JudgeControls {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Maximum number of retries (0 = no retries, run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for JudgeControls {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

/// A judge's assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub score: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JudgeError {
    /// Worth retrying (rate limit, network blip).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help (bad request, refusal).
    #[error("fatal: {0}")]
    Fatal(String),
}

/// External model that grades an answer against free-form criteria.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    async fn judge(
        &self,
        criteria: &str,
        input: &ScoringInput<'_>,
    ) -> Result<JudgeVerdict, JudgeError>;
}

/// Metric backed by an [`LlmJudge`].
pub struct JudgeMetric {
    name: String,
    criteria: String,
    judge: Arc<dyn LlmJudge>,
    controls: JudgeControls,
}

impl JudgeMetric {
    pub fn new(name: impl Into<String>, criteria: impl Into<String>, judge: Arc<dyn LlmJudge>) -> Self {
        Self {
            name: name.into(),
            criteria: criteria.into(),
            judge,
            controls: JudgeControls::default(),
        }
    }

    pub fn with_controls(mut self, controls: JudgeControls) -> Self {
        self.controls = controls;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.controls.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(MAX_BACKOFF_MS))
    }
}

#[async_trait]
impl Metric for JudgeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compute(&self, input: &ScoringInput<'_>) -> Result<MetricScore, MetricError> {
        let max_attempts = self.controls.max_retries + 1;
        let timeout = Duration::from_millis(self.controls.timeout_ms);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(timeout, self.judge.judge(&self.criteria, input)).await {
                Ok(Ok(verdict)) => {
                    return Ok(MetricScore::new(verdict.score, verdict.rationale));
                }
                Ok(Err(JudgeError::Fatal(reason))) => {
                    return Err(MetricError::JudgeFailed {
                        metric: self.name.clone(),
                        attempts: attempt,
                        reason,
                    });
                }
                Ok(Err(JudgeError::Transient(reason))) => {
                    last_reason = reason;
                }
                Err(_elapsed) => {
                    last_reason = format!("timed out after {}ms", self.controls.timeout_ms);
                }
            }

            tracing::debug!(metric = %self.name, attempt, reason = %last_reason, "judge attempt failed");
            if attempt < max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(MetricError::JudgeFailed {
            metric: self.name.clone(),
            attempts: max_attempts,
            reason: last_reason,
        })
    }
}
