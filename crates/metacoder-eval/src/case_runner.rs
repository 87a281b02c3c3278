//! Runs one (coder, model, case) triple through
//! `PREPARE -> LOCKED -> INVOKING -> SCORING -> DONE`.
//!
//! Every path ends in a [`CaseOutcome`]; nothing here returns an error. The
//! working-directory lock is held only while the coder runs and is released
//! on every path, including timeout and cancellation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metacoder_core::{
    obs, Coder, CoderIdentity, CoreError, DirectoryLocker, EvalCase, ExecutionResult,
    ExtensionCollection, InvocationContext, InvocationError, ModelSpec,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::CaseRunnerConfig;
use crate::metrics::{MetricEngine, MetricResult};
use crate::report::{AbortCause, CaseOutcome, OutcomeStatus, Phase};

pub struct CaseRunner {
    config: CaseRunnerConfig,
    locker: DirectoryLocker,
    engine: Arc<MetricEngine>,
}

impl CaseRunner {
    pub fn new(config: CaseRunnerConfig, engine: Arc<MetricEngine>) -> Self {
        let locker = DirectoryLocker::new(config.lock.clone());
        Self {
            config,
            locker,
            engine,
        }
    }

    /// Share a locker (and its counters) with other runners.
    pub fn with_locker(mut self, locker: DirectoryLocker) -> Self {
        self.locker = locker;
        self
    }

    pub fn config(&self) -> &CaseRunnerConfig {
        &self.config
    }

    pub fn locker(&self) -> &DirectoryLocker {
        &self.locker
    }

    pub fn engine(&self) -> &MetricEngine {
        &self.engine
    }

    pub async fn run(
        &self,
        coder: &dyn Coder,
        model: &ModelSpec,
        case: &EvalCase,
        plan_extensions: &ExtensionCollection,
        cancel: &CancellationToken,
    ) -> CaseOutcome {
        let span = obs::case_span(coder.identity().as_str(), &model.label(), &case.name);
        self.run_phases(coder, model, case, plan_extensions, cancel)
            .instrument(span)
            .await
    }

    async fn run_phases(
        &self,
        coder: &dyn Coder,
        model: &ModelSpec,
        case: &EvalCase,
        plan_extensions: &ExtensionCollection,
        cancel: &CancellationToken,
    ) -> CaseOutcome {
        let mut draft = Draft::start(coder.identity(), model, case);

        // PREPARE
        if cancel.is_cancelled() {
            return draft.abort(AbortCause::Cancelled);
        }

        let defaults = coder.default_extensions();
        let mut layers = vec![&defaults, plan_extensions];
        if let Some(over) = &case.extensions {
            layers.push(over);
        }
        let extensions = ExtensionCollection::merged(layers);

        if let Some(reason) = unsupported_reason(coder, case, &extensions) {
            return draft.unsupported(reason);
        }

        let dir = match self.config.layout.resolve(coder.identity(), model, case.name.as_str()) {
            Ok(dir) => dir,
            Err(e) => {
                return draft.abort(AbortCause::Workspace {
                    detail: e.to_string(),
                })
            }
        };
        draft.working_dir = Some(dir.clone());

        // LOCKED
        let mut handle = match self.locker.acquire_cancellable(&dir, cancel).await {
            Ok(handle) => handle,
            Err(e) => {
                self.cleanup(&dir);
                let cause = match e {
                    CoreError::LockTimeout { waited_ms, .. } => AbortCause::LockTimeout { waited_ms },
                    CoreError::LockCancelled { .. } => AbortCause::Cancelled,
                    other => AbortCause::Workspace {
                        detail: other.to_string(),
                    },
                };
                return draft.abort(cause);
            }
        };
        draft.phases.push(Phase::Locked);

        // INVOKING
        draft.phases.push(Phase::Invoking);
        let context = InvocationContext::new(case.rendered_prompt(), &dir, model.clone())
            .with_extensions(extensions)
            .with_instructions(case.instructions.clone());
        let execution = self.invoke_bounded(coder, &context, cancel).await;

        if let Err(e) = handle.release() {
            tracing::warn!(workdir = %dir.display(), error = %e, "lock release failed");
        }
        self.cleanup(&dir);

        if let Some(error) = &execution.error {
            obs::emit_invocation_error(coder.identity().as_str(), &case.name, error);
        }

        if execution.error == Some(InvocationError::Cancelled) {
            let metrics = MetricEngine::unscored(case, "cancelled");
            return draft.finish(
                execution,
                metrics,
                OutcomeStatus::Aborted {
                    cause: AbortCause::Cancelled,
                },
            );
        }

        // SCORING
        draft.phases.push(Phase::Scoring);
        let metrics = self.engine.score_case(case, &execution).await;
        let status = final_status(&execution, &metrics);
        draft.finish(execution, metrics, status)
    }

    /// Invoke under the configured timeout and the caller's cancellation.
    /// Dropping the coder future kills any child process it spawned.
    async fn invoke_bounded(
        &self,
        coder: &dyn Coder,
        context: &InvocationContext,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let limit_ms = self.config.invocation_timeout_ms;
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => ExecutionResult::failed(InvocationError::Cancelled)
                .with_duration_ms(started.elapsed().as_millis() as u64),
            result = tokio::time::timeout(Duration::from_millis(limit_ms), coder.invoke(context)) => {
                match result {
                    Ok(execution) => execution,
                    Err(_) => ExecutionResult::failed(InvocationError::Timeout { limit_ms })
                        .with_duration_ms(started.elapsed().as_millis() as u64),
                }
            }
        }
    }

    fn cleanup(&self, dir: &Path) {
        if !self.config.layout.is_ephemeral() || self.config.keep_workdirs {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!(workdir = %dir.display(), error = %e, "failed to remove working directory");
        }
    }
}

/// Outcome for a triple that never reached a coder (unknown coder, cancelled
/// before start).
pub fn aborted_before_start(
    coder: CoderIdentity,
    model: &ModelSpec,
    case: &EvalCase,
    cause: AbortCause,
) -> CaseOutcome {
    Draft::start(coder, model, case).abort(cause)
}

fn unsupported_reason(
    coder: &dyn Coder,
    case: &EvalCase,
    extensions: &ExtensionCollection,
) -> Option<String> {
    if extensions.has_enabled() && !coder.supports_extensions() {
        let names: Vec<&str> = extensions.enabled().map(|e| e.name.as_str()).collect();
        return Some(format!(
            "{} does not support extensions (requested: {})",
            coder.identity(),
            names.join(", ")
        ));
    }

    let flags = coder.capability_flags();
    let missing: Vec<&str> = case
        .required_capabilities
        .iter()
        .filter(|c| !flags.contains(*c))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Some(format!(
            "{} lacks capabilities: {}",
            coder.identity(),
            missing.join(", ")
        ));
    }
    None
}

/// Invocation error first, then the first metric failure that aborts a case.
fn final_status(execution: &ExecutionResult, metrics: &[MetricResult]) -> OutcomeStatus {
    if let Some(error) = &execution.error {
        return OutcomeStatus::Aborted {
            cause: AbortCause::Invocation {
                error: error.clone(),
            },
        };
    }
    let failed = metrics
        .iter()
        .find_map(|m| m.error.as_ref().filter(|e| e.aborts_case()).map(|e| (m, e)));
    match failed {
        Some((m, error)) => OutcomeStatus::Aborted {
            cause: AbortCause::Scoring {
                metric: m.metric.clone(),
                error: error.clone(),
            },
        },
        None => OutcomeStatus::Scored,
    }
}

/// Outcome under construction.
struct Draft<'a> {
    coder: CoderIdentity,
    model: &'a ModelSpec,
    case: &'a EvalCase,
    phases: Vec<Phase>,
    working_dir: Option<PathBuf>,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
}

impl<'a> Draft<'a> {
    fn start(coder: CoderIdentity, model: &'a ModelSpec, case: &'a EvalCase) -> Self {
        obs::emit_case_started(coder.as_str(), &model.label(), &case.name);
        Self {
            coder,
            model,
            case,
            phases: vec![Phase::Prepare],
            working_dir: None,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn unsupported(self, reason: String) -> CaseOutcome {
        let metrics = MetricEngine::unscored(self.case, "unsupported");
        self.finish(
            ExecutionResult::not_started(),
            metrics,
            OutcomeStatus::Unsupported { reason },
        )
    }

    fn abort(self, cause: AbortCause) -> CaseOutcome {
        let metrics = MetricEngine::unscored(self.case, &cause.to_string());
        self.finish(
            ExecutionResult::not_started(),
            metrics,
            OutcomeStatus::Aborted { cause },
        )
    }

    fn finish(
        mut self,
        execution: ExecutionResult,
        metrics: Vec<MetricResult>,
        status: OutcomeStatus,
    ) -> CaseOutcome {
        self.phases.push(match status {
            OutcomeStatus::Aborted { .. } => Phase::Aborted,
            _ => Phase::Done,
        });
        let duration_ms = self.clock.elapsed().as_millis() as u64;
        let passed = metrics.iter().filter(|m| m.passed).count();
        obs::emit_case_finished(
            self.coder.as_str(),
            &self.model.label(),
            &self.case.name,
            status.label(),
            duration_ms,
            passed,
            metrics.len(),
        );

        CaseOutcome {
            coder: self.coder,
            model: self.model.clone(),
            case: self.case.clone(),
            execution,
            metrics,
            status,
            phases: self.phases,
            working_dir: self.working_dir,
            started_at: self.started_at,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricError;

    #[test]
    fn test_invocation_error_wins_over_metric_error() {
        let execution = ExecutionResult::failed(InvocationError::Timeout { limit_ms: 5 });
        let metrics = vec![MetricResult::failed(
            "regex_match",
            0.5,
            MetricError::ComputationFailed {
                metric: "regex_match".into(),
                reason: "bad".into(),
            },
        )];
        let status = final_status(&execution, &metrics);
        assert!(matches!(
            status,
            OutcomeStatus::Aborted {
                cause: AbortCause::Invocation { .. }
            }
        ));
    }

    #[test]
    fn test_unknown_metric_still_scored() {
        let execution = ExecutionResult::succeeded("4");
        let metrics = vec![MetricResult::failed(
            "bleu",
            0.5,
            MetricError::UnknownMetric {
                name: "bleu".into(),
            },
        )];
        assert_eq!(final_status(&execution, &metrics), OutcomeStatus::Scored);
    }

    #[test]
    fn test_aborted_before_start_has_all_metrics() {
        let case = EvalCase::new("c", "p")
            .with_metric("exact_match")
            .with_metric("contains");
        let outcome = aborted_before_start(
            CoderIdentity::Claude,
            &ModelSpec::new("m", "p"),
            &case,
            AbortCause::UnknownCoder {
                coder: "claude".into(),
            },
        );
        assert_eq!(outcome.metrics.len(), 2);
        assert_eq!(outcome.phases, vec![Phase::Prepare, Phase::Aborted]);
        assert!(outcome.working_dir.is_none());
    }
}
