//! Matrix orchestration: every (coder, model, case) triple of a plan through
//! the case runner, outcomes collected in enumeration order.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use metacoder_core::{obs, CoderIdentity, CoderRegistry, EvalCase, ExtensionCollection, ModelSpec};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::case_runner::{aborted_before_start, CaseRunner};
use crate::config::{EvalPlan, MatrixConfig, MatrixFilter, RunnerConfig};
use crate::error::{EvalError, Result};
use crate::metrics::MetricEngine;
use crate::report::{AbortCause, CaseOutcome, EvalReport, ReportSink};

/// One unit of matrix work.
#[derive(Debug, Clone, Copy)]
pub struct Triple<'a> {
    pub coder: CoderIdentity,
    pub model: &'a ModelSpec,
    pub case: &'a EvalCase,
}

pub struct EvalMatrixRunner {
    registry: CoderRegistry,
    case_runner: Arc<CaseRunner>,
    config: MatrixConfig,
    sink: Option<Arc<dyn ReportSink>>,
}

impl EvalMatrixRunner {
    pub fn new(registry: CoderRegistry, case_runner: Arc<CaseRunner>, config: MatrixConfig) -> Self {
        Self {
            registry,
            case_runner,
            config,
            sink: None,
        }
    }

    /// Build from flat runner settings (validated first).
    pub fn from_config(
        registry: CoderRegistry,
        engine: Arc<MetricEngine>,
        config: &RunnerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let case_runner = CaseRunner::new(config.case_runner_config(), engine);
        Ok(Self::new(
            registry,
            Arc::new(case_runner),
            config.matrix_config(),
        ))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &CoderRegistry {
        &self.registry
    }

    pub fn case_runner(&self) -> &CaseRunner {
        &self.case_runner
    }

    /// Coder-major, then model, then case; filtered.
    pub fn enumerate<'a>(plan: &'a EvalPlan, filter: &MatrixFilter) -> Vec<Triple<'a>> {
        let mut triples = Vec::new();
        for &coder in plan.coders.iter().filter(|c| filter.allows_coder(**c)) {
            for model in plan.models.iter().filter(|m| filter.allows_model(m)) {
                for case in plan.cases.iter().filter(|c| filter.allows_case(c)) {
                    triples.push(Triple { coder, model, case });
                }
            }
        }
        triples
    }

    /// Run the plan.
    ///
    /// Per-triple failures are recorded as outcomes and never stop the run.
    /// On cancellation, in-flight invocations are aborted, triples not yet
    /// started are recorded as cancelled, and the partial report comes back
    /// inside [`EvalError::MatrixAbort`] after it has been published.
    pub async fn run(
        &self,
        plan: &EvalPlan,
        filter: &MatrixFilter,
        cancel: &CancellationToken,
    ) -> Result<EvalReport> {
        plan.validate()?;
        if self.config.max_concurrency == 0 {
            return Err(EvalError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }

        let triples = Self::enumerate(plan, filter);
        info!(
            plan = %plan.name,
            triples = triples.len(),
            max_concurrency = self.config.max_concurrency,
            "starting eval matrix"
        );

        let started = Instant::now();
        let mut report = EvalReport::new(plan.name.clone());
        let mut outcomes = stream::iter(triples)
            .map(|triple| self.run_triple(triple, &plan.extensions, cancel))
            .buffered(self.config.max_concurrency);
        while let Some(outcome) = outcomes.next().await {
            report.push(outcome);
        }

        report.cancelled = cancel.is_cancelled();
        report.finalize();
        if let Some(summary) = &report.summary {
            obs::emit_matrix_finished(
                summary.total,
                summary.scored,
                summary.aborted,
                summary.unsupported,
                started.elapsed().as_millis() as u64,
            );
        }
        self.case_runner.locker().metrics().flush();

        if let Some(sink) = &self.sink {
            if let Err(error) = sink.publish(&report) {
                return Err(EvalError::Sink {
                    error,
                    report: Box::new(report),
                });
            }
        }

        if report.cancelled {
            return Err(EvalError::MatrixAbort {
                partial: Box::new(report),
            });
        }
        Ok(report)
    }

    async fn run_triple(
        &self,
        triple: Triple<'_>,
        plan_extensions: &ExtensionCollection,
        cancel: &CancellationToken,
    ) -> CaseOutcome {
        if cancel.is_cancelled() {
            return aborted_before_start(triple.coder, triple.model, triple.case, AbortCause::Cancelled);
        }
        match self.registry.get(triple.coder) {
            Some(coder) => {
                self.case_runner
                    .run(coder.as_ref(), triple.model, triple.case, plan_extensions, cancel)
                    .await
            }
            None => aborted_before_start(
                triple.coder,
                triple.model,
                triple.case,
                AbortCause::UnknownCoder {
                    coder: triple.coder.to_string(),
                },
            ),
        }
    }
}
