//! Structured observability hooks for case, lock and matrix lifecycle events.
//!
//! This module provides:
//! - Case-scoped tracing spans via the `CaseSpan` RAII guard
//! - Emission functions for key lifecycle events: case start/finish, lock
//!   acquire/release/reclaim/timeout, matrix completion
//!
//! Events are emitted at `info!` level unless they signal trouble. Filter via
//! `RUST_LOG`; JSON output is selected through [`crate::init_tracing`].

use std::path::Path;

use tracing::{info, warn};

/// RAII guard that enters a case-scoped tracing span for one
/// (coder, model, case) triple.
///
/// # Example
///
/// ```ignore
/// let _span = CaseSpan::enter("dummy", "openai/gpt-4o", "arith");
/// // every event below is tagged with coder/model/case
/// ```
pub struct CaseSpan {
    _span: tracing::span::EnteredSpan,
}

impl CaseSpan {
    pub fn enter(coder: &str, model: &str, case: &str) -> Self {
        Self {
            _span: case_span(coder, model, case).entered(),
        }
    }
}

/// The span behind [`CaseSpan`], for attaching to futures with
/// `tracing::Instrument` where an entered guard cannot cross `.await`.
pub fn case_span(coder: &str, model: &str, case: &str) -> tracing::Span {
    tracing::info_span!("metacoder.case", coder = %coder, model = %model, case = %case)
}

/// Emit event: a triple entered PREPARE.
pub fn emit_case_started(coder: &str, model: &str, case: &str) {
    info!(event = "case.started", coder = %coder, model = %model, case = %case);
}

/// Emit event: a triple reached a terminal state.
pub fn emit_case_finished(
    coder: &str,
    model: &str,
    case: &str,
    status: &str,
    duration_ms: u64,
    metrics_passed: usize,
    metrics_total: usize,
) {
    info!(
        event = "case.finished",
        coder = %coder,
        model = %model,
        case = %case,
        status = %status,
        duration_ms = duration_ms,
        metrics_passed = metrics_passed,
        metrics_total = metrics_total,
    );
}

/// Emit event: the coder returned an error (recorded, not fatal).
pub fn emit_invocation_error(coder: &str, case: &str, error: &dyn std::fmt::Display) {
    warn!(event = "case.invocation_error", coder = %coder, case = %case, error = %error);
}

pub fn emit_lock_acquired(dir: &Path, waited_ms: u64) {
    info!(event = "lock.acquired", workdir = %dir.display(), waited_ms = waited_ms);
}

pub fn emit_lock_released(dir: &Path, held_ms: u64) {
    info!(event = "lock.released", workdir = %dir.display(), held_ms = held_ms);
}

/// Emit event: a stale marker was reclaimed (warning level).
pub fn emit_lock_reclaimed(dir: &Path, stale_pid: Option<u32>, reason: &str) {
    warn!(
        event = "lock.reclaimed",
        workdir = %dir.display(),
        stale_pid = ?stale_pid,
        reason = %reason,
    );
}

/// Emit event: the wait budget expired (warning level).
pub fn emit_lock_timeout(dir: &Path, waited_ms: u64) {
    warn!(event = "lock.timeout", workdir = %dir.display(), waited_ms = waited_ms);
}

/// Emit event: the matrix finished with outcome counts.
pub fn emit_matrix_finished(
    total: usize,
    scored: usize,
    aborted: usize,
    unsupported: usize,
    duration_ms: u64,
) {
    info!(
        event = "matrix.finished",
        total = total,
        scored = scored,
        aborted = aborted,
        unsupported = unsupported,
        duration_ms = duration_ms,
    );
}
