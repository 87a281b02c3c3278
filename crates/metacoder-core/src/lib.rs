//! Metacoder Core Library
//!
//! One interface over command-line AI coding assistants: the domain model,
//! the [`Coder`] contract and its adapters, the [`CoderRegistry`], and the
//! exclusive working-directory lock that keeps concurrent invocations apart.

pub mod coder;
pub mod domain;
pub mod lock;
pub mod metrics;
pub mod obs;
pub mod telemetry;

pub use domain::{
    split_qualified_tool_name, CoderIdentity, CoreError, EvalCase, ExecutionResult, ExitStatus,
    ExtensionCollection, ExtensionSpec, ExtensionTransport, InvocationError, ModelSpec, Result,
    ToolInvocationRecord, ToolLog, DEFAULT_THRESHOLD, INPUT_PLACEHOLDER,
};

pub use coder::{
    CliAssistant, CliCoder, Coder, CoderRegistry, DummyCoder, DummyScript, InvocationContext,
    ParsedTranscript, ScriptedTool, CAP_COST, CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE,
};

pub use lock::{DirectoryLocker, LockConfig, LockHandle, LockRecord, LOCK_FILE_NAME};
pub use metrics::LockMetrics;
pub use obs::{
    case_span, emit_case_finished, emit_case_started, emit_invocation_error, emit_lock_acquired,
    emit_lock_reclaimed, emit_lock_released, emit_lock_timeout, emit_matrix_finished, CaseSpan,
};
pub use telemetry::{init_tracing, init_tracing_from_env};

/// Metacoder version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
