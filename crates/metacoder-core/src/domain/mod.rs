//! Domain models for metacoder.
//!
//! Canonical definitions for the core entities:
//! - `CoderIdentity`: which assistant a coder wraps
//! - `ModelSpec`: model + provider + credential reference
//! - `ExtensionSpec` / `ExtensionCollection`: MCP tool providers
//! - `EvalCase`: one scripted evaluation task
//! - `ExecutionResult`: transcript of one invocation

pub mod case;
pub mod error;
pub mod execution;
pub mod extension;
pub mod identity;
pub mod model;

pub use case::{EvalCase, DEFAULT_THRESHOLD, INPUT_PLACEHOLDER};
pub use error::{CoreError, Result};
pub use execution::{
    split_qualified_tool_name, ExecutionResult, ExitStatus, InvocationError,
    ToolInvocationRecord, ToolLog,
};
pub use extension::{ExtensionCollection, ExtensionSpec, ExtensionTransport};
pub use identity::CoderIdentity;
pub use model::ModelSpec;
