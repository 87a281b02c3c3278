//! The coder contract and its adapters.
//!
//! A [`Coder`] takes a prompt and a working directory and returns an
//! [`ExecutionResult`]. It never fails past its boundary: every problem is
//! recorded in the result's `error` field.
//!
//! CLI-backed assistants implement the smaller [`CliAssistant`] trait and are
//! driven by [`CliCoder`]; [`DummyCoder`] is a deterministic in-process double.

pub mod claude;
pub mod cli;
pub mod codex;
pub mod config_objects;
pub mod dummy;
pub mod gemini;
pub mod goose;
pub mod opencode;
pub mod process;
pub mod qwen;
pub mod registry;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{CoderIdentity, ExecutionResult, ExtensionCollection, ModelSpec};

pub use claude::ClaudeAssistant;
pub use cli::{CliAssistant, CliCoder, ParsedTranscript};
pub use codex::CodexAssistant;
pub use config_objects::{write_config_objects, ConfigContents, ConfigObject};
pub use dummy::{DummyCoder, DummyScript, ScriptedTool};
pub use gemini::GeminiAssistant;
pub use goose::GooseAssistant;
pub use opencode::OpencodeAssistant;
pub use process::{find_on_path, run_process, ProcessOutput};
pub use qwen::QwenAssistant;
pub use registry::CoderRegistry;

/// Capability flag: the coder can use MCP extensions.
pub const CAP_EXTENSIONS: &str = "extensions";
/// Capability flag: the coder reads a primary instruction file.
pub const CAP_INSTRUCTIONS: &str = "instructions";
/// Capability flag: the transcript exposes individual tool calls.
pub const CAP_TOOL_TRACE: &str = "tool_trace";
/// Capability flag: the transcript reports spend.
pub const CAP_COST: &str = "cost";

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: ModelSpec,
    /// Already merged (coder defaults, plan, case override).
    pub extensions: ExtensionCollection,
    pub instructions: Option<String>,
    /// Extra environment for the assistant process.
    pub env: BTreeMap<String, String>,
}

impl InvocationContext {
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>, model: ModelSpec) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model,
            extensions: ExtensionCollection::new(),
            instructions: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_extensions(mut self, extensions: ExtensionCollection) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// One supported AI coding assistant.
#[async_trait]
pub trait Coder: Send + Sync {
    fn identity(&self) -> CoderIdentity;

    fn supports_extensions(&self) -> bool;

    fn capability_flags(&self) -> BTreeSet<String>;

    /// Extensions the assistant ships with; merged first.
    fn default_extensions(&self) -> ExtensionCollection {
        ExtensionCollection::new()
    }

    /// Whether the assistant can run on this machine.
    fn is_available(&self) -> bool;

    /// Run the prompt. Must only touch `context.working_dir`.
    async fn invoke(&self, context: &InvocationContext) -> ExecutionResult;
}

pub(crate) fn flags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}
