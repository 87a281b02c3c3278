//! Execution results and tool invocation records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// One tool (or MCP extension) call made by the assistant during an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocationRecord {
    /// Position in invocation order, starting at 0.
    pub index: usize,
    /// Bare tool name.
    pub tool: String,
    /// Extension (MCP server) that provided the tool, if qualified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

/// Split `mcp__server__tool` or `extension__tool` into (extension, tool).
pub fn split_qualified_tool_name(name: &str) -> (Option<String>, String) {
    let trimmed = name.strip_prefix("mcp__").unwrap_or(name);
    match trimmed.split_once("__") {
        Some((ext, tool)) if !ext.is_empty() && !tool.is_empty() => {
            (Some(ext.to_string()), tool.to_string())
        }
        _ => (None, name.to_string()),
    }
}

/// Maximum characters kept in a result summary.
const SUMMARY_LIMIT: usize = 200;

fn summarize(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_LIMIT {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(SUMMARY_LIMIT).collect();
        out.push('…');
        out
    }
}

/// Append-only, ordered log of tool calls for a single invocation.
///
/// Calls are indexed in the order they are recorded. Results can be attached
/// later by call id; the sequence itself is never reordered or truncated.
#[derive(Debug, Default)]
pub struct ToolLog {
    records: Vec<ToolInvocationRecord>,
    by_call_id: HashMap<String, usize>,
}

impl ToolLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call. Returns its index.
    pub fn record(&mut self, call_id: Option<&str>, qualified_name: &str, arguments: Value) -> usize {
        let (extension, tool) = split_qualified_tool_name(qualified_name);
        let index = self.records.len();
        self.records.push(ToolInvocationRecord {
            index,
            tool,
            extension,
            arguments,
            result_summary: None,
        });
        if let Some(id) = call_id {
            self.by_call_id.insert(id.to_string(), index);
        }
        index
    }

    /// Attach a result to a previously recorded call. Unknown ids are ignored.
    pub fn attach_result(&mut self, call_id: &str, result: &str) -> bool {
        match self.by_call_id.get(call_id) {
            Some(&index) => {
                self.records[index].result_summary = Some(summarize(result));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<ToolInvocationRecord> {
        self.records
    }
}

/// How the invocation ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failed { code: Option<i32> },
    TimedOut,
    Cancelled,
    NotStarted,
}

/// Why an invocation failed. Recorded in the result, never thrown past the
/// coder boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("process exited with code {code:?}: {stderr_tail}")]
    NonZeroExit {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("malformed transcript: {detail}")]
    MalformedTranscript { detail: String },

    #[error("extension '{extension}' uses unsupported transport '{transport}'")]
    UnsupportedExtension {
        extension: String,
        transport: String,
    },

    #[error("could not prepare working directory: {detail}")]
    Workspace { detail: String },

    #[error("invocation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("invocation cancelled")]
    Cancelled,
}

impl InvocationError {
    /// Exit status implied by this error.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            InvocationError::NonZeroExit { code, .. } => ExitStatus::Failed { code: *code },
            InvocationError::Timeout { .. } => ExitStatus::TimedOut,
            InvocationError::Cancelled => ExitStatus::Cancelled,
            InvocationError::Spawn { .. }
            | InvocationError::UnsupportedExtension { .. }
            | InvocationError::Workspace { .. } => ExitStatus::NotStarted,
            InvocationError::MalformedTranscript { .. } => ExitStatus::Failed { code: Some(0) },
        }
    }
}

/// Transcript of one coder invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Final answer text (or raw stdout when the assistant has no structure).
    pub output: String,
    #[serde(default)]
    pub stderr: String,
    /// Tool calls in the order they were made.
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocationRecord>,
    pub exit_status: ExitStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<InvocationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Structured messages emitted by the assistant, as parsed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_log: Vec<Value>,
}

impl ExecutionResult {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            stderr: String::new(),
            tool_invocations: Vec::new(),
            exit_status: ExitStatus::Success,
            duration_ms: 0,
            error: None,
            cost_usd: None,
            raw_log: Vec::new(),
        }
    }

    /// Placeholder for a run that never reached the coder.
    pub fn not_started() -> Self {
        Self {
            exit_status: ExitStatus::NotStarted,
            ..Self::succeeded("")
        }
    }

    /// Best-effort result for a failed invocation.
    pub fn failed(error: InvocationError) -> Self {
        Self {
            output: String::new(),
            stderr: String::new(),
            tool_invocations: Vec::new(),
            exit_status: error.exit_status(),
            duration_ms: 0,
            error: Some(error),
            cost_usd: None,
            raw_log: Vec::new(),
        }
    }

    /// Mark an existing (possibly partial) result as failed, keeping whatever
    /// output and tool calls were captured.
    pub fn with_error(mut self, error: InvocationError) -> Self {
        self.exit_status = error.exit_status();
        self.error = Some(error);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolInvocationRecord>) -> Self {
        self.tool_invocations = tools;
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_status == ExitStatus::Success
    }

    /// SHA-256 hex over output, tool calls, exit status and error.
    ///
    /// Duration, stderr, cost and raw log are excluded so two runs of a
    /// deterministic coder hash identically.
    pub fn content_digest(&self) -> String {
        let canonical = serde_json::json!({
            "output": self.output,
            "tool_invocations": self.tool_invocations,
            "exit_status": self.exit_status,
            "error": self.error,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
