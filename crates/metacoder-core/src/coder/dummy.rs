//! Deterministic in-process coder for tests and dry runs.
//!
//! Replies `you said: <prompt>` unless a script overrides the reply. Scripts
//! can also add a delay, emit tool records, or fail.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{flags, Coder, InvocationContext, CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE};
use crate::domain::{CoderIdentity, ExecutionResult, InvocationError, ToolLog};

/// A tool call the dummy pretends to make.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptedTool {
    /// Tool name, optionally `extension__tool` qualified.
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Behaviour of one dummy invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DummyScript {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default)]
    pub tools: Vec<ScriptedTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_with: Option<InvocationError>,
}

impl DummyScript {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, arguments: Value, result: Option<&str>) -> Self {
        self.tools.push(ScriptedTool {
            name: name.into(),
            arguments,
            result: result.map(str::to_string),
        });
        self
    }

    pub fn failing(mut self, error: InvocationError) -> Self {
        self.fail_with = Some(error);
        self
    }
}

#[derive(Debug, Default)]
pub struct DummyCoder {
    default_script: DummyScript,
    by_prompt: HashMap<String, DummyScript>,
    invocations: AtomicU64,
}

impl DummyCoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script applied to prompts without a specific entry.
    pub fn with_default_script(mut self, script: DummyScript) -> Self {
        self.default_script = script;
        self
    }

    /// Script applied when the prompt matches exactly.
    pub fn with_script_for(mut self, prompt: impl Into<String>, script: DummyScript) -> Self {
        self.by_prompt.insert(prompt.into(), script);
        self
    }

    /// Number of `invoke` calls so far, including ones that were cut short.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    fn script_for(&self, prompt: &str) -> &DummyScript {
        self.by_prompt.get(prompt).unwrap_or(&self.default_script)
    }
}

#[async_trait]
impl Coder for DummyCoder {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Dummy
    }

    fn supports_extensions(&self) -> bool {
        true
    }

    fn capability_flags(&self) -> BTreeSet<String> {
        flags(&[CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE])
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, context: &InvocationContext) -> ExecutionResult {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let script = self.script_for(&context.prompt);

        if !context.working_dir.is_dir() {
            return ExecutionResult::failed(InvocationError::Workspace {
                detail: format!("{} is not a directory", context.working_dir.display()),
            });
        }

        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }

        let mut tools = ToolLog::new();
        for (i, tool) in script.tools.iter().enumerate() {
            let call_id = format!("dummy-{i}");
            tools.record(Some(&call_id), &tool.name, tool.arguments.clone());
            if let Some(result) = &tool.result {
                tools.attach_result(&call_id, result);
            }
        }

        let output = script
            .reply
            .clone()
            .unwrap_or_else(|| format!("you said: {}", context.prompt));
        let mut result = ExecutionResult::succeeded(output).with_tools(tools.into_records());
        if let Some(error) = &script.fail_with {
            result = result.with_error(error.clone());
        }
        result.with_duration_ms(started.elapsed().as_millis() as u64)
    }
}
