//! Shared driver for command-line assistants.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::config_objects::{write_config_objects, ConfigObject};
use super::process::{find_on_path, run_process, ProcessOutput};
use super::{flags, Coder, InvocationContext, CAP_EXTENSIONS, CAP_INSTRUCTIONS};
use crate::domain::{
    CoderIdentity, ExecutionResult, ExitStatus, ExtensionCollection, ExtensionTransport,
    InvocationError, ToolInvocationRecord,
};

/// What an adapter extracted from the assistant's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTranscript {
    pub output: String,
    pub tools: Vec<ToolInvocationRecord>,
    pub cost_usd: Option<f64>,
    pub raw_log: Vec<Value>,
    /// Failure the assistant reported while still exiting 0.
    pub reported_error: Option<String>,
}

impl ParsedTranscript {
    pub fn plain(stdout: &str) -> Self {
        Self {
            output: stdout.trim().to_string(),
            ..Self::default()
        }
    }
}

/// Per-assistant knowledge: how to launch it and how to read what it says.
pub trait CliAssistant: Send + Sync {
    fn identity(&self) -> CoderIdentity;

    /// Executable name looked up on `PATH`.
    fn program(&self) -> &'static str {
        self.identity().as_str()
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String>;

    fn supports_extensions(&self) -> bool {
        true
    }

    fn capability_flags(&self) -> BTreeSet<String> {
        flags(&[CAP_EXTENSIONS, CAP_INSTRUCTIONS])
    }

    fn default_extensions(&self) -> ExtensionCollection {
        ExtensionCollection::new()
    }

    /// Primary instruction file, relative to the working directory.
    fn instruction_file(&self) -> Option<&'static str> {
        None
    }

    /// Native config files derived from the context (MCP servers etc).
    fn config_objects(&self, _context: &InvocationContext) -> Vec<ConfigObject> {
        Vec::new()
    }

    fn parse_transcript(
        &self,
        _context: &InvocationContext,
        process: &ProcessOutput,
    ) -> Result<ParsedTranscript, InvocationError> {
        Ok(ParsedTranscript::plain(&process.stdout))
    }
}

/// `mcpServers` object shared by the JSON-configured assistants.
pub fn mcp_servers_json(extensions: &ExtensionCollection, timeout_ms: Option<u64>) -> Value {
    let mut servers = Map::new();
    for spec in extensions.enabled() {
        if let ExtensionTransport::Stdio { command, args } = &spec.transport {
            let mut entry = Map::new();
            entry.insert("command".into(), json!(command));
            if !args.is_empty() {
                entry.insert("args".into(), json!(args));
            }
            if !spec.env.is_empty() {
                entry.insert("env".into(), json!(spec.env));
            }
            let timeout = spec.timeout_secs.map(|s| s * 1000).or(timeout_ms);
            if let Some(ms) = timeout {
                entry.insert("timeout".into(), json!(ms));
            }
            servers.insert(spec.name.clone(), Value::Object(entry));
        }
    }
    Value::Object(servers)
}

/// [`Coder`] implementation for any [`CliAssistant`].
#[derive(Debug, Clone, Default)]
pub struct CliCoder<A> {
    assistant: A,
}

impl<A: CliAssistant> CliCoder<A> {
    pub fn new(assistant: A) -> Self {
        Self { assistant }
    }

    pub fn assistant(&self) -> &A {
        &self.assistant
    }

    fn check_extensions(&self, extensions: &ExtensionCollection) -> Option<InvocationError> {
        extensions
            .enabled()
            .find(|spec| {
                !self.assistant.supports_extensions()
                    || matches!(spec.transport, ExtensionTransport::Http { .. })
            })
            .map(|spec| InvocationError::UnsupportedExtension {
                extension: spec.name.clone(),
                transport: spec.transport.kind().to_string(),
            })
    }

    fn prepare(&self, context: &InvocationContext) -> Result<(), InvocationError> {
        let mut objects = Vec::new();
        if let (Some(file), Some(text)) = (self.assistant.instruction_file(), &context.instructions) {
            objects.push(ConfigObject::text(file, text.clone()));
        }
        objects.extend(self.assistant.config_objects(context));
        write_config_objects(&context.working_dir, &objects).map_err(|e| {
            InvocationError::Workspace {
                detail: e.to_string(),
            }
        })
    }

    fn environment(&self, context: &InvocationContext) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some((key, value)) = context.model.credential_env() {
            env.insert(key, value);
        }
        env.extend(context.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    fn assemble(&self, context: &InvocationContext, process: &ProcessOutput) -> ExecutionResult {
        let parsed = self.assistant.parse_transcript(context, process);

        let (mut result, parse_error, reported_error) = match parsed {
            Ok(t) => (
                ExecutionResult {
                    output: t.output,
                    stderr: process.stderr.clone(),
                    tool_invocations: t.tools,
                    exit_status: ExitStatus::Success,
                    duration_ms: process.duration_ms,
                    error: None,
                    cost_usd: t.cost_usd,
                    raw_log: t.raw_log,
                },
                None,
                t.reported_error,
            ),
            Err(e) => (
                ExecutionResult::succeeded(process.stdout.trim())
                    .with_stderr(process.stderr.clone())
                    .with_duration_ms(process.duration_ms),
                Some(e),
                None,
            ),
        };

        if !process.success() {
            result = result.with_error(InvocationError::NonZeroExit {
                code: process.exit_code,
                stderr_tail: process.stderr_tail(),
            });
        } else if let Some(e) = parse_error {
            result = result.with_error(e);
        } else if let Some(message) = reported_error {
            result = result.with_error(InvocationError::NonZeroExit {
                code: process.exit_code,
                stderr_tail: message,
            });
        }
        result
    }
}

#[async_trait]
impl<A: CliAssistant> Coder for CliCoder<A> {
    fn identity(&self) -> CoderIdentity {
        self.assistant.identity()
    }

    fn supports_extensions(&self) -> bool {
        self.assistant.supports_extensions()
    }

    fn capability_flags(&self) -> BTreeSet<String> {
        self.assistant.capability_flags()
    }

    fn default_extensions(&self) -> ExtensionCollection {
        self.assistant.default_extensions()
    }

    fn is_available(&self) -> bool {
        find_on_path(self.assistant.program()).is_some()
    }

    async fn invoke(&self, context: &InvocationContext) -> ExecutionResult {
        let started = Instant::now();
        let identity = self.assistant.identity();
        let elapsed = || started.elapsed().as_millis() as u64;

        if let Some(err) = self.check_extensions(&context.extensions) {
            return ExecutionResult::failed(err).with_duration_ms(elapsed());
        }
        if let Err(err) = self.prepare(context) {
            return ExecutionResult::failed(err).with_duration_ms(elapsed());
        }

        let args = self.assistant.build_args(context);
        tracing::info!(
            coder = %identity,
            model = %context.model.label(),
            workdir = %context.working_dir.display(),
            "launching assistant"
        );

        let env = self.environment(context);
        let process = match run_process(
            self.assistant.program(),
            &args,
            &context.working_dir,
            &env,
        )
        .await
        {
            Ok(process) => process,
            Err(err) => return ExecutionResult::failed(err).with_duration_ms(elapsed()),
        };

        self.assemble(context, &process).with_duration_ms(elapsed())
    }
}
