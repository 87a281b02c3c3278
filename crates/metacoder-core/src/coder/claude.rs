//! Claude Code adapter (`claude -p --output-format stream-json`).

use std::collections::BTreeSet;

use serde_json::{json, Value};

use super::cli::{mcp_servers_json, CliAssistant, ParsedTranscript};
use super::config_objects::ConfigObject;
use super::process::ProcessOutput;
use super::{flags, InvocationContext, CAP_COST, CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE};
use crate::domain::{CoderIdentity, InvocationError, ToolLog};

const MCP_CONFIG_FILE: &str = ".mcp.json";

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAssistant;

impl CliAssistant for ClaudeAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Claude
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String> {
        let mut args: Vec<String> = ["-p", "--verbose", "--output-format", "stream-json"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if !context.model.name.is_empty() {
            args.push("--model".into());
            args.push(context.model.name.clone());
        }
        if context.extensions.has_enabled() {
            args.push("--mcp-config".into());
            args.push(MCP_CONFIG_FILE.into());
            args.push("--dangerously-skip-permissions".into());
        }
        args.push(context.prompt.clone());
        args
    }

    fn capability_flags(&self) -> BTreeSet<String> {
        flags(&[CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE, CAP_COST])
    }

    fn instruction_file(&self) -> Option<&'static str> {
        Some("CLAUDE.md")
    }

    fn config_objects(&self, context: &InvocationContext) -> Vec<ConfigObject> {
        if !context.extensions.has_enabled() {
            return Vec::new();
        }
        vec![ConfigObject::json(
            MCP_CONFIG_FILE,
            json!({ "mcpServers": mcp_servers_json(&context.extensions, None) }),
        )]
    }

    fn parse_transcript(
        &self,
        _context: &InvocationContext,
        process: &ProcessOutput,
    ) -> Result<ParsedTranscript, InvocationError> {
        parse_stream_json(&process.stdout)
    }
}

/// Text of a `tool_result` block: either a string or a list of text parts.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn parse_stream_json(stdout: &str) -> Result<ParsedTranscript, InvocationError> {
    let mut transcript = ParsedTranscript::default();
    let mut tools = ToolLog::new();
    let mut result_text = None;
    let mut is_error = false;

    for (lineno, line) in stdout.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: Value =
            serde_json::from_str(line).map_err(|e| InvocationError::MalformedTranscript {
                detail: format!("line {}: {}", lineno + 1, e),
            })?;

        let blocks = message
            .pointer("/message/content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for block in &blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("tool_use") => {
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    let input = block.get("input").cloned().unwrap_or(Value::Null);
                    tools.record(block.get("id").and_then(Value::as_str), name, input);
                }
                Some("tool_result") => {
                    if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                        let text = block.get("content").map(tool_result_text).unwrap_or_default();
                        tools.attach_result(id, &text);
                    }
                }
                _ => {}
            }
        }

        if let Some(cost) = message.get("total_cost_usd").and_then(Value::as_f64) {
            transcript.cost_usd = Some(cost);
        }
        if let Some(flag) = message.get("is_error").and_then(Value::as_bool) {
            is_error = flag;
        }
        if let Some(text) = message.get("result").and_then(Value::as_str) {
            result_text = Some(text.to_string());
        }
        transcript.raw_log.push(message);
    }

    let output = result_text.unwrap_or_default();
    if is_error {
        transcript.reported_error = Some(if output.is_empty() {
            "assistant reported an error".to_string()
        } else {
            output.clone()
        });
    }
    transcript.output = output;
    transcript.tools = tools.into_records();
    Ok(transcript)
}
