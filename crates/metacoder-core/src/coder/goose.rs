//! Goose adapter.
//!
//! Goose reads its config from `$HOME/.config/goose/config.yaml` and writes a
//! JSONL session log whose path it prints as `logging to <path>`. With `HOME`
//! pointed at the working directory both stay inside it.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Map, Value};

use super::cli::{CliAssistant, ParsedTranscript};
use super::config_objects::ConfigObject;
use super::process::ProcessOutput;
use super::{flags, InvocationContext, CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE};
use crate::domain::{
    CoderIdentity, ExtensionCollection, ExtensionSpec, ExtensionTransport, InvocationError,
    ToolLog,
};

const DEFAULT_EXTENSION_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, Default)]
pub struct GooseAssistant;

impl CliAssistant for GooseAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Goose
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String> {
        vec!["run".into(), "-t".into(), context.prompt.clone()]
    }

    fn capability_flags(&self) -> std::collections::BTreeSet<String> {
        flags(&[CAP_EXTENSIONS, CAP_INSTRUCTIONS, CAP_TOOL_TRACE])
    }

    /// The bundled `developer` toolset, served over stdio by goose itself.
    fn default_extensions(&self) -> ExtensionCollection {
        let mut developer = ExtensionSpec::stdio(
            "developer",
            "goose",
            vec!["mcp".into(), "developer".into()],
        );
        developer.description = Some("Developer".into());
        ExtensionCollection::new().with(developer)
    }

    fn instruction_file(&self) -> Option<&'static str> {
        Some(".goosehints")
    }

    fn config_objects(&self, context: &InvocationContext) -> Vec<ConfigObject> {
        let mut extensions = Map::new();
        for spec in context.extensions.enabled() {
            if let ExtensionTransport::Stdio { command, args } = &spec.transport {
                extensions.insert(
                    spec.name.clone(),
                    json!({
                        "args": args,
                        "bundled": null,
                        "cmd": command,
                        "description": spec.description.clone().unwrap_or_default(),
                        "enabled": true,
                        "env_keys": [],
                        "envs": spec.env,
                        "name": spec.name,
                        "timeout": spec.timeout_secs.unwrap_or(DEFAULT_EXTENSION_TIMEOUT_SECS),
                        "type": "stdio",
                    }),
                );
            }
        }
        vec![ConfigObject::yaml(
            ".config/goose/config.yaml",
            json!({
                "GOOSE_MODEL": context.model.name,
                "GOOSE_PROVIDER": context.model.provider,
                "extensions": extensions,
            }),
        )]
    }

    fn parse_transcript(
        &self,
        context: &InvocationContext,
        process: &ProcessOutput,
    ) -> Result<ParsedTranscript, InvocationError> {
        let session = session_log_path(&process.stdout).map(|p| {
            if p.is_absolute() {
                p
            } else {
                context.working_dir.join(p)
            }
        });

        let transcript = match session {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(&path).map_err(|e| {
                    InvocationError::MalformedTranscript {
                        detail: format!("reading {}: {}", path.display(), e),
                    }
                })?;
                parse_session(&contents)?
            }
            _ => ParsedTranscript::plain(&process.stdout),
        };

        if transcript.output.is_empty() {
            return Err(InvocationError::MalformedTranscript {
                detail: "no result text found in goose output".into(),
            });
        }
        Ok(transcript)
    }
}

fn session_log_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find_map(|line| line.split_once("logging to ").map(|(_, p)| p.trim()))
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

fn parse_session(contents: &str) -> Result<ParsedTranscript, InvocationError> {
    let mut transcript = ParsedTranscript::default();
    let mut tools = ToolLog::new();

    for (lineno, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message: Value =
            serde_json::from_str(line).map_err(|e| InvocationError::MalformedTranscript {
                detail: format!("session line {}: {}", lineno + 1, e),
            })?;

        let from_assistant = message
            .get("role")
            .and_then(Value::as_str)
            .map_or(true, |r| r == "assistant");

        if let Some(items) = message.get("content").and_then(Value::as_array) {
            for item in items {
                match item.get("type").and_then(Value::as_str) {
                    Some("toolRequest") => {
                        let call = item.pointer("/toolCall/value");
                        let name = call
                            .and_then(|c| c.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or("unknown");
                        let arguments = call
                            .and_then(|c| c.get("arguments"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        tools.record(item.get("id").and_then(Value::as_str), name, arguments);
                    }
                    Some("toolResponse") => {
                        if let Some(id) = item.get("id").and_then(Value::as_str) {
                            let text = item
                                .pointer("/toolResult/value")
                                .and_then(Value::as_array)
                                .map(|parts| {
                                    parts
                                        .iter()
                                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                                        .collect::<Vec<_>>()
                                        .join("\n")
                                })
                                .unwrap_or_default();
                            tools.attach_result(id, &text);
                        }
                    }
                    _ => {
                        if from_assistant {
                            if let Some(text) = item.get("text").and_then(Value::as_str) {
                                transcript.output = text.trim().to_string();
                            }
                        }
                    }
                }
            }
        }
        transcript.raw_log.push(message);
    }

    transcript.tools = tools.into_records();
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelSpec;

    const SESSION: &str = r#"{"working_dir":"/w","description":"eval"}
{"role":"user","content":[{"type":"text","text":"What is 2+2?"}]}
{"role":"assistant","content":[{"type":"toolRequest","id":"call_1","toolCall":{"status":"success","value":{"name":"developer__shell","arguments":{"command":"echo 4"}}}}]}
{"role":"user","content":[{"type":"toolResponse","id":"call_1","toolResult":{"status":"success","value":[{"type":"text","text":"4"}]}}]}
{"role":"assistant","content":[{"type":"text","text":"4"}]}
"#;

    #[test]
    fn test_parse_session_tools_and_answer() {
        let t = parse_session(SESSION).unwrap();
        assert_eq!(t.output, "4");
        assert_eq!(t.raw_log.len(), 5);
        assert_eq!(t.tools.len(), 1);
        assert_eq!(t.tools[0].tool, "shell");
        assert_eq!(t.tools[0].extension.as_deref(), Some("developer"));
        assert_eq!(t.tools[0].arguments, json!({"command": "echo 4"}));
        assert_eq!(t.tools[0].result_summary.as_deref(), Some("4"));
    }

    #[test]
    fn test_session_log_path() {
        let stdout = "starting session | provider: openai\nlogging to ./.local/share/goose/sessions/20250613_120403.jsonl\n";
        assert_eq!(
            session_log_path(stdout),
            Some(PathBuf::from("./.local/share/goose/sessions/20250613_120403.jsonl"))
        );
        assert!(session_log_path("nothing here").is_none());
    }

    #[test]
    fn test_parse_transcript_reads_relative_session() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sessions")).unwrap();
        fs::write(dir.path().join("sessions/s.jsonl"), SESSION).unwrap();

        let ctx = InvocationContext::new("What is 2+2?", dir.path(), ModelSpec::new("gpt-4o", "openai"));
        let process = ProcessOutput {
            stdout: "logging to sessions/s.jsonl\n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        };
        let t = GooseAssistant.parse_transcript(&ctx, &process).unwrap();
        assert_eq!(t.output, "4");
        assert_eq!(t.tools.len(), 1);
    }

    #[test]
    fn test_empty_output_is_malformed() {
        let ctx = InvocationContext::new("x", "/tmp/none", ModelSpec::new("gpt-4o", "openai"));
        let process = ProcessOutput {
            stdout: "   \n".into(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        };
        assert!(matches!(
            GooseAssistant.parse_transcript(&ctx, &process),
            Err(InvocationError::MalformedTranscript { .. })
        ));
    }

    #[test]
    fn test_config_yaml_lists_enabled_extensions() {
        let extensions = ExtensionCollection::merged([
            &GooseAssistant.default_extensions(),
            &ExtensionCollection::new()
                .with(ExtensionSpec::stdio("pdfreader", "uvx", vec!["mcp-read-pdf".into()]))
                .with(ExtensionSpec::stdio("off", "npx", vec![]).disabled()),
        ]);
        let ctx = InvocationContext::new("x", "/tmp/w", ModelSpec::new("gpt-4o", "openai"))
            .with_extensions(extensions);

        let objects = GooseAssistant.config_objects(&ctx);
        let crate::coder::ConfigContents::Yaml(value) = &objects[0].contents else {
            panic!("expected yaml");
        };
        assert_eq!(value["GOOSE_MODEL"], json!("gpt-4o"));
        assert_eq!(value["extensions"]["developer"]["cmd"], json!("goose"));
        assert_eq!(value["extensions"]["pdfreader"]["timeout"], json!(300));
        assert!(value["extensions"].get("off").is_none());
    }
}
