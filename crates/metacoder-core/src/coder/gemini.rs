//! Gemini CLI adapter.

use serde_json::{json, Value};

use super::cli::{mcp_servers_json, CliAssistant, ParsedTranscript};
use super::config_objects::ConfigObject;
use super::process::ProcessOutput;
use super::InvocationContext;
use crate::domain::{CoderIdentity, InvocationError};

/// Per-server timeout gemini applies when none is configured.
const DEFAULT_MCP_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAssistant;

impl CliAssistant for GeminiAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Gemini
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String> {
        let mut args = Vec::new();
        if !context.model.name.is_empty() {
            args.push("-m".to_string());
            args.push(context.model.name.clone());
        }
        args.push("-p".to_string());
        args.push(context.prompt.clone());
        args
    }

    fn instruction_file(&self) -> Option<&'static str> {
        Some("GEMINI.md")
    }

    fn config_objects(&self, context: &InvocationContext) -> Vec<ConfigObject> {
        if !context.extensions.has_enabled() {
            return Vec::new();
        }
        vec![ConfigObject::json(
            ".gemini/settings.json",
            json!({
                "mcpServers": mcp_servers_json(&context.extensions, Some(DEFAULT_MCP_TIMEOUT_MS))
            }),
        )]
    }

    fn parse_transcript(
        &self,
        _context: &InvocationContext,
        process: &ProcessOutput,
    ) -> Result<ParsedTranscript, InvocationError> {
        Ok(parse_debug_blocks(&process.stdout))
    }
}

/// Split gemini's debug-mode output into blocks.
///
/// `[DEBUG] [Kind] text` lines become their own blocks; runs of other lines
/// are gathered into text blocks. The last block's text is the answer.
fn parse_debug_blocks(stdout: &str) -> ParsedTranscript {
    let mut blocks: Vec<Value> = Vec::new();
    let mut pending = String::new();

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("[DEBUG]") {
            if !pending.is_empty() {
                blocks.push(json!({ "text": std::mem::take(&mut pending) }));
            }
            let parsed = rest
                .trim_start()
                .strip_prefix('[')
                .and_then(|r| r.split_once("] "));
            if let Some((kind, text)) = parsed {
                blocks.push(json!({ "debug_type": kind, "text": text }));
            }
        } else {
            pending.push_str(line);
            pending.push('\n');
        }
    }
    if !pending.is_empty() {
        blocks.push(json!({ "text": pending }));
    }

    let output = blocks
        .last()
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| stdout.trim().to_string());

    ParsedTranscript {
        output,
        raw_log: blocks,
        ..ParsedTranscript::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::ConfigContents;
    use crate::domain::{ExtensionCollection, ExtensionSpec, ModelSpec};

    #[test]
    fn test_debug_blocks_and_final_text() {
        let stdout = "[DEBUG] [BfsFileSearch] scanning 3 dirs\n[DEBUG] [MemoryDiscovery] loaded GEMINI.md\nThe answer\nis 4\n";
        let t = parse_debug_blocks(stdout);
        assert_eq!(t.raw_log.len(), 3);
        assert_eq!(t.raw_log[0]["debug_type"], json!("BfsFileSearch"));
        assert_eq!(t.output, "The answer\nis 4");
    }

    #[test]
    fn test_plain_output_without_debug() {
        let t = parse_debug_blocks("just text\n");
        assert_eq!(t.output, "just text");
        assert_eq!(t.raw_log.len(), 1);
    }

    #[test]
    fn test_settings_include_default_timeout() {
        let ctx = InvocationContext::new("hi", "/tmp/w", ModelSpec::new("gemini-2.5-pro", "google"))
            .with_extensions(ExtensionCollection::new().with(ExtensionSpec::stdio("fs", "npx", vec![])));
        let objects = GeminiAssistant.config_objects(&ctx);
        assert_eq!(objects.len(), 1);
        assert_eq!(
            objects[0].contents,
            ConfigContents::Json(json!({
                "mcpServers": {"fs": {"command": "npx", "timeout": 30000}}
            }))
        );
        assert_eq!(
            GeminiAssistant.build_args(&ctx),
            vec!["-m", "gemini-2.5-pro", "-p", "hi"]
        );
    }
}
