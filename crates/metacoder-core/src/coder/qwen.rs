//! Qwen Code adapter. Shares gemini's settings layout under `.qwen/`.

use serde_json::json;

use super::cli::{mcp_servers_json, CliAssistant};
use super::config_objects::ConfigObject;
use super::InvocationContext;
use crate::domain::CoderIdentity;

#[derive(Debug, Clone, Copy, Default)]
pub struct QwenAssistant;

impl CliAssistant for QwenAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Qwen
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
        Some("QWEN.md")
    }

    fn config_objects(&self, context: &InvocationContext) -> Vec<ConfigObject> {
        if !context.extensions.has_enabled() {
            return Vec::new();
        }
        vec![ConfigObject::json(
            ".qwen/settings.json",
            json!({ "mcpServers": mcp_servers_json(&context.extensions, None) }),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExtensionCollection, ExtensionSpec, ModelSpec};

    #[test]
    fn test_settings_written_only_with_extensions() {
        let bare = InvocationContext::new("hi", "/tmp/w", ModelSpec::new("qwen3-coder", "dashscope"));
        assert!(QwenAssistant.config_objects(&bare).is_empty());

        let with_ext = bare
            .clone()
            .with_extensions(ExtensionCollection::new().with(ExtensionSpec::stdio("fs", "npx", vec![])));
        let objects = QwenAssistant.config_objects(&with_ext);
        assert_eq!(objects[0].relative_path.to_str(), Some(".qwen/settings.json"));
    }
}
