//! opencode adapter. No MCP support through this wrapper.

use std::collections::BTreeSet;

use super::cli::CliAssistant;
use super::{flags, InvocationContext, CAP_INSTRUCTIONS};
use crate::domain::CoderIdentity;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpencodeAssistant;

impl CliAssistant for OpencodeAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Opencode
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if !context.model.name.is_empty() {
            args.push("--model".into());
            args.push(format!("{}/{}", context.model.provider, context.model.name));
        }
        args.push(context.prompt.clone());
        args
    }

    fn supports_extensions(&self) -> bool {
        false
    }

    fn capability_flags(&self) -> BTreeSet<String> {
        flags(&[CAP_INSTRUCTIONS])
    }

    fn instruction_file(&self) -> Option<&'static str> {
        Some("AGENTS.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coder::CAP_EXTENSIONS;
    use crate::domain::ModelSpec;

    #[test]
    fn test_no_extension_capability() {
        assert!(!OpencodeAssistant.supports_extensions());
        assert!(!OpencodeAssistant.capability_flags().contains(CAP_EXTENSIONS));
    }

    #[test]
    fn test_model_is_provider_qualified() {
        let ctx = InvocationContext::new("hi", "/tmp/w", ModelSpec::new("gpt-4o", "openai"));
        assert_eq!(
            OpencodeAssistant.build_args(&ctx),
            vec!["run", "--model", "openai/gpt-4o", "hi"]
        );
    }
}
