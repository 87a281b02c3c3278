//! OpenAI Codex CLI adapter.

use super::cli::CliAssistant;
use super::InvocationContext;
use crate::domain::CoderIdentity;

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAssistant;

impl CliAssistant for CodexAssistant {
    fn identity(&self) -> CoderIdentity {
        CoderIdentity::Codex
    }

    fn build_args(&self, context: &InvocationContext) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--skip-git-repo-check".to_string()];
        if !context.model.name.is_empty() {
            args.push("-m".into());
            args.push(context.model.name.clone());
        }
        args.push(context.prompt.clone());
        args
    }

    fn instruction_file(&self) -> Option<&'static str> {
        Some("AGENTS.md")
    }
}
