//! Explicit identity → coder mapping handed to the runners.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::claude::ClaudeAssistant;
use super::cli::CliCoder;
use super::codex::CodexAssistant;
use super::dummy::DummyCoder;
use super::gemini::GeminiAssistant;
use super::goose::GooseAssistant;
use super::opencode::OpencodeAssistant;
use super::qwen::QwenAssistant;
use super::Coder;
use crate::domain::{CoderIdentity, CoreError, Result};

#[derive(Clone, Default)]
pub struct CoderRegistry {
    coders: BTreeMap<CoderIdentity, Arc<dyn Coder>>,
}

impl fmt::Debug for CoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoderRegistry")
            .field("coders", &self.identities())
            .finish()
    }
}

impl CoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every shipped adapter plus the dummy coder.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(Arc::new(CliCoder::new(ClaudeAssistant)))
            .with(Arc::new(CliCoder::new(GeminiAssistant)))
            .with(Arc::new(CliCoder::new(CodexAssistant)))
            .with(Arc::new(CliCoder::new(GooseAssistant)))
            .with(Arc::new(CliCoder::new(QwenAssistant)))
            .with(Arc::new(CliCoder::new(OpencodeAssistant)))
            .with(Arc::new(DummyCoder::new()))
    }

    /// Register under the coder's own identity, returning any replaced entry.
    pub fn register(&mut self, coder: Arc<dyn Coder>) -> Option<Arc<dyn Coder>> {
        self.coders.insert(coder.identity(), coder)
    }

    pub fn with(mut self, coder: Arc<dyn Coder>) -> Self {
        self.register(coder);
        self
    }

    pub fn get(&self, identity: CoderIdentity) -> Option<Arc<dyn Coder>> {
        self.coders.get(&identity).cloned()
    }

    pub fn require(&self, identity: CoderIdentity) -> Result<Arc<dyn Coder>> {
        self.get(identity)
            .ok_or_else(|| CoreError::CoderNotRegistered(identity.to_string()))
    }

    /// Parse `name` and look it up.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Coder>> {
        self.require(name.parse()?)
    }

    pub fn identities(&self) -> Vec<CoderIdentity> {
        self.coders.keys().copied().collect()
    }

    /// Registered coders whose executables are present.
    pub fn available(&self) -> Vec<CoderIdentity> {
        self.coders
            .iter()
            .filter(|(_, coder)| coder.is_available())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.coders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_identity() {
        let registry = CoderRegistry::with_defaults();
        assert_eq!(registry.len(), CoderIdentity::ALL.len());
        for id in CoderIdentity::ALL {
            assert_eq!(registry.require(id).unwrap().identity(), id);
        }
    }

    #[test]
    fn test_dummy_always_available() {
        let registry = CoderRegistry::new().with(Arc::new(DummyCoder::new()));
        assert_eq!(registry.available(), vec![CoderIdentity::Dummy]);
    }

    #[test]
    fn test_resolve_errors() {
        let registry = CoderRegistry::new().with(Arc::new(DummyCoder::new()));
        assert!(registry.resolve("DUMMY").is_ok());
        assert!(matches!(
            registry.resolve("claude"),
            Err(CoreError::CoderNotRegistered(name)) if name == "claude"
        ));
        assert!(matches!(
            registry.resolve("cursor"),
            Err(CoreError::UnknownCoder { .. })
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = CoderRegistry::new();
        assert!(registry.register(Arc::new(DummyCoder::new())).is_none());
        assert!(registry.register(Arc::new(DummyCoder::new())).is_some());
        assert_eq!(registry.len(), 1);
    }
}
