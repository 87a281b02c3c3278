//! Model specifications.

use serde::{Deserialize, Serialize};

/// An AI model and how to reach it. Read-only at run time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModelSpec {
    /// Model name as the assistant expects it (e.g. "gpt-4o").
    pub name: String,

    /// Provider name (e.g. "openai", "anthropic").
    pub provider: String,

    /// Name of the environment variable holding the credential, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            credentials_ref: None,
        }
    }

    pub fn with_credentials_ref(mut self, env_var: impl Into<String>) -> Self {
        self.credentials_ref = Some(env_var.into());
        self
    }

    /// Conventional API-key variable for this provider.
    pub fn provider_key_var(&self) -> Option<&'static str> {
        match self.provider.to_ascii_lowercase().as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "google" | "gemini" => Some("GEMINI_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            "dashscope" | "qwen" => Some("DASHSCOPE_API_KEY"),
            _ => None,
        }
    }

    /// Resolve the credential into `(provider key, value)` for a subprocess env.
    ///
    /// Returns `None` when no reference is configured, the provider has no
    /// conventional key, or the referenced variable is unset.
    pub fn credential_env(&self) -> Option<(String, String)> {
        let reference = self.credentials_ref.as_deref()?;
        let key = self.provider_key_var()?;
        let value = std::env::var(reference).ok()?;
        Some((key.to_string(), value))
    }

    /// Short label used in logs, directory names and report keys.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.name)
    }
}
