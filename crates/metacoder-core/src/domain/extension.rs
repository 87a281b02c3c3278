//! MCP extension specifications and name-keyed collections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the assistant reaches an extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtensionTransport {
    /// Spawned as a child process speaking MCP over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Remote MCP server over HTTP.
    Http { url: String },
}

impl ExtensionTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtensionTransport::Stdio { .. } => "stdio",
            ExtensionTransport::Http { .. } => "http",
        }
    }
}

/// A named external tool provider the coder may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionSpec {
    pub name: String,

    pub transport: ExtensionTransport,

    /// Environment passed to the extension process, verbatim.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Per-call timeout the assistant should apply, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ExtensionSpec {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: ExtensionTransport::Stdio {
                command: command.into(),
                args,
            },
            env: BTreeMap::new(),
            enabled: true,
            description: None,
            timeout_secs: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: ExtensionTransport::Http { url: url.into() },
            env: BTreeMap::new(),
            enabled: true,
            description: None,
            timeout_secs: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Ordered, name-unique set of extensions.
///
/// Inserting a spec whose name already exists replaces the earlier entry in
/// place, so merge order decides the winner and first appearance decides the
/// position.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExtensionCollection {
    specs: Vec<ExtensionSpec>,
}

impl ExtensionCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name.
    pub fn insert(&mut self, spec: ExtensionSpec) {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn with(mut self, spec: ExtensionSpec) -> Self {
        self.insert(spec);
        self
    }

    /// Overlay `other` on top of `self`; entries of `other` win by name.
    pub fn merge(&mut self, other: &ExtensionCollection) {
        for spec in &other.specs {
            self.insert(spec.clone());
        }
    }

    /// Merge a sequence of collections left to right.
    pub fn merged<'a>(layers: impl IntoIterator<Item = &'a ExtensionCollection>) -> Self {
        let mut out = ExtensionCollection::new();
        for layer in layers {
            out.merge(layer);
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionSpec> {
        self.specs.iter()
    }

    /// Only the entries that should be materialized for the assistant.
    pub fn enabled(&self) -> impl Iterator<Item = &ExtensionSpec> {
        self.specs.iter().filter(|s| s.enabled)
    }

    pub fn has_enabled(&self) -> bool {
        self.specs.iter().any(|s| s.enabled)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FromIterator<ExtensionSpec> for ExtensionCollection {
    fn from_iter<I: IntoIterator<Item = ExtensionSpec>>(iter: I) -> Self {
        let mut out = ExtensionCollection::new();
        for spec in iter {
            out.insert(spec);
        }
        out
    }
}
