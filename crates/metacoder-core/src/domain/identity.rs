//! Coder identity tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::CoreError;

/// Which assistant a coder variant wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoderIdentity {
    Claude,
    Gemini,
    Codex,
    Goose,
    Qwen,
    Opencode,
    Dummy,
}

impl CoderIdentity {
    /// All known identities, in registry order.
    pub const ALL: [CoderIdentity; 7] = [
        CoderIdentity::Claude,
        CoderIdentity::Gemini,
        CoderIdentity::Codex,
        CoderIdentity::Goose,
        CoderIdentity::Qwen,
        CoderIdentity::Opencode,
        CoderIdentity::Dummy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoderIdentity::Claude => "claude",
            CoderIdentity::Gemini => "gemini",
            CoderIdentity::Codex => "codex",
            CoderIdentity::Goose => "goose",
            CoderIdentity::Qwen => "qwen",
            CoderIdentity::Opencode => "opencode",
            CoderIdentity::Dummy => "dummy",
        }
    }
}

impl fmt::Display for CoderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoderIdentity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        CoderIdentity::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == needle)
            .ok_or_else(|| CoreError::UnknownCoder {
                name: s.to_string(),
                available: CoderIdentity::ALL
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Claude".parse::<CoderIdentity>().unwrap(), CoderIdentity::Claude);
        assert_eq!(" goose ".parse::<CoderIdentity>().unwrap(), CoderIdentity::Goose);
    }

    #[test]
    fn test_parse_unknown_rejected() {
        let err = "cursor".parse::<CoderIdentity>().unwrap_err();
        match err {
            CoreError::UnknownCoder { name, available } => {
                assert_eq!(name, "cursor");
                assert!(available.contains("dummy"));
            }
            other => panic!("expected UnknownCoder, got {:?}", other),
        }
    }

    #[test]
    fn test_display_matches_serde_name() {
        for id in CoderIdentity::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id));
        }
    }
}
