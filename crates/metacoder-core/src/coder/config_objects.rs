//! Native configuration files written into a working directory before launch.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::domain::{CoreError, Result};

/// Serialized form of a config object.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigContents {
    Text(String),
    Json(Value),
    Yaml(Value),
}

/// One file an assistant expects to find in its working directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigObject {
    pub relative_path: PathBuf,
    pub contents: ConfigContents,
}

impl ConfigObject {
    pub fn text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            relative_path: path.into(),
            contents: ConfigContents::Text(text.into()),
        }
    }

    pub fn json(path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            relative_path: path.into(),
            contents: ConfigContents::Json(value),
        }
    }

    pub fn yaml(path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            relative_path: path.into(),
            contents: ConfigContents::Yaml(value),
        }
    }

    fn render(&self) -> Result<Vec<u8>> {
        Ok(match &self.contents {
            ConfigContents::Text(text) => text.clone().into_bytes(),
            ConfigContents::Json(value) => serde_json::to_vec_pretty(value)?,
            ConfigContents::Yaml(value) => serde_yaml::to_string(value)?.into_bytes(),
        })
    }
}

/// Reject absolute paths and any `..` component.
fn checked_target(root: &Path, relative: &Path) -> Result<PathBuf> {
    let escapes = relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(CoreError::PathEscape(relative.display().to_string()));
    }
    Ok(root.join(relative))
}

/// Write every object under `root`, replacing existing files atomically.
pub fn write_config_objects(root: &Path, objects: &[ConfigObject]) -> Result<()> {
    for object in objects {
        let target = checked_target(root, &object.relative_path)?;
        let parent = target.parent().unwrap_or(root);
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&object.render()?)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        tracing::debug!(path = %target.display(), "wrote assistant config");
    }
    Ok(())
}
