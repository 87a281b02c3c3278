//! Runner configuration, working-directory layouts and eval plans.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use metacoder_core::{
    CoderIdentity, EvalCase, ExtensionCollection, LockConfig, ModelSpec,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EvalError, Result};

pub const MAX_CONCURRENCY_ENV: &str = "METACODER_MAX_CONCURRENCY";
pub const INVOCATION_TIMEOUT_ENV: &str = "METACODER_INVOCATION_TIMEOUT_SECS";
pub const LOCK_WAIT_ENV: &str = "METACODER_LOCK_WAIT_MS";
pub const LOCK_STALE_ENV: &str = "METACODER_LOCK_STALE_SECS";
pub const WORKDIR_ROOT_ENV: &str = "METACODER_WORKDIR_ROOT";
pub const KEEP_WORKDIRS_ENV: &str = "METACODER_KEEP_WORKDIRS";

/// Where each triple runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkdirLayout {
    /// A new unique directory under `root` per run.
    Fresh { root: PathBuf },
    /// `<root>/<coder>/<model>/<case>`, the same path on every run.
    Reused { root: PathBuf },
    /// One directory for every run; runs serialize on its lock.
    Shared { path: PathBuf },
}

impl WorkdirLayout {
    /// Directory for a triple, created if missing.
    pub fn resolve(&self, coder: CoderIdentity, model: &ModelSpec, case: &str) -> Result<PathBuf> {
        let dir = match self {
            WorkdirLayout::Fresh { root } => {
                let id = Uuid::new_v4().simple().to_string();
                root.join(format!("{}-{}-{}", coder, slug(case), &id[..12]))
            }
            WorkdirLayout::Reused { root } => root
                .join(coder.as_str())
                .join(slug(&model.label()))
                .join(slug(case)),
            WorkdirLayout::Shared { path } => path.clone(),
        };
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Whether the directory belongs to a single run and can be removed after.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, WorkdirLayout::Fresh { .. })
    }
}

/// Path-safe form of a label: anything but `[A-Za-z0-9._-]` becomes `_`.
pub fn slug(label: &str) -> String {
    let s: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match s.as_str() {
        "" | "." | ".." => format!("_{s}"),
        _ => s,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Triples in flight at once. 1 = sequential.
    pub max_concurrency: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRunnerConfig {
    pub layout: WorkdirLayout,
    pub invocation_timeout_ms: u64,
    /// Keep `Fresh` directories after the run for inspection.
    pub keep_workdirs: bool,
    pub lock: LockConfig,
}

impl CaseRunnerConfig {
    pub fn new(layout: WorkdirLayout) -> Self {
        Self {
            layout,
            invocation_timeout_ms: RunnerConfig::default().invocation_timeout_secs * 1000,
            keep_workdirs: false,
            lock: LockConfig::default(),
        }
    }

    pub fn with_invocation_timeout_ms(mut self, ms: u64) -> Self {
        self.invocation_timeout_ms = ms;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn keeping_workdirs(mut self) -> Self {
        self.keep_workdirs = true;
        self
    }
}

/// Flat runner settings, overlaid from `METACODER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_concurrency: usize,
    pub invocation_timeout_secs: u64,
    pub lock_wait_ms: u64,
    pub lock_poll_ms: u64,
    pub lock_stale_secs: u64,
    pub workdir_root: PathBuf,
    pub keep_workdirs: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            invocation_timeout_secs: 600,
            lock_wait_ms: 30_000,
            lock_poll_ms: 50,
            lock_stale_secs: 3600,
            workdir_root: std::env::temp_dir().join("metacoder"),
            keep_workdirs: false,
        }
    }
}

impl RunnerConfig {
    /// Defaults overlaid with the process environment, then validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunnerConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, MAX_CONCURRENCY_ENV)? {
            config.max_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, INVOCATION_TIMEOUT_ENV)? {
            config.invocation_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, LOCK_WAIT_ENV)? {
            config.lock_wait_ms = v;
        }
        if let Some(v) = parse_var(&lookup, LOCK_STALE_ENV)? {
            config.lock_stale_secs = v;
        }
        if let Some(root) = lookup(WORKDIR_ROOT_ENV).filter(|s| !s.trim().is_empty()) {
            config.workdir_root = PathBuf::from(root);
        }
        if let Some(raw) = lookup(KEEP_WORKDIRS_ENV) {
            config.keep_workdirs = parse_flag(KEEP_WORKDIRS_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(EvalError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.invocation_timeout_secs == 0 {
            return Err(EvalError::InvalidConfig(
                "invocation_timeout_secs must be positive".into(),
            ));
        }
        if self.lock_stale_secs <= self.invocation_timeout_secs {
            return Err(EvalError::InvalidConfig(format!(
                "lock_stale_secs ({}) must exceed invocation_timeout_secs ({})",
                self.lock_stale_secs, self.invocation_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn matrix_config(&self) -> MatrixConfig {
        MatrixConfig {
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            wait_budget_ms: self.lock_wait_ms,
            poll_interval_ms: self.lock_poll_ms,
            stale_after_ms: self.lock_stale_secs.saturating_mul(1000),
        }
    }

    /// Case runner settings with a `Fresh` layout under `workdir_root`.
    pub fn case_runner_config(&self) -> CaseRunnerConfig {
        CaseRunnerConfig {
            layout: WorkdirLayout::Fresh {
                root: self.workdir_root.clone(),
            },
            invocation_timeout_ms: self.invocation_timeout_secs.saturating_mul(1000),
            keep_workdirs: self.keep_workdirs,
            lock: self.lock_config(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EvalError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(EvalError::InvalidConfig(format!(
            "{key}={other:?}: expected a boolean"
        ))),
    }
}

/// In-memory plan: what to run. Any loader that can produce this value works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalPlan {
    pub name: String,
    pub coders: Vec<CoderIdentity>,
    pub models: Vec<ModelSpec>,
    /// Plan-level extensions, layered over coder defaults.
    #[serde(default)]
    pub extensions: ExtensionCollection,
    pub cases: Vec<EvalCase>,
}

impl EvalPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coders: Vec::new(),
            models: Vec::new(),
            extensions: ExtensionCollection::new(),
            cases: Vec::new(),
        }
    }

    pub fn with_coder(mut self, coder: CoderIdentity) -> Self {
        self.coders.push(coder);
        self
    }

    pub fn with_model(mut self, model: ModelSpec) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_case(mut self, case: EvalCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionCollection) -> Self {
        self.extensions = extensions;
        self
    }

    /// Reject duplicate case names and thresholds outside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for case in &self.cases {
            if !seen.insert(case.name.as_str()) {
                return Err(EvalError::InvalidConfig(format!(
                    "duplicate case name: {}",
                    case.name
                )));
            }
            if !(0.0..=1.0).contains(&case.threshold) {
                return Err(EvalError::InvalidConfig(format!(
                    "case {} threshold {} outside [0, 1]",
                    case.name, case.threshold
                )));
            }
        }
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let plan: EvalPlan = serde_json::from_slice(&std::fs::read(path)?)?;
        plan.validate()?;
        Ok(plan)
    }
}

/// Subset selection over a plan. `None` means "everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixFilter {
    #[serde(default)]
    pub coders: Option<Vec<CoderIdentity>>,
    /// Model names or `provider/name` labels.
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub cases: Option<Vec<String>>,
}

impl MatrixFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only_coders(mut self, coders: impl IntoIterator<Item = CoderIdentity>) -> Self {
        self.coders = Some(coders.into_iter().collect());
        self
    }

    pub fn only_models(mut self, models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn only_cases(mut self, cases: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cases = Some(cases.into_iter().map(Into::into).collect());
        self
    }

    pub fn allows_coder(&self, coder: CoderIdentity) -> bool {
        self.coders.as_ref().map_or(true, |c| c.contains(&coder))
    }

    pub fn allows_model(&self, model: &ModelSpec) -> bool {
        self.models
            .as_ref()
            .map_or(true, |m| m.iter().any(|s| *s == model.name || *s == model.label()))
    }

    pub fn allows_case(&self, case: &EvalCase) -> bool {
        self.cases.as_ref().map_or(true, |c| c.contains(&case.name))
    }
}
