//! Executor configuration
//!
//! Configuration is a plain value built once at start-up and passed by
//! reference. Nothing in the executor reads ambient state.
//!
//! Layering, lowest to highest precedence:
//! 1. built-in defaults
//! 2. every `*.toml` under `<project>/.opmap/config/`, in file-name order
//! 3. an explicit config file
//!
//! [`ExecutorConfig::load`] stops at layer 3. The binary applies
//! `OPMAP_SRC_DIR` / `OPMAP_SPEC_DIR` on top with [`apply_env_overrides`]
//! and validates again.

use crate::error::ConfigError;
use crate::guard::absolutize;
use crate::types::Tree;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-relative directory holding config layers
pub const CONFIG_DIR: &str = ".opmap/config";

/// Default system preamble embedded at the top of every shared context
pub const DEFAULT_PREAMBLE: &str = "You are a senior developer assisting with a project. \
You are given the current plan, the files scheduled for update and summaries of the local \
dependencies they use. Regenerate only the file you are asked for, consistent with the plan.";

/// What to do when a file update task fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFailurePolicy {
    /// First failure aborts the round and the run
    #[default]
    FailFast,
    /// Let every task finish; failures go to the run report
    Isolate,
}

/// What to do when a dependency summary fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFailurePolicy {
    /// First failure aborts the run
    #[default]
    FailFast,
    /// Substitute a placeholder summary and continue
    Placeholder,
}

/// External commands backing the CLI collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// argv for dependency summarization; stdout is the summary
    pub summarize: Vec<String>,
    /// argv for file regeneration; stdin is the context, stdout the new content
    pub update: Vec<String>,
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Source tree, relative to the project dir
    pub src_dir: PathBuf,
    /// Spec tree, relative to the project dir; empty disables it
    pub spec_dir: PathBuf,
    /// Update failure policy
    pub update_failure: UpdateFailurePolicy,
    /// Summary failure policy
    pub summary_failure: SummaryFailurePolicy,
    /// Bound on in-flight update tasks per round (unbounded when unset)
    pub max_concurrent_updates: Option<usize>,
    /// Static preamble for the shared context
    pub system_preamble: String,
    /// Commands for the CLI collaborators
    pub commands: CommandConfig,
}

impl ExecutorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With source dir
    #[inline]
    #[must_use]
    pub fn with_src_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.src_dir = dir.into();
        self
    }

    /// With spec dir
    #[inline]
    #[must_use]
    pub fn with_spec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_dir = dir.into();
        self
    }

    /// Disable the spec tree
    #[inline]
    #[must_use]
    pub fn without_spec(mut self) -> Self {
        self.spec_dir = PathBuf::new();
        self
    }

    /// With update failure policy
    #[inline]
    #[must_use]
    pub fn with_update_failure(mut self, policy: UpdateFailurePolicy) -> Self {
        self.update_failure = policy;
        self
    }

    /// With summary failure policy
    #[inline]
    #[must_use]
    pub fn with_summary_failure(mut self, policy: SummaryFailurePolicy) -> Self {
        self.summary_failure = policy;
        self
    }

    /// With concurrency bound
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_updates(mut self, max: usize) -> Self {
        self.max_concurrent_updates = Some(max);
        self
    }

    /// Whether a spec tree is configured
    #[inline]
    #[must_use]
    pub fn spec_enabled(&self) -> bool {
        !self.spec_dir.as_os_str().is_empty()
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for an empty source dir or a zero
    /// concurrency bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.src_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "src_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_concurrent_updates == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_updates",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve tree roots against the project dir
    #[must_use]
    pub fn roots(&self, project_dir: &Path) -> TreeRoots {
        TreeRoots {
            src: absolutize(&self.src_dir, project_dir),
            spec: self
                .spec_enabled()
                .then(|| absolutize(&self.spec_dir, project_dir)),
        }
    }

    /// Load layered configuration for a project
    ///
    /// # Errors
    /// - `ConfigError::Io` / `ConfigError::Parse` for unreadable layers
    /// - `ConfigError::InvalidValue` if the merged result is invalid
    pub fn load(project_dir: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();

        let dir = project_dir.join(CONFIG_DIR);
        if dir.is_dir() {
            let entries = std::fs::read_dir(&dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
            let mut files: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
                .collect();
            files.sort();
            for file in files {
                layers.push(ConfigLayer::read(&file)?);
            }
        }

        if let Some(path) = explicit {
            layers.push(ConfigLayer::read(path)?);
        }

        let config = merge_layers(layers);
        config.validate()?;

        tracing::debug!(
            src_dir = %config.src_dir.display(),
            spec_dir = %config.spec_dir.display(),
            "Loaded executor config"
        );
        Ok(config)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("./"),
            spec_dir: PathBuf::from("spec"),
            update_failure: UpdateFailurePolicy::FailFast,
            summary_failure: SummaryFailurePolicy::FailFast,
            max_concurrent_updates: None,
            system_preamble: DEFAULT_PREAMBLE.to_string(),
            commands: CommandConfig::default(),
        }
    }
}

/// Partial configuration read from one file
///
/// Every field is optional; set fields override lower layers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    src_dir: Option<PathBuf>,
    spec_dir: Option<PathBuf>,
    update_failure: Option<UpdateFailurePolicy>,
    summary_failure: Option<SummaryFailurePolicy>,
    max_concurrent_updates: Option<usize>,
    system_preamble: Option<String>,
    commands: Option<CommandLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandLayer {
    summarize: Option<Vec<String>>,
    update: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Parse a layer from TOML text
    ///
    /// # Errors
    /// Returns the TOML error for invalid input
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read a layer from a file
    ///
    /// # Errors
    /// Returns `ConfigError::Io` or `ConfigError::Parse`
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply set fields onto a config
    pub fn apply_to(self, config: &mut ExecutorConfig) {
        if let Some(v) = self.src_dir {
            config.src_dir = v;
        }
        if let Some(v) = self.spec_dir {
            config.spec_dir = v;
        }
        if let Some(v) = self.update_failure {
            config.update_failure = v;
        }
        if let Some(v) = self.summary_failure {
            config.summary_failure = v;
        }
        if let Some(v) = self.max_concurrent_updates {
            config.max_concurrent_updates = Some(v);
        }
        if let Some(v) = self.system_preamble {
            config.system_preamble = v;
        }
        if let Some(commands) = self.commands {
            if let Some(v) = commands.summarize {
                config.commands.summarize = v;
            }
            if let Some(v) = commands.update {
                config.commands.update = v;
            }
        }
    }
}

/// Fold layers over the defaults
#[must_use]
pub fn merge_layers(layers: impl IntoIterator<Item = ConfigLayer>) -> ExecutorConfig {
    let mut config = ExecutorConfig::default();
    for layer in layers {
        layer.apply_to(&mut config);
    }
    config
}

/// Apply `OPMAP_SRC_DIR` / `OPMAP_SPEC_DIR` from the process environment
pub fn apply_env_overrides(config: &mut ExecutorConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply `OPMAP_SRC_DIR` / `OPMAP_SPEC_DIR` read through `lookup`
///
/// Values are trimmed. An empty source dir is ignored; an empty spec dir
/// disables the spec tree.
pub fn apply_overrides(config: &mut ExecutorConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("OPMAP_SRC_DIR") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            tracing::warn!("empty OPMAP_SRC_DIR, ignoring");
        } else {
            config.src_dir = PathBuf::from(trimmed);
        }
    }
    if let Some(raw) = lookup("OPMAP_SPEC_DIR") {
        config.spec_dir = PathBuf::from(raw.trim());
    }
}

/// Absolute roots of the managed trees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRoots {
    /// Source tree root
    pub src: PathBuf,
    /// Spec tree root, if configured
    pub spec: Option<PathBuf>,
}

impl TreeRoots {
    /// Create roots from absolute paths
    #[inline]
    #[must_use]
    pub fn new(src: impl Into<PathBuf>, spec: Option<PathBuf>) -> Self {
        Self {
            src: src.into(),
            spec,
        }
    }

    /// Root for a tree, `None` when the tree is disabled
    #[inline]
    #[must_use]
    pub fn root(&self, tree: Tree) -> Option<&Path> {
        match tree {
            Tree::Src => Some(&self.src),
            Tree::Spec => self.spec.as_deref(),
        }
    }

    /// Trees that are configured, in staging order
    #[must_use]
    pub fn enabled(&self) -> Vec<Tree> {
        Tree::ALL
            .into_iter()
            .filter(|t| self.root(*t).is_some())
            .collect()
    }
}
