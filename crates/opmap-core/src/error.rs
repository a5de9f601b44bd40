//! Error types for the operation-map executor
//!
//! Provides error handling for:
//! - Path containment violations
//! - Staging failures (moves / deletes)
//! - Dependency summary and file update collaborator failures
//! - Configuration and operation-map loading

use crate::types::{Round, Tree};
use std::path::PathBuf;

/// Fatal errors raised while executing an operation map
///
/// Every variant aborts the run. Mutations committed before the failure are
/// left in place: the executor has no rollback.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// An operand resolved outside its authorized root
    #[error("path escape: '{}' is not within '{}'", path.display(), root.display())]
    PathEscape {
        /// The resolved, normalized path that was attempted
        path: PathBuf,
        /// The authorized root
        root: PathBuf,
    },

    /// A delete target did not exist
    #[error("cannot delete missing file: {}", path.display())]
    MissingFileOnDelete {
        /// Absolute path of the missing target
        path: PathBuf,
    },

    /// A dependency summary call failed
    #[error("failed to summarize dependency '{path}': {source:#}")]
    SummaryCollectionFailure {
        /// Relative dependency path
        path: String,
        /// Collaborator error
        #[source]
        source: anyhow::Error,
    },

    /// A file update task failed
    #[error("failed to update {tree} file '{path}' ({round}): {source:#}")]
    UpdateTaskFailure {
        /// Tree the file belongs to
        tree: Tree,
        /// Round the task was scheduled in
        round: Round,
        /// Relative file path
        path: String,
        /// Collaborator error
        #[source]
        source: anyhow::Error,
    },

    /// The install confirmation prompt failed
    #[error("install confirmation failed: {source:#}")]
    Install {
        /// Collaborator error
        #[source]
        source: anyhow::Error,
    },

    /// Filesystem error outside the cases above
    #[error("io error during {op} of {}: {source}", path.display())]
    Io {
        /// Operation being performed
        op: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ExecutorError {
    /// Create a path escape error
    #[inline]
    pub fn path_escape(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::PathEscape {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Create an IO error for path
    #[inline]
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Check if error is a containment violation
    #[inline]
    #[must_use]
    pub fn is_path_violation(&self) -> bool {
        matches!(self, Self::PathEscape { .. })
    }

    /// Check if the error can only happen before any update round starts
    ///
    /// Errors in this class leave the trees with, at most, staged moves and
    /// deletes applied and no regenerated content. A path escape from
    /// [`PlanExecutor::execute`](crate::executor::PlanExecutor::execute) is
    /// raised before anything is mutated.
    #[inline]
    #[must_use]
    pub fn is_fatal_before_updates(&self) -> bool {
        matches!(
            self,
            Self::PathEscape { .. }
                | Self::MissingFileOnDelete { .. }
                | Self::SummaryCollectionFailure { .. }
                | Self::Install { .. }
        )
    }
}

/// Errors loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid config value for {key}: {reason}")]
    InvalidValue {
        /// Key name
        key: &'static str,
        /// Reason
        reason: String,
    },

    /// The working directory could not be determined
    #[error("cannot resolve working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}

/// Errors loading an operation map or prompt history
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// File could not be read
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid YAML
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Extension is neither json nor yaml
    #[error("unsupported operation map format: '{0}'")]
    UnsupportedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_escape_display_names_both_paths() {
        let err = ExecutorError::path_escape("/etc/passwd", "/work/src");
        let msg = err.to_string();
        assert!(msg.contains("/etc/passwd"));
        assert!(msg.contains("/work/src"));
        assert!(err.is_path_violation());
        assert!(err.is_fatal_before_updates());
    }

    #[test]
    fn classification() {
        let missing = ExecutorError::MissingFileOnDelete {
            path: PathBuf::from("/work/src/gone.js"),
        };
        assert!(missing.is_fatal_before_updates());
        assert!(!missing.is_path_violation());

        let update = ExecutorError::UpdateTaskFailure {
            tree: Tree::Src,
            round: Round::First,
            path: "a.js".into(),
            source: anyhow::anyhow!("model unavailable"),
        };
        assert!(!update.is_fatal_before_updates());
        assert!(update.to_string().contains("a.js"));
        assert!(update.to_string().contains("model unavailable"));
    }

    #[test]
    fn source_chain_is_preserved() {
        use std::error::Error as _;

        let err = ExecutorError::io(
            "rename",
            "/work/src/a.js",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.source().is_some());
    }
}
