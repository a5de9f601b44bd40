//! Core types for the executor
//!
//! Defines:
//! - Trees and update rounds
//! - The operation map (bucketed wire form) and tagged operations
//! - Prompt history passed through to collaborators
//! - The run report

use crate::error::MapError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// One of the two managed directory roots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tree {
    /// Source tree
    Src,
    /// Specification tree
    Spec,
}

impl Tree {
    /// Both trees, in staging order
    pub const ALL: [Tree; 2] = [Tree::Src, Tree::Spec];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Tree::Src => "src",
            Tree::Spec => "spec",
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Update round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    /// `3_*` buckets
    First,
    /// `4_*` buckets, started after round one settles
    Second,
}

impl Round {
    /// Both rounds, in execution order
    pub const ALL: [Round; 2] = [Round::First, Round::Second];

    /// Round number (1 or 2)
    #[inline]
    #[must_use]
    pub fn number(&self) -> u8 {
        match self {
            Round::First => 1,
            Round::Second => 2,
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round {}", self.number())
    }
}

/// Treat an explicit `null` bucket the same as a missing one
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Operation map as emitted by the planning step
///
/// Each bucket is strongly typed; missing or `null` buckets are empty.
/// Move maps keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMap {
    /// Packages requiring installation
    #[serde(rename = "0_NPM_DEP_INSTALL", default, deserialize_with = "null_as_default")]
    pub install: Vec<String>,
    /// Source tree moves, old → new
    #[serde(rename = "1_MOVE_SRC", default, deserialize_with = "null_as_default")]
    pub move_src: IndexMap<String, String>,
    /// Spec tree moves, old → new
    #[serde(rename = "1_MOVE_SPEC", default, deserialize_with = "null_as_default")]
    pub move_spec: IndexMap<String, String>,
    /// Source tree deletions
    #[serde(rename = "2_DEL_SRC", default, deserialize_with = "null_as_default")]
    pub delete_src: Vec<String>,
    /// Spec tree deletions
    #[serde(rename = "2_DEL_SPEC", default, deserialize_with = "null_as_default")]
    pub delete_spec: Vec<String>,
    /// Round one source updates
    #[serde(rename = "3_UPDATE_SRC", default, deserialize_with = "null_as_default")]
    pub update_src_first: Vec<String>,
    /// Round one spec updates
    #[serde(rename = "3_UPDATE_SPEC", default, deserialize_with = "null_as_default")]
    pub update_spec_first: Vec<String>,
    /// Round two source updates
    #[serde(rename = "4_UPDATE_SRC", default, deserialize_with = "null_as_default")]
    pub update_src_second: Vec<String>,
    /// Round two spec updates
    #[serde(rename = "4_UPDATE_SPEC", default, deserialize_with = "null_as_default")]
    pub update_spec_second: Vec<String>,
    /// Local files to summarize before any round
    #[serde(rename = "LOCAL_DEP", default, deserialize_with = "null_as_default")]
    pub local_deps: Vec<String>,
}

impl OperationMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON text
    ///
    /// # Errors
    /// Returns `MapError::Json` if the text is not a valid operation map
    pub fn from_json(text: &str) -> Result<Self, MapError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse from YAML text
    ///
    /// # Errors
    /// Returns `MapError::Yaml` if the text is not a valid operation map
    pub fn from_yaml(text: &str) -> Result<Self, MapError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// - `MapError::Io` if the file cannot be read
    /// - `MapError::UnsupportedFormat` for other extensions
    /// - parse errors from the matching format
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("yaml" | "yml") => Self::from_yaml(&text),
            other => Err(MapError::UnsupportedFormat(other.unwrap_or("").to_string())),
        }
    }

    /// Moves for a tree
    #[inline]
    #[must_use]
    pub fn moves(&self, tree: Tree) -> &IndexMap<String, String> {
        match tree {
            Tree::Src => &self.move_src,
            Tree::Spec => &self.move_spec,
        }
    }

    /// Deletions for a tree
    #[inline]
    #[must_use]
    pub fn deletes(&self, tree: Tree) -> &[String] {
        match tree {
            Tree::Src => &self.delete_src,
            Tree::Spec => &self.delete_spec,
        }
    }

    /// Update targets for a tree and round
    #[inline]
    #[must_use]
    pub fn updates(&self, tree: Tree, round: Round) -> &[String] {
        match (tree, round) {
            (Tree::Src, Round::First) => &self.update_src_first,
            (Tree::Spec, Round::First) => &self.update_spec_first,
            (Tree::Src, Round::Second) => &self.update_src_second,
            (Tree::Spec, Round::Second) => &self.update_spec_second,
        }
    }

    fn updates_mut(&mut self, tree: Tree, round: Round) -> &mut Vec<String> {
        match (tree, round) {
            (Tree::Src, Round::First) => &mut self.update_src_first,
            (Tree::Spec, Round::First) => &mut self.update_spec_first,
            (Tree::Src, Round::Second) => &mut self.update_src_second,
            (Tree::Spec, Round::Second) => &mut self.update_spec_second,
        }
    }

    /// Source targets of both rounds, duplicates kept
    ///
    /// `3_UPDATE_SRC` followed by `4_UPDATE_SRC`. Spec targets are not
    /// listed in the shared context.
    #[must_use]
    pub fn context_targets(&self) -> Vec<UpdateTarget> {
        Round::ALL
            .into_iter()
            .flat_map(|round| self.updates(Tree::Src, round))
            .map(|path| UpdateTarget::new(Tree::Src, path.clone()))
            .collect()
    }

    /// Check whether the map carries no operations at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }

    /// Flatten into tagged operations, in execution phase order
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops: Vec<Operation> = self
            .local_deps
            .iter()
            .map(|path| Operation::LocalDependency { path: path.clone() })
            .collect();

        if !self.install.is_empty() {
            ops.push(Operation::Install {
                packages: self.install.clone(),
            });
        }
        for tree in Tree::ALL {
            ops.extend(self.moves(tree).iter().map(|(from, to)| Operation::Move {
                tree,
                from: from.clone(),
                to: to.clone(),
            }));
        }
        for tree in Tree::ALL {
            ops.extend(self.deletes(tree).iter().map(|path| Operation::Delete {
                tree,
                path: path.clone(),
            }));
        }
        for round in Round::ALL {
            for tree in Tree::ALL {
                ops.extend(self.updates(tree, round).iter().map(|path| Operation::Update {
                    tree,
                    round,
                    path: path.clone(),
                }));
            }
        }
        ops
    }
}

impl FromIterator<Operation> for OperationMap {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut map = OperationMap::new();
        for op in iter {
            match op {
                Operation::Install { packages } => map.install.extend(packages),
                Operation::Move { tree, from, to } => {
                    let moves = match tree {
                        Tree::Src => &mut map.move_src,
                        Tree::Spec => &mut map.move_spec,
                    };
                    moves.insert(from, to);
                }
                Operation::Delete { tree, path } => match tree {
                    Tree::Src => map.delete_src.push(path),
                    Tree::Spec => map.delete_spec.push(path),
                },
                Operation::Update { tree, round, path } => map.updates_mut(tree, round).push(path),
                Operation::LocalDependency { path } => map.local_deps.push(path),
            }
        }
        map
    }
}

/// A single planned operation
///
/// Closed set of operation kinds produced by the planning step. Phase order
/// is fixed by the executor, not by the order of operations in a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Confirm installation of packages
    Install {
        /// Package names
        packages: Vec<String>,
    },
    /// Move a file within a tree
    Move {
        /// Tree
        tree: Tree,
        /// Old relative path
        from: String,
        /// New relative path
        to: String,
    },
    /// Delete a file within a tree
    Delete {
        /// Tree
        tree: Tree,
        /// Relative path
        path: String,
    },
    /// Regenerate a file
    Update {
        /// Tree
        tree: Tree,
        /// Round
        round: Round,
        /// Relative path
        path: String,
    },
    /// Summarize a local dependency for the shared context
    LocalDependency {
        /// Path relative to the source tree
        path: String,
    },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install { packages } => write!(f, "install {}", packages.join(" ")),
            Operation::Move { tree, from, to } => write!(f, "move [{tree}] {from} -> {to}"),
            Operation::Delete { tree, path } => write!(f, "delete [{tree}] {path}"),
            Operation::Update { tree, round, path } => write!(f, "update [{tree}] {path} ({round})"),
            Operation::LocalDependency { path } => write!(f, "summarize {path}"),
        }
    }
}

/// File slated for regeneration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateTarget {
    /// Tree
    pub tree: Tree,
    /// Relative path
    pub path: String,
}

impl UpdateTarget {
    /// Create new target
    #[inline]
    #[must_use]
    pub fn new(tree: Tree, path: impl Into<String>) -> Self {
        Self {
            tree,
            path: path.into(),
        }
    }
}

/// Chat role of a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
}

/// One prior prompt exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Role
    pub role: Role,
    /// Content
    pub content: String,
}

impl PromptMessage {
    /// Create new message
    #[inline]
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Caller-supplied prompt history, passed through untouched
pub type PromptHistory = Vec<PromptMessage>;

/// Load prompt history from a JSON file
///
/// # Errors
/// - `MapError::Io` if the file cannot be read
/// - `MapError::Json` if it is not a list of messages
pub fn load_history(path: impl AsRef<Path>) -> Result<PromptHistory, MapError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one move entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// Source renamed to destination
    Moved {
        /// Tree
        tree: Tree,
        /// Absolute source
        from: PathBuf,
        /// Absolute destination
        to: PathBuf,
    },
    /// Source did not exist; nothing done
    SkippedMissing {
        /// Tree
        tree: Tree,
        /// Absolute source
        from: PathBuf,
    },
}

/// Completed update task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Tree
    pub tree: Tree,
    /// Round
    pub round: Round,
    /// Relative path
    pub path: String,
}

/// Update task that failed while running with failure isolation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUpdate {
    /// Tree
    pub tree: Tree,
    /// Round
    pub round: Round,
    /// Relative path
    pub path: String,
    /// Rendered error chain
    pub error: String,
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    pub finished_at: DateTime<Utc>,
    /// Packages surfaced for install confirmation
    pub install_requested: Vec<String>,
    /// Confirmation answer, if asked
    pub install_approved: Option<bool>,
    /// Move outcomes, in application order
    pub moves: Vec<MoveOutcome>,
    /// Deleted files, in application order
    pub deleted: Vec<PathBuf>,
    /// Dependencies summarized successfully
    pub summarized: Vec<String>,
    /// Dependencies whose summary was replaced by a placeholder
    pub placeholder_summaries: Vec<String>,
    /// Completed updates
    pub updated: Vec<UpdateRecord>,
    /// Failed updates (failure isolation only)
    pub failed_updates: Vec<FailedUpdate>,
}

impl RunReport {
    /// Create empty report for a starting run
    #[must_use]
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            run_id: RunId::new(),
            started_at: now,
            finished_at: now,
            install_requested: Vec::new(),
            install_approved: None,
            moves: Vec::new(),
            deleted: Vec::new(),
            summarized: Vec::new(),
            placeholder_summaries: Vec::new(),
            updated: Vec::new(),
            failed_updates: Vec::new(),
        }
    }

    /// Number of moves skipped because the source was missing
    #[must_use]
    pub fn skipped_moves(&self) -> usize {
        self.moves
            .iter()
            .filter(|m| matches!(m, MoveOutcome::SkippedMissing { .. }))
            .count()
    }

    /// True when nothing failed or degraded
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_updates.is_empty() && self.placeholder_summaries.is_empty()
    }
}
