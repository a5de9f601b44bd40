//! Move and delete staging
//!
//! Runs the destructive phases of an operation map: all moves (source tree,
//! then spec tree), then all deletes in the same tree order. Entries are
//! applied one at a time because renames may chain into each other.
//!
//! Moves are tolerant: a missing source is logged and skipped. Deletes are
//! strict: a missing target aborts the run.

use crate::config::TreeRoots;
use crate::error::ExecutorError;
use crate::guard::PathGuard;
use crate::types::{MoveOutcome, OperationMap, Tree};
use indexmap::IndexMap;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Filesystem effects of the staging phases
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingOutcome {
    /// Move outcomes in application order
    pub moves: Vec<MoveOutcome>,
    /// Deleted files in application order
    pub deleted: Vec<PathBuf>,
}

/// Applies moves and deletes for the configured trees
#[derive(Debug, Clone, Copy)]
pub struct FileOpStager<'a> {
    roots: &'a TreeRoots,
}

impl<'a> FileOpStager<'a> {
    /// Create stager over the given roots
    #[inline]
    #[must_use]
    pub fn new(roots: &'a TreeRoots) -> Self {
        Self { roots }
    }

    /// Run the move phase, then the delete phase
    ///
    /// Trees without a configured root are skipped.
    ///
    /// # Errors
    /// - `ExecutorError::PathEscape` for any operand outside its root
    /// - `ExecutorError::MissingFileOnDelete` for an absent delete target
    /// - `ExecutorError::Io` for other filesystem failures
    pub async fn stage(&self, map: &OperationMap) -> Result<StagingOutcome, ExecutorError> {
        let mut outcome = StagingOutcome::default();

        for tree in Tree::ALL {
            let moves = map.moves(tree);
            if moves.is_empty() {
                continue;
            }
            let Some(root) = self.roots.root(tree) else {
                tracing::debug!(%tree, count = moves.len(), "No root configured, skipping moves");
                continue;
            };
            outcome
                .moves
                .extend(move_many(&PathGuard::new(root), tree, moves).await?);
        }

        for tree in Tree::ALL {
            let deletes = map.deletes(tree);
            if deletes.is_empty() {
                continue;
            }
            let Some(root) = self.roots.root(tree) else {
                tracing::debug!(%tree, count = deletes.len(), "No root configured, skipping deletes");
                continue;
            };
            outcome
                .deleted
                .extend(delete_many(&PathGuard::new(root), tree, deletes).await?);
        }

        Ok(outcome)
    }
}

/// Apply a move map in insertion order
///
/// Both endpoints of every entry are authorized before the first rename.
///
/// # Errors
/// - `ExecutorError::PathEscape` if any endpoint escapes the root
/// - `ExecutorError::Io` if a rename fails
pub async fn move_many(
    guard: &PathGuard,
    tree: Tree,
    moves: &IndexMap<String, String>,
) -> Result<Vec<MoveOutcome>, ExecutorError> {
    let mut authorized = Vec::with_capacity(moves.len());
    for (old, new) in moves {
        authorized.push((guard.authorize(old)?, guard.authorize(new)?));
    }

    let mut outcomes = Vec::with_capacity(authorized.len());
    for (from, to) in authorized {
        outcomes.push(rename_if_exists(tree, from, to).await?);
    }
    Ok(outcomes)
}

async fn rename_if_exists(
    tree: Tree,
    from: PathBuf,
    to: PathBuf,
) -> Result<MoveOutcome, ExecutorError> {
    let exists = tokio::fs::try_exists(&from)
        .await
        .map_err(|e| ExecutorError::io("stat", &from, e))?;
    if !exists {
        tracing::warn!(%tree, path = %from.display(), "Move source does not exist, skipping");
        return Ok(MoveOutcome::SkippedMissing { tree, from });
    }

    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ExecutorError::io("create_dir", parent, e))?;
    }
    tokio::fs::rename(&from, &to)
        .await
        .map_err(|e| ExecutorError::io("rename", &from, e))?;

    tracing::debug!(%tree, from = %from.display(), to = %to.display(), "Moved file");
    Ok(MoveOutcome::Moved { tree, from, to })
}

/// Delete listed files in order
///
/// Every path is authorized before the first removal.
///
/// # Errors
/// - `ExecutorError::PathEscape` if any path escapes the root
/// - `ExecutorError::MissingFileOnDelete` if a target does not exist
/// - `ExecutorError::Io` for other removal failures
pub async fn delete_many(
    guard: &PathGuard,
    tree: Tree,
    paths: &[String],
) -> Result<Vec<PathBuf>, ExecutorError> {
    let authorized = guard.authorize_all(paths)?;

    let mut deleted = Vec::with_capacity(authorized.len());
    for path in authorized {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(%tree, path = %path.display(), "Deleted file");
                deleted.push(path);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::error!(%tree, path = %path.display(), "Delete target does not exist");
                return Err(ExecutorError::MissingFileOnDelete { path });
            }
            Err(e) => return Err(ExecutorError::io("delete", path, e)),
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathGuard) {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(dir.path());
        (dir, guard)
    }

    fn moves(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn move_renames_existing_file() {
        let (dir, guard) = sandbox();
        fs::write(dir.path().join("old.js"), "module.exports = 1").unwrap();

        let outcomes = move_many(&guard, Tree::Src, &moves(&[("old.js", "lib/new.js")]))
            .await
            .unwrap();

        assert!(matches!(outcomes[0], MoveOutcome::Moved { .. }));
        assert!(!dir.path().join("old.js").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("lib/new.js")).unwrap(),
            "module.exports = 1"
        );
    }

    #[tokio::test]
    async fn move_of_missing_source_is_skipped() {
        let (dir, guard) = sandbox();

        let outcomes = move_many(&guard, Tree::Src, &moves(&[("ghost.js", "new.js")]))
            .await
            .unwrap();

        assert!(matches!(outcomes[0], MoveOutcome::SkippedMissing { .. }));
        assert!(!dir.path().join("new.js").exists());
    }

    #[tokio::test]
    async fn chained_moves_apply_in_insertion_order() {
        let (dir, guard) = sandbox();
        fs::write(dir.path().join("a.js"), "a").unwrap();

        move_many(&guard, Tree::Src, &moves(&[("a.js", "b.js"), ("b.js", "c.js")]))
            .await
            .unwrap();

        assert!(!dir.path().join("a.js").exists());
        assert!(!dir.path().join("b.js").exists());
        assert_eq!(fs::read_to_string(dir.path().join("c.js")).unwrap(), "a");
    }

    #[tokio::test]
    async fn escaping_destination_moves_nothing() {
        let (dir, guard) = sandbox();
        fs::write(dir.path().join("a.js"), "a").unwrap();
        fs::write(dir.path().join("b.js"), "b").unwrap();

        let err = move_many(
            &guard,
            Tree::Src,
            &moves(&[("a.js", "moved.js"), ("b.js", "../outside.js")]),
        )
        .await
        .unwrap_err();

        assert!(err.is_path_violation());
        assert!(dir.path().join("a.js").exists());
        assert!(dir.path().join("b.js").exists());
        assert!(!dir.path().join("moved.js").exists());
    }

    #[tokio::test]
    async fn delete_removes_files() {
        let (dir, guard) = sandbox();
        fs::write(dir.path().join("a.js"), "a").unwrap();

        let deleted = delete_many(&guard, Tree::Src, &["a.js".to_string()]).await.unwrap();

        assert_eq!(deleted, vec![guard.root().join("a.js")]);
        assert!(!dir.path().join("a.js").exists());
    }

    #[tokio::test]
    async fn delete_of_missing_file_is_fatal() {
        let (_dir, guard) = sandbox();

        let err = delete_many(&guard, Tree::Src, &["gone.js".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::MissingFileOnDelete { .. }));
    }

    #[tokio::test]
    async fn delete_escape_removes_nothing() {
        let (dir, guard) = sandbox();
        fs::write(dir.path().join("a.js"), "a").unwrap();

        let err = delete_many(&guard, Tree::Src, &["a.js".to_string(), "../../etc/hosts".to_string()])
            .await
            .unwrap_err();

        assert!(err.is_path_violation());
        assert!(dir.path().join("a.js").exists());
    }

    #[tokio::test]
    async fn stage_skips_spec_tree_without_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "a").unwrap();
        let roots = TreeRoots::new(dir.path(), None);
        let map = OperationMap {
            move_src: moves(&[("a.js", "b.js")]),
            // would fail if the spec tree were staged
            delete_spec: vec!["missing.md".into()],
            ..OperationMap::default()
        };

        let outcome = FileOpStager::new(&roots).stage(&map).await.unwrap();

        assert_eq!(outcome.moves.len(), 1);
        assert!(outcome.deleted.is_empty());
        assert!(dir.path().join("b.js").exists());
    }

    #[tokio::test]
    async fn stage_moves_before_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let spec = dir.path().join("spec");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&spec).unwrap();
        fs::write(src.join("a.js"), "a").unwrap();
        fs::write(spec.join("a.md"), "a").unwrap();

        let roots = TreeRoots::new(&src, Some(spec.clone()));
        // the spec delete only succeeds if the spec move ran first
        let map = OperationMap {
            move_spec: moves(&[("a.md", "b.md")]),
            delete_spec: vec!["b.md".into()],
            delete_src: vec!["a.js".into()],
            ..OperationMap::default()
        };

        let outcome = FileOpStager::new(&roots).stage(&map).await.unwrap();

        assert_eq!(outcome.deleted, vec![src.join("a.js"), spec.join("b.md")]);
        assert!(!spec.join("a.md").exists());
        assert!(!spec.join("b.md").exists());
    }
}
