//! Path containment checks
//!
//! [`PathGuard`] resolves planner-supplied operands against an authorized
//! root and refuses anything that lands outside it. Resolution is purely
//! lexical: `.` components are dropped and `..` pops, without consulting the
//! filesystem, so targets that do not exist yet can be checked too.

use crate::error::ExecutorError;
use std::path::{Component, Path, PathBuf};

/// Authorized root for one tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard for an absolute root
    ///
    /// The root is normalized; relative roots should be resolved with
    /// [`absolutize`] first.
    #[inline]
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: normalize(root.as_ref()),
        }
    }

    /// The normalized root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `operand` against the root and check containment
    ///
    /// # Errors
    /// Returns `ExecutorError::PathEscape` if the resolved path is not inside
    /// the root. The root itself is accepted.
    pub fn authorize(&self, operand: impl AsRef<Path>) -> Result<PathBuf, ExecutorError> {
        let resolved = normalize(&self.root.join(operand.as_ref()));
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ExecutorError::path_escape(resolved, &self.root))
        }
    }

    /// Authorize every operand, failing on the first escape
    ///
    /// # Errors
    /// Returns the first `ExecutorError::PathEscape`
    pub fn authorize_all<I, P>(&self, operands: I) -> Result<Vec<PathBuf>, ExecutorError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        operands.into_iter().map(|p| self.authorize(p)).collect()
    }
}

/// Make `path` absolute against `base` and normalize it
#[must_use]
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexically normalize a path
///
/// `..` above the filesystem root is clamped at the root, matching how
/// absolute paths resolve on POSIX systems.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // popping the root itself is a no-op
                if normalized.file_name().is_some() {
                    normalized.pop();
                }
            }
            Component::CurDir => {}
            Component::Normal(name) => normalized.push(name),
            Component::RootDir => normalized.push(Component::RootDir),
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn guard() -> PathGuard {
        PathGuard::new("/work/project/src")
    }

    #[test]
    fn plain_relative_paths_are_authorized() {
        let g = guard();
        assert_eq!(
            g.authorize("cli/main.js").unwrap(),
            PathBuf::from("/work/project/src/cli/main.js")
        );
        assert_eq!(
            g.authorize("./a/../b.js").unwrap(),
            PathBuf::from("/work/project/src/b.js")
        );
    }

    #[test]
    fn root_itself_is_inside() {
        assert_eq!(guard().authorize(".").unwrap(), PathBuf::from("/work/project/src"));
    }

    #[test]
    fn traversal_is_rejected() {
        let err = guard().authorize("../secrets.env").unwrap_err();
        match err {
            ExecutorError::PathEscape { path, root } => {
                assert_eq!(path, PathBuf::from("/work/project/secrets.env"));
                assert_eq!(root, PathBuf::from("/work/project/src"));
            }
            other => panic!("expected PathEscape, got {other:?}"),
        }
    }

    #[test]
    fn absolute_operands_outside_root_are_rejected() {
        assert!(guard().authorize("/etc/passwd").unwrap_err().is_path_violation());
        assert!(guard().authorize("/work/project/src/ok.js").is_ok());
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        // "/work/project/src2" shares a string prefix with the root
        assert!(guard().authorize("../src2/x.js").unwrap_err().is_path_violation());
    }

    #[test]
    fn authorize_all_stops_at_first_escape() {
        let err = guard()
            .authorize_all(["a.js", "../../x.js", "../y.js"])
            .unwrap_err();
        match err {
            ExecutorError::PathEscape { path, .. } => assert_eq!(path, PathBuf::from("/work/x.js")),
            other => panic!("expected PathEscape, got {other:?}"),
        }
    }

    #[test]
    fn normalize_clamps_at_filesystem_root() {
        assert_eq!(normalize(Path::new("/../../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn absolutize_joins_relative_roots() {
        assert_eq!(
            absolutize(Path::new("./spec"), Path::new("/work/project")),
            PathBuf::from("/work/project/spec")
        );
        assert_eq!(
            absolutize(Path::new("/abs/spec/"), Path::new("/work/project")),
            PathBuf::from("/abs/spec")
        );
    }

    proptest! {
        #[test]
        fn leading_parent_segments_always_escape(
            depth in 4usize..8,
            tail in proptest::collection::vec("[a-z]{1,8}", 0..3),
        ) {
            // root has three components below "/", so four or more ".." escape
            let mut rel = PathBuf::new();
            for _ in 0..depth {
                rel.push("..");
            }
            for seg in &tail {
                rel.push(seg);
            }
            let result = guard().authorize(&rel);
            prop_assert!(result.is_err() || rel_lands_inside(&tail));
        }

        #[test]
        fn normal_segments_never_escape(
            segs in proptest::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..6),
        ) {
            let rel: PathBuf = segs.iter().filter(|s| *s != "." && *s != "..").collect();
            let resolved = guard().authorize(&rel).unwrap();
            prop_assert!(resolved.starts_with("/work/project/src"));
        }

        #[test]
        fn authorized_paths_are_inside_root(
            segs in proptest::collection::vec(prop_oneof!["\\.\\.", "[a-z]{1,4}", "\\."], 0..8),
        ) {
            let rel: PathBuf = segs.iter().collect();
            match guard().authorize(&rel) {
                Ok(path) => prop_assert!(path.starts_with("/work/project/src")),
                Err(ExecutorError::PathEscape { path, .. }) => {
                    prop_assert!(!path.starts_with("/work/project/src"));
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }

    /// A tail like `work/project/src/..` can climb back into the root
    fn rel_lands_inside(tail: &[String]) -> bool {
        let joined: PathBuf = std::iter::once("/".to_string()).chain(tail.iter().cloned()).collect();
        normalize(&joined).starts_with("/work/project/src")
    }
}
