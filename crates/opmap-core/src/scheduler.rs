//! Two-round update scheduling
//!
//! Within a round every target of both trees is launched together and the
//! round only returns once the whole batch has settled. Callers sequence
//! rounds by awaiting [`UpdateScheduler::run_round`] once per round.

use crate::collab::{FileUpdater, UpdateRequest};
use crate::config::{TreeRoots, UpdateFailurePolicy};
use crate::context::SharedContext;
use crate::error::ExecutorError;
use crate::guard::PathGuard;
use crate::types::{FailedUpdate, OperationMap, Round, Tree, UpdateRecord};
use futures::future::{join_all, try_join_all};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::PathBuf;

/// Settled state of one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Completed updates, in listing order (source tree first)
    pub completed: Vec<UpdateRecord>,
    /// Failed updates; only populated with failure isolation
    pub failed: Vec<FailedUpdate>,
}

#[derive(Debug)]
struct UpdateTask<'m> {
    index: usize,
    tree: Tree,
    path: &'m str,
    absolute_path: PathBuf,
}

impl UpdateTask<'_> {
    fn record(&self, round: Round) -> UpdateRecord {
        UpdateRecord {
            tree: self.tree,
            round,
            path: self.path.to_string(),
        }
    }
}

/// Fans out file updates per round
pub struct UpdateScheduler<'a> {
    updater: &'a dyn FileUpdater,
    roots: &'a TreeRoots,
    policy: UpdateFailurePolicy,
    max_concurrent: Option<usize>,
}

impl<'a> UpdateScheduler<'a> {
    /// Create scheduler with fail-fast, unbounded defaults
    #[inline]
    #[must_use]
    pub fn new(updater: &'a dyn FileUpdater, roots: &'a TreeRoots) -> Self {
        Self {
            updater,
            roots,
            policy: UpdateFailurePolicy::FailFast,
            max_concurrent: None,
        }
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: UpdateFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// With in-flight bound; `None` launches every task at once
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.max_concurrent = max.map(|n| n.max(1));
        self
    }

    /// Run one round and wait for all of its tasks to settle
    ///
    /// Every target is authorized before the first task starts. Spec
    /// targets are skipped when no spec root is configured.
    ///
    /// # Errors
    /// - `ExecutorError::PathEscape` if a target escapes its root
    /// - `ExecutorError::UpdateTaskFailure` for the first failed task under
    ///   the fail-fast policy; remaining tasks of the batch are dropped
    pub async fn run_round(
        &self,
        round: Round,
        map: &OperationMap,
        context: &SharedContext,
    ) -> Result<RoundOutcome, ExecutorError> {
        let tasks = self.authorize_round(round, map)?;
        if tasks.is_empty() {
            tracing::debug!(%round, "No files to update");
            return Ok(RoundOutcome::default());
        }

        tracing::info!(%round, files = tasks.len(), "Updating files (in parallel)");

        let calls = tasks
            .iter()
            .map(|task| async move { (task, self.update_one(round, task, context).await) });

        let mut outcome = RoundOutcome::default();
        match self.policy {
            UpdateFailurePolicy::FailFast => {
                let checked = calls.map(|call| async move {
                    match call.await {
                        (task, Ok(())) => Ok((task.index, task.record(round))),
                        (task, Err(source)) => {
                            tracing::error!(%round, tree = %task.tree, path = task.path, error = %source, "File update failed");
                            Err(ExecutorError::UpdateTaskFailure {
                                tree: task.tree,
                                round,
                                path: task.path.to_string(),
                                source,
                            })
                        }
                    }
                });
                let mut completed: Vec<(usize, UpdateRecord)> = match self.max_concurrent {
                    Some(n) => stream::iter(checked).buffer_unordered(n).try_collect().await?,
                    None => try_join_all(checked).await?,
                };
                completed.sort_by_key(|(index, _)| *index);
                outcome.completed = completed.into_iter().map(|(_, record)| record).collect();
            }
            UpdateFailurePolicy::Isolate => {
                let mut settled: Vec<_> = match self.max_concurrent {
                    Some(n) => stream::iter(calls).buffer_unordered(n).collect().await,
                    None => join_all(calls).await,
                };
                settled.sort_by_key(|(task, _)| task.index);
                for (task, result) in settled {
                    match result {
                        Ok(()) => outcome.completed.push(task.record(round)),
                        Err(e) => {
                            tracing::warn!(%round, tree = %task.tree, path = task.path, error = %e, "File update failed, continuing");
                            outcome.failed.push(FailedUpdate {
                                tree: task.tree,
                                round,
                                path: task.path.to_string(),
                                error: format!("{e:#}"),
                            });
                        }
                    }
                }
            }
        }

        tracing::info!(
            %round,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            "Round settled"
        );
        Ok(outcome)
    }

    fn authorize_round<'m>(
        &self,
        round: Round,
        map: &'m OperationMap,
    ) -> Result<Vec<UpdateTask<'m>>, ExecutorError> {
        let mut tasks = Vec::new();
        for tree in Tree::ALL {
            let paths = map.updates(tree, round);
            if paths.is_empty() {
                continue;
            }
            let Some(root) = self.roots.root(tree) else {
                tracing::debug!(%round, %tree, count = paths.len(), "No root configured, skipping updates");
                continue;
            };
            let guard = PathGuard::new(root);
            for path in paths {
                tasks.push(UpdateTask {
                    index: tasks.len(),
                    tree,
                    path,
                    absolute_path: guard.authorize(path)?,
                });
            }
        }
        Ok(tasks)
    }

    async fn update_one(
        &self,
        round: Round,
        task: &UpdateTask<'_>,
        context: &SharedContext,
    ) -> anyhow::Result<()> {
        tracing::debug!(%round, tree = %task.tree, path = task.path, "Updating file");
        self.updater
            .update_file(UpdateRequest {
                tree: task.tree,
                round,
                path: task.path,
                absolute_path: &task.absolute_path,
                plan: context.plan(),
                dependency_summaries: context.dependency_summaries(),
                context,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAssembler;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records starts and fails on paths containing "fail"
    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl FileUpdater for Recorder {
        async fn update_file(&self, request: UpdateRequest<'_>) -> anyhow::Result<()> {
            self.started
                .lock()
                .unwrap()
                .push(format!("{}:{}", request.tree, request.path));
            tokio::time::sleep(Duration::from_millis(5)).await;
            if request.path.contains("fail") {
                anyhow::bail!("generation failed for {}", request.path);
            }
            Ok(())
        }
    }

    fn context() -> Arc<SharedContext> {
        ContextAssembler::new("preamble").build("plan", Vec::new(), "", &[])
    }

    fn roots(spec: bool) -> TreeRoots {
        TreeRoots::new("/work/app", spec.then(|| PathBuf::from("/work/app/spec")))
    }

    fn round_one(src: &[&str], spec: &[&str]) -> OperationMap {
        OperationMap {
            update_src_first: src.iter().map(|s| (*s).to_string()).collect(),
            update_spec_first: spec.iter().map(|s| (*s).to_string()).collect(),
            ..OperationMap::default()
        }
    }

    #[tokio::test]
    async fn runs_both_trees_in_listing_order() {
        let updater = Recorder::default();
        let roots = roots(true);
        let map = round_one(&["a.js", "b.js"], &["c.md"]);

        let outcome = UpdateScheduler::new(&updater, &roots)
            .run_round(Round::First, &map, &context())
            .await
            .unwrap();

        let paths: Vec<_> = outcome.completed.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["a.js", "b.js", "c.md"]);
        assert_eq!(outcome.completed[2].tree, Tree::Spec);
        assert_eq!(updater.started.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn spec_targets_skipped_without_spec_root() {
        let updater = Recorder::default();
        let roots = roots(false);
        let map = round_one(&["a.js"], &["c.md"]);

        let outcome = UpdateScheduler::new(&updater, &roots)
            .run_round(Round::First, &map, &context())
            .await
            .unwrap();

        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(*updater.started.lock().unwrap(), vec!["src:a.js"]);
    }

    #[tokio::test]
    async fn escaping_target_starts_no_task() {
        let updater = Recorder::default();
        let roots = roots(true);
        let map = round_one(&["a.js"], &["../../outside.md"]);

        let err = UpdateScheduler::new(&updater, &roots)
            .run_round(Round::First, &map, &context())
            .await
            .unwrap_err();

        assert!(err.is_path_violation());
        assert!(updater.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_failure_fails_the_round() {
        let updater = Recorder::default();
        let roots = roots(true);
        let map = round_one(&["ok.js", "fail.js"], &[]);

        let err = UpdateScheduler::new(&updater, &roots)
            .run_round(Round::First, &map, &context())
            .await
            .unwrap_err();

        match err {
            ExecutorError::UpdateTaskFailure { tree, round, path, .. } => {
                assert_eq!((tree, round, path.as_str()), (Tree::Src, Round::First, "fail.js"));
            }
            other => panic!("expected UpdateTaskFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn isolation_reports_failures_and_keeps_going() {
        let updater = Recorder::default();
        let roots = roots(true);
        let map = round_one(&["ok.js", "fail.js"], &["ok.md"]);

        let outcome = UpdateScheduler::new(&updater, &roots)
            .with_policy(UpdateFailurePolicy::Isolate)
            .run_round(Round::First, &map, &context())
            .await
            .unwrap();

        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].path, "fail.js");
        assert!(outcome.failed[0].error.contains("generation failed"));
    }

    #[tokio::test]
    async fn bounded_mode_keeps_listing_order() {
        let updater = Recorder::default();
        let roots = roots(true);
        let map = round_one(&["a.js", "b.js", "c.js"], &["d.md"]);

        let outcome = UpdateScheduler::new(&updater, &roots)
            .with_max_concurrent(Some(2))
            .run_round(Round::First, &map, &context())
            .await
            .unwrap();

        let paths: Vec<_> = outcome.completed.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["a.js", "b.js", "c.js", "d.md"]);
    }

    #[tokio::test]
    async fn empty_round_is_a_no_op() {
        let updater = Recorder::default();
        let roots = roots(true);

        let outcome = UpdateScheduler::new(&updater, &roots)
            .run_round(Round::Second, &OperationMap::default(), &context())
            .await
            .unwrap();

        assert_eq!(outcome, RoundOutcome::default());
    }
}
