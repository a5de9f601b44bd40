//! Plan execution entry point
//!
//! Sequence of a run:
//! 1. dependency summarization is launched
//! 2. install confirmation, source then spec moves, source then spec deletes
//!    run while summaries are in flight
//! 3. both sides run to completion; a staging error is reported before a
//!    summary error, then the shared context is built once
//! 4. round one settles, then round two
//!
//! # No rollback
//!
//! Every failure aborts the run, and whatever was already committed stays on
//! disk. A delete or update failure after staging leaves the trees with the
//! moves (and any earlier deletes or updates) applied.

use crate::collab::{AutoApprove, DependencySummarizer, FileUpdater, InstallConfirmer};
use crate::config::{ExecutorConfig, TreeRoots};
use crate::context::ContextAssembler;
use crate::error::ExecutorError;
use crate::guard::PathGuard;
use crate::scheduler::UpdateScheduler;
use crate::stager::{FileOpStager, StagingOutcome};
use crate::summary::DependencySummaryCollector;
use crate::types::{OperationMap, PromptMessage, Round, RunReport, Tree};
use chrono::Utc;
use std::sync::Arc;

/// Authorize every operand of a map without touching the filesystem
///
/// Covers move endpoints, deletes and update targets of every configured
/// tree, plus local dependencies against the source root. Operands of a
/// disabled spec tree are ignored. Returns the number of checked operands.
///
/// # Errors
/// Returns the first `ExecutorError::PathEscape`
pub fn preflight(roots: &TreeRoots, map: &OperationMap) -> Result<usize, ExecutorError> {
    let mut checked = 0;
    for tree in Tree::ALL {
        let Some(root) = roots.root(tree) else {
            continue;
        };
        let guard = PathGuard::new(root);
        for (from, to) in map.moves(tree) {
            guard.authorize(from)?;
            guard.authorize(to)?;
            checked += 2;
        }
        checked += guard.authorize_all(map.deletes(tree))?.len();
        for round in Round::ALL {
            checked += guard.authorize_all(map.updates(tree, round))?.len();
        }
    }
    checked += PathGuard::new(&roots.src)
        .authorize_all(&map.local_deps)?
        .len();
    Ok(checked)
}

/// Executes operation maps against a project's trees
pub struct PlanExecutor {
    config: ExecutorConfig,
    roots: TreeRoots,
    summarizer: Arc<dyn DependencySummarizer>,
    updater: Arc<dyn FileUpdater>,
    confirmer: Arc<dyn InstallConfirmer>,
}

impl PlanExecutor {
    /// Create an executor
    ///
    /// Install requests are approved automatically until a confirmer is set
    /// with [`with_confirmer`](Self::with_confirmer).
    pub fn new(
        config: ExecutorConfig,
        roots: TreeRoots,
        summarizer: Arc<dyn DependencySummarizer>,
        updater: Arc<dyn FileUpdater>,
    ) -> Self {
        Self {
            config,
            roots,
            summarizer,
            updater,
            confirmer: Arc::new(AutoApprove),
        }
    }

    /// With custom install confirmer
    #[inline]
    #[must_use]
    pub fn with_confirmer(mut self, confirmer: Arc<dyn InstallConfirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Tree roots in use
    #[inline]
    #[must_use]
    pub fn roots(&self) -> &TreeRoots {
        &self.roots
    }

    /// Execute an operation map
    ///
    /// Every operand is authorized before anything is mutated. Installation
    /// itself is never performed; the confirmer's answer is only recorded.
    ///
    /// # Errors
    /// - `ExecutorError::PathEscape` before any mutation
    /// - `ExecutorError::Install` if the confirmer fails
    /// - `ExecutorError::MissingFileOnDelete` / `ExecutorError::Io` from staging
    /// - `ExecutorError::SummaryCollectionFailure` (fail-fast summaries), only
    ///   after staging has finished
    /// - `ExecutorError::UpdateTaskFailure` (fail-fast updates)
    ///
    /// Effects committed before the error are not undone.
    pub async fn execute(
        &self,
        plan: &str,
        map: &OperationMap,
        history: &[PromptMessage],
    ) -> Result<RunReport, ExecutorError> {
        let mut report = RunReport::start();
        let checked = preflight(&self.roots, map)?;
        tracing::info!(
            run_id = %report.run_id,
            operands = checked,
            spec_tree = self.roots.spec.is_some(),
            "Executing operation map"
        );

        let collector = DependencySummaryCollector::new(
            self.summarizer.as_ref(),
            PathGuard::new(&self.roots.src),
            self.config.summary_failure,
        );
        // summaries are polled first so their calls are in flight during staging;
        // neither side is cancelled when the other fails
        let (summaries, staging) =
            futures::future::join(collector.collect(&map.local_deps), self.stage(map)).await;
        let (install_approved, staged) = staging?;
        let summaries = summaries?;

        report.install_requested.clone_from(&map.install);
        report.install_approved = install_approved;
        report.moves = staged.moves;
        report.deleted = staged.deleted;
        report.summarized = summaries.summarized().map(str::to_string).collect();
        report.placeholder_summaries = summaries.placeholders().to_vec();

        let context = ContextAssembler::new(self.config.system_preamble.as_str()).build(
            plan,
            map.context_targets(),
            &summaries.format(),
            history,
        );

        let scheduler = UpdateScheduler::new(self.updater.as_ref(), &self.roots)
            .with_policy(self.config.update_failure)
            .with_max_concurrent(self.config.max_concurrent_updates);
        for round in Round::ALL {
            let outcome = scheduler.run_round(round, map, &context).await?;
            report.updated.extend(outcome.completed);
            report.failed_updates.extend(outcome.failed);
        }

        report.finished_at = Utc::now();
        tracing::info!(
            run_id = %report.run_id,
            moved = report.moves.len() - report.skipped_moves(),
            skipped_moves = report.skipped_moves(),
            deleted = report.deleted.len(),
            updated = report.updated.len(),
            failed = report.failed_updates.len(),
            "Operation map applied"
        );
        Ok(report)
    }

    async fn stage(
        &self,
        map: &OperationMap,
    ) -> Result<(Option<bool>, StagingOutcome), ExecutorError> {
        let approved = if map.install.is_empty() {
            None
        } else {
            Some(self.confirm_install(&map.install).await?)
        };
        let staged = FileOpStager::new(&self.roots).stage(map).await?;
        Ok((approved, staged))
    }

    async fn confirm_install(&self, packages: &[String]) -> Result<bool, ExecutorError> {
        tracing::info!(packages = %packages.join(" "), "Dependencies requested");
        let approved = self
            .confirmer
            .confirm_install(packages)
            .await
            .map_err(|source| ExecutorError::Install { source })?;
        if approved {
            tracing::warn!("Installation is disabled; install the packages manually");
        } else {
            tracing::info!("Installation declined");
        }
        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn roots(spec: bool) -> TreeRoots {
        TreeRoots::new("/work/app", spec.then(|| PathBuf::from("/work/app/spec")))
    }

    #[test]
    fn preflight_counts_every_operand() {
        let map = OperationMap {
            move_src: [("a.js".to_string(), "b.js".to_string())].into_iter().collect(),
            delete_spec: vec!["old.md".into()],
            update_src_first: vec!["b.js".into()],
            update_spec_second: vec!["b.md".into()],
            local_deps: vec!["util.js".into()],
            ..OperationMap::default()
        };

        assert_eq!(preflight(&roots(true), &map).unwrap(), 6);
        assert_eq!(preflight(&roots(false), &map).unwrap(), 4);
    }

    #[test]
    fn preflight_rejects_escaping_update_target() {
        let map = OperationMap {
            update_src_second: vec!["../../etc/cron.d/job".into()],
            ..OperationMap::default()
        };
        assert!(preflight(&roots(true), &map).unwrap_err().is_path_violation());
    }

    #[test]
    fn preflight_ignores_disabled_spec_tree() {
        let map = OperationMap {
            delete_spec: vec!["../../../etc/passwd".into()],
            ..OperationMap::default()
        };
        assert_eq!(preflight(&roots(false), &map).unwrap(), 0);
    }
}
