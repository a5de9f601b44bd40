//! Local dependency summaries
//!
//! One summarization call per distinct dependency, all launched before any
//! is awaited. Results are keyed by path in the order the dependencies were
//! listed, independent of completion order.

use crate::collab::{DependencySummarizer, SummaryRequest};
use crate::config::SummaryFailurePolicy;
use crate::context::prompt_block;
use crate::error::ExecutorError;
use crate::guard::PathGuard;
use futures::future::{join_all, try_join_all};
use indexmap::{IndexMap, IndexSet};

/// Summary text used when a dependency could not be summarized
pub const PLACEHOLDER_SUMMARY: &str = "(summary unavailable)";

/// Collected summaries, keyed by dependency path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySummaries {
    entries: IndexMap<String, String>,
    placeholders: Vec<String>,
}

impl DependencySummaries {
    /// Create from ordered entries
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            placeholders: Vec::new(),
        }
    }

    /// Number of dependencies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was collected
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Summary for a path
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Paths with a real summary
    pub fn summarized(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|p| !self.placeholders.iter().any(|x| x == p))
    }

    /// Paths that fell back to the placeholder
    #[inline]
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Render as labeled blocks separated by blank lines
    ///
    /// Output is trimmed and depends only on the collected entries.
    #[must_use]
    pub fn format(&self) -> String {
        self.entries
            .iter()
            .map(|(path, summary)| prompt_block(&format!("Some info about {path}"), summary))
            .collect::<Vec<_>>()
            .join("\n\n")
            .trim()
            .to_string()
    }
}

/// Fans out dependency summarization
pub struct DependencySummaryCollector<'a> {
    summarizer: &'a dyn DependencySummarizer,
    guard: PathGuard,
    policy: SummaryFailurePolicy,
}

impl<'a> DependencySummaryCollector<'a> {
    /// Create collector resolving dependencies inside `guard`'s root
    #[inline]
    #[must_use]
    pub fn new(
        summarizer: &'a dyn DependencySummarizer,
        guard: PathGuard,
        policy: SummaryFailurePolicy,
    ) -> Self {
        Self {
            summarizer,
            guard,
            policy,
        }
    }

    /// Summarize every listed dependency
    ///
    /// Returns immediately, without calling the summarizer, for an empty list.
    /// Duplicate paths are summarized once.
    ///
    /// # Errors
    /// - `ExecutorError::PathEscape` if a dependency lies outside the source tree
    /// - `ExecutorError::SummaryCollectionFailure` on the first failed call,
    ///   unless the placeholder policy is configured
    pub async fn collect(&self, paths: &[String]) -> Result<DependencySummaries, ExecutorError> {
        if paths.is_empty() {
            return Ok(DependencySummaries::default());
        }

        let unique: IndexSet<&str> = paths.iter().map(String::as_str).collect();
        let mut requests = Vec::with_capacity(unique.len());
        for path in unique {
            requests.push((path, self.guard.authorize(path)?));
        }

        tracing::info!(count = requests.len(), "Studying dependencies (in parallel)");

        let calls = requests.iter().map(|(path, absolute_path)| async move {
            let result = self
                .summarizer
                .summarize(SummaryRequest {
                    path,
                    absolute_path,
                })
                .await;
            (*path, result)
        });

        let mut summaries = DependencySummaries::default();
        match self.policy {
            SummaryFailurePolicy::FailFast => {
                let collected = try_join_all(calls.map(|call| async move {
                    match call.await {
                        (path, Ok(summary)) => Ok((path.to_string(), summary)),
                        (path, Err(source)) => {
                            tracing::error!(path, error = %source, "Dependency summary failed");
                            Err(ExecutorError::SummaryCollectionFailure {
                                path: path.to_string(),
                                source,
                            })
                        }
                    }
                }))
                .await?;
                summaries.entries.extend(collected);
            }
            SummaryFailurePolicy::Placeholder => {
                for (path, result) in join_all(calls).await {
                    let summary = match result {
                        Ok(summary) => summary,
                        Err(e) => {
                            tracing::warn!(path, error = %e, "Dependency summary failed, using placeholder");
                            summaries.placeholders.push(path.to_string());
                            PLACEHOLDER_SUMMARY.to_string()
                        }
                    };
                    summaries.entries.insert(path.to_string(), summary);
                }
            }
        }

        Ok(summaries)
    }
}
