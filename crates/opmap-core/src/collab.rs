//! External collaborators
//!
//! The executor owns sequencing and safety only. Summarization, content
//! generation and the install prompt are supplied by the caller through
//! these traits.

use crate::context::SharedContext;
use crate::types::{Round, Tree};
use std::path::Path;

/// Dependency summary request
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    /// Path as listed in the operation map
    pub path: &'a str,
    /// Authorized absolute path inside the source tree
    pub absolute_path: &'a Path,
}

/// Produces a textual description of a local dependency
#[async_trait::async_trait]
pub trait DependencySummarizer: Send + Sync {
    /// Summarize one dependency
    async fn summarize(&self, request: SummaryRequest<'_>) -> anyhow::Result<String>;
}

/// File regeneration request
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest<'a> {
    /// Tree the file belongs to
    pub tree: Tree,
    /// Round the task runs in
    pub round: Round,
    /// Path as listed in the operation map
    pub path: &'a str,
    /// Authorized absolute path
    pub absolute_path: &'a Path,
    /// Current plan
    pub plan: &'a str,
    /// Formatted dependency summaries
    pub dependency_summaries: &'a str,
    /// Shared context of the run
    pub context: &'a SharedContext,
}

/// Reads, regenerates and writes one file
#[async_trait::async_trait]
pub trait FileUpdater: Send + Sync {
    /// Regenerate one file
    async fn update_file(&self, request: UpdateRequest<'_>) -> anyhow::Result<()>;
}

/// Human-in-the-loop install prompt
#[async_trait::async_trait]
pub trait InstallConfirmer: Send + Sync {
    /// Ask whether the listed packages may be installed
    async fn confirm_install(&self, packages: &[String]) -> anyhow::Result<bool>;
}

/// Confirmer that approves without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait::async_trait]
impl InstallConfirmer for AutoApprove {
    async fn confirm_install(&self, packages: &[String]) -> anyhow::Result<bool> {
        tracing::info!(packages = %packages.join(" "), "Auto-approving install request");
        Ok(true)
    }
}
