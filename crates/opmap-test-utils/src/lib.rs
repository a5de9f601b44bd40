//! Testing utilities for the opmap workspace
//!
//! Shared fixtures and recording collaborators.

#![allow(missing_docs)]

use opmap_core::collab::{DependencySummarizer, FileUpdater, SummaryRequest, UpdateRequest};
use opmap_core::config::TreeRoots;
use opmap_core::types::Tree;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;

/// Collaborator call boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

/// Ordered log of collaborator events, shared across clones
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(key) => Some(key),
                Event::Finished(_) => None,
            })
            .collect()
    }

    /// Position of an event, if recorded
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// Key used in the event log for an update, e.g. `src:a.js`
pub fn update_key(tree: Tree, path: &str) -> String {
    format!("{tree}:{path}")
}

/// Updater that records calls and writes a marker into the target
#[derive(Default)]
pub struct RecordingUpdater {
    log: EventLog,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    barrier: Option<Arc<Barrier>>,
    contexts: Mutex<Vec<String>>,
}

impl RecordingUpdater {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Delay the update of `path` before it finishes
    #[must_use]
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.insert(path.to_string(), delay);
        self
    }

    /// Fail the update of `path`
    #[must_use]
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Make every update wait on `barrier` before finishing
    #[must_use]
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Rendered contexts seen by each call, in start order
    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }

    /// Content written for a path
    pub fn marker(path: &str) -> String {
        format!("regenerated {path}\n")
    }
}

#[async_trait::async_trait]
impl FileUpdater for RecordingUpdater {
    async fn update_file(&self, request: UpdateRequest<'_>) -> anyhow::Result<()> {
        let key = update_key(request.tree, request.path);
        self.log.push(Event::Started(key.clone()));
        self.contexts.lock().unwrap().push(request.context.render());

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delays.get(request.path) {
            tokio::time::sleep(*delay).await;
        }

        let result = if self.failing.contains(request.path) {
            Err(anyhow::anyhow!("generation failed for {}", request.path))
        } else {
            if let Some(parent) = request.absolute_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(request.absolute_path, Self::marker(request.path))
                .await
                .map_err(anyhow::Error::from)
        };

        self.log.push(Event::Finished(key));
        result
    }
}

/// Summarizer that records calls and echoes the path
#[derive(Default)]
pub struct RecordingSummarizer {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingSummarizer {
    #[must_use]
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn summary_for(path: &str) -> String {
        format!("exports helpers from {path}")
    }
}

#[async_trait::async_trait]
impl DependencySummarizer for RecordingSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(request.path.to_string());
        tokio::task::yield_now().await;
        if self.failing.contains(request.path) {
            anyhow::bail!("cannot summarize {}", request.path);
        }
        Ok(Self::summary_for(request.path))
    }
}

/// Temporary project with `src/` and `spec/` trees
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("spec")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tree_root(&self, tree: Tree) -> PathBuf {
        self.dir.path().join(tree.as_str())
    }

    pub fn roots(&self) -> TreeRoots {
        TreeRoots::new(self.tree_root(Tree::Src), Some(self.tree_root(Tree::Spec)))
    }

    pub fn roots_without_spec(&self) -> TreeRoots {
        TreeRoots::new(self.tree_root(Tree::Src), None)
    }

    pub fn write(&self, tree: Tree, path: &str, content: &str) {
        let full = self.tree_root(tree).join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }

    pub fn read(&self, tree: Tree, path: &str) -> Option<String> {
        std::fs::read_to_string(self.tree_root(tree).join(path)).ok()
    }

    pub fn exists(&self, tree: Tree, path: &str) -> bool {
        self.tree_root(tree).join(path).exists()
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}
