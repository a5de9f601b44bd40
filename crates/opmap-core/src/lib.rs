//! opmap-core - operation-map executor
//!
//! Applies a planner's operation map to a project's source and spec trees:
//! - path containment for every operand ([`guard`])
//! - tolerant moves and strict deletes ([`stager`])
//! - parallel dependency summaries ([`summary`]) and a shared context ([`context`])
//! - two sequential rounds of parallel file regeneration ([`scheduler`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use opmap_core::prelude::*;
//!
//! let config = ExecutorConfig::load(&project_dir, None)?;
//! let roots = config.roots(&project_dir);
//! let executor = PlanExecutor::new(config, roots, summarizer, updater);
//!
//! let map = OperationMap::from_path("plan/ops.json")?;
//! let report = executor.execute(&plan, &map, &history).await?;
//! ```

pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod guard;
pub mod scheduler;
pub mod stager;
pub mod summary;
pub mod types;

pub use error::*;
pub use types::*;

/// Re-export of the commonly used types
pub mod prelude {
    pub use crate::collab::{
        AutoApprove, DependencySummarizer, FileUpdater, InstallConfirmer, SummaryRequest,
        UpdateRequest,
    };
    pub use crate::config::{
        ExecutorConfig, SummaryFailurePolicy, TreeRoots, UpdateFailurePolicy,
    };
    pub use crate::context::{ContextAssembler, SharedContext};
    pub use crate::error::{ConfigError, ExecutorError, MapError};
    pub use crate::executor::{preflight, PlanExecutor};
    pub use crate::guard::PathGuard;
    pub use crate::types::{
        load_history, Operation, OperationMap, PromptHistory, PromptMessage, Role, Round,
        RunReport, Tree, UpdateTarget,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
