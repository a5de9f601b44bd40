//! Shared generation context
//!
//! Built once per run after dependency summaries are collected, then frozen
//! behind an `Arc` and handed unchanged to every update task of both rounds.

use crate::types::{PromptHistory, PromptMessage, Role, UpdateTarget};
use std::fmt::Write as _;
use std::sync::Arc;

/// Render a titled, fenced block
///
/// The body is trimmed; the block carries no trailing newline.
#[must_use]
pub fn prompt_block(title: &str, body: &str) -> String {
    format!("{title}\n```\n{}\n```", body.trim())
}

/// Immutable context shared by all update tasks of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedContext {
    preamble: String,
    plan: String,
    targets: Vec<UpdateTarget>,
    dependency_summaries: String,
    history: PromptHistory,
}

impl SharedContext {
    /// Static system preamble
    #[inline]
    #[must_use]
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Current plan
    #[inline]
    #[must_use]
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Every update target of the run, duplicates kept
    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[UpdateTarget] {
        &self.targets
    }

    /// Formatted dependency summaries
    #[inline]
    #[must_use]
    pub fn dependency_summaries(&self) -> &str {
        &self.dependency_summaries
    }

    /// Prompt history supplied by the caller
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[PromptMessage] {
        &self.history
    }

    /// Briefing shared by every task: plan, targets, dependency info
    #[must_use]
    pub fn briefing(&self) -> String {
        let mut targets = String::new();
        for target in &self.targets {
            // writing to a String cannot fail
            let _ = writeln!(targets, "- [{}] {}", target.tree, target.path);
        }

        let mut sections = vec![
            prompt_block("Current plan", &self.plan),
            prompt_block("Files scheduled for update", &targets),
        ];
        if !self.dependency_summaries.is_empty() {
            sections.push(self.dependency_summaries.clone());
        }
        sections.join("\n\n")
    }

    /// Ordered chat messages: preamble, history, then the briefing
    #[must_use]
    pub fn messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(PromptMessage::new(Role::System, self.preamble.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(PromptMessage::new(Role::User, self.briefing()));
        messages
    }

    /// Single-text rendering of [`messages`](Self::messages)
    #[must_use]
    pub fn render(&self) -> String {
        self.messages()
            .iter()
            .map(|m| format!("### {:?}\n{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Builds the shared context
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    preamble: String,
}

impl ContextAssembler {
    /// Create assembler with a static system preamble
    #[inline]
    #[must_use]
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }

    /// Build and freeze the context
    ///
    /// Pure function of its inputs and the preamble.
    #[must_use]
    pub fn build(
        &self,
        plan: &str,
        targets: Vec<UpdateTarget>,
        dependency_summaries: &str,
        history: &[PromptMessage],
    ) -> Arc<SharedContext> {
        tracing::debug!(
            targets = targets.len(),
            history = history.len(),
            "Preparing shared context"
        );
        Arc::new(SharedContext {
            preamble: self.preamble.clone(),
            plan: plan.to_string(),
            targets,
            dependency_summaries: dependency_summaries.to_string(),
            history: history.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tree;
    use pretty_assertions::assert_eq;

    #[test]
    fn prompt_block_trims_body() {
        assert_eq!(prompt_block("Title", "\n  body \n"), "Title\n```\nbody\n```");
    }

    #[test]
    fn build_is_deterministic() {
        let assembler = ContextAssembler::new("preamble");
        let targets = vec![
            UpdateTarget::new(Tree::Src, "a.js"),
            UpdateTarget::new(Tree::Src, "a.js"),
            UpdateTarget::new(Tree::Spec, "a.md"),
        ];
        let history = vec![PromptMessage::new(Role::User, "earlier request")];

        let a = assembler.build("the plan", targets.clone(), "deps", &history);
        let b = assembler.build("the plan", targets, "deps", &history);

        assert_eq!(a, b);
        assert_eq!(a.targets().len(), 3);
    }

    #[test]
    fn messages_order_preamble_history_briefing() {
        let assembler = ContextAssembler::new("you are a developer");
        let history = vec![
            PromptMessage::new(Role::User, "q"),
            PromptMessage::new(Role::Assistant, "a"),
        ];
        let ctx = assembler.build(
            "add logging",
            vec![UpdateTarget::new(Tree::Src, "main.js")],
            "Some info about util.js\n```\nhelpers\n```",
            &history,
        );

        let messages = ctx.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], PromptMessage::new(Role::System, "you are a developer"));
        assert_eq!(&messages[1..3], history.as_slice());
        assert_eq!(
            messages[3].content,
            "Current plan\n```\nadd logging\n```\n\n\
             Files scheduled for update\n```\n- [src] main.js\n```\n\n\
             Some info about util.js\n```\nhelpers\n```"
        );
    }

    #[test]
    fn briefing_omits_empty_summaries() {
        let ctx = ContextAssembler::new("p").build("plan", Vec::new(), "", &[]);
        assert!(!ctx.briefing().contains("Some info"));
        assert!(ctx.render().starts_with("### System\np"));
    }
}
