//! Command-backed collaborators
//!
//! Summaries and regenerated file contents come from external commands
//! configured under `[commands]`. Each invocation gets `OPMAP_TREE`,
//! `OPMAP_PATH` and `OPMAP_ABS_PATH` in its environment.

use anyhow::{bail, Context};
use opmap_core::collab::{
    DependencySummarizer, FileUpdater, InstallConfirmer, SummaryRequest, UpdateRequest,
};
use opmap_core::types::Tree;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Runs the `summarize` command; stdout is the summary
pub(crate) struct CommandSummarizer {
    argv: Vec<String>,
    project_dir: PathBuf,
}

impl CommandSummarizer {
    pub(crate) fn new(argv: Vec<String>, project_dir: PathBuf) -> Self {
        Self { argv, project_dir }
    }
}

#[async_trait::async_trait]
impl DependencySummarizer for CommandSummarizer {
    async fn summarize(&self, request: SummaryRequest<'_>) -> anyhow::Result<String> {
        let env = command_env(Tree::Src, request.path, request.absolute_path);
        let output = run_command(&self.argv, &self.project_dir, &env, None).await?;
        Ok(output.trim().to_string())
    }
}

/// Runs the `update` command with the rendered context on stdin and writes
/// its stdout to the target file
pub(crate) struct CommandUpdater {
    argv: Vec<String>,
    project_dir: PathBuf,
}

impl CommandUpdater {
    pub(crate) fn new(argv: Vec<String>, project_dir: PathBuf) -> Self {
        Self { argv, project_dir }
    }
}

#[async_trait::async_trait]
impl FileUpdater for CommandUpdater {
    async fn update_file(&self, request: UpdateRequest<'_>) -> anyhow::Result<()> {
        let env = command_env(request.tree, request.path, request.absolute_path);
        let input = format!(
            "{}\n\nRegenerate the {} file `{}`.\n",
            request.context.render(),
            request.tree,
            request.path
        );
        let content = run_command(&self.argv, &self.project_dir, &env, Some(&input)).await?;
        if content.trim().is_empty() {
            bail!("update command produced no content for {}", request.path);
        }

        if let Some(parent) = request.absolute_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(request.absolute_path, content)
            .await
            .with_context(|| format!("failed to write {}", request.absolute_path.display()))?;
        tracing::debug!(tree = %request.tree, path = request.path, "Wrote regenerated file");
        Ok(())
    }
}

/// Asks on the terminal; anything but `y`/`yes` declines
pub(crate) struct StdinConfirmer;

#[async_trait::async_trait]
impl InstallConfirmer for StdinConfirmer {
    async fn confirm_install(&self, packages: &[String]) -> anyhow::Result<bool> {
        eprint!(
            "The plan requests these packages: {}\nInstall them? [y/N] ",
            packages.join(" ")
        );
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("failed to read confirmation")?;
        Ok(is_yes(&line))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn command_env(tree: Tree, path: &str, absolute_path: &Path) -> [(&'static str, String); 3] {
    [
        ("OPMAP_TREE", tree.to_string()),
        ("OPMAP_PATH", path.to_string()),
        ("OPMAP_ABS_PATH", absolute_path.display().to_string()),
    ]
}

async fn run_command(
    argv: &[String],
    dir: &Path,
    env: &[(&'static str, String)],
    input: Option<&str>,
) -> anyhow::Result<String> {
    let (program, args) = argv.split_first().context("command is not configured")?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdin = child.stdin.take();
    let feed = async move {
        if let (Some(mut stdin), Some(input)) = (stdin, input) {
            match stdin.write_all(input.as_bytes()).await {
                // the command may exit without reading its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                other => other?,
            }
        }
        Ok::<_, std::io::Error>(())
    };
    let ((), output) = tokio::try_join!(feed, child.wait_with_output())
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).with_context(|| format!("{program} printed invalid UTF-8"))
}
