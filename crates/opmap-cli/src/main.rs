//! `opmap` - apply an operation map to a project

mod collab;
mod telemetry;

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use collab::{CommandSummarizer, CommandUpdater, StdinConfirmer};
use opmap_core::collab::AutoApprove;
use opmap_core::config::{apply_env_overrides, ExecutorConfig};
use opmap_core::executor::{preflight, PlanExecutor};
use opmap_core::guard::absolutize;
use opmap_core::types::{load_history, OperationMap, PromptHistory, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

fn cli() -> Command {
    Command::new("opmap")
        .version(opmap_core::VERSION)
        .about("Apply planned moves, deletes and file regenerations to a project")
        .subcommand_required(true)
        .arg(
            Arg::new("project")
                .long("project")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Project directory (defaults to the current directory)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Extra config file applied after .opmap/config/*.toml"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("apply")
                .about("Execute an operation map")
                .arg(map_arg())
                .arg(
                    Arg::new("plan")
                        .long("plan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File holding the current plan text"),
                )
                .arg(
                    Arg::new("history")
                        .long("history")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON list of prior prompt messages"),
                )
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .short('y')
                        .action(ArgAction::SetTrue)
                        .help("Approve install requests without asking"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the run report as JSON"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Validate an operation map without changing anything")
                .arg(map_arg()),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

fn map_arg() -> Arg {
    Arg::new("map")
        .long("map")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Operation map (.json, .yaml or .yml)")
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    telemetry::init(matches.get_flag("verbose"), matches.get_flag("log-json"));

    match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir().context("cannot resolve working directory")?;
    let project_dir = matches
        .get_one::<PathBuf>("project")
        .map_or_else(|| cwd.clone(), |p| absolutize(p, &cwd));
    let explicit = matches.get_one::<PathBuf>("config").map(|p| absolutize(p, &cwd));
    let mut config = ExecutorConfig::load(&project_dir, explicit.as_deref())?;
    apply_env_overrides(&mut config);
    config.validate()?;

    match matches.subcommand() {
        Some(("apply", args)) => apply(config, &project_dir, args).await,
        Some(("check", args)) => check(&config, &project_dir, args),
        Some(("config", _)) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => unreachable!("subcommand is required"),
    }
}

fn load_map(args: &ArgMatches) -> anyhow::Result<OperationMap> {
    let path = args
        .get_one::<PathBuf>("map")
        .context("--map is required")?;
    OperationMap::from_path(path).with_context(|| format!("cannot load {}", path.display()))
}

fn check(config: &ExecutorConfig, project_dir: &Path, args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let map = load_map(args)?;
    let checked = preflight(&config.roots(project_dir), &map)?;

    for op in map.operations() {
        println!("{op}");
    }
    println!("{checked} paths checked, all inside their trees");
    Ok(ExitCode::SUCCESS)
}

async fn apply(
    config: ExecutorConfig,
    project_dir: &Path,
    args: &ArgMatches,
) -> anyhow::Result<ExitCode> {
    let map = load_map(args)?;
    let plan_path = args
        .get_one::<PathBuf>("plan")
        .context("--plan is required")?;
    let plan = tokio::fs::read_to_string(plan_path)
        .await
        .with_context(|| format!("cannot read plan {}", plan_path.display()))?;
    let history: PromptHistory = match args.get_one::<PathBuf>("history") {
        Some(path) => load_history(path).with_context(|| format!("cannot load {}", path.display()))?,
        None => Vec::new(),
    };

    if config.commands.update.is_empty() {
        bail!("commands.update is not configured");
    }
    if !map.local_deps.is_empty() && config.commands.summarize.is_empty() {
        bail!("commands.summarize is not configured but the map lists local dependencies");
    }

    let summarizer = Arc::new(CommandSummarizer::new(
        config.commands.summarize.clone(),
        project_dir.to_path_buf(),
    ));
    let updater = Arc::new(CommandUpdater::new(
        config.commands.update.clone(),
        project_dir.to_path_buf(),
    ));
    let roots = config.roots(project_dir);
    let mut executor = PlanExecutor::new(config, roots, summarizer, updater);
    executor = if args.get_flag("yes") {
        executor.with_confirmer(Arc::new(AutoApprove))
    } else {
        executor.with_confirmer(Arc::new(StdinConfirmer))
    };

    let report = match executor.execute(&plan, &map, &history).await {
        Ok(report) => report,
        Err(err) => {
            if err.is_fatal_before_updates() {
                eprintln!("note: no file was regenerated; moves and deletes already applied, if any, were not rolled back");
            } else {
                eprintln!("note: changes applied before the failure were not rolled back");
            }
            return Err(err.into());
        }
    };

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.failed_updates.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.run_id);
    println!(
        "  Moves: {} applied, {} skipped",
        report.moves.len() - report.skipped_moves(),
        report.skipped_moves()
    );
    println!("  Deletes: {}", report.deleted.len());
    println!(
        "  Summaries: {} ({} placeholders)",
        report.summarized.len() + report.placeholder_summaries.len(),
        report.placeholder_summaries.len()
    );
    println!("  Updated: {}", report.updated.len());
    for failed in &report.failed_updates {
        println!(
            "  FAILED [{}] {} ({}): {}",
            failed.tree, failed.path, failed.round, failed.error
        );
    }
    if let Some(approved) = report.install_approved {
        println!(
            "  Install requested: {} ({}, not performed)",
            report.install_requested.join(" "),
            if approved { "approved" } else { "declined" }
        );
    }
}
