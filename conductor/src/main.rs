//! Objective-driven task orchestrator.
//!
//! Plans an objective into phased tasks, runs them through a worker in
//! dependency order and repeats bounded improvement cycles. Project state lives
//! in `.conductor/state/tasks.json` so interrupted runs can be resumed.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use conductor::core::plan::Plan;
use conductor::core::types::ProjectId;
use conductor::dispatch::CancelToken;
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, load_config, write_config};
use conductor::io::file_store::FileTaskStore;
use conductor::io::paths::ConductorPaths;
use conductor::io::report_store::write_report;
use conductor::io::store::TaskStore;
use conductor::logging;
use conductor::manager::RunOptions;
use conductor::modes::{
    BundledPlanner, BundledWorker, RunMode, complexity_demo, execute_project, planning_analysis,
    quick_test, resume_project,
};
use conductor::report::{RunReport, render_status};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Plan an objective into phased tasks and drive them to completion"
)]
struct Cli {
    /// Project root holding `.conductor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Config file (default: `<root>/.conductor/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.conductor/config.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan and run an objective (prompts on stdin when none is given).
    Run {
        objective: Vec<String>,
        #[arg(long, value_enum, default_value_t = RunMode::Normal)]
        mode: RunMode,
        /// Read the plan draft from a JSON file instead of planning heuristically.
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Complexity score (1-10) overriding the planner's assessment.
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
        complexity: Option<u8>,
        /// Project display name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Continue a stored project; interrupted tasks are re-queued.
    Resume { project: String },
    /// Print a stored project's task statuses and next step.
    Status { project: String },
    /// List stored projects.
    Projects,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ConductorPaths::new(&cli.root);
    let config_path = paths.config_or(cli.config.as_deref());
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Run {
            objective,
            mode,
            plan,
            complexity,
            name,
        } => {
            let config = load_config(&config_path)?;
            let objective = join_objective(&objective);
            let options = RunOptions {
                name,
                complexity_hint: complexity,
            };
            cmd_run(&paths, &config, mode, objective, plan.as_deref(), &options)
        }
        Command::Resume { project } => {
            let config = load_config(&config_path)?;
            cmd_resume(&paths, &config, &ProjectId::new(project))
        }
        Command::Status { project } => {
            let config = load_config(&config_path)?;
            cmd_status(&paths, &config, &ProjectId::new(project))
        }
        Command::Projects => cmd_projects(&paths),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &ConductorConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    paths: &ConductorPaths,
    config: &ConductorConfig,
    mode: RunMode,
    objective: Option<String>,
    plan_file: Option<&Path>,
    options: &RunOptions,
) -> Result<i32> {
    match mode {
        RunMode::ComplexityDemo => {
            print!("{}", complexity_demo());
            Ok(exit_codes::OK)
        }
        RunMode::QuickTest => {
            let cancel = install_cancel_handler()?;
            let report = quick_test(objective.as_deref(), config, &cancel)?;
            print!("{}", report.render()?);
            Ok(report.exit_code())
        }
        RunMode::PlanningAnalysis => {
            let objective = objective_or_prompt(objective)?;
            let planner = BundledPlanner::new(plan_file);
            let text = planning_analysis(
                &planner,
                &objective,
                options.complexity_hint,
                config.max_batch_size,
            )?;
            print!("{text}");
            Ok(exit_codes::OK)
        }
        RunMode::Normal => {
            let objective = objective_or_prompt(objective)?;
            let store = FileTaskStore::open(&paths.tasks_path)?;
            let planner = BundledPlanner::new(plan_file);
            let worker = BundledWorker::from_config(config, &paths.root)?;
            let cancel = install_cancel_handler()?;
            let report = execute_project(
                &store, &planner, worker, config, &objective, options, &cancel,
            )?;
            publish_report(paths, &report)
        }
    }
}

fn cmd_resume(paths: &ConductorPaths, config: &ConductorConfig, project_id: &ProjectId) -> Result<i32> {
    let store = FileTaskStore::open(&paths.tasks_path)?;
    let worker = BundledWorker::from_config(config, &paths.root)?;
    let cancel = install_cancel_handler()?;
    let report = resume_project(&store, worker, config, project_id, &cancel)?;
    publish_report(paths, &report)
}

fn cmd_status(paths: &ConductorPaths, config: &ConductorConfig, project_id: &ProjectId) -> Result<i32> {
    let store = FileTaskStore::open(&paths.tasks_path)?;
    let record = store.get_project(project_id)?;
    let plan = Plan::from_record(&record, store.list_by_project(project_id)?);
    print!("{}", render_status(&record, &plan, config.max_batch_size)?);
    Ok(exit_codes::OK)
}

fn cmd_projects(paths: &ConductorPaths) -> Result<i32> {
    let store = FileTaskStore::open(&paths.tasks_path)?;
    let projects = store.list_projects()?;
    if projects.is_empty() {
        println!("no projects");
    }
    for record in projects {
        let counts = store.count_by_status(&record.id)?;
        println!(
            "{}\t{}\t{}/{} completed\t{}",
            record.id,
            record.phase,
            counts.completed,
            counts.total(),
            record.name
        );
    }
    Ok(exit_codes::OK)
}

/// Persist the report under `.conductor/reports/` and print it.
fn publish_report(paths: &ConductorPaths, report: &RunReport) -> Result<i32> {
    let rendered = report.render()?;
    write_report(
        &paths.report_json_path(&report.project_id),
        &paths.report_text_path(&report.project_id),
        report,
        &rendered,
    )?;
    print!("{rendered}");
    Ok(report.exit_code())
}

/// Ctrl-C stops new batches; in-flight tasks are recorded as cancelled.
fn install_cancel_handler() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;
    Ok(cancel)
}

fn join_objective(words: &[String]) -> Option<String> {
    let joined = words.join(" ");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn objective_or_prompt(objective: Option<String>) -> Result<String> {
    if let Some(objective) = objective {
        return Ok(objective);
    }
    eprint!("Objective: ");
    io::stderr().flush().context("flush prompt")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read objective from stdin")?;
    match join_objective(&[line]) {
        Some(objective) => Ok(objective),
        None => bail!("no objective given"),
    }
}
