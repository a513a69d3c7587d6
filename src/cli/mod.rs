use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

use crate::engine::pool::WorkerResponse;
use crate::engine::types::{EngineConfig, ExecutorKind, TaskStatus};
use crate::engine::scheduler::Engine;
use crate::tasks::registry::TaskRegistry;
use crate::workflow;

#[derive(Parser)]
#[command(name = "parallelx", version, about = "Parallel DAG workflow engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow document to completion
    Run {
        /// Path to the workflow JSON document
        workflow: PathBuf,

        /// Worker pool size (default: cpu count minus one)
        #[arg(long)]
        max_workers: Option<usize>,

        /// Worker pool implementation
        #[arg(long, value_enum, default_value_t = ExecutorKind::Process)]
        executor: ExecutorKind,

        /// Directory for the content-addressed result cache (unset disables caching)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Concurrency limit for a tag, given as NAME=N; repeatable
        #[arg(long = "tag-limit", value_parser = parse_tag_limit)]
        tag_limit: Vec<(String, usize)>,

        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Include tracebacks in task_failed log events
        #[arg(short, long)]
        verbose: bool,

        /// Suppress the structured JSON-lines log stream on stderr
        #[arg(short, long)]
        quiet: bool,
    },

    /// Parse and validate a workflow document without executing it
    Validate {
        /// Path to the workflow JSON document
        workflow: PathBuf,
    },

    /// List the callables registered with the engine
    ListTasks,

    /// Invoked internally by the process worker pool; not for direct use
    #[command(name = "__worker", hide = true)]
    Worker {
        /// `module:name` identifier of the callable to invoke
        func: String,
    },
}

fn parse_tag_limit(s: &str) -> std::result::Result<(String, usize), String> {
    let (name, limit) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=N, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("empty tag name in '{s}'"));
    }
    let limit: usize = limit
        .parse()
        .map_err(|_| format!("invalid concurrency limit '{limit}' for tag '{name}'"))?;
    Ok((name.to_string(), limit))
}

/// Parse arguments, dispatch to the matching subcommand, and return the
/// process exit code — 0 on full success, 1 if any task ended FAILED, 2 on
/// a workflow load/validation error, 130 if interrupted.
pub async fn run_cli() -> i32 {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            max_workers,
            executor,
            cache_dir,
            tag_limit,
            summary_json,
            verbose,
            quiet,
        } => cmd_run(workflow, max_workers, executor, cache_dir, tag_limit, summary_json, verbose, quiet).await,
        Commands::Validate { workflow } => cmd_validate(workflow),
        Commands::ListTasks => cmd_list_tasks(),
        Commands::Worker { func } => cmd_worker(&func).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    workflow_path: PathBuf,
    max_workers: Option<usize>,
    executor: ExecutorKind,
    cache_dir: Option<PathBuf>,
    tag_limit: Vec<(String, usize)>,
    summary_json: Option<PathBuf>,
    verbose: bool,
    quiet: bool,
) -> i32 {
    let wf = match workflow::load_workflow(&workflow_path) {
        Ok(wf) => wf,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    let defaults = EngineConfig::default();
    let config = EngineConfig {
        max_workers: max_workers.unwrap_or(defaults.max_workers),
        executor,
        cache_dir,
        max_concurrency_by_tag: tag_limit.into_iter().collect::<HashMap<_, _>>(),
        verbose,
        emit_logs: !quiet,
    };

    let registry = Arc::new(TaskRegistry::with_builtins());
    let engine = Engine::new(config, registry);

    let outcome = tokio::select! {
        result = engine.run(&wf) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            return 130;
        }
    };

    let (outcomes, summary) = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 2;
        }
    };

    if !quiet {
        print_summary(&wf.name, &outcomes);
    }

    if let Some(path) = summary_json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    eprintln!("warning: failed to write summary to {}: {e}", path.display());
                }
            }
            Err(e) => eprintln!("warning: failed to serialize run summary: {e}"),
        }
    }

    if outcomes.values().any(|o| o.status == TaskStatus::Failed) {
        1
    } else {
        0
    }
}

fn print_summary(workflow_name: &str, outcomes: &HashMap<String, crate::engine::types::TaskOutcome>) {
    println!("Workflow: {workflow_name}");

    let mut ids: Vec<&String> = outcomes.keys().collect();
    ids.sort();

    for id in ids {
        let o = &outcomes[id];
        let icon = match o.status {
            TaskStatus::Success => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Skipped => "⊘",
            TaskStatus::Running | TaskStatus::Pending => "?",
        };
        println!(
            "  {icon} {id} [{}] (attempt {}, {:.3}s)",
            o.status,
            o.attempts,
            o.duration_seconds()
        );
        if let Some(err) = &o.error {
            println!("    {}: {}", err.error_type, err.message);
        }
    }

    let failed = outcomes.values().filter(|o| o.status == TaskStatus::Failed).count();
    let skipped = outcomes.values().filter(|o| o.status == TaskStatus::Skipped).count();
    println!("\n{} task(s), {failed} failed, {skipped} skipped", outcomes.len());
}

fn cmd_validate(workflow_path: PathBuf) -> i32 {
    match workflow::load_workflow(&workflow_path) {
        Ok(wf) => {
            println!("Workflow: {} ({} tasks)", wf.name, wf.tasks.len());
            println!("Validation: OK");
            for t in &wf.tasks {
                let deps = if t.deps.is_empty() {
                    "(no dependencies)".to_string()
                } else {
                    format!("depends on: {}", t.deps.join(", "))
                };
                println!("  {} [{}] {deps}", t.id, t.func);
            }
            0
        }
        Err(e) => {
            println!("Validation: FAILED");
            println!("  {e}");
            2
        }
    }
}

fn cmd_list_tasks() -> i32 {
    let registry = TaskRegistry::with_builtins();
    println!("{:<32} CALLABLE", "NAME");
    println!("{}", "-".repeat(48));
    for name in registry.list() {
        println!("{name:<32}");
    }
    0
}

#[derive(Deserialize)]
struct WorkerRequestIn {
    args: Value,
}

/// Read a `{"args": ...}` request from stdin, invoke `func` against the
/// builtin registry, and write a [`WorkerResponse`] envelope to stdout.
/// Always exits 0 — task failure is communicated through the envelope's
/// `ok` field, not the process exit code; a non-zero exit from this
/// subcommand means the worker crashed before it could respond at all.
async fn cmd_worker(func: &str) -> i32 {
    let mut buf = Vec::new();
    if let Err(e) = tokio::io::copy(&mut tokio::io::stdin(), &mut buf).await {
        eprintln!("__worker: failed to read stdin: {e}");
        return 1;
    }

    let args = match serde_json::from_slice::<WorkerRequestIn>(&buf) {
        Ok(req) => req.args,
        Err(e) => {
            eprintln!("__worker: malformed request: {e}");
            return 1;
        }
    };

    let registry = TaskRegistry::with_builtins();
    let response = match registry.call(func, &args) {
        Ok(value) => WorkerResponse::ok(value),
        Err(err) => WorkerResponse::err("TaskError".to_string(), format!("{err:#}"), format!("{err:?}")),
    };

    match serde_json::to_string(&response) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            eprintln!("__worker: failed to serialize response: {e}");
            1
        }
    }
}
