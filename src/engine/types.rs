use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final (and scheduler-internal) status of a task.
///
/// PENDING/RUNNING are scheduler-internal only; a [`TaskOutcome`] is never
/// constructed with either — only SUCCESS, FAILED or SKIPPED are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

/// Captured error kind, message, and stack trace for a FAILED outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    pub traceback: String,
}

/// The final record for one task: status, value/error, timestamps, attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub started_at: f64,
    pub finished_at: f64,
    pub attempts: u32,
}

impl TaskOutcome {
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).max(0.0)
    }
}

/// Workflow name, wall-clock bounds, per-id status/duration, cache totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow_name: String,
    pub started_at_iso: String,
    pub finished_at_iso: String,
    pub statuses: HashMap<String, TaskStatus>,
    pub durations: HashMap<String, f64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Which worker-pool implementation executes task invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExecutorKind {
    /// Isolated child-process workers; hard timeouts via process kill.
    Process,
    /// In-process cooperative workers; timeouts are advisory.
    Thread,
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::Process => write!(f, "process"),
            ExecutorKind::Thread => write!(f, "thread"),
        }
    }
}

/// Tunables for one [`crate::engine::scheduler::Engine::run`] call.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub executor: ExecutorKind,
    /// Absent disables caching entirely.
    pub cache_dir: Option<std::path::PathBuf>,
    pub max_concurrency_by_tag: HashMap<String, usize>,
    /// Include stack traces in emitted `task_failed` log events.
    pub verbose: bool,
    /// Gate structured JSON-lines log emission.
    pub emit_logs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: (num_cpus::get().max(2) - 1).max(1),
            executor: ExecutorKind::Process,
            cache_dir: None,
            max_concurrency_by_tag: HashMap::new(),
            verbose: false,
            emit_logs: true,
        }
    }
}

pub(crate) fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub(crate) fn now_iso() -> String {
    DateTime::<Utc>::from(std::time::SystemTime::now()).to_rfc3339()
}
