use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::cache::{DiskCache, cache_key};
use super::log::EngineLogger;
use super::pool::{Completion, ProcessWorkerPool, ThreadWorkerPool, WorkerPool};
use super::resolver::{ResolveError, resolve};
use super::tags::TagController;
use super::types::{EngineConfig, ErrorInfo, ExecutorKind, RunSummary, TaskOutcome, TaskStatus, now_ts};
use crate::tasks::registry::TaskRegistry;
use crate::workflow::{TaskSpec, Workflow};

const MAX_BACKOFF_SECONDS: f64 = 5.0;
const COMPLETION_POLL: Duration = Duration::from_millis(50);
const TAG_BLOCKED_SLEEP: Duration = Duration::from_millis(10);

/// The workflow execution engine: one `run` drives a [`Workflow`] to
/// completion per spec §4.5 — a single-threaded scheduler loop whose only
/// parallelism lives inside the worker pool.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<TaskRegistry>,
}

impl Engine {
    pub fn new(config: EngineConfig, registry: Arc<TaskRegistry>) -> Self {
        Self { config, registry }
    }

    /// Run `workflow` to completion and return every task's outcome plus a
    /// run summary. Every task id in `workflow` is present in the returned
    /// map exactly once, with status SUCCESS, FAILED, or SKIPPED.
    pub async fn run(&self, workflow: &Workflow) -> Result<(HashMap<String, TaskOutcome>, RunSummary)> {
        let started = Utc::now();
        let t0 = now_ts();

        let by_id: HashMap<&str, &TaskSpec> = workflow.by_id();

        let mut deps_left: HashMap<String, HashSet<String>> = by_id
            .values()
            .map(|t| (t.id.clone(), t.deps.iter().cloned().collect()))
            .collect();
        let mut dependents: HashMap<String, HashSet<String>> =
            by_id.keys().map(|id| (id.to_string(), HashSet::new())).collect();
        for t in by_id.values() {
            for d in &t.deps {
                dependents.entry(d.clone()).or_default().insert(t.id.clone());
            }
        }

        let mut ready: std::collections::BTreeSet<String> = deps_left
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        let mut outcomes: HashMap<String, TaskOutcome> = HashMap::new();
        let mut attempts: HashMap<String, u32> = by_id.keys().map(|id| (id.to_string(), 0)).collect();
        let mut cache_hits: u64 = 0;
        let mut cache_misses: u64 = 0;

        let mut tag_controller = TagController::new(self.config.max_concurrency_by_tag.clone());
        let cache = self.config.cache_dir.as_ref().map(DiskCache::new);
        let logger = EngineLogger::new(self.config.emit_logs);

        let pool: Box<dyn WorkerPool> = match self.config.executor {
            ExecutorKind::Thread => Box::new(ThreadWorkerPool::new(self.registry.clone(), self.config.max_workers)),
            ExecutorKind::Process => Box::new(ProcessWorkerPool::new(self.config.max_workers)?),
        };

        let (tx, mut rx) = mpsc::channel::<Completion>((self.config.max_workers * 4).max(4));
        let mut running: HashSet<String> = HashSet::new();
        let mut running_meta: HashMap<String, (Option<String>, f64)> = HashMap::new();

        logger.emit(
            "run_start",
            json!({
                "workflow": workflow.name,
                "max_workers": self.config.max_workers,
                "executor": self.config.executor.to_string(),
            }),
        );

        loop {
            // --- 1. submission phase ---
            let mut submitted_any = false;
            let candidates: Vec<String> = ready.iter().cloned().collect();

            for tid in candidates {
                if outcomes.contains_key(&tid) {
                    ready.remove(&tid);
                    continue;
                }
                let t = by_id[tid.as_str()];
                if !tag_controller.can_admit(&t.tags) {
                    continue;
                }

                ready.remove(&tid);
                *attempts.get_mut(&tid).unwrap() += 1;
                let attempt = attempts[&tid];
                let started_at = now_ts();
                submitted_any = true;

                match resolve(&t.args, &outcomes) {
                    Ok(resolved_args) => {
                        let mut computed_key = None;
                        if let Some(cache) = &cache {
                            let key = cache_key(&t.func, &resolved_args);
                            let (hit, value) = cache.get(&key).await;
                            if hit {
                                cache_hits += 1;
                                outcomes.insert(
                                    tid.clone(),
                                    TaskOutcome {
                                        status: TaskStatus::Success,
                                        value,
                                        error: None,
                                        started_at,
                                        finished_at: started_at,
                                        // A cache hit never reaches the pool, so it carries no
                                        // execution attempts regardless of the submission counter.
                                        attempts: 0,
                                    },
                                );
                                promote_children(&tid, &dependents, &mut deps_left, &mut ready);
                                continue;
                            }
                            cache_misses += 1;
                            computed_key = Some(key);
                        }

                        tag_controller.on_start(&t.tags);
                        running.insert(tid.clone());
                        running_meta.insert(tid.clone(), (computed_key, started_at));
                        logger.emit(
                            "task_submitted",
                            json!({"task_id": tid, "func": t.func, "tags": t.tags, "attempt": attempt}),
                        );
                        pool.submit(tid.clone(), t.func.clone(), resolved_args, t.timeout_seconds, tx.clone());
                    }
                    Err(resolve_err) => {
                        // §4.1/§7: a resolution error is a task failure for the
                        // referring task; retrying can't change a sibling's
                        // status, so it's terminal immediately.
                        let finished_at = now_ts();
                        let err_info = resolve_error_info(&resolve_err);
                        error!(task = %tid, error = %err_info.message, "Task failed to resolve arguments");
                        let mut fields = json!({
                            "task_id": tid,
                            "attempt": attempt,
                            "error_type": err_info.error_type,
                            "error_message": err_info.message,
                        });
                        if self.config.verbose
                            && let Some(obj) = fields.as_object_mut()
                        {
                            obj.insert("error_traceback".to_string(), json!(err_info.traceback));
                        }
                        logger.emit("task_failed", fields);
                        outcomes.insert(
                            tid.clone(),
                            TaskOutcome {
                                status: TaskStatus::Failed,
                                value: None,
                                error: Some(err_info),
                                started_at,
                                finished_at,
                                attempts: attempt,
                            },
                        );
                        skip_downstream(&tid, finished_at, &dependents, &mut outcomes, &mut ready, &logger);
                    }
                }
            }

            // --- 2. progress phase ---
            if running.is_empty() {
                if ready.is_empty() {
                    break;
                }
                if !submitted_any {
                    tokio::time::sleep(TAG_BLOCKED_SLEEP).await;
                }
                continue;
            }

            // --- 3. completion phase ---
            match tokio::time::timeout(COMPLETION_POLL, rx.recv()).await {
                Ok(Some(completion)) => {
                    running.remove(&completion.task_id);
                    let (cache_key_opt, started_at) =
                        running_meta.remove(&completion.task_id).unwrap_or((None, now_ts()));
                    let t = by_id[completion.task_id.as_str()];
                    let attempt = attempts[&completion.task_id];

                    match completion.result {
                        Ok(value) => {
                            let finished_at = now_ts();
                            if let (Some(cache), Some(key)) = (&cache, &cache_key_opt)
                                && let Err(_e) = cache.set(key, &value).await
                            {
                                logger.emit("cache_write_failed", json!({"task_id": completion.task_id}));
                            }
                            logger.emit(
                                "task_success",
                                json!({
                                    "task_id": completion.task_id,
                                    "duration_seconds": (finished_at - started_at).max(0.0),
                                    "attempt": attempt,
                                }),
                            );
                            tag_controller.on_finish(&t.tags);
                            outcomes.insert(
                                completion.task_id.clone(),
                                TaskOutcome {
                                    status: TaskStatus::Success,
                                    value: Some(value),
                                    error: None,
                                    started_at,
                                    finished_at,
                                    attempts: attempt,
                                },
                            );
                            promote_children(&completion.task_id, &dependents, &mut deps_left, &mut ready);
                        }
                        Err(exec_err) => {
                            let finished_at = now_ts();
                            let err_msg = exec_err.to_string();
                            tag_controller.on_finish(&t.tags);

                            if attempt <= t.retries {
                                let backoff =
                                    (t.retry_backoff_seconds * 2f64.powi((attempt - 1) as i32)).min(MAX_BACKOFF_SECONDS);
                                warn!(
                                    task = %completion.task_id,
                                    attempt,
                                    error = %err_msg,
                                    "Task attempt failed, retrying after backoff"
                                );
                                logger.emit(
                                    "task_retry",
                                    json!({
                                        "task_id": completion.task_id,
                                        "attempt": attempt,
                                        "retries": t.retries,
                                        "backoff_seconds": backoff,
                                    }),
                                );
                                if backoff > 0.0 {
                                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                                }
                                ready.insert(completion.task_id.clone());
                            } else {
                                let err_info: ErrorInfo = exec_err.into();
                                error!(task = %completion.task_id, attempt, error = %err_msg, "Task failed");
                                let mut fields = json!({
                                    "task_id": completion.task_id,
                                    "attempt": attempt,
                                    "error_type": err_info.error_type,
                                    "error_message": err_info.message,
                                });
                                if self.config.verbose
                                    && let Some(obj) = fields.as_object_mut()
                                {
                                    obj.insert("error_traceback".to_string(), json!(err_info.traceback));
                                }
                                logger.emit("task_failed", fields);

                                outcomes.insert(
                                    completion.task_id.clone(),
                                    TaskOutcome {
                                        status: TaskStatus::Failed,
                                        value: None,
                                        error: Some(err_info),
                                        started_at,
                                        finished_at,
                                        attempts: attempt,
                                    },
                                );
                                skip_downstream(
                                    &completion.task_id,
                                    finished_at,
                                    &dependents,
                                    &mut outcomes,
                                    &mut ready,
                                    &logger,
                                );
                            }
                        }
                    }
                }
                Ok(None) => {
                    // All senders dropped; nothing else can ever complete.
                    break;
                }
                Err(_elapsed) => {
                    // No completion within the poll window; loop again.
                }
            }
        }

        let finished = Utc::now();
        let wall_seconds = (now_ts() - t0).max(0.0);

        let statuses = outcomes.iter().map(|(id, o)| (id.clone(), o.status)).collect();
        let durations = outcomes
            .iter()
            .map(|(id, o)| (id.clone(), o.duration_seconds()))
            .collect();

        logger.emit(
            "run_finished",
            json!({
                "workflow": workflow.name,
                "wall_seconds": wall_seconds,
                "cache_hits": cache_hits,
                "cache_misses": cache_misses,
            }),
        );

        let summary = RunSummary {
            workflow_name: workflow.name.clone(),
            started_at_iso: started.to_rfc3339(),
            finished_at_iso: finished.to_rfc3339(),
            statuses,
            durations,
            cache_hits,
            cache_misses,
        };

        Ok((outcomes, summary))
    }
}

fn resolve_error_info(err: &ResolveError) -> ErrorInfo {
    match err {
        ResolveError::BadReference(id) => ErrorInfo {
            error_type: "BadReference".to_string(),
            message: err.to_string(),
            traceback: format!("unresolved reference to task '{id}'"),
        },
        ResolveError::UnresolvableReference { id, status } => ErrorInfo {
            error_type: "UnresolvableReference".to_string(),
            message: err.to_string(),
            traceback: format!("task '{id}' has status {status}, expected SUCCESS"),
        },
    }
}

fn promote_children(
    tid: &str,
    dependents: &HashMap<String, HashSet<String>>,
    deps_left: &mut HashMap<String, HashSet<String>>,
    ready: &mut std::collections::BTreeSet<String>,
) {
    if let Some(children) = dependents.get(tid) {
        for child in children {
            if let Some(left) = deps_left.get_mut(child) {
                left.remove(tid);
                if left.is_empty() {
                    ready.insert(child.clone());
                }
            }
        }
    }
}

/// Iterative DFS over `dependents` collecting every transitive descendant
/// of `root`, marking each SKIPPED (unless already resolved) and dropping
/// it from `ready`.
fn skip_downstream(
    root: &str,
    finished_at: f64,
    dependents: &HashMap<String, HashSet<String>>,
    outcomes: &mut HashMap<String, TaskOutcome>,
    ready: &mut std::collections::BTreeSet<String>,
    logger: &EngineLogger,
) {
    let mut stack = vec![root.to_string()];
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(u) = stack.pop() {
        let Some(children) = dependents.get(&u) else {
            continue;
        };
        for child in children {
            if !seen.insert(child.clone()) {
                continue;
            }
            if !outcomes.contains_key(child) {
                outcomes.insert(
                    child.clone(),
                    TaskOutcome {
                        status: TaskStatus::Skipped,
                        value: None,
                        error: None,
                        started_at: finished_at,
                        finished_at,
                        attempts: 0,
                    },
                );
                logger.emit(
                    "task_skipped",
                    json!({"task_id": child, "reason": format!("upstream_failed:{root}")}),
                );
            }
            ready.remove(child);
            stack.push(child.clone());
        }
    }
}
