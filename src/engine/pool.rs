use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};

use crate::engine::types::ErrorInfo;
use crate::tasks::registry::TaskRegistry;

/// Execution-time failure: user-code error, worker crash, or timeout.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{message}")]
    Failed {
        error_type: String,
        message: String,
        traceback: String,
    },
    #[error("task timed out after {0}s")]
    Timeout(f64),
}

impl From<ExecutionError> for ErrorInfo {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Failed {
                error_type,
                message,
                traceback,
            } => ErrorInfo {
                error_type,
                message,
                traceback,
            },
            ExecutionError::Timeout(secs) => ErrorInfo {
                error_type: "Timeout".to_string(),
                message: format!("task timed out after {secs}s"),
                traceback: String::new(),
            },
        }
    }
}

fn error_from_anyhow(err: anyhow::Error) -> ExecutionError {
    ExecutionError::Failed {
        error_type: "TaskError".to_string(),
        message: format!("{err:#}"),
        traceback: format!("{err:?}"),
    }
}

/// Result of one submitted task invocation, delivered back to the scheduler.
pub struct Completion {
    pub task_id: String,
    pub result: Result<Value, ExecutionError>,
}

/// A pool of either OS processes or cooperative in-process workers that each
/// evaluate one task invocation. `submit` is fire-and-forget: it spawns
/// immediately and reports back on `tx` when the invocation finishes —
/// callers never await it directly, matching the completion-phase wait in
/// [`crate::engine::scheduler`].
pub trait WorkerPool: Send + Sync {
    fn submit(
        &self,
        task_id: String,
        func: String,
        args: Value,
        timeout_seconds: Option<f64>,
        tx: mpsc::Sender<Completion>,
    );
}

/// In-process cooperative pool. Timeouts are advisory: dropping the
/// `tokio::time::timeout` only abandons waiting on the blocking thread —
/// the callable keeps running to completion on it regardless.
pub struct ThreadWorkerPool {
    registry: Arc<TaskRegistry>,
    semaphore: Arc<Semaphore>,
}

impl ThreadWorkerPool {
    pub fn new(registry: Arc<TaskRegistry>, max_workers: usize) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }
}

impl WorkerPool for ThreadWorkerPool {
    fn submit(
        &self,
        task_id: String,
        func: String,
        args: Value,
        timeout_seconds: Option<f64>,
        tx: mpsc::Sender<Completion>,
    ) {
        let registry = self.registry.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");

            let call = tokio::task::spawn_blocking(move || registry.call(&func, &args));

            let result = match timeout_seconds {
                Some(secs) if secs > 0.0 => {
                    match tokio::time::timeout(Duration::from_secs_f64(secs), call).await {
                        Ok(Ok(Ok(value))) => Ok(value),
                        Ok(Ok(Err(e))) => Err(error_from_anyhow(e)),
                        Ok(Err(join_err)) => Err(panic_error(join_err)),
                        Err(_elapsed) => Err(ExecutionError::Timeout(secs)),
                    }
                }
                _ => match call.await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(error_from_anyhow(e)),
                    Err(join_err) => Err(panic_error(join_err)),
                },
            };

            let _ = tx.send(Completion { task_id, result }).await;
        });
    }
}

fn panic_error(join_err: tokio::task::JoinError) -> ExecutionError {
    ExecutionError::Failed {
        error_type: "WorkerPanic".to_string(),
        message: join_err.to_string(),
        traceback: String::new(),
    }
}

/// Isolated child-process pool. Arguments and the return value cross the
/// process boundary as a JSON envelope on stdin/stdout. A timeout is
/// enforced hard by killing the child outright — stronger than the
/// source's best-effort SIGALRM and portable across the platforms tokio
/// supports (see DESIGN.md).
pub struct ProcessWorkerPool {
    worker_exe: std::path::PathBuf,
    semaphore: Arc<Semaphore>,
}

impl ProcessWorkerPool {
    pub fn new(max_workers: usize) -> std::io::Result<Self> {
        Ok(Self {
            worker_exe: std::env::current_exe()?,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        })
    }
}

#[derive(Serialize)]
struct WorkerRequest<'a> {
    args: &'a Value,
}

/// The wire envelope a `__worker` child reports its outcome with on stdout.
/// Shared with [`crate::cli`], which is the producer side.
#[derive(Serialize, Deserialize)]
pub struct WorkerResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl WorkerResponse {
    pub fn ok(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error_type: None,
            message: None,
            traceback: None,
        }
    }

    pub fn err(error_type: String, message: String, traceback: String) -> Self {
        Self {
            ok: false,
            value: None,
            error_type: Some(error_type),
            message: Some(message),
            traceback: Some(traceback),
        }
    }
}

impl WorkerPool for ProcessWorkerPool {
    fn submit(
        &self,
        task_id: String,
        func: String,
        args: Value,
        timeout_seconds: Option<f64>,
        tx: mpsc::Sender<Completion>,
    ) {
        let exe = self.worker_exe.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let result = run_in_child(&exe, &func, &args, timeout_seconds).await;
            let _ = tx.send(Completion { task_id, result }).await;
        });
    }
}

async fn run_in_child(
    exe: &std::path::Path,
    func: &str,
    args: &Value,
    timeout_seconds: Option<f64>,
) -> Result<Value, ExecutionError> {
    let mut cmd = tokio::process::Command::new(exe);
    cmd.arg("__worker")
        .arg(func)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ExecutionError::Failed {
        error_type: "WorkerSpawnFailed".to_string(),
        message: e.to_string(),
        traceback: String::new(),
    })?;

    let request = serde_json::to_vec(&WorkerRequest { args }).expect("args always serialize");
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(&request).await;
    }

    // Drain stdout/stderr concurrently with waiting so a chatty child can't
    // deadlock on a full pipe buffer while we're only watching `wait()`.
    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = match timeout_seconds {
        Some(secs) if secs > 0.0 => match tokio::time::timeout(Duration::from_secs_f64(secs), child.wait()).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ExecutionError::Timeout(secs));
            }
        },
        _ => child.wait().await,
    };

    let status = status.map_err(|e| ExecutionError::Failed {
        error_type: "WorkerIoError".to_string(),
        message: e.to_string(),
        traceback: String::new(),
    })?;

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(ExecutionError::Failed {
            error_type: "WorkerCrashed".to_string(),
            message: format!("worker process exited with {status}"),
            traceback: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    match serde_json::from_slice::<WorkerResponse>(&stdout) {
        Ok(WorkerResponse { ok: true, value, .. }) => Ok(value.unwrap_or(Value::Null)),
        Ok(WorkerResponse {
            ok: false,
            error_type,
            message,
            traceback,
            ..
        }) => Err(ExecutionError::Failed {
            error_type: error_type.unwrap_or_else(|| "TaskError".to_string()),
            message: message.unwrap_or_default(),
            traceback: traceback.unwrap_or_default(),
        }),
        Err(e) => Err(ExecutionError::Failed {
            error_type: "WorkerProtocolError".to_string(),
            message: format!("could not parse worker response: {e}"),
            traceback: String::from_utf8_lossy(&stdout).into_owned(),
        }),
    }
}
