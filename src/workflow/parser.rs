use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use super::{TaskSpec, Workflow};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to read workflow file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse workflow JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workflow JSON must be an object")]
    NotAnObject,
    #[error("'tasks' must be a non-empty list")]
    EmptyTasks,
    #[error("task at index {0} must be an object")]
    TaskNotObject(usize),
    #[error("task at index {0} missing valid 'id'")]
    MissingId(usize),
    #[error("duplicate task id '{0}'")]
    DuplicateId(String),
    #[error("task '{0}' missing valid 'func' (module:function)")]
    BadFunc(String),
    #[error("task '{0}': 'deps' must be a list of strings")]
    BadDeps(String),
    #[error("task '{0}': 'args' must be an object")]
    BadArgs(String),
    #[error("task '{0}': 'tags' must be a list of strings")]
    BadTags(String),
    #[error("task '{0}' depends on unknown task '{1}'")]
    UnknownDep(String, String),
    #[error("cycle detected: {0}")]
    Cycle(String),
}

/// Load and validate a workflow document from a JSON file on disk.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, WorkflowError> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|source| WorkflowError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let value: serde_json::Value = serde_json::from_str(&data)?;
    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow");
    parse_workflow(&value, default_name)
}

/// Validate and convert a raw JSON workflow document into a [`Workflow`].
///
/// Enforces: non-empty `tasks`, unique ids, `func` of shape `module:name`,
/// dependency existence, and acyclicity.
pub fn parse_workflow(data: &serde_json::Value, default_name: &str) -> Result<Workflow, WorkflowError> {
    let obj = data.as_object().ok_or(WorkflowError::NotAnObject)?;

    let name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(default_name)
        .to_string();

    let tasks_raw = obj
        .get("tasks")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or(WorkflowError::EmptyTasks)?;

    let mut tasks = Vec::with_capacity(tasks_raw.len());
    let mut seen = std::collections::HashSet::new();

    for (i, raw) in tasks_raw.iter().enumerate() {
        let t = raw.as_object().ok_or(WorkflowError::TaskNotObject(i))?;

        let id = t
            .get("id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or(WorkflowError::MissingId(i))?
            .to_string();

        if !seen.insert(id.clone()) {
            return Err(WorkflowError::DuplicateId(id));
        }

        let func = t
            .get("func")
            .and_then(|v| v.as_str())
            .filter(|s| s.contains(':'))
            .ok_or_else(|| WorkflowError::BadFunc(id.clone()))?
            .to_string();

        let deps = match t.get("deps") {
            None => Vec::new(),
            Some(serde_json::Value::Array(a)) => {
                let mut out = Vec::with_capacity(a.len());
                for v in a {
                    out.push(
                        v.as_str()
                            .ok_or_else(|| WorkflowError::BadDeps(id.clone()))?
                            .to_string(),
                    );
                }
                out
            }
            Some(_) => return Err(WorkflowError::BadDeps(id)),
        };

        let args = match t.get("args") {
            None => serde_json::Value::Object(Default::default()),
            Some(v @ serde_json::Value::Object(_)) => v.clone(),
            Some(_) => return Err(WorkflowError::BadArgs(id)),
        };

        let retries = t
            .get("retries")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32;

        let retry_backoff_seconds = t
            .get("retry_backoff_seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
            .max(0.0);

        let timeout_seconds = t.get("timeout_seconds").and_then(|v| v.as_f64());

        let tags = match t.get("tags") {
            None => Vec::new(),
            Some(serde_json::Value::Array(a)) => {
                let mut out = Vec::with_capacity(a.len());
                for v in a {
                    out.push(
                        v.as_str()
                            .ok_or_else(|| WorkflowError::BadTags(id.clone()))?
                            .to_string(),
                    );
                }
                out
            }
            Some(_) => return Err(WorkflowError::BadTags(id)),
        };

        tasks.push(TaskSpec {
            id,
            func,
            deps,
            args,
            retries,
            retry_backoff_seconds,
            timeout_seconds,
            tags,
        });
    }

    let by_id: HashMap<&str, &TaskSpec> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for t in &tasks {
        for d in &t.deps {
            if !by_id.contains_key(d.as_str()) {
                return Err(WorkflowError::UnknownDep(t.id.clone(), d.clone()));
            }
        }
    }

    assert_acyclic(&tasks, &by_id)?;

    Ok(Workflow { name, tasks })
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// White/gray/black DFS; on finding a back-edge, reports the exact cycle
/// (as a `a -> b -> ... -> a` path) rather than just "a cycle exists".
fn assert_acyclic(
    tasks: &[TaskSpec],
    by_id: &HashMap<&str, &TaskSpec>,
) -> Result<(), WorkflowError> {
    let mut color: HashMap<&str, Color> =
        tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    for t in tasks {
        if color[t.id.as_str()] == Color::White {
            let mut stack = Vec::new();
            dfs(t.id.as_str(), by_id, &mut color, &mut stack)?;
        }
    }
    Ok(())
}

fn dfs<'a>(
    u: &'a str,
    by_id: &HashMap<&'a str, &'a TaskSpec>,
    color: &mut HashMap<&'a str, Color>,
    stack: &mut Vec<&'a str>,
) -> Result<(), WorkflowError> {
    color.insert(u, Color::Gray);
    stack.push(u);

    for dep in &by_id[u].deps {
        let v = dep.as_str();
        match color[v] {
            Color::White => dfs(v, by_id, color, stack)?,
            Color::Gray => {
                let start = stack.iter().position(|&x| x == v).unwrap_or(0);
                let mut cycle: Vec<&str> = stack[start..].to_vec();
                cycle.push(v);
                return Err(WorkflowError::Cycle(cycle.join(" -> ")));
            }
            Color::Black => {}
        }
    }

    stack.pop();
    color.insert(u, Color::Black);
    Ok(())
}
