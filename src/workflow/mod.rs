//! The DAG data model and the workflow document parser.
//!
//! Acyclicity, id uniqueness and dependency existence are enforced here,
//! before the engine ever sees a [`Workflow`] — the engine assumes these
//! invariants hold.

mod parser;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub use parser::{WorkflowError, load_workflow, parse_workflow};

/// One task node in a workflow DAG (immutable once parsed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique non-empty id within the workflow.
    pub id: String,
    /// Callable identifier of the form `module:name`; opaque to the engine.
    pub func: String,
    /// Ids of tasks that must succeed before this one runs.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Arbitrary nested arguments; may contain `{"ref": "<task id>"}` nodes.
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
    /// Total attempts = `retries + 1`.
    #[serde(default)]
    pub retries: u32,
    /// Base delay for attempt k (1-indexed): `base * 2^(k-1)`, capped at 5s.
    #[serde(default)]
    pub retry_backoff_seconds: f64,
    /// Absence means unbounded.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    /// Concurrency admission-control bucket names.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// A name plus an ordered sequence of [`TaskSpec`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

impl Workflow {
    pub fn ids(&self) -> HashSet<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn by_id(&self) -> HashMap<&str, &TaskSpec> {
        self.tasks.iter().map(|t| (t.id.as_str(), t)).collect()
    }
}
