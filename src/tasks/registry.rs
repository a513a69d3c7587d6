use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde_json::Value;

use super::*;

/// A registered callable: resolved args in, return value or error out.
pub type TaskFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Process-wide mapping from `module:name` identifier to concrete callable.
///
/// The scheduler never materializes a callable itself — only the worker
/// (thread or process) consults this registry, by identifier, at
/// invocation time.
#[derive(Clone)]
pub struct TaskRegistry {
    funcs: HashMap<String, TaskFn>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// A registry with the sample task library registered under `tasks:*`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        macro_rules! register {
            ($($name:ident),* $(,)?) => {
                $(reg.register(concat!("tasks:", stringify!($name)), $name);)*
            };
        }
        register!(
            gen_numbers,
            sum_numbers,
            split_words,
            count_words,
            merge_counts_list,
            random_points,
            count_inside_unit_circle,
            estimate_pi,
            chunk_list,
            read_text,
            save_json,
            get_item,
            flaky_once,
        );
        reg
    }

    pub fn register(&mut self, func: &str, f: impl Fn(&Value) -> Result<Value> + Send + Sync + 'static) {
        self.funcs.insert(func.to_string(), Arc::new(f));
    }

    pub fn get(&self, func: &str) -> Option<TaskFn> {
        self.funcs.get(func).cloned()
    }

    /// Resolve and invoke `func` with `args`, for use from a worker.
    pub fn call(&self, func: &str, args: &Value) -> Result<Value> {
        match self.get(func) {
            Some(f) => f(args),
            None => bail!("unknown callable '{func}'"),
        }
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
