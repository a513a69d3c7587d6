//! Parallel DAG workflow engine.
//!
//! Given a [`workflow::Workflow`] — a directed acyclic graph of tasks, each
//! identifying a callable, its arguments (possibly referencing prior task
//! outputs), dependencies, retry policy, timeout and concurrency tags — the
//! [`engine::scheduler`] runs it to completion respecting dependency order,
//! a global worker budget, per-tag concurrency limits, a persistent result
//! cache, and retry with exponential backoff.

pub mod cli;
pub mod engine;
pub mod tasks;
pub mod workflow;
