use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parallelx::engine::scheduler::Engine;
use parallelx::engine::types::{EngineConfig, ExecutorKind, TaskStatus};
use parallelx::tasks::registry::TaskRegistry;
use parallelx::workflow::{TaskSpec, Workflow};
use serde_json::json;

fn spec(id: &str, func: &str, deps: &[&str], args: serde_json::Value) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        func: func.to_string(),
        deps: deps.iter().map(|s| s.to_string()).collect(),
        args,
        retries: 0,
        retry_backoff_seconds: 0.0,
        timeout_seconds: None,
        tags: Vec::new(),
    }
}

fn thread_config(cache_dir: Option<std::path::PathBuf>) -> EngineConfig {
    EngineConfig {
        max_workers: 4,
        executor: ExecutorKind::Thread,
        cache_dir,
        max_concurrency_by_tag: HashMap::new(),
        verbose: false,
        emit_logs: false,
    }
}

// Scenario A — fan-out/fan-in sum, plus cache-hit idempotence on a rerun.
#[tokio::test]
async fn fan_out_fan_in_sum_with_cache_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let wf = Workflow {
        name: "fan".to_string(),
        tasks: vec![
            spec("a", "tasks:gen_numbers", &[], json!({"n": 50, "seed": 1})),
            spec("b", "tasks:gen_numbers", &[], json!({"n": 50, "seed": 2})),
            spec("sa", "tasks:sum_numbers", &["a"], json!({"nums": {"ref": "a"}})),
            spec("sb", "tasks:sum_numbers", &["b"], json!({"nums": {"ref": "b"}})),
            spec(
                "t",
                "tasks:sum_numbers",
                &["sa", "sb"],
                json!({"nums": [{"ref": "sa"}, {"ref": "sb"}]}),
            ),
        ],
    };

    let registry = Arc::new(TaskRegistry::with_builtins());
    let engine = Engine::new(thread_config(Some(dir.path().to_path_buf())), registry);

    let (outcomes, summary) = engine.run(&wf).await.unwrap();
    assert_eq!(outcomes.len(), 5);
    for id in ["a", "b", "sa", "sb", "t"] {
        assert_eq!(outcomes[id].status, TaskStatus::Success, "{id} should succeed");
    }
    assert!(outcomes["t"].value.as_ref().unwrap().as_f64().unwrap() > 0.0);
    assert!(summary.cache_misses >= 5);
    assert_eq!(summary.cache_hits, 0);

    let (outcomes2, summary2) = engine.run(&wf).await.unwrap();
    for id in ["a", "b", "sa", "sb", "t"] {
        assert_eq!(outcomes2[id].status, TaskStatus::Success);
    }
    assert_eq!(summary2.cache_hits, 5);
    assert_eq!(summary2.cache_misses, 0);
    for id in ["a", "b", "sa", "sb", "t"] {
        assert_eq!(outcomes2[id].attempts, 0);
    }
}

// Scenario B — a task that fails once then succeeds is retried exactly once.
#[tokio::test]
async fn retriable_failure_recovers_on_second_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("flaky-marker");

    let mut t = spec(
        "x",
        "tasks:flaky_once",
        &[],
        json!({"state_path": marker.to_string_lossy().to_string()}),
    );
    t.retries = 1;
    t.retry_backoff_seconds = 0.0;
    let wf = Workflow {
        name: "flaky".to_string(),
        tasks: vec![t],
    };

    let registry = Arc::new(TaskRegistry::with_builtins());
    let engine = Engine::new(thread_config(None), registry);

    let (outcomes, _summary) = engine.run(&wf).await.unwrap();
    assert_eq!(outcomes["x"].status, TaskStatus::Success);
    assert_eq!(outcomes["x"].attempts, 2);
}

// Scenario C — a terminal failure marks every transitive descendant SKIPPED.
#[tokio::test]
async fn terminal_failure_propagates_skipped_downstream() {
    let wf = Workflow {
        name: "chain".to_string(),
        tasks: vec![
            spec("a", "tasks:get_item", &[], json!({"items": [], "index": 0})),
            spec("b", "tasks:sum_numbers", &["a"], json!({"nums": {"ref": "a"}})),
            spec("c", "tasks:sum_numbers", &["b"], json!({"nums": {"ref": "b"}})),
        ],
    };

    let registry = Arc::new(TaskRegistry::with_builtins());
    let engine = Engine::new(thread_config(None), registry);

    let (outcomes, _summary) = engine.run(&wf).await.unwrap();
    assert_eq!(outcomes["a"].status, TaskStatus::Failed);
    assert_eq!(outcomes["b"].status, TaskStatus::Skipped);
    assert_eq!(outcomes["c"].status, TaskStatus::Skipped);
    assert_eq!(outcomes["b"].attempts, 0);
    assert_eq!(outcomes["c"].attempts, 0);
}

// Scenario E — a tag's concurrency limit is never exceeded.
#[tokio::test]
async fn tag_limit_bounds_concurrent_running_tasks() {
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut registry = TaskRegistry::new();
    {
        let current = current.clone();
        let max_seen = max_seen.clone();
        registry.register("test:track", move |_args| {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(25));
            current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(null))
        });
    }

    let tasks: Vec<TaskSpec> = (0..10)
        .map(|i| {
            let mut t = spec(&format!("t{i}"), "test:track", &[], json!({}));
            t.tags = vec!["io".to_string()];
            t
        })
        .collect();
    let wf = Workflow {
        name: "tagged".to_string(),
        tasks,
    };

    let mut config = thread_config(None);
    config.max_workers = 8;
    config.max_concurrency_by_tag = HashMap::from([("io".to_string(), 2)]);

    let engine = Engine::new(config, Arc::new(registry));
    let (outcomes, _summary) = engine.run(&wf).await.unwrap();

    for i in 0..10 {
        assert_eq!(outcomes[&format!("t{i}")].status, TaskStatus::Success);
    }
    assert!(max_seen.load(Ordering::SeqCst) <= 2);
}

// Scenario F — a cache hit skips the worker entirely.
#[tokio::test]
async fn cache_hit_skips_worker_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = TaskRegistry::new();
    {
        let calls = calls.clone();
        registry.register("test:counted", move |_args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(42))
        });
    }
    let registry = Arc::new(registry);

    let wf = Workflow {
        name: "cached".to_string(),
        tasks: vec![spec("k", "test:counted", &[], json!({}))],
    };

    let engine = Engine::new(thread_config(Some(dir.path().to_path_buf())), registry.clone());
    let (outcomes, summary) = engine.run(&wf).await.unwrap();
    assert_eq!(outcomes["k"].status, TaskStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.cache_misses, 1);

    let engine2 = Engine::new(thread_config(Some(dir.path().to_path_buf())), registry);
    let (outcomes2, summary2) = engine2.run(&wf).await.unwrap();
    assert_eq!(outcomes2["k"].status, TaskStatus::Success);
    assert_eq!(outcomes2["k"].attempts, 0);
    assert!(summary2.cache_hits >= 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
