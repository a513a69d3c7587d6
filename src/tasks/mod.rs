//! The sample callable library the engine ships for exercising workflows —
//! counterpart to `parallelx/tasks.py` in the reference implementation.
//! Every function here is addressed as `tasks:<name>` from a workflow
//! document's `func` field.

pub mod registry;

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

fn obj<'a>(args: &'a Value) -> Result<&'a serde_json::Map<String, Value>> {
    args.as_object().context("args must be an object")
}

fn field<'a>(args: &'a Value, name: &str) -> Result<&'a Value> {
    obj(args)?
        .get(name)
        .with_context(|| format!("missing required arg '{name}'"))
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// `gen_numbers(n, seed=None) -> [f64; n]`, uniform in `[0, 1)`.
pub fn gen_numbers(args: &Value) -> Result<Value> {
    let n = field(args, "n")?.as_u64().context("'n' must be an integer")?;
    let seed = obj(args)?.get("seed").and_then(Value::as_u64);
    let mut rng = rng_for(seed);
    let nums: Vec<f64> = (0..n).map(|_| rng.gen::<f64>()).collect();
    Ok(json!(nums))
}

/// `sum_numbers(nums) -> f64`.
pub fn sum_numbers(args: &Value) -> Result<Value> {
    let nums = field(args, "nums")?
        .as_array()
        .context("'nums' must be a list")?;
    let mut total = 0.0;
    for v in nums {
        total += v.as_f64().context("'nums' elements must be numeric")?;
    }
    Ok(json!(total))
}

/// Lowercase alphanumeric tokenizer.
pub fn split_words(args: &Value) -> Result<Value> {
    let text = field(args, "text")?.as_str().context("'text' must be a string")?;
    let mut out = Vec::new();
    let mut word = String::new();
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_alphanumeric() {
            word.push(ch);
        } else if !word.is_empty() {
            out.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        out.push(word);
    }
    Ok(json!(out))
}

/// `count_words(words) -> {word: count}`.
pub fn count_words(args: &Value) -> Result<Value> {
    let words = field(args, "words")?
        .as_array()
        .context("'words' must be a list")?;
    let mut counts: HashMap<String, i64> = HashMap::new();
    for w in words {
        let w = w.as_str().context("'words' elements must be strings")?;
        *counts.entry(w.to_string()).or_insert(0) += 1;
    }
    Ok(json!(counts))
}

/// `merge_counts_list(counts) -> {word: total_count}`.
pub fn merge_counts_list(args: &Value) -> Result<Value> {
    let counts = field(args, "counts")?
        .as_array()
        .context("'counts' must be a list")?;
    let mut total: HashMap<String, i64> = HashMap::new();
    for c in counts {
        let c = c.as_object().context("'counts' elements must be objects")?;
        for (k, v) in c {
            let v = v.as_i64().context("count values must be integers")?;
            *total.entry(k.clone()).or_insert(0) += v;
        }
    }
    Ok(json!(total))
}

/// `random_points(n, seed=None) -> [[x, y]; n]`, each coordinate in `[0, 1)`.
pub fn random_points(args: &Value) -> Result<Value> {
    let n = field(args, "n")?.as_u64().context("'n' must be an integer")?;
    let seed = obj(args)?.get("seed").and_then(Value::as_u64);
    let mut rng = rng_for(seed);
    let points: Vec<[f64; 2]> = (0..n).map(|_| [rng.gen::<f64>(), rng.gen::<f64>()]).collect();
    Ok(json!(points))
}

/// `count_inside_unit_circle(points) -> i64`.
pub fn count_inside_unit_circle(args: &Value) -> Result<Value> {
    let points = field(args, "points")?
        .as_array()
        .context("'points' must be a list")?;
    let mut inside = 0i64;
    for p in points {
        let p = p.as_array().context("each point must be a [x, y] pair")?;
        let x = p.first().and_then(Value::as_f64).context("point missing x")?;
        let y = p.get(1).and_then(Value::as_f64).context("point missing y")?;
        if x * x + y * y <= 1.0 {
            inside += 1;
        }
    }
    Ok(json!(inside))
}

/// `estimate_pi(inside, total) -> f64`.
pub fn estimate_pi(args: &Value) -> Result<Value> {
    let inside = field(args, "inside")?.as_f64().context("'inside' must be numeric")?;
    let total = field(args, "total")?.as_f64().context("'total' must be numeric")?;
    if total <= 0.0 {
        bail!("total must be > 0");
    }
    Ok(json!(4.0 * inside / total))
}

/// `chunk_list(items, chunk_size) -> [[item...]...]`.
pub fn chunk_list(args: &Value) -> Result<Value> {
    let items = field(args, "items")?
        .as_array()
        .context("'items' must be a list")?;
    let chunk_size = field(args, "chunk_size")?
        .as_u64()
        .context("'chunk_size' must be a positive integer")? as usize;
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    let chunks: Vec<&[Value]> = items.chunks(chunk_size).collect();
    Ok(json!(chunks))
}

/// `read_text(path) -> String`.
pub fn read_text(args: &Value) -> Result<Value> {
    let path = field(args, "path")?.as_str().context("'path' must be a string")?;
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    Ok(json!(text))
}

/// `save_json(data, path) -> path`.
pub fn save_json(args: &Value) -> Result<Value> {
    let data = field(args, "data")?;
    let path = field(args, "path")?.as_str().context("'path' must be a string")?;
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(json!(path))
}

/// `get_item(items, index) -> item`.
pub fn get_item(args: &Value) -> Result<Value> {
    let items = field(args, "items")?
        .as_array()
        .context("'items' must be a list")?;
    let index = field(args, "index")?.as_u64().context("'index' must be an integer")? as usize;
    items
        .get(index)
        .cloned()
        .with_context(|| format!("index {index} out of range"))
}

/// Fails the first time it is called for a given `state_path`, succeeds on
/// every subsequent call. State is a marker file rather than in-process
/// memory so the fixture behaves identically whether the worker pool is
/// thread-based (state would otherwise survive) or process-based (a fresh
/// child per attempt has no memory of prior attempts) — callers pass a
/// path unique to the run so concurrent tests never share state.
pub fn flaky_once(args: &Value) -> Result<Value> {
    let state_path = field(args, "state_path")?
        .as_str()
        .context("'state_path' must be a string")?;
    let marker = std::path::Path::new(state_path);
    if !marker.exists() {
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(marker, b"seen")?;
        bail!("boom");
    }
    Ok(json!(123))
}
