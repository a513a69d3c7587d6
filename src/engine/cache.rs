use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write cache entry: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to rename cache entry into place: {0}")]
    Rename(#[source] std::io::Error),
    #[error("failed to serialize cache value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Deterministic SHA-256 over `(func_identifier, canonical_args)`.
///
/// Properties: determinism (same inputs, same key), collision resistance
/// (SHA-256), func isolation (different callables never collide on
/// identical args), argument sensitivity (any structural change flips the
/// key). Output is a 64-character lowercase hex string.
pub fn cache_key(func: &str, resolved_args: &serde_json::Value) -> String {
    let canonical = canonicalize(resolved_args);
    // serde_json's default Map is a BTreeMap, so keys are already emitted
    // in sorted order and this json! literal is already the canonical form.
    let payload = serde_json::json!({ "func": func, "args": canonical });
    let text = serde_json::to_string(&payload).expect("canonical value always serializes");

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonicalize a JSON value for hashing: sorted mapping keys, preserved
/// sequence order, primitives as-is. Values already parsed as
/// [`serde_json::Value`] are always representable, so the `{"__repr__":
/// ...}` fallback for non-representable values never triggers here — it
/// only matters for implementations accepting a wider argument universe
/// than JSON.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), canonicalize(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Fan-out content-addressed disk cache: `root/<k0..2>/<k2..4>/<key>.bin`.
///
/// Reads that fail for any reason (missing file, corrupt contents) are
/// treated as misses — the cache is an optimization, never a correctness
/// dependency. Writes land via temp-file + atomic rename so readers only
/// ever observe the prior complete value or the new complete value.
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(&key[0..2]).join(&key[2..4]).join(format!("{key}.bin"))
    }

    /// `(hit?, value)` — errors of any kind surface as a miss.
    pub async fn get(&self, key: &str) -> (bool, Option<serde_json::Value>) {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => (true, Some(value)),
                Err(_) => (false, None),
            },
            Err(_) => (false, None),
        }
    }

    pub async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), CacheError> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CacheError::Write)?;
        }

        let tmp = sibling_tmp_path(&path);
        let bytes = serde_json::to_vec(value)?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(CacheError::Write)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(CacheError::Rename)?;
        Ok(())
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "cache.tmp".to_string());
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deterministic_same_inputs_same_key() {
        let a = cache_key("tasks:sum_numbers", &json!({"nums": [1, 2, 3]}));
        let b = cache_key("tasks:sum_numbers", &json!({"nums": [1, 2, 3]}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = cache_key("f:g", &json!({"a": 1, "b": 2}));
        let b = cache_key("f:g", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn func_isolation() {
        let a = cache_key("f:a", &json!({"x": 1}));
        let b = cache_key("f:b", &json!({"x": 1}));
        assert_ne!(a, b);
    }

    #[test]
    fn argument_sensitivity() {
        let a = cache_key("f:g", &json!({"x": 1}));
        let b = cache_key("f:g", &json!({"x": 2}));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = cache_key("tasks:gen_numbers", &json!({"n": 3}));

        let (hit, _) = cache.get(&key).await;
        assert!(!hit);

        let value = json!([1.0, 2.0, 3.0]);
        cache.set(&key, &value).await.unwrap();

        let (hit, got) = cache.get(&key).await;
        assert!(hit);
        assert_eq!(got.unwrap(), value);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let key = cache_key("f:g", &json!({}));
        let path = cache.path(&key);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();

        let (hit, value) = cache.get(&key).await;
        assert!(!hit);
        assert!(value.is_none());
    }
}
