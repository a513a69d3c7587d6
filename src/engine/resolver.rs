use std::collections::HashMap;

use thiserror::Error;

use super::types::{TaskOutcome, TaskStatus};

/// Errors raised while substituting `{"ref": "<id>"}` nodes.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("unknown ref '{0}'")]
    BadReference(String),
    #[error("ref '{id}' is not successful (status={status})")]
    UnresolvableReference { id: String, status: TaskStatus },
}

/// Recursively substitute `{"ref": "<task_id>"}` nodes in `value` with the
/// referenced task's output value.
///
/// Mappings are walked key by key, sequences element by element; scalars
/// pass through unchanged. A single-key object whose key is `ref` and whose
/// value is a string is treated as a reference node — a malformed ref shape
/// (e.g. `{"ref": 5}` or `{"ref": "x", "extra": 1}`) is passed through as an
/// ordinary object rather than an error, mirroring the `dict` equality check
/// in the reference implementation.
pub fn resolve(
    value: &serde_json::Value,
    outcomes: &HashMap<String, TaskOutcome>,
) -> Result<serde_json::Value, ResolveError> {
    match value {
        serde_json::Value::Object(map) => {
            if map.len() == 1 {
                if let Some(serde_json::Value::String(id)) = map.get("ref") {
                    let outcome = outcomes
                        .get(id)
                        .ok_or_else(|| ResolveError::BadReference(id.clone()))?;
                    if outcome.status != TaskStatus::Success {
                        return Err(ResolveError::UnresolvableReference {
                            id: id.clone(),
                            status: outcome.status,
                        });
                    }
                    return Ok(outcome.value.clone().unwrap_or(serde_json::Value::Null));
                }
            }
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, outcomes)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for v in items {
                out.push(resolve(v, outcomes)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(value: serde_json::Value) -> TaskOutcome {
        TaskOutcome {
            status: TaskStatus::Success,
            value: Some(value),
            error: None,
            started_at: 0.0,
            finished_at: 0.0,
            attempts: 1,
        }
    }

    fn failed() -> TaskOutcome {
        TaskOutcome {
            status: TaskStatus::Failed,
            value: None,
            error: None,
            started_at: 0.0,
            finished_at: 0.0,
            attempts: 1,
        }
    }

    #[test]
    fn scalars_pass_through() {
        let outcomes = HashMap::new();
        assert_eq!(resolve(&json!(42), &outcomes).unwrap(), json!(42));
        assert_eq!(resolve(&json!("x"), &outcomes).unwrap(), json!("x"));
        assert_eq!(resolve(&json!(null), &outcomes).unwrap(), json!(null));
    }

    #[test]
    fn substitutes_nested_refs() {
        let mut outcomes = HashMap::new();
        outcomes.insert("a".to_string(), success(json!([1, 2, 3])));
        outcomes.insert("b".to_string(), success(json!(5)));

        let input = json!({"nums": {"ref": "a"}, "extra": [{"ref": "b"}, 9]});
        let resolved = resolve(&input, &outcomes).unwrap();
        assert_eq!(resolved, json!({"nums": [1,2,3], "extra": [5, 9]}));
    }

    #[test]
    fn unknown_ref_is_bad_reference() {
        let outcomes = HashMap::new();
        let err = resolve(&json!({"ref": "missing"}), &outcomes).unwrap_err();
        assert!(matches!(err, ResolveError::BadReference(id) if id == "missing"));
    }

    #[test]
    fn failed_predecessor_is_unresolvable() {
        let mut outcomes = HashMap::new();
        outcomes.insert("a".to_string(), failed());
        let err = resolve(&json!({"ref": "a"}), &outcomes).unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvableReference { id, .. } if id == "a"));
    }

    #[test]
    fn malformed_ref_shape_is_not_a_reference() {
        let outcomes = HashMap::new();
        let input = json!({"ref": "a", "other": 1});
        assert_eq!(resolve(&input, &outcomes).unwrap(), input);
    }
}
