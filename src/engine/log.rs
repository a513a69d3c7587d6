use serde_json::{Value, json};

use super::types::now_iso;

/// Emits the structured JSON-lines event stream described in spec §6,
/// one `serde_json::Value` object per line, directly to stderr — this is a
/// stable external contract with fixed field names per event, so it's
/// written independent of whichever `tracing` subscriber/formatter layer
/// happens to be installed.
pub struct EngineLogger {
    enabled: bool,
}

impl EngineLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn emit(&self, event: &str, mut fields: Value) {
        if !self.enabled {
            return;
        }
        if let Value::Object(map) = &mut fields {
            map.insert("ts".to_string(), json!(now_iso()));
            map.insert("event".to_string(), json!(event));
        }
        eprintln!("{fields}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_is_silent() {
        // Nothing to assert on stderr directly; just exercise the no-op path.
        let logger = EngineLogger::new(false);
        logger.emit("run_start", json!({}));
    }

    #[test]
    fn emit_adds_ts_and_event() {
        let logger = EngineLogger::new(true);
        // emit() writes to stderr; this just checks it doesn't panic on a
        // representative field set.
        logger.emit("task_submitted", json!({"task_id": "a", "attempt": 1}));
    }
}
