//! Reference payload executor.
//!
//! Payloads are JSON documents describing simulated work:
//!
//! ```json
//! {"sleep_ms": 50, "fail": false, "error": "reason", "result": {"any": "value"}}
//! ```
//!
//! Every field is optional. `sleep_ms` delays the reply, `fail`
//! produces a `task_error` carrying `error` (or a default message), and
//! `result` is echoed back on success.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors reported back to the manager as `task_error`.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The payload asked this execution to fail.
    #[error("{0}")]
    TaskFailed(String),

    /// The payload is not something this worker understands.
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
struct WorkPayload {
    #[serde(default)]
    sleep_ms: u64,
    #[serde(default)]
    fail: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

/// Execute one payload to completion.
pub async fn execute(payload: &str) -> Result<Value, ExecutorError> {
    let work: WorkPayload = serde_json::from_str(payload)?;

    if work.sleep_ms > 0 {
        tokio::time::sleep(Duration::from_millis(work.sleep_ms)).await;
    }
    if work.fail {
        let message = work
            .error
            .unwrap_or_else(|| "task failed as instructed".to_string());
        return Err(ExecutorError::TaskFailed(message));
    }
    Ok(work.result.unwrap_or_else(|| json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_payload_completes() {
        let result = execute("{}").await.unwrap();
        assert_eq!(result, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_result_is_echoed() {
        let result = execute(r#"{"result": {"answer": 42}}"#).await.unwrap();
        assert_eq!(result, json!({ "answer": 42 }));
    }

    #[tokio::test]
    async fn test_instructed_failure_carries_message() {
        let err = execute(r#"{"fail": true, "error": "disk on fire"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::TaskFailed(ref m) if m == "disk on fire"));
    }

    #[tokio::test]
    async fn test_non_json_payload_is_an_error() {
        let err = execute("not json").await.unwrap_err();
        assert!(matches!(err, ExecutorError::Payload(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_delays_the_reply() {
        let started = tokio::time::Instant::now();
        execute(r#"{"sleep_ms": 250}"#).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
