//! Callback-style task handoff
//!
//! A remote workflow parks at a step and waits for an out-of-process worker
//! to pick the work item up, optionally heartbeat, and report a terminal
//! verdict. Every call is correlated by an opaque continuation token. The
//! token must never appear in logs; it is transport data only.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// A pending work item handed out by the remote boundary.
#[derive(Debug, Clone)]
pub struct TaskHandoff {
    /// Decoded input the workflow parked with.
    pub input: Value,

    /// Opaque continuation token correlating all follow-up calls.
    pub token: String,
}

/// Remote boundary of the task protocol.
///
/// After any terminal report the token is exhausted on the remote side;
/// further calls with it must fail there with a token-exhausted error. That
/// invariant belongs to the remote system and is not re-checked locally.
#[async_trait]
pub trait ActivityService: Send + Sync {
    /// Long-poll `channel` for one pending task. `None` means no work
    /// became available within the transport's poll bound.
    async fn poll_task(&self, channel: &str, worker: &str) -> Result<Option<TaskHandoff>>;

    /// Report liveness for an in-flight task.
    async fn record_heartbeat(&self, token: &str) -> Result<()>;

    /// Terminally report success with a JSON output text.
    async fn record_success(&self, token: &str, output: &str) -> Result<()>;

    /// Terminally report failure with an error code and cause.
    async fn record_failure(&self, token: &str, error_code: &str, cause: &str) -> Result<()>;
}

/// Worker-side handle for one acquired task.
///
/// Terminal reports take the handle by value: once a verdict is sent the
/// token is spent and nothing else may use it. A dropped handle simply
/// leaves the task to the remote side's own timeout.
pub struct ActivityTask {
    service: Arc<dyn ActivityService>,
    input: Value,
    token: String,
}

/// Poll `channel` once for pending work.
///
/// Returns `Ok(None)` when the long-poll bound elapsed without a task.
pub async fn acquire_task(
    service: Arc<dyn ActivityService>,
    channel: &str,
    worker: &str,
) -> Result<Option<ActivityTask>> {
    let handoff = service.poll_task(channel, worker).await?;
    Ok(handoff.map(|handoff| {
        debug!("acquired task on '{}' for worker '{}'", channel, worker);
        ActivityTask {
            service: Arc::clone(&service),
            input: handoff.input,
            token: handoff.token,
        }
    }))
}

impl ActivityTask {
    /// The input the workflow parked with.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Report liveness. May be repeated any number of times before a
    /// terminal report.
    pub async fn send_heartbeat(&self) -> Result<()> {
        self.service.record_heartbeat(&self.token).await
    }

    /// Report success with `output` as the workflow's resume value.
    ///
    /// A null or empty-string output is rejected before touching the
    /// transport: the parked workflow needs an actual result to resume
    /// with, and silently accepting nothing would hide that bug.
    pub async fn send_success(self, output: &Value) -> Result<()> {
        let empty = match output {
            Value::Null => true,
            Value::String(text) => text.is_empty(),
            _ => false,
        };
        if empty {
            return Err(Error::ProtocolViolation(
                "task success requires a non-empty output".to_string(),
            ));
        }
        let text = serde_json::to_string(output)?;
        self.service.record_success(&self.token, &text).await
    }

    /// Report failure with a machine error code and human-readable cause.
    /// Always terminal, no payload constraint.
    pub async fn send_failure(self, error_code: &str, cause: &str) -> Result<()> {
        self.service.record_failure(&self.token, error_code, cause).await
    }
}

// Hand-rolled so the token never leaks through assertion or log output.
impl fmt::Debug for ActivityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTask")
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        heartbeats: usize,
        success: Option<String>,
        failure: Option<(String, String)>,
    }

    /// Hands out one task, then records what comes back.
    #[derive(Default)]
    struct RecordingService {
        recorded: Mutex<Recorded>,
        exhausted: Mutex<bool>,
    }

    #[async_trait]
    impl ActivityService for RecordingService {
        async fn poll_task(&self, _channel: &str, _worker: &str) -> Result<Option<TaskHandoff>> {
            Ok(Some(TaskHandoff {
                input: json!({ "guid": "1234" }),
                token: "opaque-token".to_string(),
            }))
        }

        async fn record_heartbeat(&self, _token: &str) -> Result<()> {
            if *self.exhausted.lock().unwrap() {
                return Err(Error::TokenExhausted);
            }
            self.recorded.lock().unwrap().heartbeats += 1;
            Ok(())
        }

        async fn record_success(&self, _token: &str, output: &str) -> Result<()> {
            let mut exhausted = self.exhausted.lock().unwrap();
            if *exhausted {
                return Err(Error::TokenExhausted);
            }
            *exhausted = true;
            self.recorded.lock().unwrap().success = Some(output.to_string());
            Ok(())
        }

        async fn record_failure(&self, _token: &str, error_code: &str, cause: &str) -> Result<()> {
            let mut exhausted = self.exhausted.lock().unwrap();
            if *exhausted {
                return Err(Error::TokenExhausted);
            }
            *exhausted = true;
            self.recorded.lock().unwrap().failure =
                Some((error_code.to_string(), cause.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn success_serializes_the_output_verbatim() {
        let service = Arc::new(RecordingService::default());
        let task = acquire_task(service.clone(), "orders", "worker-1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(task.input()["guid"], "1234");
        task.send_heartbeat().await.unwrap();
        task.send_heartbeat().await.unwrap();
        task.send_success(&json!("SUCCEEDED")).await.unwrap();

        let recorded = service.recorded.lock().unwrap();
        assert_eq!(recorded.heartbeats, 2);
        assert_eq!(recorded.success.as_deref(), Some("\"SUCCEEDED\""));
    }

    #[tokio::test]
    async fn null_success_output_is_a_protocol_violation() {
        let service = Arc::new(RecordingService::default());
        let task = acquire_task(service.clone(), "orders", "worker-1")
            .await
            .unwrap()
            .unwrap();

        let err = task.send_success(&Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(
            service.recorded.lock().unwrap().success.is_none(),
            "rejected payload must not reach the transport"
        );
    }

    #[tokio::test]
    async fn empty_string_success_output_is_a_protocol_violation() {
        let service = Arc::new(RecordingService::default());
        let task = acquire_task(service.clone(), "orders", "worker-1")
            .await
            .unwrap()
            .unwrap();

        let err = task.send_success(&json!("")).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn failure_reports_are_always_accepted() {
        let service = Arc::new(RecordingService::default());
        let task = acquire_task(service.clone(), "orders", "worker-1")
            .await
            .unwrap()
            .unwrap();

        task.send_failure("States.TaskFailed", "downstream unavailable")
            .await
            .unwrap();
        let recorded = service.recorded.lock().unwrap();
        assert_eq!(
            recorded.failure,
            Some((
                "States.TaskFailed".to_string(),
                "downstream unavailable".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn remote_boundary_rejects_a_spent_token() {
        let service = Arc::new(RecordingService::default());
        let handoff = service.poll_task("orders", "worker-1").await.unwrap().unwrap();

        service.record_success(&handoff.token, "\"done\"").await.unwrap();
        let err = service
            .record_success(&handoff.token, "\"again\"")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenExhausted));

        let err = service.record_heartbeat(&handoff.token).await.unwrap_err();
        assert!(matches!(err, Error::TokenExhausted));
    }

    /// The handle is debuggable (so `Result<Option<ActivityTask>>` works
    /// with the usual unwrap helpers) without exposing the token.
    #[tokio::test]
    async fn debug_output_redacts_the_token() {
        let service = Arc::new(RecordingService::default());
        let task = acquire_task(service, "orders", "worker-1")
            .await
            .unwrap()
            .unwrap();

        let rendered = format!("{:?}", task);
        assert!(rendered.contains("ActivityTask"));
        assert!(rendered.contains("guid"));
        assert!(!rendered.contains("opaque-token"), "got: {}", rendered);
    }
}
