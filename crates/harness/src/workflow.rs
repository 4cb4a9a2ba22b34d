//! Workflow execution observation
//!
//! Waits for a remote execution to reach a desired status. Only the known
//! in-flight statuses are worth another probe; any other mismatch means the
//! execution went somewhere unexpected and the wait aborts at once with the
//! recorded cause.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryPolicy};

/// Lifecycle states a remote execution reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    PendingRedrive,
}

impl ExecutionStatus {
    /// Statuses that mean the execution is still making progress.
    pub const IN_FLIGHT: [ExecutionStatus; 2] =
        [ExecutionStatus::Running, ExecutionStatus::PendingRedrive];

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::PendingRedrive)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMED_OUT",
            ExecutionStatus::Aborted => "ABORTED",
            ExecutionStatus::PendingRedrive => "PENDING_REDRIVE",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote execution's observable state at one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub status: ExecutionStatus,

    /// Human-readable cause recorded on failure or abort.
    pub cause: Option<String>,

    /// Machine error code recorded on failure.
    pub error: Option<String>,

    /// JSON text of the execution output, present once succeeded.
    pub output: Option<String>,
}

/// Remote boundary for starting, stopping, and describing executions.
#[async_trait]
pub trait WorkflowObserver: Send + Sync {
    /// Start an execution of `machine` and return its identifier.
    async fn start_execution(&self, machine: &str, input: &Value) -> Result<String>;

    /// Request an abort of a running execution.
    async fn stop_execution(&self, execution: &str) -> Result<()>;

    /// Fetch the execution's current observable state.
    async fn describe_execution(&self, execution: &str) -> Result<ExecutionSnapshot>;
}

/// Poll `execution` until it reports `want`.
///
/// In-flight statuses other than `want` are retried; any other status
/// aborts immediately, surfacing the recorded cause. The returned snapshot
/// is the one that first reported `want`.
pub async fn wait_for_status<O>(
    observer: &O,
    execution: &str,
    want: ExecutionStatus,
    max_attempts: usize,
    interval: Duration,
) -> Result<ExecutionSnapshot>
where
    O: WorkflowObserver + ?Sized,
{
    let mut policy = RetryPolicy::new(max_attempts, interval);
    for status in ExecutionStatus::IN_FLIGHT {
        if status != want {
            policy = policy.retry_on(&format!("bad status: {}", status))?;
        }
    }

    let what = format!("execution '{}' reaching {}", execution, want);
    let snapshot = poll_until(&what, &policy, move || async move {
        let snapshot = observer.describe_execution(execution).await?;
        if snapshot.status == want {
            return Ok(snapshot);
        }
        Err(Error::UnexpectedStatus {
            execution: execution.to_string(),
            status: snapshot.status.to_string(),
            cause: snapshot.cause.unwrap_or_else(|| "none".to_string()),
        })
    })
    .await?;

    info!("execution '{}' reached {}", execution, want);
    Ok(snapshot)
}
