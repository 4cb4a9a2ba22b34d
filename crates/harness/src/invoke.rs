//! Resource action invocation
//!
//! The thin boundary through which a scenario pokes the system under test:
//! invoke a function, send a queue message, upload an object. Implementations
//! live outside this crate; scenarios only depend on the trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// How a function invocation is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationKind {
    /// Synchronous call; the outcome carries the function's payload.
    RequestResponse,

    /// Validation only; the function body never runs.
    DryRun,

    /// Fire-and-forget; the outcome carries no payload.
    Event,
}

impl InvocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationKind::RequestResponse => "RequestResponse",
            InvocationKind::DryRun => "DryRun",
            InvocationKind::Event => "Event",
        }
    }
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one invoked action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Transport status code of the invocation.
    pub status_code: u16,

    /// Raw response payload, absent for asynchronous dispatch.
    pub payload: Option<String>,
}

impl ActionOutcome {
    /// Decode the payload as JSON.
    pub fn payload_json(&self) -> Result<Value> {
        let text = self.payload.as_deref().unwrap_or("null");
        Ok(serde_json::from_str(text)?)
    }
}

/// Actions a scenario may take against the system under test.
#[async_trait]
pub trait ResourceInvoker: Send + Sync {
    /// Invoke `function` with a JSON payload.
    async fn invoke_function(
        &self,
        function: &str,
        kind: InvocationKind,
        payload: &Value,
    ) -> Result<ActionOutcome>;

    /// Send one message to `queue`; group and dedup ids apply to FIFO
    /// queues only. Returns the message id.
    async fn send_message(
        &self,
        queue: &str,
        body: &str,
        group: Option<&str>,
        dedup: Option<&str>,
    ) -> Result<String>;

    /// Upload an object body to `bucket` under `key`.
    async fn put_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<()>;
}
