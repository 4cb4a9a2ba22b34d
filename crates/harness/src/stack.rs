//! Infrastructure lifecycle boundary
//!
//! Provisioning mechanics are opaque to the harness; only readiness and
//! declared outputs matter. Outputs are keyed twice, by resource key and
//! attribute, mirroring how deployment stacks export them.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// A deployable stack of resources under test.
#[async_trait]
pub trait StackLifecycle: Send + Sync {
    /// Provision the stack and block until it is ready.
    async fn deploy(&self) -> Result<()>;

    /// Tear the stack down.
    async fn destroy(&self) -> Result<()>;

    /// Read one declared output attribute. An empty value is an error;
    /// scenarios must never interpolate a blank resource identifier.
    async fn output(&self, key: &str, attribute: &str) -> Result<String>;
}

/// Enforce the non-empty output contract on a looked-up value.
pub fn require_output(value: Option<&str>, key: &str, attribute: &str) -> Result<String> {
    match value {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(Error::MissingOutput {
            key: key.to_string(),
            attribute: attribute.to_string(),
        }),
    }
}
