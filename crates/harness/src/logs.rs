//! Log appearance waits
//!
//! Log delivery is the loosest of the eventually consistent surfaces, so
//! every fetch error is treated as transient and only the attempt budget
//! bounds the wait.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryPolicy};

/// Read-only view of a log group.
#[async_trait]
pub trait LogObserver: Send + Sync {
    /// Fetch the currently visible events of `group`, oldest first.
    async fn fetch_events(&self, group: &str) -> Result<Vec<String>>;
}

/// Poll `group` until at least one event is visible.
pub async fn wait_for_log_events<O>(
    observer: &O,
    group: &str,
    max_attempts: usize,
    interval: Duration,
) -> Result<Vec<String>>
where
    O: LogObserver + ?Sized,
{
    let policy = RetryPolicy::new(max_attempts, interval).retry_anything();
    let what = format!("log events in '{}'", group);

    let events = poll_until(&what, &policy, move || async move {
        let events = observer.fetch_events(group).await?;
        if events.is_empty() {
            return Err(Error::NoLogEvents(group.to_string()));
        }
        Ok(events)
    })
    .await?;

    info!("'{}' produced {} log events", group, events.len());
    Ok(events)
}
