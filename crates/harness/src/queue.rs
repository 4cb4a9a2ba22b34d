//! Chunked long-poll message receive
//!
//! Queue transports cap how long a single receive may block. To honor a
//! larger overall budget the wait is carved into transport-sized chunks,
//! including the final remainder, so a 45 second budget against a 20 second
//! cap issues waits of 20, 20, and 5.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Transport-level cap on one blocking receive.
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// One observed queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Handle for acknowledging this delivery.
    pub receipt_handle: String,

    /// Raw message body.
    pub body: String,

    /// How many times this message has been delivered so far.
    pub receive_count: u32,

    /// When the message was originally sent.
    pub sent_at: DateTime<Utc>,
}

/// A queue endpoint that can be polled for one message at a time.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Queue name, used in timeout diagnostics.
    fn name(&self) -> &str;

    /// Longest a single `receive` may block. Defaults to the transport cap.
    fn max_wait(&self) -> Duration {
        MAX_RECEIVE_WAIT
    }

    /// Block for up to `wait` until one message is available.
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>>;
}

/// Wait up to `timeout` for a message, chunking the budget into receives no
/// longer than the source's cap.
///
/// Returns on the first delivered message. The timeout error is produced
/// only after receives covering the entire requested budget came back
/// empty. Transport errors abort immediately.
pub async fn wait_for_message<S>(source: &S, timeout: Duration) -> Result<QueueMessage>
where
    S: MessageSource + ?Sized,
{
    // Floor the cap so a zero-wait source cannot stall the loop.
    let cap = source.max_wait().max(Duration::from_millis(1));
    let mut remaining = timeout;
    let mut receives = 0usize;

    while !remaining.is_zero() {
        let wait = remaining.min(cap);
        receives += 1;
        debug!(
            "receiving on '{}' for up to {:?} ({:?} of the budget left)",
            source.name(),
            wait,
            remaining
        );
        if let Some(message) = source.receive(wait).await? {
            info!(
                "message on '{}' after {} receives (delivery {})",
                source.name(),
                receives,
                message.receive_count
            );
            return Ok(message);
        }
        remaining -= wait;
    }

    Err(Error::ReceiveTimeout {
        queue: source.name().to_string(),
        waited_secs: timeout.as_secs(),
        receives,
    })
}
