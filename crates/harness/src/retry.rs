//! Bounded convergence polling
//!
//! Eventually consistent systems answer "not yet" long before they answer
//! "yes" or "no". `poll_until` re-runs a probe on a fixed interval until it
//! succeeds, the attempt budget runs out, or the probe fails in a way the
//! policy does not recognize as transient.

use std::future::Future;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Which probe errors are worth another attempt.
///
/// Classification works on the rendered error message, so a policy can be
/// built from the same signature strings an operator would grep the logs for.
#[derive(Debug, Clone, Default)]
pub enum Retryable {
    /// Any probe error aborts the poll on first sight.
    #[default]
    Nothing,

    /// Every probe error is treated as transient.
    Anything,

    /// Only errors whose message matches one of these patterns are retried.
    Matching(Vec<Regex>),
}

/// Attempt budget, pacing, and error classification for one poll.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of probe attempts, including the first one.
    pub max_attempts: usize,

    /// Sleep between consecutive attempts.
    pub interval: Duration,

    /// Error classification.
    pub retryable: Retryable,
}

impl RetryPolicy {
    /// Policy that aborts on the first probe error.
    pub fn new(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            retryable: Retryable::Nothing,
        }
    }

    /// Treat every probe error as transient.
    pub fn retry_anything(mut self) -> Self {
        self.retryable = Retryable::Anything;
        self
    }

    /// Add one retryable error signature. Patterns match anywhere in the
    /// rendered message unless anchored.
    pub fn retry_on(mut self, pattern: &str) -> Result<Self> {
        let signature = Regex::new(pattern).map_err(|e| Error::PatternCompile {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        match &mut self.retryable {
            Retryable::Matching(signatures) => signatures.push(signature),
            other => *other = Retryable::Matching(vec![signature]),
        }
        Ok(self)
    }

    fn wants_retry(&self, err: &Error) -> bool {
        match &self.retryable {
            Retryable::Nothing => false,
            Retryable::Anything => true,
            Retryable::Matching(signatures) => {
                let message = err.to_string();
                signatures.iter().any(|s| s.is_match(&message))
            }
        }
    }
}

/// Run `probe` until it succeeds or the policy gives up.
///
/// A probe error the policy classifies as transient consumes one attempt and
/// schedules the next one after `interval`. Any other error aborts the poll
/// immediately without spending the remaining budget. When the budget runs
/// out the timeout error carries the last probe error for diagnosis.
pub async fn poll_until<T, F, Fut>(what: &str, policy: &RetryPolicy, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // A zero budget still probes once; a poll that never looks answers nothing.
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match probe().await {
            Ok(value) => {
                debug!("{} satisfied on attempt {}/{}", what, attempt, max_attempts);
                return Ok(value);
            }
            Err(err) => {
                if !policy.wants_retry(&err) {
                    warn!("{} aborted on attempt {}: {}", what, attempt, err);
                    return Err(Error::Fatal {
                        what: what.to_string(),
                        attempt,
                        source: Box::new(err),
                    });
                }
                if attempt >= max_attempts {
                    return Err(Error::Timeout {
                        what: what.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                debug!(
                    "{} not satisfied on attempt {}/{}, retrying in {:?}: {}",
                    what, attempt, max_attempts, policy.interval, err
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}
