//! Retrying transfers
//!
//! Every transport call made on behalf of a file goes through
//! [`retry_transfer`]:
//! - a flood wait sleeps for exactly the number of seconds the server asked
//!   for and tries again, without spending the retry budget
//! - a transient RPC error spends one retry and backs off exponentially
//! - a transient error with no budget left gives up on the file
//! - anything else is returned as an error

use crate::error::Result;
use crate::telegram::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Exponential backoff helper
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        ExponentialBackoff {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(60),
            max_attempts,
            current_attempt: 0,
        }
    }

    /// Get the next delay, or None if max attempts reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor);
        self.current_attempt += 1;

        Some(delay.min(self.max_delay))
    }

    /// Retries left before [`next_delay`](Self::next_delay) gives up
    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.current_attempt
    }
}

/// How hard to retry transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transient failures tolerated per file
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Result of a retried operation that did not fail fatally
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// The retry budget ran out; the last transient error is kept
    GaveUp(TransportError),
}

/// Per-file result of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome<T> {
    Completed { name: String, output: T },
    Failed { name: String, reason: String },
}

impl<T> FileOutcome<T> {
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Completed { name, .. } | FileOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

/// Run `operation` until it succeeds, gives up or fails fatally
pub async fn retry_transfer<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<Attempt<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, TransportError>>,
{
    let mut backoff = ExponentialBackoff::new(policy.base_delay_ms, policy.max_retries);
    loop {
        match operation().await {
            Ok(value) => return Ok(Attempt::Done(value)),
            Err(TransportError::FloodWait { seconds }) => {
                warn!(
                    "Telegram asked to wait {} seconds before sending \"{}\" again",
                    seconds, label
                );
                sleep(Duration::from_secs(u64::from(seconds))).await;
            }
            Err(err @ TransportError::Rpc { .. }) => match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "Transfer of \"{}\" failed ({}), {} retries left, retrying in {:?}",
                        label,
                        err,
                        backoff.remaining(),
                        delay
                    );
                    sleep(delay).await;
                }
                None => {
                    error!("Giving up on \"{}\" after repeated errors: {}", label, err);
                    return Ok(Attempt::GaveUp(err));
                }
            },
            Err(err) => return Err(err.into()),
        }
    }
}
