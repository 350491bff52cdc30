//! Retry with exponential backoff
//!
//! Applies only to transient failures. Auth failures surface immediately;
//! they will not heal on their own and retrying hammers the server with
//! bad credentials.

use std::thread;
use std::time::Duration;

use crate::observability::Logger;

use super::errors::{TransportError, TransportResult};

/// Backoff policy for transient transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// No retries, no sleeping. For tests.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// The delay before attempt `n` (1-based retry count).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.initial_backoff * self.multiplier.saturating_pow(retry.saturating_sub(1))
    }

    /// Run `op`, retrying transient failures up to `max_retries` times.
    pub fn run<T, F>(&self, mut op: F) -> TransportResult<T>
    where
        F: FnMut() -> TransportResult<T>,
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.backoff_for(retry);
                    Logger::warn(
                        "transport_retry",
                        &[
                            ("operation", e.operation),
                            ("retry", &retry.to_string()),
                            ("delay_ms", &delay.as_millis().to_string()),
                            ("error", &e.message),
                        ],
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
