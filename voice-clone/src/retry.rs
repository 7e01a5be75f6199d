//! Bounded retry with exponential backoff for transport-level calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{CloneError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Only transient failures are retried: transport errors and provider
    /// responses with a 5xx status. An explicit provider rejection is returned
    /// on the first occurrence.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_transient(&e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_secs_f32(
                        (delay.as_secs_f32() * self.backoff_factor)
                            .min(self.max_delay.as_secs_f32()),
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub(crate) fn is_transient(err: &CloneError) -> bool {
    match err {
        CloneError::Transport { .. } => true,
        CloneError::Provider {
            status_code: Some(code),
            ..
        } => *code >= 500,
        _ => false,
    }
}
