//! Bounded fixed-delay retry.
//!
//! Both the artifact downloader and workflow submission retry a fixed
//! number of times with a constant pause between attempts. The caller
//! decides per error whether another attempt is worthwhile.

use std::future::Future;
use std::time::Duration;

/// Tunable parameters for a bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Effective attempt count (never zero).
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// Whether a failed attempt should be followed by another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Yes,
    No,
}

/// Run `op` until it succeeds, the policy is exhausted, or `classify`
/// returns [`Retry::No`] for an error.
///
/// `op` receives the 1-based attempt number. Every failure is logged with
/// `label`. The last error is returned when all attempts fail.
pub async fn retry_with<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
    classify: C,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> Retry,
    E: std::fmt::Display,
{
    let max = policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let retry = classify(&e) == Retry::Yes && attempt < max;
                tracing::warn!(
                    attempt,
                    max_attempts = max,
                    error = %e,
                    will_retry = retry,
                    "{label} attempt failed",
                );
                if !retry {
                    return Err(e);
                }
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
}
