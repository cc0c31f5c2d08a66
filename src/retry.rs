//! Retry with exponential back-off for fallible async operations.
//!
//! [`retry`] wraps any fallible async operation. Every failure is retried
//! uniformly while attempts remain; the error is never inspected, because at
//! this layer a timeout, a dropped connection, and a half-rendered page all
//! deserve the same treatment. The final failure is propagated to the caller.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

/// Runs `operation` up to `attempts` times, sleeping `base_delay × 2^i`
/// between attempt `i` and attempt `i + 1`.
///
/// Attempts and delays are reported through `tracing`, never swallowed.
pub async fn retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut failures = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                failures += 1;
                if failures >= attempts {
                    tracing::warn!(
                        attempts,
                        label,
                        error = %err,
                        "giving up after final attempt"
                    );
                    return Err(err);
                }
                let delay = base_delay * (1u32 << (failures - 1).min(16));
                tracing::warn!(
                    attempt = failures,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    label,
                    error = %err,
                    "attempt failed, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
