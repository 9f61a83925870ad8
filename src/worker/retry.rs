use super::error::WorkerError;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Attempt budget and fixed inter-attempt delay for [`retry_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent.
///
/// Only [`WorkerError::UpdateFailed`] and [`WorkerError::OperationFailed`] are
/// retried. Exhausting the budget yields [`WorkerError::RetriesExhausted`]
/// carrying the attempt count and the last error. The delay between attempts
/// is interrupted by `cancellation`, which yields [`WorkerError::Cancelled`].
pub async fn retry_operation<T, F, Fut>(
    policy: RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
) -> Result<T, WorkerError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, WorkerError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Some(token) = cancellation {
            if token.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt >= max_attempts {
                    tracing::error!(
                        attempt,
                        max_attempts,
                        error = %err,
                        "operation exhausted retries"
                    );
                    return Err(WorkerError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }

                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "operation failed; retrying"
                );
                sleep_with_cancellation(policy.delay, cancellation).await?;
            }
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<(), WorkerError> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(WorkerError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
