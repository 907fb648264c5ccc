//! Transparent retry of idempotent operations.

use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::manager::{ErrorDisposition, Manager};
use crate::pool::Pool;

/// Retry policy: attempt ceiling plus a backoff schedule.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    backoff: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl RetryPolicy {
    /// `max_attempts` with the default exponential backoff
    /// (100 ms doubling per attempt, capped at 2 s).
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(default_backoff),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Replace the backoff schedule. The closure receives the 1-based
    /// number of the attempt that just failed.
    #[must_use]
    pub fn with_backoff(
        mut self,
        backoff: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Delay before the attempt after `failed_attempt`.
    #[must_use]
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        (self.backoff)(failed_attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

fn default_backoff(failed_attempt: u32) -> Duration {
    let exp = failed_attempt.saturating_sub(1).min(8);
    Duration::from_millis(100u64 << exp).min(Duration::from_secs(2))
}

/// Run `op` on a pooled connection, retrying errors the manager classifies
/// as retryable.
///
/// Every retry reacquires a connection: a failed attempt poisons its lease,
/// so the broken connection never serves the next try. Errors classified
/// [`ErrorDisposition::Fatal`] (timeouts, authentication, constraint
/// violations) surface immediately. Only submit operations that are safe to
/// run twice.
pub async fn run_retrying<M, T, F>(
    pool: &Pool<M>,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, PoolError<M::Error>>
where
    M: Manager,
    F: AsyncFnMut(&mut M::Connection) -> Result<T, M::Error>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let mut lease = match pool.acquire().await {
            Ok(lease) => lease,
            Err(PoolError::Create(error)) => {
                if attempt < policy.max_attempts
                    && pool.classify(&error) == ErrorDisposition::Retryable
                {
                    tracing::warn!(%error, attempt, "connection attempt failed, retrying");
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                    continue;
                }
                return Err(PoolError::Create(error));
            }
            Err(other) => return Err(other),
        };

        match op(&mut *lease).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if pool.classify(&error) == ErrorDisposition::Retryable {
                    lease.poison();
                    drop(lease);
                    if attempt < policy.max_attempts {
                        tracing::warn!(%error, attempt, "retryable failure, reacquiring");
                        tokio::time::sleep(policy.delay_after(attempt)).await;
                        continue;
                    }
                }
                return Err(PoolError::Operation(error));
            }
        }
    }
}
