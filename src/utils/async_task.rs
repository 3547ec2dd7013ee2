use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::FailoverError;
use crate::Result;

/// Runs `task` until it succeeds, fails with a non-retryable error, or
/// `policy.max_retries` attempts are used up. Each attempt is bounded by
/// `policy.timeout()`; delays double from `base_delay` up to `max_delay`.
///
/// On exhaustion the last attempt's error is returned.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: &BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let mut delay = policy.base_delay();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => e,
            Err(_) => Error::Failover(FailoverError::AttemptTimeout(policy.timeout())),
        };

        if !error.is_retryable() {
            return Err(error);
        }
        if attempt >= policy.max_retries {
            warn!("task failed after {} attempt(s): {}", attempt, error);
            return Err(error);
        }

        warn!("attempt {} failed, retrying in {:?}: {}", attempt, delay, error);
        sleep(delay).await;
        delay = next_delay(delay, policy.max_delay());
    }
}

fn next_delay(
    current: Duration,
    max: Duration,
) -> Duration {
    (current * 2).min(max)
}

/// Spawns `task_fn`, logging its error if it stops with one.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<tokio::task::JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
