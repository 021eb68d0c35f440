use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::ConnectionError;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, at most `policy.max_retries` times.
///
/// Each attempt is bounded by `policy.timeout()`; attempts are separated by
/// `policy.delay_for(n)`. Returns the last failure once the attempts are
/// exhausted.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let mut retries = 0;
    let mut e = Error::Fatal("task was never attempted".to_string());
    while retries < policy.max_retries {
        match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(error)) => {
                warn!("failed with error: {:?}", &error);
                e = error;
            }
            Err(_) => {
                warn!("attempt {} timed out after {:?}", retries + 1, policy.timeout());
                e = ConnectionError::Timeout(policy.timeout()).into();
            }
        };

        retries += 1;
        if retries < policy.max_retries {
            sleep(policy.delay_for(retries - 1)).await;
        } else {
            warn!("task failed after {} attempts", retries);
        }
    }
    Err(e)
}

/// Spawns a named background task that logs instead of propagating its error.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
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
