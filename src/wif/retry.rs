//! Bounded retry loop for calls against the cloud IAM backend.
//!
//! The backend is eventually consistent: a freshly created service account
//! can stay invisible to policy-binding calls for a while. Instead of a fixed
//! attempt count the loop retries on a fixed interval until a wall-clock
//! budget runs out, surfacing the last error when it does.

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};

/// Outcome of a single attempt inside [`retry_with_backoff`].
pub enum Attempt<T> {
    /// The operation succeeded; stop retrying.
    Ready(T),
    /// The operation failed but may succeed later.
    Retry(anyhow::Error),
    /// The operation failed in a way retrying cannot fix; stop immediately.
    Abort(anyhow::Error),
}

impl<T> From<crate::gcp::GcpResult<T>> for Attempt<T> {
    fn from(result: crate::gcp::GcpResult<T>) -> Self {
        match result {
            Ok(value) => Attempt::Ready(value),
            Err(e) => Attempt::Retry(e.into()),
        }
    }
}

/// Run `op` until it reports [`Attempt::Ready`] or [`Attempt::Abort`], or
/// until `budget` is exhausted. Waits `interval` between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    budget: Duration,
    interval: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let start = Instant::now();
    loop {
        match op().await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Abort(e) => return Err(e),
            Attempt::Retry(e) => {
                if start.elapsed() + interval >= budget {
                    return Err(e);
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}
