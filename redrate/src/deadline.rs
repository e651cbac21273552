use crate::error::{Error, Result};
use std::future::Future;
use tokio::time::Instant;
use tracing::warn;

/// Run a limiter call, failing with [`Error::Timeout`] once `deadline` passes
///
/// The deadline covers the whole call including procedure reloads; retries
/// never get a fresh budget. A deadline that has already passed fails without
/// polling `fut`, so no store command is sent.
///
/// ```
/// use redrate::memory::MemoryStore;
/// use redrate::{Error, Limit, Limiter, with_deadline};
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// # tokio_test::block_on(async {
/// let limiter = Limiter::with_defaults(MemoryStore::new());
/// let deadline = Instant::now() + Duration::from_millis(50);
/// let res = with_deadline(deadline, limiter.allow("k", Limit::per_second(1))).await;
/// assert!(res.is_ok());
/// # });
/// ```
pub async fn with_deadline<F, T>(deadline: Instant, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if Instant::now() >= deadline {
        return Err(Error::Timeout);
    }
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Limiter call exceeded its deadline");
            Err(Error::Timeout)
        }
    }
}
