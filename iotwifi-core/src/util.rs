use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Polls `probe` every `interval` until it yields `Some`, giving up with
/// `Error::Timeout(what)` once `max_wait` has elapsed. Probe errors end the
/// wait immediately.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    interval: Duration,
    max_wait: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + max_wait;
    loop {
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        if Instant::now() + interval > deadline {
            return Err(Error::Timeout(what.to_string()));
        }
        sleep(interval).await;
    }
}
