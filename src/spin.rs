use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use log::*;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Pause between two acquisition attempts.
pub const SPIN_INTERVAL: Duration = Duration::from_millis(100);

/// Retry `attempt` until it succeeds, `timeout` elapses or `cancel` fires.
///
/// Only [`Error::LockFailed`] is retried; any other error ends the loop as is.
/// The wait between attempts is interrupted the moment `cancel` fires.
pub async fn spin<F, Fut>(timeout: Duration, cancel: &CancelToken, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let deadline = Instant::now() + timeout;
    let mut tries = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::SpinLockCancelled);
        }

        tries += 1;
        match attempt().await {
            Ok(()) => {
                debug!("acquired after {tries} attempt(s)");
                return Ok(());
            }
            Err(e) if e.is_contended() => {}
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::SpinLockTimeout(timeout));
        }

        let pause = SPIN_INTERVAL.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SpinLockCancelled),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
