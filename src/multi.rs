use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::lock::RedisLock;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Best-effort composite over independent exclusive locks.
///
/// Locks are taken in the given order, so callers that share keys should
/// agree on that order. This is not a quorum lock: every handle may point at
/// the same store or at different ones, and no majority is computed.
#[derive(Debug)]
pub struct MultiLock {
    locks: Vec<Arc<RedisLock>>,
}

impl MultiLock {
    pub fn new(locks: Vec<Arc<RedisLock>>) -> Result<MultiLock> {
        if locks.is_empty() {
            return Err(Error::InvalidConfig("no locks provided"));
        }
        Ok(MultiLock { locks })
    }

    pub fn locks(&self) -> &[Arc<RedisLock>] {
        &self.locks
    }

    /// Acquire every lock within `timeout`, spinning on each in turn. On any
    /// failure the locks already taken are released before returning.
    pub async fn lock(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        for (i, l) in self.locks.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let res = if remaining.is_zero() {
                Err(Error::SpinLockTimeout(timeout))
            } else {
                l.spin_lock(cancel, remaining).await
            };

            if let Err(e) = res {
                info!("multi lock failed at {} ({e}), rolling back {i} lock(s)", l.key());
                self.release(&self.locks[..i]).await;
                return Err(match e {
                    Error::SpinLockTimeout(_) => Error::SpinLockTimeout(timeout),
                    other => other,
                });
            }
        }

        Ok(())
    }

    /// Release every lock. All are attempted; the last failure is returned.
    pub async fn unlock(&self) -> Result<()> {
        match self.release(&self.locks).await {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release(&self, locks: &[Arc<RedisLock>]) -> Option<Error> {
        let mut last = None;
        for l in locks.iter().rev() {
            if let Err(e) = l.unlock().await {
                warn!("unlock of {} failed: {e}", l.key());
                last = Some(e);
            }
        }
        last
    }
}
