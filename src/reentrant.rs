use crate::cancel::CancelToken;
use crate::error::Result;
use crate::lock::RedisLock;
use crate::script::{REENTRANT_LOCK, REENTRANT_RENEW, REENTRANT_UNLOCK};
use crate::spin::spin;
use crate::store::Arg;
use crate::watchdog::Slot;
use std::time::Duration;

impl RedisLock {
    /// Try once to take the exclusive lock.
    ///
    /// A token that already holds the lock re-enters it and must call
    /// [`unlock`](Self::unlock) once per successful `lock`. Fails with
    /// `LockFailed` while another token holds it.
    pub async fn lock(&self, cancel: &CancelToken) -> Result<()> {
        let args = vec![Arg::from(self.token().as_str()), self.lease_arg()];
        self.acquire(&REENTRANT_LOCK, args, Slot::Reentrant, &REENTRANT_RENEW, cancel)
            .await
    }

    /// Release one level of the exclusive lock.
    pub async fn unlock(&self) -> Result<()> {
        self.release(&REENTRANT_UNLOCK, self.token().as_str(), Slot::Reentrant)
            .await
    }

    /// Retry [`lock`](Self::lock) every 100ms until it succeeds, `timeout`
    /// elapses or `cancel` fires.
    pub async fn spin_lock(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        spin(timeout, cancel, || self.lock(cancel)).await
    }

    /// Push the lease out by another full lease.
    pub async fn renew(&self) -> Result<()> {
        self.renew_with(&REENTRANT_RENEW, self.token().as_str()).await
    }
}
