use crate::cancel::CancelToken;
use crate::error::Result;
use crate::lock::RedisLock;
use crate::script::{READ_LOCK, READ_RENEW, READ_UNLOCK, WRITE_LOCK, WRITE_RENEW, WRITE_UNLOCK};
use crate::spin::spin;
use crate::store::Arg;
use crate::watchdog::Slot;
use std::time::Duration;

/// Shared/exclusive access on one key.
///
/// | held by `t` | `u` asks R | `u` asks W |
/// |-------------|------------|------------|
/// | R           | granted    | refused    |
/// | W           | refused    | refused    |
/// | R + W       | refused    | refused    |
///
/// The holder itself may take R while holding W, and W while holding R.
/// Both sides are reentrant per token.
impl RedisLock {
    pub async fn rlock(&self, cancel: &CancelToken) -> Result<()> {
        let args = vec![Arg::from(self.token().as_str()), self.lease_arg()];
        self.acquire(&READ_LOCK, args, Slot::Read, &READ_RENEW, cancel)
            .await
    }

    pub async fn runlock(&self) -> Result<()> {
        self.release(&READ_UNLOCK, self.token().as_str(), Slot::Read)
            .await
    }

    pub async fn spin_rlock(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        spin(timeout, cancel, || self.rlock(cancel)).await
    }

    pub async fn rrenew(&self) -> Result<()> {
        self.renew_with(&READ_RENEW, self.token().as_str()).await
    }

    pub async fn wlock(&self, cancel: &CancelToken) -> Result<()> {
        let args = vec![Arg::from(self.token().as_str()), self.lease_arg()];
        self.acquire(&WRITE_LOCK, args, Slot::Write, &WRITE_RENEW, cancel)
            .await
    }

    pub async fn wunlock(&self) -> Result<()> {
        self.release(&WRITE_UNLOCK, self.token().as_str(), Slot::Write)
            .await
    }

    pub async fn spin_wlock(&self, cancel: &CancelToken, timeout: Duration) -> Result<()> {
        spin(timeout, cancel, || self.wlock(cancel)).await
    }

    pub async fn wrenew(&self) -> Result<()> {
        self.renew_with(&WRITE_RENEW, self.token().as_str()).await
    }
}
