use crate::cancel::CancelToken;
use crate::error::Result;
use crate::lock::{RedisLock, RequestId};
use crate::script::{FAIR_LOCK, FAIR_RENEW, FAIR_UNLOCK};
use crate::spin::spin;
use crate::store::Arg;
use crate::watchdog::Slot;
use std::time::Duration;

// Requests are served strictly in enqueue order. The queue lives in the store;
// each call lazily evicts entries whose expiry passed, so a crashed head or an
// abandoned waiter cannot block the line for longer than its own timeout.
impl RedisLock {
    /// Join the queue for this key (or confirm membership) and report whether
    /// `request_id` is now at its head.
    ///
    /// Never waits: a queued but not-yet-head request yields `LockFailed`, and
    /// must keep calling within the request timeout to hold its place.
    pub async fn fair_lock(&self, request_id: &RequestId, cancel: &CancelToken) -> Result<()> {
        let args = vec![
            Arg::from(request_id.as_str()),
            self.lease_arg(),
            self.request_timeout_arg(),
        ];
        self.acquire(
            &FAIR_LOCK,
            args,
            Slot::Fair(request_id.clone()),
            &FAIR_RENEW,
            cancel,
        )
        .await
    }

    pub async fn spin_fair_lock(
        &self,
        request_id: &RequestId,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<()> {
        spin(timeout, cancel, || self.fair_lock(request_id, cancel)).await
    }

    /// Remove `request_id` from the queue, wherever it stands.
    pub async fn fair_unlock(&self, request_id: &RequestId) -> Result<()> {
        self.release(
            &FAIR_UNLOCK,
            request_id.as_str(),
            Slot::Fair(request_id.clone()),
        )
        .await
    }

    /// Extend the head entry's lease. Waiters behind the head cannot renew.
    pub async fn fair_renew(&self, request_id: &RequestId) -> Result<()> {
        self.renew_with(&FAIR_RENEW, request_id.as_str()).await
    }
}
