//! Store-independent lock scenarios. Each store's test module runs them
//! against its own backend, so the native evaluator and the Lua bodies are
//! held to the same behavior. Keys are prefixed so runs never collide on a
//! shared server. Timing uses the real clock.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::lock::{RedisLock, RequestId};
use crate::store::ScriptStore;
use std::sync::Arc;
use std::time::Duration;

fn handle(
    store: &Arc<dyn ScriptStore>,
    key: &str,
    token: &str,
    lease: Duration,
    request_timeout: Duration,
) -> RedisLock {
    RedisLock::builder(store.clone(), key)
        .token(token)
        .lease(lease)
        .request_timeout(request_timeout)
        .build()
        .unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub(crate) async fn exclusion_and_reentrancy(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:orders");
    let c = CancelToken::new();
    let t1 = handle(&store, &key, "t1", secs(5), secs(5));
    let t2 = handle(&store, &key, "t2", secs(5), secs(5));

    t1.lock(&c).await.unwrap();
    t1.lock(&c).await.unwrap();
    assert!(matches!(t2.lock(&c).await, Err(Error::LockFailed)));
    assert!(matches!(t2.unlock().await, Err(Error::UnlockFailed)));
    assert!(matches!(t2.renew().await, Err(Error::RenewFailed)));
    t1.renew().await.unwrap();

    t1.unlock().await.unwrap();
    assert!(matches!(t2.lock(&c).await, Err(Error::LockFailed)));
    t1.unlock().await.unwrap();
    t2.lock(&c).await.unwrap();
    assert!(matches!(t1.unlock().await, Err(Error::UnlockFailed)));
    t2.unlock().await.unwrap();
}

pub(crate) async fn lease_expiry(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:expiry");
    let c = CancelToken::new();
    let lease = Duration::from_millis(200);
    let t1 = handle(&store, &key, "t1", lease, lease);
    let t2 = handle(&store, &key, "t2", lease, lease);

    t1.lock(&c).await.unwrap();
    assert!(matches!(t2.lock(&c).await, Err(Error::LockFailed)));
    tokio::time::sleep(Duration::from_millis(250)).await;
    t2.lock(&c).await.unwrap();
    assert!(matches!(t1.unlock().await, Err(Error::UnlockFailed)));
    assert!(matches!(t1.renew().await, Err(Error::RenewFailed)));
    t2.unlock().await.unwrap();
}

pub(crate) async fn watchdog_keeps_lease(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:watchdog");
    let c = CancelToken::new();
    let t1 = RedisLock::builder(store.clone(), key.as_str())
        .token("t1")
        .lease(Duration::from_millis(300))
        .auto_renew(true)
        .build()
        .unwrap();
    let t2 = handle(&store, &key, "t2", secs(5), secs(5));

    t1.lock(&c).await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(matches!(t2.lock(&c).await, Err(Error::LockFailed)));
    t1.unlock().await.unwrap();
    t2.lock(&c).await.unwrap();
    t2.unlock().await.unwrap();
}

pub(crate) async fn fair_order(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:tickets");
    let c = CancelToken::new();
    let h = handle(&store, &key, "counter", secs(5), secs(5));
    let (a, b, d) = (
        RequestId::new("req-a"),
        RequestId::new("req-b"),
        RequestId::new("req-c"),
    );

    h.fair_lock(&a, &c).await.unwrap();
    assert!(matches!(h.fair_lock(&b, &c).await, Err(Error::LockFailed)));
    assert!(matches!(h.fair_lock(&d, &c).await, Err(Error::LockFailed)));
    assert!(matches!(h.fair_renew(&b).await, Err(Error::RenewFailed)));
    h.fair_renew(&a).await.unwrap();

    h.fair_unlock(&a).await.unwrap();
    assert!(matches!(h.fair_lock(&d, &c).await, Err(Error::LockFailed)));
    h.fair_lock(&b, &c).await.unwrap();
    h.fair_unlock(&b).await.unwrap();
    h.fair_lock(&d, &c).await.unwrap();
    h.fair_unlock(&d).await.unwrap();
    assert!(matches!(h.fair_unlock(&d).await, Err(Error::UnlockFailed)));
}

/// A waiter with a short request timeout polls once and walks away. Its poll
/// must not shorten the queue's lifetime below the head's lease.
pub(crate) async fn short_waiter_keeps_head(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:rush");
    let c = CancelToken::new();
    let holder = handle(&store, &key, "holder", secs(30), secs(30));
    let waiter = handle(&store, &key, "waiter", secs(1), secs(1));
    let (first, quitter, late) = (
        RequestId::new("req-first"),
        RequestId::new("req-quitter"),
        RequestId::new("req-late"),
    );

    holder.fair_lock(&first, &c).await.unwrap();
    assert!(matches!(waiter.fair_lock(&quitter, &c).await, Err(Error::LockFailed)));
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(matches!(holder.fair_lock(&late, &c).await, Err(Error::LockFailed)));
    holder.fair_renew(&first).await.unwrap();
    holder.fair_unlock(&first).await.unwrap();
    holder.fair_lock(&late, &c).await.unwrap();
    holder.fair_unlock(&late).await.unwrap();
}

pub(crate) async fn read_write_matrix(store: Arc<dyn ScriptStore>, prefix: &str) {
    let key = format!("{prefix}:stock");
    let c = CancelToken::new();
    let r1 = handle(&store, &key, "r1", secs(5), secs(5));
    let r2 = handle(&store, &key, "r2", secs(5), secs(5));
    let w = handle(&store, &key, "w", secs(5), secs(5));

    r1.rlock(&c).await.unwrap();
    r2.rlock(&c).await.unwrap();
    assert!(matches!(w.wlock(&c).await, Err(Error::LockFailed)));
    r1.rrenew().await.unwrap();
    r1.runlock().await.unwrap();
    assert!(matches!(w.wlock(&c).await, Err(Error::LockFailed)));
    r2.runlock().await.unwrap();
    assert!(matches!(r2.runlock().await, Err(Error::UnlockFailed)));

    w.wlock(&c).await.unwrap();
    w.wlock(&c).await.unwrap();
    assert!(matches!(r1.rlock(&c).await, Err(Error::LockFailed)));
    assert!(matches!(r1.wlock(&c).await, Err(Error::LockFailed)));
    assert!(matches!(r1.wrenew().await, Err(Error::RenewFailed)));
    w.wrenew().await.unwrap();
    w.rlock(&c).await.unwrap();
    w.runlock().await.unwrap();

    w.wunlock().await.unwrap();
    assert!(matches!(r1.rlock(&c).await, Err(Error::LockFailed)));
    w.wunlock().await.unwrap();
    assert!(matches!(w.wunlock().await, Err(Error::UnlockFailed)));

    r1.rlock(&c).await.unwrap();
    assert!(matches!(w.wlock(&c).await, Err(Error::LockFailed)));
    r1.runlock().await.unwrap();
}
