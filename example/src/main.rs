use anyhow::Context;
use log::{info, warn};
use redislock::*;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// Reject a second order for the same user/product while one is in flight.
async fn create_order(
    store: Arc<dyn ScriptStore>,
    user_id: u64,
    product_id: u64,
) -> anyhow::Result<()> {
    let lock = RedisLock::builder(store, format!("order_lock:{user_id}:{product_id}"))
        .lease(Duration::from_secs(10))
        .build()?;

    if let Err(e) = lock.lock(&CancelToken::new()).await {
        warn!("order {user_id}/{product_id} rejected: {e}");
        return Ok(());
    }

    info!("creating order {user_id}/{product_id}");
    tokio::time::sleep(Duration::from_millis(200)).await;
    lock.unlock().await?;
    Ok(())
}

// Users queue for a limited stock of tickets and are served first come first served.
async fn ticket_rush(store: Arc<dyn ScriptStore>, users: usize, stock: usize) -> anyhow::Result<()> {
    let lock = Arc::new(
        RedisLock::builder(store, "fair:lock")
            .lease(Duration::from_secs(30))
            .request_timeout(Duration::from_secs(10))
            .auto_renew(true)
            .build()?,
    );
    let left = Arc::new(AtomicUsize::new(stock));

    let mut tasks = Vec::new();
    for user in 1..=users {
        let lock = lock.clone();
        let left = left.clone();
        tasks.push(tokio::spawn(async move {
            let id = RequestId::new(format!("user:{user}:{}", uuid::Uuid::new_v4()));
            let cancel = CancelToken::new();
            if let Err(e) = lock
                .spin_fair_lock(&id, &cancel, Duration::from_secs(10))
                .await
            {
                warn!("[{id}] gave up waiting: {e}");
                return;
            }

            let got = left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if got {
                info!("[{id}] got a ticket");
            } else {
                info!("[{id}] sold out");
            }

            if let Err(e) = lock.fair_unlock(&id).await {
                warn!("[{id}] unlock failed: {e}");
            }
        }));
    }

    for t in tasks {
        t.await?;
    }

    info!("ticket rush over, {} left", left.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let store: Arc<dyn ScriptStore> = match env::var("REDIS_URL") {
        Ok(url) => Arc::new(
            RedisStore::connect(&url)
                .await
                .context("REDIS_URL is set but unusable")?,
        ),
        Err(_) => {
            info!("REDIS_URL not set, using the in-process store");
            Arc::new(MemoryStore::new())
        }
    };

    let (a, b) = tokio::join!(
        create_order(store.clone(), 1, 100),
        create_order(store.clone(), 1, 100),
    );
    a?;
    b?;

    ticket_rush(store, 20, 5).await?;
    Ok(())
}
