//! Distributed locks coordinated entirely through atomic scripts on a shared
//! store such as Redis. There is no lock manager process: each handle runs a
//! script from a fixed catalogue and the store's per-script atomicity does
//! the rest.
//!
//! Four flavors are available on one [`RedisLock`] handle: reentrant exclusive
//! locks, FIFO fair locks, and the read and write sides of a shared/exclusive
//! lock. Every flavor has a single-attempt call, a spinning variant bounded by
//! a timeout and a [`CancelToken`], a manual renew, and an optional watchdog
//! that renews the lease in the background until release.
//!
//! ```
//! use redislock::{CancelToken, MemoryStore, RedisLock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), redislock::Error> {
//! let store = Arc::new(MemoryStore::new());
//! let lock = RedisLock::builder(store, "order:42")
//!     .lease(Duration::from_secs(10))
//!     .auto_renew(true)
//!     .build()?;
//!
//! let cancel = CancelToken::new();
//! lock.spin_lock(&cancel, Duration::from_secs(3)).await?;
//! // critical section
//! lock.unlock().await?;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod error;
mod fair;
mod lock;
mod memory;
mod multi;
#[cfg(feature = "redis")]
mod redis_store;
mod reentrant;
mod rw;
#[cfg(test)]
mod scenarios;
pub mod script;
mod spin;
mod store;
mod watchdog;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use lock::{DEFAULT_LEASE, LockBuilder, RedisLock, RequestId, Token};
pub use memory::MemoryStore;
pub use multi::MultiLock;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use spin::SPIN_INTERVAL;
pub use store::{Arg, Reply, ScriptStore};
pub use watchdog::{LogObserver, RenewObserver, RenewScope, Slot};
