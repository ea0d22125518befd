use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::lock::{RequestId, invoke};
use crate::script::Script;
use crate::store::{Arg, ScriptStore};
use log::*;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Which acquisition of a handle a watchdog keeps alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Reentrant,
    Read,
    Write,
    Fair(RequestId),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Reentrant => f.write_str("reentrant"),
            Slot::Read => f.write_str("read"),
            Slot::Write => f.write_str("write"),
            Slot::Fair(id) => write!(f, "fair({id})"),
        }
    }
}

/// Decides what, besides release, stops a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenewScope {
    /// Only release, drop of the handle, or a failed renewal stop it.
    #[default]
    Detached,
    /// Additionally stop when the token passed to the acquiring call fires.
    Caller,
}

/// Hook for renewals that happen after the acquiring call has returned.
pub trait RenewObserver: Send + Sync {
    fn renewed(&self, _key: &str, _slot: &Slot) {}

    /// The watchdog has stopped for good after this.
    fn renew_failed(&self, key: &str, slot: &Slot, err: &Error);
}

/// Default observer; reports through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl RenewObserver for LogObserver {
    fn renewed(&self, key: &str, slot: &Slot) {
        trace!("renewed {slot} lease on {key}");
    }

    fn renew_failed(&self, key: &str, slot: &Slot, err: &Error) {
        warn!("auto renew of {slot} lease on {key} failed, watchdog stopped: {err}");
    }
}

/// One renew script call, bound to its key, owner and lease.
pub(crate) struct Renewal {
    pub store: Arc<dyn ScriptStore>,
    pub script: &'static Script,
    pub key: String,
    pub ident: String,
    pub lease: Duration,
}

impl Renewal {
    pub async fn renew(&self) -> Result<()> {
        invoke(
            self.store.as_ref(),
            self.script,
            &self.key,
            vec![Arg::from(self.ident.as_str()), Arg::millis(self.lease)],
            Error::RenewFailed,
        )
        .await
    }
}

/// Background task renewing one lease every `lease / 3`.
pub(crate) struct Watchdog {
    stop: CancelToken,
    task: JoinHandle<()>,
}

impl Watchdog {
    pub fn start(
        renewal: Renewal,
        slot: Slot,
        observer: Arc<dyn RenewObserver>,
        caller: Option<CancelToken>,
    ) -> Watchdog {
        let stop = CancelToken::new();
        let period = (renewal.lease / 3).max(Duration::from_millis(1));
        debug!(
            "watchdog for {slot} lease on {} every {:?}",
            renewal.key, period
        );

        let own = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = own.cancelled() => return,
                    _ = fired(caller.as_ref()) => {
                        debug!("caller cancelled, watchdog for {slot} on {} exits", renewal.key);
                        return;
                    }
                    _ = ticker.tick() => match renewal.renew().await {
                        Ok(()) => observer.renewed(&renewal.key, &slot),
                        Err(e) => {
                            observer.renew_failed(&renewal.key, &slot, &e);
                            return;
                        }
                    },
                }
            }
        });

        Watchdog { stop, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the task; an in-flight renewal is abandoned.
    pub fn stop(self) {
        self.stop.cancel();
        self.task.abort();
    }
}

async fn fired(token: Option<&CancelToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}
