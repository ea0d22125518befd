use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::script::Script;
use crate::store::{Arg, ScriptStore};
use crate::watchdog::{LogObserver, Renewal, RenewObserver, RenewScope, Slot, Watchdog};
use log::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default lease when none is configured.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5);

/// Identity of a lock holder, checked by every unlock and renew.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(s: impl Into<String>) -> Token {
        Token(s.into())
    }

    /// A fresh `token_<uuid>` value.
    pub fn generate() -> Token {
        Token(format!("token_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::new(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token(s)
    }
}

/// Identity of one queued fair-lock request. A single token holder may
/// issue many of these over time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(s: impl Into<String>) -> RequestId {
        RequestId(s.into())
    }

    pub fn generate() -> RequestId {
        RequestId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::new(s)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId(s)
    }
}

/// Handle on one named lock in the backing store.
///
/// The handle holds no lock state of its own beyond the watchdogs it runs;
/// ownership lives entirely in the store. It is `Send + Sync` and may be
/// shared across tasks behind an `Arc`.
pub struct RedisLock {
    store: Arc<dyn ScriptStore>,
    key: String,
    store_key: String,
    token: Token,
    lease: Duration,
    request_timeout: Duration,
    auto_renew: bool,
    renew_scope: RenewScope,
    observer: Arc<dyn RenewObserver>,
    guard: Option<tokio::sync::Mutex<()>>,
    watchdogs: Mutex<HashMap<Slot, Watchdog>>,
}

impl fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("lease", &self.lease)
            .field("request_timeout", &self.request_timeout)
            .field("auto_renew", &self.auto_renew)
            .field("renew_scope", &self.renew_scope)
            .finish_non_exhaustive()
    }
}

impl RedisLock {
    pub fn builder(store: Arc<dyn ScriptStore>, key: impl Into<String>) -> LockBuilder {
        LockBuilder::new(store, key)
    }

    /// A handle with every option at its default.
    pub fn new(store: Arc<dyn ScriptStore>, key: impl Into<String>) -> Result<RedisLock> {
        LockBuilder::new(store, key).build()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The key handed to the scripts: `key()` wrapped in a hash tag unless it
    /// already carries one, so every key a script derives from it lands in the
    /// same Redis Cluster slot.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn auto_renew(&self) -> bool {
        self.auto_renew
    }

    /// Whether a watchdog is currently renewing `slot`.
    pub fn is_renewing(&self, slot: &Slot) -> bool {
        self.watchdogs().get(slot).is_some_and(Watchdog::is_running)
    }

    pub(crate) fn lease_arg(&self) -> Arg {
        Arg::millis(self.lease)
    }

    pub(crate) fn request_timeout_arg(&self) -> Arg {
        Arg::millis(self.request_timeout)
    }

    /// Run an acquisition script; on success start the slot's watchdog.
    pub(crate) async fn acquire(
        &self,
        script: &'static Script,
        args: Vec<Arg>,
        slot: Slot,
        renew_with: &'static Script,
        cancel: &CancelToken,
    ) -> Result<()> {
        let ident = ident_of(&args);
        {
            let _serial = self.serialized().await;
            invoke(self.store.as_ref(), script, &self.store_key, args, Error::LockFailed).await?;
        }

        debug!("{} acquired {slot} lock on {}", self.token, self.key);
        if self.auto_renew {
            self.start_watchdog(slot, renew_with, ident, cancel);
        }

        Ok(())
    }

    /// Stop the slot's watchdog, then run the release script.
    pub(crate) async fn release(&self, script: &'static Script, ident: &str, slot: Slot) -> Result<()> {
        self.stop_watchdog(&slot);

        let _serial = self.serialized().await;
        invoke(
            self.store.as_ref(),
            script,
            &self.store_key,
            vec![Arg::from(ident)],
            Error::UnlockFailed,
        )
        .await?;

        debug!("{} released {slot} lock on {}", self.token, self.key);
        Ok(())
    }

    pub(crate) async fn renew_with(&self, script: &'static Script, ident: &str) -> Result<()> {
        let _serial = self.serialized().await;
        invoke(
            self.store.as_ref(),
            script,
            &self.store_key,
            vec![Arg::from(ident), self.lease_arg()],
            Error::RenewFailed,
        )
        .await
    }

    async fn serialized(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.guard {
            Some(m) => Some(m.lock().await),
            None => None,
        }
    }

    fn watchdogs(&self) -> std::sync::MutexGuard<'_, HashMap<Slot, Watchdog>> {
        self.watchdogs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_watchdog(
        &self,
        slot: Slot,
        script: &'static Script,
        ident: String,
        cancel: &CancelToken,
    ) {
        let mut dogs = self.watchdogs();
        // A caller-scoped watchdog follows the most recent acquisition's token,
        // so a reentry restarts it instead of reusing the old one.
        if self.renew_scope == RenewScope::Detached
            && dogs.get(&slot).is_some_and(Watchdog::is_running)
        {
            return;
        }

        let renewal = Renewal {
            store: self.store.clone(),
            script,
            key: self.store_key.clone(),
            ident,
            lease: self.lease,
        };
        let caller = match self.renew_scope {
            RenewScope::Caller => Some(cancel.clone()),
            RenewScope::Detached => None,
        };
        let wd = Watchdog::start(renewal, slot.clone(), self.observer.clone(), caller);
        if let Some(old) = dogs.insert(slot, wd) {
            old.stop();
        }
    }

    fn stop_watchdog(&self, slot: &Slot) {
        if let Some(wd) = self.watchdogs().remove(slot) {
            debug!("stopping {slot} watchdog on {}", self.key);
            wd.stop();
        }
    }
}

impl Drop for RedisLock {
    fn drop(&mut self) {
        let dogs = self.watchdogs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, wd) in dogs.drain() {
            wd.stop();
        }
    }
}

/// Run `script` against `key` and map its reply onto the error taxonomy:
/// a backend fault becomes [`Error::Store`], the "not met" sentinel becomes
/// `refused`.
pub(crate) async fn invoke(
    store: &dyn ScriptStore,
    script: &'static Script,
    key: &str,
    args: Vec<Arg>,
    refused: Error,
) -> Result<()> {
    let reply = store
        .execute(script, &[key.to_string()], &args)
        .await
        .map_err(Error::Store)?;

    if reply.is_ok() {
        Ok(())
    } else if reply.is_sentinel() {
        Err(refused)
    } else {
        Err(Error::UnexpectedReply {
            script: script.id.name(),
            reply: reply.to_string(),
        })
    }
}

fn cluster_key(key: &str) -> String {
    let tagged = key.find('{').is_some_and(|open| {
        key[open + 1..]
            .find('}')
            .is_some_and(|close| close > 0)
    });
    if tagged {
        key.to_string()
    } else {
        format!("{{{key}}}")
    }
}

fn ident_of(args: &[Arg]) -> String {
    args.first()
        .and_then(Arg::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

/// Options for a [`RedisLock`].
pub struct LockBuilder {
    store: Arc<dyn ScriptStore>,
    key: String,
    token: Option<Token>,
    lease: Duration,
    request_timeout: Option<Duration>,
    auto_renew: bool,
    renew_scope: RenewScope,
    serialize_calls: bool,
    observer: Option<Arc<dyn RenewObserver>>,
}

impl LockBuilder {
    pub fn new(store: Arc<dyn ScriptStore>, key: impl Into<String>) -> LockBuilder {
        LockBuilder {
            store,
            key: key.into(),
            token: None,
            lease: DEFAULT_LEASE,
            request_timeout: None,
            auto_renew: false,
            renew_scope: RenewScope::default(),
            serialize_calls: false,
            observer: None,
        }
    }

    pub fn token(mut self, token: impl Into<Token>) -> LockBuilder {
        self.token = Some(token.into());
        self
    }

    pub fn lease(mut self, lease: Duration) -> LockBuilder {
        self.lease = lease;
        self
    }

    /// How long a fair-lock waiter stays queued without polling.
    /// Defaults to the lease.
    pub fn request_timeout(mut self, timeout: Duration) -> LockBuilder {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn auto_renew(mut self, on: bool) -> LockBuilder {
        self.auto_renew = on;
        self
    }

    pub fn renew_scope(mut self, scope: RenewScope) -> LockBuilder {
        self.renew_scope = scope;
        self
    }

    /// Serialize calls made concurrently on this one handle. Exclusivity
    /// between holders never depends on this.
    pub fn serialize_calls(mut self, on: bool) -> LockBuilder {
        self.serialize_calls = on;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RenewObserver>) -> LockBuilder {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<RedisLock> {
        if self.key.is_empty() {
            return Err(Error::InvalidConfig("lock key is empty"));
        }
        if self.lease.as_millis() == 0 {
            return Err(Error::InvalidConfig("lease must be at least 1ms"));
        }
        if self.request_timeout.is_some_and(|t| t.as_millis() == 0) {
            return Err(Error::InvalidConfig("request timeout must be at least 1ms"));
        }
        if self.token.as_ref().is_some_and(|t| t.as_str().is_empty()) {
            return Err(Error::InvalidConfig("token is empty"));
        }

        Ok(RedisLock {
            store: self.store,
            store_key: cluster_key(&self.key),
            key: self.key,
            token: self.token.unwrap_or_else(Token::generate),
            lease: self.lease,
            request_timeout: self.request_timeout.unwrap_or(self.lease),
            auto_renew: self.auto_renew,
            renew_scope: self.renew_scope,
            observer: self.observer.unwrap_or_else(|| Arc::new(LogObserver)),
            guard: self.serialize_calls.then(|| tokio::sync::Mutex::new(())),
            watchdogs: Mutex::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn store() -> Arc<dyn ScriptStore> {
        Arc::new(MemoryStore::new())
    }

    #[test]
    fn defaults() {
        let l = RedisLock::new(store(), "orders").unwrap();
        assert_eq!(l.key(), "orders");
        assert_eq!(l.lease(), DEFAULT_LEASE);
        assert_eq!(l.request_timeout(), DEFAULT_LEASE);
        assert!(!l.auto_renew());
        assert!(l.token().as_str().starts_with("token_"));
    }

    #[test]
    fn store_key_shares_one_cluster_slot() {
        let l = RedisLock::new(store(), "orders").unwrap();
        assert_eq!(l.key(), "orders");
        assert_eq!(l.store_key(), "{orders}");

        assert_eq!(cluster_key("user:{42}:cart"), "user:{42}:cart");
        assert_eq!(cluster_key("odd{}key"), "{odd{}key}");
        assert_eq!(cluster_key("half{open"), "{half{open}");
    }

    #[test]
    fn generated_tokens_are_unique() {
        let a = RedisLock::new(store(), "k").unwrap();
        let b = RedisLock::new(store(), "k").unwrap();
        assert_ne!(a.token(), b.token());
    }

    #[test]
    fn request_timeout_follows_lease_unless_set() {
        let l = RedisLock::builder(store(), "k")
            .lease(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(l.request_timeout(), Duration::from_secs(2));

        let l = RedisLock::builder(store(), "k")
            .lease(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(9))
            .token("me")
            .build()
            .unwrap();
        assert_eq!(l.request_timeout(), Duration::from_secs(9));
        assert_eq!(l.token().as_str(), "me");
    }

    #[test]
    fn rejects_bad_config() {
        assert!(matches!(
            RedisLock::new(store(), ""),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RedisLock::builder(store(), "k").lease(Duration::ZERO).build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RedisLock::builder(store(), "k").token("").build(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn store_faults_surface_as_store_errors() {
        let mem = Arc::new(MemoryStore::new());
        let l = RedisLock::builder(mem.clone(), "k").build().unwrap();
        mem.fail_next(1);
        let err = l.lock(&CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        l.lock(&CancelToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn serialized_handle_still_works_across_tasks() {
        let l = Arc::new(
            RedisLock::builder(store(), "k")
                .token("shared")
                .serialize_calls(true)
                .build()
                .unwrap(),
        );
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let l = l.clone();
            tasks.push(tokio::spawn(async move { l.lock(&CancelToken::new()).await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        for _ in 0..8 {
            l.unlock().await.unwrap();
        }
        assert!(matches!(l.unlock().await, Err(Error::UnlockFailed)));
    }
}
