use crate::script::{Script, ScriptId};
use crate::store::{Arg, Reply, ScriptStore};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use log::*;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Held {
    token: String,
    count: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Shared {
    count: u64,
    expires_at: Instant,
}

#[derive(Debug)]
struct Waiter {
    request_id: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    owners: HashMap<String, Held>,
    queues: HashMap<String, VecDeque<Waiter>>,
    readers: HashMap<String, HashMap<String, Shared>>,
    writers: HashMap<String, Held>,
}

impl State {
    fn live_owner(&mut self, key: &str, now: Instant) -> Option<&mut Held> {
        if self.owners.get(key).is_some_and(|h| h.expires_at <= now) {
            self.owners.remove(key);
        }
        self.owners.get_mut(key)
    }

    fn live_writer(&mut self, key: &str, now: Instant) -> Option<&mut Held> {
        if self.writers.get(key).is_some_and(|h| h.expires_at <= now) {
            self.writers.remove(key);
        }
        self.writers.get_mut(key)
    }

    fn live_readers(&mut self, key: &str, now: Instant) -> &mut HashMap<String, Shared> {
        let readers = self.readers.entry(key.to_string()).or_default();
        readers.retain(|_, r| r.expires_at > now);
        readers
    }

    fn live_queue(&mut self, key: &str, now: Instant) -> &mut VecDeque<Waiter> {
        let queue = self.queues.entry(key.to_string()).or_default();
        queue.retain(|w| w.expires_at > now);
        queue
    }

    /// Drop every lapsed record, whatever key it belongs to.
    fn sweep(&mut self, now: Instant) {
        self.owners.retain(|_, h| h.expires_at > now);
        self.writers.retain(|_, h| h.expires_at > now);
        self.readers.retain(|_, readers| {
            readers.retain(|_, r| r.expires_at > now);
            !readers.is_empty()
        });
        self.queues.retain(|_, queue| {
            queue.retain(|w| w.expires_at > now);
            !queue.is_empty()
        });
    }

    fn len(&self) -> usize {
        self.owners.len()
            + self.writers.len()
            + self.readers.values().map(HashMap::len).sum::<usize>()
            + self.queues.values().map(VecDeque::len).sum::<usize>()
    }

    fn tidy(&mut self, key: &str) {
        if self.readers.get(key).is_some_and(|r| r.is_empty()) {
            self.readers.remove(key);
        }
        if self.queues.get(key).is_some_and(|q| q.is_empty()) {
            self.queues.remove(key);
        }
    }
}

/// In-process store that evaluates the script catalogue natively.
///
/// Every call takes one mutex for its whole evaluation, which gives the same
/// per-call atomicity a Lua script gets on the server. Expiry uses the tokio
/// clock so tests may pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: AtomicUsize,
    calls: AtomicUsize,
}

/// Every this many calls, lapsed records of all keys are swept.
const SWEEP_EVERY: usize = 64;

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Make the next `n` executions fail as a backend fault.
    pub fn fail_next(&self, n: usize) {
        self.faults.store(n, Ordering::SeqCst);
    }

    /// Live and not-yet-swept records across all keys.
    pub fn records(&self) -> usize {
        self.state.lock().map_or(0, |st| st.len())
    }

    fn take_fault(&self) -> bool {
        self.faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn run(&self, id: ScriptId, key: &str, args: &[Arg]) -> anyhow::Result<i64> {
        let ident = str_arg(args, 0)?;
        let mut st = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store state poisoned"))?;
        let now = Instant::now();
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            st.sweep(now);
        }

        let ok = match id {
            ScriptId::ReentrantLock => {
                let ttl = ttl_arg(args, 1)?;
                match st.live_owner(key, now) {
                    Some(h) if h.token == ident => {
                        h.count += 1;
                        h.expires_at = now + ttl;
                        true
                    }
                    Some(_) => false,
                    None => {
                        st.owners.insert(key.to_string(), held(ident, now + ttl));
                        true
                    }
                }
            }
            ScriptId::ReentrantUnlock => match st.live_owner(key, now) {
                Some(h) if h.token == ident => {
                    if h.count > 1 {
                        h.count -= 1;
                    } else {
                        st.owners.remove(key);
                    }
                    true
                }
                _ => false,
            },
            ScriptId::ReentrantRenew => {
                let ttl = ttl_arg(args, 1)?;
                match st.live_owner(key, now) {
                    Some(h) if h.token == ident => {
                        h.expires_at = now + ttl;
                        true
                    }
                    _ => false,
                }
            }
            ScriptId::FairLock => {
                let ttl = ttl_arg(args, 1)?;
                let queue_ttl = ttl_arg(args, 2)?;
                let queue = st.live_queue(key, now);
                if !queue.iter().any(|w| w.request_id == ident) {
                    queue.push_back(Waiter {
                        request_id: ident.to_string(),
                        expires_at: now + queue_ttl,
                    });
                }
                let mut head = true;
                for w in queue.iter_mut() {
                    if w.request_id == ident {
                        w.expires_at = now + if head { ttl } else { queue_ttl };
                        break;
                    }
                    head = false;
                }
                head
            }
            ScriptId::FairUnlock => {
                let queue = st.live_queue(key, now);
                let found = queue.iter().position(|w| w.request_id == ident);
                if let Some(pos) = found {
                    queue.remove(pos);
                }
                st.tidy(key);
                found.is_some()
            }
            ScriptId::FairRenew => {
                let ttl = ttl_arg(args, 1)?;
                let queue = st.live_queue(key, now);
                let renewed = match queue.front_mut() {
                    Some(w) if w.request_id == ident => {
                        w.expires_at = now + ttl;
                        true
                    }
                    _ => false,
                };
                st.tidy(key);
                renewed
            }
            ScriptId::ReadLock => {
                let ttl = ttl_arg(args, 1)?;
                if st.live_writer(key, now).is_some_and(|w| w.token != ident) {
                    false
                } else {
                    let r = st
                        .live_readers(key, now)
                        .entry(ident.to_string())
                        .or_insert(Shared {
                            count: 0,
                            expires_at: now,
                        });
                    r.count += 1;
                    r.expires_at = now + ttl;
                    true
                }
            }
            ScriptId::ReadUnlock => {
                let readers = st.live_readers(key, now);
                let released = match readers.get_mut(ident) {
                    Some(r) if r.count > 1 => {
                        r.count -= 1;
                        true
                    }
                    Some(_) => {
                        readers.remove(ident);
                        true
                    }
                    None => false,
                };
                st.tidy(key);
                released
            }
            ScriptId::ReadRenew => {
                let ttl = ttl_arg(args, 1)?;
                let renewed = match st.live_readers(key, now).get_mut(ident) {
                    Some(r) => {
                        r.expires_at = now + ttl;
                        true
                    }
                    None => false,
                };
                st.tidy(key);
                renewed
            }
            ScriptId::WriteLock => {
                let ttl = ttl_arg(args, 1)?;
                let blocked_by_writer = st.live_writer(key, now).is_some_and(|w| w.token != ident);
                let blocked_by_reader = st.live_readers(key, now).keys().any(|t| t != ident);
                st.tidy(key);
                if blocked_by_writer || blocked_by_reader {
                    false
                } else {
                    match st.live_writer(key, now) {
                        Some(w) => {
                            w.count += 1;
                            w.expires_at = now + ttl;
                        }
                        None => {
                            st.writers.insert(key.to_string(), held(ident, now + ttl));
                        }
                    }
                    true
                }
            }
            ScriptId::WriteUnlock => match st.live_writer(key, now) {
                Some(w) if w.token == ident => {
                    if w.count > 1 {
                        w.count -= 1;
                    } else {
                        st.writers.remove(key);
                    }
                    true
                }
                _ => false,
            },
            ScriptId::WriteRenew => {
                let ttl = ttl_arg(args, 1)?;
                match st.live_writer(key, now) {
                    Some(w) if w.token == ident => {
                        w.expires_at = now + ttl;
                        true
                    }
                    _ => false,
                }
            }
        };

        Ok(i64::from(ok))
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn execute(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Arg],
    ) -> anyhow::Result<Reply> {
        if self.take_fault() {
            bail!("injected fault running {}", script.id);
        }

        let key = keys
            .first()
            .with_context(|| format!("{} needs a lock key", script.id))?;
        let v = self.run(script.id, key, args)?;
        trace!("{} key={key} -> {v}", script.id);
        Ok(Reply::Int(v))
    }
}

fn held(token: &str, expires_at: Instant) -> Held {
    Held {
        token: token.to_string(),
        count: 1,
        expires_at,
    }
}

fn str_arg(args: &[Arg], i: usize) -> anyhow::Result<&str> {
    args.get(i)
        .and_then(Arg::as_str)
        .with_context(|| format!("argument {i} must be a string"))
}

fn ttl_arg(args: &[Arg], i: usize) -> anyhow::Result<Duration> {
    match args.get(i).and_then(Arg::as_int) {
        Some(ms) if ms > 0 => Ok(Duration::from_millis(ms as u64)),
        Some(ms) => bail!("argument {i} must be a positive ttl, got {ms}"),
        None => bail!("argument {i} must be a ttl in milliseconds"),
    }
}
