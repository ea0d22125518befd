use crate::script::{Script, ScriptId};
use crate::store::{Arg, Reply, ScriptStore};
use anyhow::{Context, bail};
use async_trait::async_trait;
use log::*;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

/// [`ScriptStore`] over a Redis server.
///
/// Scripts are sent by SHA1 and loaded on the first `NOSCRIPT` reply. The
/// connection manager reconnects on its own and is cheap to clone, so one
/// `RedisStore` can back every handle in a process.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    scripts: HashMap<ScriptId, redis::Script>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<RedisStore> {
        let client = redis::Client::open(url).with_context(|| format!("bad redis url {url}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("connect to {url}"))?;
        info!("connected to redis at {url}");
        Ok(RedisStore::with_connection(conn))
    }

    pub fn with_connection(conn: ConnectionManager) -> RedisStore {
        let scripts = Script::catalogue()
            .into_iter()
            .map(|s| (s.id, redis::Script::new(s.body)))
            .collect();
        RedisStore { conn, scripts }
    }
}

#[async_trait]
impl ScriptStore for RedisStore {
    async fn execute(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Arg],
    ) -> anyhow::Result<Reply> {
        let prepared = self
            .scripts
            .get(&script.id)
            .with_context(|| format!("{} is not in the catalogue", script.id))?;

        let mut invocation = prepared.prepare_invoke();
        for k in keys {
            invocation.key(k.as_str());
        }
        for a in args {
            match a {
                Arg::Str(s) => {
                    invocation.arg(s.as_str());
                }
                Arg::Int(i) => {
                    invocation.arg(*i);
                }
            }
        }

        let mut conn = self.conn.clone();
        let value: redis::Value = invocation
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("run {}", script.id))?;

        match value {
            redis::Value::Nil => Ok(Reply::Nil),
            redis::Value::Int(i) => Ok(Reply::Int(i)),
            redis::Value::Okay => Ok(Reply::Str("OK".to_string())),
            redis::Value::SimpleString(s) => Ok(Reply::Str(s)),
            redis::Value::BulkString(b) => Ok(Reply::Str(String::from_utf8_lossy(&b).into_owned())),
            other => bail!("{} returned a non-scalar reply: {other:?}", script.id),
        }
    }
}
