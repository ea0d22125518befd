use crate::script::Script;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Positional script argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
}

impl Arg {
    pub fn millis(d: Duration) -> Arg {
        Arg::Int(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            Arg::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(i) => Some(*i),
            Arg::Str(s) => s.parse().ok(),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

/// Scalar result of a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Int(i64),
    Str(String),
    Nil,
}

impl Reply {
    /// Success code shared by the whole catalogue: integer 1, or the
    /// `OK` status older script bodies return.
    pub fn is_ok(&self) -> bool {
        match self {
            Reply::Int(v) => *v == 1,
            Reply::Str(s) => s == "OK" || s == "1",
            Reply::Nil => false,
        }
    }

    /// The "condition not met" sentinel.
    pub fn is_sentinel(&self) -> bool {
        match self {
            Reply::Int(v) => *v == 0,
            Reply::Str(s) => s == "0",
            Reply::Nil => true,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Int(v) => write!(f, "{v}"),
            Reply::Str(s) => write!(f, "{s:?}"),
            Reply::Nil => f.write_str("nil"),
        }
    }
}

/// The one capability the lock engine needs from its backing store: run a
/// catalogue script atomically against `keys` and `args`.
///
/// Implementations must be safe for concurrent use; a single instance is
/// normally shared by every handle in the process.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn execute(&self, script: &Script, keys: &[String], args: &[Arg])
    -> anyhow::Result<Reply>;
}

#[async_trait]
impl<S: ScriptStore + ?Sized> ScriptStore for Arc<S> {
    async fn execute(
        &self,
        script: &Script,
        keys: &[String],
        args: &[Arg],
    ) -> anyhow::Result<Reply> {
        (**self).execute(script, keys, args).await
    }
}
