use std::time::Duration;

/// Failure classes surfaced by every lock operation.
///
/// `Store` is a fault of the backing store itself; every other variant means the
/// script ran and reported a condition that was not met.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("script execution exception: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("lock acquisition failed")]
    LockFailed,

    #[error("lock release failed: not held by this owner")]
    UnlockFailed,

    #[error("lock renewal failed: not held by this owner")]
    RenewFailed,

    #[error("spin lock timed out after {0:?}")]
    SpinLockTimeout(Duration),

    #[error("spin lock cancelled")]
    SpinLockCancelled,

    #[error("unexpected reply from {script}: {reply}")]
    UnexpectedReply { script: &'static str, reply: String },

    #[error("invalid lock configuration: {0}")]
    InvalidConfig(&'static str),
}

impl Error {
    /// True for outcomes the spin coordinator is allowed to retry.
    pub fn is_contended(&self) -> bool {
        matches!(self, Error::LockFailed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_failed_is_contended() {
        assert!(Error::LockFailed.is_contended());
        assert!(!Error::UnlockFailed.is_contended());
        assert!(!Error::SpinLockCancelled.is_contended());
        assert!(!Error::Store(anyhow::anyhow!("connection reset")).is_contended());
    }

    #[test]
    fn store_error_keeps_cause_chain() {
        let err = Error::Store(anyhow::anyhow!("io timeout").context("EVALSHA"));
        assert_eq!(err.to_string(), "script execution exception: EVALSHA: io timeout");
    }
}
