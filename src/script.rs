use std::fmt;

/// Identifies one atomic operation of the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptId {
    ReentrantLock,
    ReentrantUnlock,
    ReentrantRenew,
    FairLock,
    FairUnlock,
    FairRenew,
    ReadLock,
    ReadUnlock,
    ReadRenew,
    WriteLock,
    WriteUnlock,
    WriteRenew,
}

impl ScriptId {
    pub fn name(self) -> &'static str {
        match self {
            ScriptId::ReentrantLock => "reentrant_lock",
            ScriptId::ReentrantUnlock => "reentrant_unlock",
            ScriptId::ReentrantRenew => "reentrant_renew",
            ScriptId::FairLock => "fair_lock",
            ScriptId::FairUnlock => "fair_unlock",
            ScriptId::FairRenew => "fair_renew",
            ScriptId::ReadLock => "read_lock",
            ScriptId::ReadUnlock => "read_unlock",
            ScriptId::ReadRenew => "read_renew",
            ScriptId::WriteLock => "write_lock",
            ScriptId::WriteUnlock => "write_unlock",
            ScriptId::WriteRenew => "write_renew",
        }
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An embedded Lua body together with its catalogue id.
///
/// Every script takes the lock key as `KEYS[1]` and builds its derived keys
/// (`:count:<token>`, `:queue`, `:readers`, `:writer`, ...) by suffixing it.
/// Those keys are undeclared, so on a cluster they only land in the same slot
/// because the handle passes a hash-tagged key (see [`RedisLock::store_key`]).
///
/// [`RedisLock::store_key`]: crate::RedisLock::store_key
#[derive(Debug, PartialEq, Eq)]
pub struct Script {
    pub id: ScriptId,
    pub body: &'static str,
}

pub static REENTRANT_LOCK: Script = Script {
    id: ScriptId::ReentrantLock,
    body: include_str!("../lua/reentrant_lock.lua"),
};

pub static REENTRANT_UNLOCK: Script = Script {
    id: ScriptId::ReentrantUnlock,
    body: include_str!("../lua/reentrant_unlock.lua"),
};

pub static REENTRANT_RENEW: Script = Script {
    id: ScriptId::ReentrantRenew,
    body: include_str!("../lua/reentrant_renew.lua"),
};

pub static FAIR_LOCK: Script = Script {
    id: ScriptId::FairLock,
    body: include_str!("../lua/fair_lock.lua"),
};

pub static FAIR_UNLOCK: Script = Script {
    id: ScriptId::FairUnlock,
    body: include_str!("../lua/fair_unlock.lua"),
};

pub static FAIR_RENEW: Script = Script {
    id: ScriptId::FairRenew,
    body: include_str!("../lua/fair_renew.lua"),
};

pub static READ_LOCK: Script = Script {
    id: ScriptId::ReadLock,
    body: include_str!("../lua/read_lock.lua"),
};

pub static READ_UNLOCK: Script = Script {
    id: ScriptId::ReadUnlock,
    body: include_str!("../lua/read_unlock.lua"),
};

pub static READ_RENEW: Script = Script {
    id: ScriptId::ReadRenew,
    body: include_str!("../lua/read_renew.lua"),
};

pub static WRITE_LOCK: Script = Script {
    id: ScriptId::WriteLock,
    body: include_str!("../lua/write_lock.lua"),
};

pub static WRITE_UNLOCK: Script = Script {
    id: ScriptId::WriteUnlock,
    body: include_str!("../lua/write_unlock.lua"),
};

pub static WRITE_RENEW: Script = Script {
    id: ScriptId::WriteRenew,
    body: include_str!("../lua/write_renew.lua"),
};

impl Script {
    /// All scripts, in catalogue order. Adapters use this to preload.
    pub fn catalogue() -> [&'static Script; 12] {
        [
            &REENTRANT_LOCK,
            &REENTRANT_UNLOCK,
            &REENTRANT_RENEW,
            &FAIR_LOCK,
            &FAIR_UNLOCK,
            &FAIR_RENEW,
            &READ_LOCK,
            &READ_UNLOCK,
            &READ_RENEW,
            &WRITE_LOCK,
            &WRITE_UNLOCK,
            &WRITE_RENEW,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalogue_is_complete_and_distinct() {
        let all = Script::catalogue();
        let ids: HashSet<ScriptId> = all.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), all.len());
        let bodies: HashSet<&str> = all.iter().map(|s| s.body).collect();
        assert_eq!(bodies.len(), all.len());
    }

    #[test]
    fn bodies_use_millisecond_ttls() {
        for s in Script::catalogue() {
            assert!(s.body.contains("KEYS[1]"), "{} must address KEYS[1]", s.id);
            assert!(!s.body.contains("'EX'"), "{} must not use second TTLs", s.id);
            assert!(!s.body.contains("'EXPIRE'"), "{} must not use second TTLs", s.id);
        }
    }
}
