use crate::{time::Timestamp, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Answer to one atomic lock operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockReply {
    pub acquired: bool,
    /// The expiry now stored for the key: ours when acquired, the holder's otherwise.
    pub locked_until: Timestamp,
}

impl LockReply {
    pub fn granted(locked_until: Timestamp) -> Self {
        Self {
            acquired: true,
            locked_until,
        }
    }

    pub fn refused(locked_until: Timestamp) -> Self {
        Self {
            acquired: false,
            locked_until,
        }
    }
}

/// A shared store offering the two atomic lease operations.
///
/// Implementations must execute each call as a single atomic step against
/// the stored value. Failing to reach the store is an `Err`, never a refusal.
#[async_trait]
pub trait LeaseStore: Send + Sync + std::fmt::Debug {
    /// Sets `key` to `candidate` when it is unset or its stored expiry is `<= now`.
    async fn get_lock(&self, key: &str, now: Timestamp, candidate: Timestamp) -> Result<LockReply>;

    /// Sets `key` to `candidate` only when its stored expiry equals `token`.
    async fn extend_lock(&self, key: &str, token: Timestamp, candidate: Timestamp) -> Result<LockReply>;
}

/// Process-local store, for tests and for coordinating tasks on a single host.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    data: DashMap<String, Timestamp>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Timestamp> {
        self.data.get(key).map(|v| *v)
    }

    /// Overwrites the stored expiry, bypassing the lock protocol.
    pub fn set(&self, key: &str, locked_until: Timestamp) {
        self.data.insert(key.to_string(), locked_until);
    }

    pub fn remove(&self, key: &str) -> Option<Timestamp> {
        self.data.remove(key).map(|(_, v)| v)
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn get_lock(&self, key: &str, now: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        // The entry holds the shard lock until it is dropped
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let stored = *entry.get();
                if stored <= now {
                    entry.insert(candidate);
                    Ok(LockReply::granted(candidate))
                } else {
                    Ok(LockReply::refused(stored))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(candidate);
                Ok(LockReply::granted(candidate))
            }
        }
    }

    #[allow(clippy::float_cmp)]
    async fn extend_lock(&self, key: &str, token: Timestamp, candidate: Timestamp) -> Result<LockReply> {
        match self.data.get_mut(key) {
            Some(mut stored) if *stored == token => {
                *stored = candidate;
                Ok(LockReply::granted(candidate))
            }
            Some(stored) => Ok(LockReply::refused(*stored)),
            None => Ok(LockReply::refused(Timestamp::EPOCH)),
        }
    }
}
