// Lease gateway - turns timing decisions into store calls and typed lock states

use crate::{
    lock::{HeldLease, LockState},
    store::{LeaseStore, LockReply},
    time::LeaseTimer,
    Error, Result,
};
use std::future::Future;
use std::sync::Arc;

/// Issues acquire and renew attempts for one lock key.
#[derive(Debug, Clone)]
pub struct LeaseGateway {
    /// Lock key in the shared store
    key: String,

    /// Deadlines for every proposal
    timer: LeaseTimer,

    store: Arc<dyn LeaseStore>,
}

impl LeaseGateway {
    pub fn new(key: impl Into<String>, timer: LeaseTimer, store: Arc<dyn LeaseStore>) -> Self {
        Self {
            key: key.into(),
            timer,
            store,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timer(&self) -> &LeaseTimer {
        &self.timer
    }

    /// Tries to take the key, succeeding only if it is free or its lease has lapsed.
    ///
    /// Store failures come back as `Err`; a refusal is `Ok(LockState::NotHeld)`.
    pub async fn acquire(&self) -> Result<LockState> {
        let now = self.timer.now();
        let candidate = self.timer.deadline_from(now);

        let reply = self
            .bounded(self.store.get_lock(&self.key, now, candidate))
            .await?;
        Ok(reply.into())
    }

    /// Pushes the expiry of a lease we hold forward.
    ///
    /// Returns `NotHeld` if anyone took the key since `lease` was granted.
    pub async fn renew(&self, lease: &HeldLease) -> Result<LockState> {
        let candidate = self.timer.next_renewal_deadline();

        let reply = self
            .bounded(self.store.extend_lock(&self.key, lease.expiry(), candidate))
            .await?;
        Ok(reply.into())
    }

    // A call that outlives the store timeout counts as a store failure
    async fn bounded(&self, call: impl Future<Output = Result<LockReply>>) -> Result<LockReply> {
        tokio::time::timeout(self.timer.store_timeout(), call)
            .await
            .map_err(|elapsed| Error::store(&self.key, elapsed))?
    }
}
