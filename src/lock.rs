// Outcome of a single acquire or renew attempt

use crate::{store::LockReply, time::Timestamp};

/// Result of one lease operation. Immutable; the next attempt supersedes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LockState {
    /// Someone else holds the key until `competitor_expiry`
    NotHeld { competitor_expiry: Timestamp },
    /// We hold the key
    Held(HeldLease),
}

/// Proof of holding a lock key.
///
/// The expiry we last stored doubles as the compare token for the next
/// renewal: whoever can extend that exact value is the holder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldLease {
    expiry: Timestamp,
}

impl HeldLease {
    pub(crate) fn new(expiry: Timestamp) -> Self {
        Self { expiry }
    }

    pub fn expiry(&self) -> Timestamp {
        self.expiry
    }
}

impl LockState {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockState::Held(_))
    }

    /// Expiry currently stored for the key, whoever holds it.
    pub fn locked_until(&self) -> Timestamp {
        match self {
            LockState::NotHeld { competitor_expiry } => *competitor_expiry,
            LockState::Held(lease) => lease.expiry,
        }
    }

    pub fn held(self) -> Option<HeldLease> {
        match self {
            LockState::Held(lease) => Some(lease),
            LockState::NotHeld { .. } => None,
        }
    }
}

impl From<LockReply> for LockState {
    fn from(reply: LockReply) -> Self {
        if reply.acquired {
            LockState::Held(HeldLease::new(reply.locked_until))
        } else {
            LockState::NotHeld {
                competitor_expiry: reply.locked_until,
            }
        }
    }
}
