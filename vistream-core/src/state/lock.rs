//! Single-owner control lock.
//!
//! ```text
//!  Unlocked ──try_lock(s)──► Locked(s)
//!     ▲                          │
//!     └──────unlock(s)───────────┘    unlock(other) is a no-op
//! ```
//!
//! The owner lives in one atomic word; `0` means unlocked, which is
//! why session ids start at 1.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::stream::hub::SessionId;

const UNLOCKED: u64 = 0;

/// Who may send input to an app.
#[derive(Debug, Default)]
pub struct ControlLock {
    owner: AtomicU64,
}

impl ControlLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if nobody holds it.
    ///
    /// Re-locking by the current owner fails like any other attempt on
    /// a held lock.
    pub fn try_lock(&self, session: SessionId) -> bool {
        if session == UNLOCKED {
            return false;
        }
        self.owner
            .compare_exchange(UNLOCKED, session, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the lock. Only the owner can.
    pub fn unlock(&self, session: SessionId) -> bool {
        if session == UNLOCKED {
            return false;
        }
        self.owner
            .compare_exchange(session, UNLOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_controller(&self, session: SessionId) -> bool {
        session != UNLOCKED && self.owner.load(Ordering::Acquire) == session
    }

    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Acquire) != UNLOCKED
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<SessionId> {
        match self.owner.load(Ordering::Acquire) {
            UNLOCKED => None,
            id => Some(id),
        }
    }
}
