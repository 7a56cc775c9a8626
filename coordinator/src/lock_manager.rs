//! Object lock management for transactions.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info};

use durabletx_common::{Result, TxError, Uid};

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Shared with other readers.
    Read,
    /// Exclusive.
    Write,
}

impl LockMode {
    /// Check whether two modes can be held by different owners at once.
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        *self == LockMode::Read && other == LockMode::Read
    }
}

/// A lock on an object held by a transaction.
#[derive(Debug, Clone)]
pub struct Lock {
    /// The locked object.
    pub object: Uid,
    /// Transaction holding the lock.
    pub owner: Uid,
    /// Current mode.
    pub mode: LockMode,
    /// When the lock was first granted to this owner.
    pub acquired_at: Instant,
}

impl Lock {
    fn new(object: Uid, owner: Uid, mode: LockMode) -> Self {
        Self {
            object,
            owner,
            mode,
            acquired_at: Instant::now(),
        }
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// A new lock was granted.
    Granted,
    /// The owner already held the lock in this mode or stronger.
    AlreadyHeld,
    /// An existing read lock was upgraded to write.
    Upgraded,
}

/// Manager for object locks.
///
/// Locks are owned by transactions. A transaction never conflicts with locks
/// held by its own ancestors, which is what lets a nested action work on
/// objects its parent has locked.
#[derive(Debug, Default)]
pub struct LockManager {
    /// Locks by object.
    locks: Arc<DashMap<Uid, Vec<Lock>>>,
}

impl LockManager {
    /// Create a new lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `object` for `owner`.
    ///
    /// `ancestors` are the owner's enclosing transactions, innermost first.
    pub fn acquire(
        &self,
        object: Uid,
        owner: Uid,
        mode: LockMode,
        ancestors: &[Uid],
    ) -> Result<LockResult> {
        let mut holders = self.locks.entry(object).or_default();

        if let Some(conflict) = holders.iter().find(|lock| {
            lock.owner != owner
                && !ancestors.contains(&lock.owner)
                && !lock.mode.is_compatible_with(mode)
        }) {
            debug!(object = %object, owner = %owner, holder = %conflict.owner, "Lock refused");
            return Err(TxError::LockRefused {
                object,
                holder: conflict.owner,
            });
        }

        if let Some(held) = holders.iter_mut().find(|lock| lock.owner == owner) {
            if held.mode >= mode {
                return Ok(LockResult::AlreadyHeld);
            }
            held.mode = mode;
            info!(object = %object, owner = %owner, "Lock upgraded");
            return Ok(LockResult::Upgraded);
        }

        holders.push(Lock::new(object, owner, mode));
        info!(object = %object, owner = %owner, mode = ?mode, "Lock granted");
        Ok(LockResult::Granted)
    }

    /// Release every lock `owner` holds on `object`.
    pub fn release_all(&self, object: Uid, owner: Uid) -> usize {
        let released = match self.locks.get_mut(&object) {
            Some(mut holders) => {
                let before = holders.len();
                holders.retain(|lock| lock.owner != owner);
                before - holders.len()
            }
            None => 0,
        };
        self.locks.remove_if(&object, |_, holders| holders.is_empty());
        if released > 0 {
            info!(object = %object, owner = %owner, "Lock released");
        }
        released
    }

    /// Hand `from`'s locks on `object` to `to`, keeping the stronger mode if
    /// `to` already holds one.
    pub fn transfer(&self, object: Uid, from: Uid, to: Uid) -> usize {
        let Some(mut holders) = self.locks.get_mut(&object) else {
            return 0;
        };
        let Some(index) = holders.iter().position(|lock| lock.owner == from) else {
            return 0;
        };
        let moved = holders.remove(index);

        match holders.iter_mut().find(|lock| lock.owner == to) {
            Some(existing) => existing.mode = existing.mode.max(moved.mode),
            None => holders.push(Lock {
                owner: to,
                ..moved
            }),
        }
        info!(object = %object, from = %from, to = %to, "Lock transferred");
        1
    }

    /// Get all locks on an object.
    pub fn locks_for_object(&self, object: Uid) -> Vec<Lock> {
        self.locks
            .get(&object)
            .map(|holders| holders.clone())
            .unwrap_or_default()
    }

    /// Get count of held locks.
    pub fn active_lock_count(&self) -> usize {
        self.locks.iter().map(|holders| holders.len()).sum()
    }
}
