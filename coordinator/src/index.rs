//! Index of transactions known to this process.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use durabletx_common::{Result, Uid};
use durabletx_store::{ObjectStore, StoreState};

use crate::action::ACTION_TYPE;

/// Where a transaction currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Being driven by an application context in this process.
    Live,
    /// Being replayed by the recovery manager.
    Recovering,
    /// Logged in the store but not active in this process.
    Ghost,
    /// Neither live nor logged.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Live,
    Recovering,
}

/// Tracks which transactions are live or under recovery.
///
/// Registering a live transaction and claiming one for recovery are mutually
/// exclusive, so recovery never replays a transaction an application is
/// still driving.
#[derive(Debug)]
pub struct TransactionIndex {
    slots: Arc<DashMap<Uid, Slot>>,
    store: Arc<dyn ObjectStore>,
}

impl TransactionIndex {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            store,
        }
    }

    /// Mark `uid` live. Returns `false` if it is already live or recovering.
    pub fn register_live(&self, uid: Uid) -> bool {
        match self.slots.entry(uid) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Slot::Live);
                true
            }
        }
    }

    /// Forget a live transaction once it has ended.
    pub fn release_live(&self, uid: Uid) {
        self.slots.remove_if(&uid, |_, slot| *slot == Slot::Live);
    }

    /// Claim `uid` for recovery. The claim is held until the returned guard
    /// is dropped.
    pub fn claim_for_recovery(&self, uid: Uid) -> Option<RecoveryClaim> {
        match self.slots.entry(uid) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Slot::Recovering);
                Some(RecoveryClaim {
                    uid,
                    slots: Arc::clone(&self.slots),
                })
            }
        }
    }

    pub fn is_live(&self, uid: Uid) -> bool {
        self.slots
            .get(&uid)
            .is_some_and(|slot| *slot == Slot::Live)
    }

    /// Classify a transaction.
    pub fn lookup(&self, uid: Uid) -> Result<TxState> {
        if let Some(slot) = self.slots.get(&uid) {
            return Ok(match *slot {
                Slot::Live => TxState::Live,
                Slot::Recovering => TxState::Recovering,
            });
        }
        let state = match self.store.current_state(uid, ACTION_TYPE)? {
            StoreState::Unknown => TxState::Unknown,
            _ => TxState::Ghost,
        };
        Ok(state)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| *s.value() == Slot::Live).count()
    }
}

/// Exclusive recovery claim on a transaction.
#[derive(Debug)]
pub struct RecoveryClaim {
    uid: Uid,
    slots: Arc<DashMap<Uid, Slot>>,
}

impl RecoveryClaim {
    pub fn uid(&self) -> Uid {
        self.uid
    }
}

impl Drop for RecoveryClaim {
    fn drop(&mut self) {
        self.slots
            .remove_if(&self.uid, |_, slot| *slot == Slot::Recovering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durabletx_common::OutputObjectState;
    use durabletx_store::{StateKind, VolatileObjectStore};

    fn create_test_index() -> (TransactionIndex, Arc<VolatileObjectStore>) {
        let store = Arc::new(VolatileObjectStore::new());
        (TransactionIndex::new(store.clone()), store)
    }

    #[test]
    fn test_live_and_recovery_are_exclusive() {
        let (index, _) = create_test_index();
        let uid = Uid::new();

        assert!(index.register_live(uid));
        assert!(!index.register_live(uid));
        assert!(index.claim_for_recovery(uid).is_none());

        index.release_live(uid);
        let claim = index.claim_for_recovery(uid).unwrap();
        assert_eq!(claim.uid(), uid);
        assert!(!index.register_live(uid));
        assert_eq!(index.lookup(uid).unwrap(), TxState::Recovering);

        drop(claim);
        assert!(index.register_live(uid));
    }

    #[test]
    fn test_lookup_ghost_and_unknown() {
        let (index, store) = create_test_index();
        let uid = Uid::new();
        assert_eq!(index.lookup(uid).unwrap(), TxState::Unknown);

        let mut os = OutputObjectState::new(uid, ACTION_TYPE);
        os.pack_i32(1);
        store.write(uid, ACTION_TYPE, &os, StateKind::Committed).unwrap();
        assert_eq!(index.lookup(uid).unwrap(), TxState::Ghost);

        index.register_live(uid);
        assert_eq!(index.lookup(uid).unwrap(), TxState::Live);
        assert_eq!(index.live_count(), 1);
    }
}
