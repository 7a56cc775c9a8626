//! Record releasing object locks when an action ends.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use durabletx_common::{FinishOutcome, PrepareOutcome, RecordType, Uid};

use super::AbstractRecord;
use crate::lock_manager::{LockManager, LockMode};

/// Holds an action's locks on one object until the action ends.
///
/// A cadaver record stands in for an object that went out of scope before
/// its action ended. It replaces the live record for the same object and
/// still releases the locks at the end.
#[derive(Debug)]
pub struct LockRecord {
    uid: Uid,
    object: Uid,
    mode: LockMode,
    cadaver: bool,
    locks: Arc<LockManager>,
}

impl LockRecord {
    pub fn new(object: Uid, mode: LockMode, locks: Arc<LockManager>) -> Self {
        Self {
            uid: Uid::new(),
            object,
            mode,
            cadaver: false,
            locks,
        }
    }

    pub fn cadaver(object: Uid, mode: LockMode, locks: Arc<LockManager>) -> Self {
        Self {
            cadaver: true,
            ..Self::new(object, mode, locks)
        }
    }

    pub fn object(&self) -> Uid {
        self.object
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_cadaver(&self) -> bool {
        self.cadaver
    }

    fn other(existing: &dyn AbstractRecord) -> Option<&LockRecord> {
        existing.as_any().downcast_ref::<LockRecord>()
    }

    fn release(&self, tx: Uid) -> FinishOutcome {
        self.locks.release_all(self.object, tx);
        FinishOutcome::Ok
    }
}

#[async_trait]
impl AbstractRecord for LockRecord {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn order(&self) -> Uid {
        self.object
    }

    fn record_type(&self) -> RecordType {
        RecordType::LOCK
    }

    async fn top_level_prepare(&mut self, _tx: Uid) -> PrepareOutcome {
        match self.mode {
            LockMode::Write => PrepareOutcome::Ok,
            LockMode::Read => PrepareOutcome::ReadOnly,
        }
    }

    async fn top_level_commit(&mut self, tx: Uid) -> FinishOutcome {
        self.release(tx)
    }

    async fn top_level_abort(&mut self, tx: Uid) -> FinishOutcome {
        self.release(tx)
    }

    async fn top_level_one_phase_commit(&mut self, tx: Uid) -> FinishOutcome {
        self.release(tx)
    }

    async fn nested_commit(&mut self, tx: Uid, parent: Uid) -> FinishOutcome {
        self.locks.transfer(self.object, tx, parent);
        FinishOutcome::Ok
    }

    async fn nested_abort(&mut self, tx: Uid) -> FinishOutcome {
        self.release(tx)
    }

    fn should_replace(&self, existing: &dyn AbstractRecord) -> bool {
        self.cadaver && Self::other(existing).is_some_and(|lock| !lock.cadaver)
    }

    fn should_merge(&self, existing: &dyn AbstractRecord) -> bool {
        Self::other(existing).is_some()
    }

    fn merge(&mut self, incoming: &dyn AbstractRecord) {
        if let Some(other) = Self::other(incoming) {
            self.mode = self.mode.max(other.mode);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordList;
    use durabletx_common::AddOutcome;

    #[tokio::test]
    async fn test_commit_releases_locks() {
        let locks = Arc::new(LockManager::new());
        let object = Uid::new();
        let tx = Uid::new();
        locks.acquire(object, tx, LockMode::Write, &[]).unwrap();

        let mut record = LockRecord::new(object, LockMode::Write, locks.clone());
        assert_eq!(record.top_level_prepare(tx).await, PrepareOutcome::Ok);
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(locks.active_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_read_lock_is_read_only() {
        let locks = Arc::new(LockManager::new());
        let mut record = LockRecord::new(Uid::new(), LockMode::Read, locks);
        assert_eq!(
            record.top_level_prepare(Uid::new()).await,
            PrepareOutcome::ReadOnly
        );
    }

    #[tokio::test]
    async fn test_nested_commit_transfers_to_parent() {
        let locks = Arc::new(LockManager::new());
        let object = Uid::new();
        let parent = Uid::new();
        let child = Uid::new();
        locks.acquire(object, child, LockMode::Write, &[parent]).unwrap();

        let mut record = LockRecord::new(object, LockMode::Write, locks.clone());
        record.nested_commit(child, parent).await;
        assert_eq!(locks.locks_for_object(object)[0].owner, parent);

        record.top_level_abort(parent).await;
        assert_eq!(locks.active_lock_count(), 0);
    }

    #[test]
    fn test_cadaver_replaces_live_record() {
        let locks = Arc::new(LockManager::new());
        let object = Uid::new();
        let mut list = RecordList::new();

        list.insert(Box::new(LockRecord::new(object, LockMode::Read, locks.clone())));
        assert_eq!(
            list.insert(Box::new(LockRecord::new(object, LockMode::Write, locks.clone()))),
            AddOutcome::Ok
        );
        assert_eq!(list.len(), 1);

        let cadaver = LockRecord::cadaver(object, LockMode::Read, locks);
        let cadaver_uid = cadaver.uid();
        assert_eq!(list.insert(Box::new(cadaver)), AddOutcome::Ok);

        let kept = list
            .iter()
            .next()
            .and_then(|r| r.as_any().downcast_ref::<LockRecord>())
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(kept.uid(), cadaver_uid);
        assert!(kept.is_cadaver());
    }

    #[test]
    fn test_merge_upgrades_mode() {
        let locks = Arc::new(LockManager::new());
        let object = Uid::new();
        let mut list = RecordList::new();

        list.insert(Box::new(LockRecord::new(object, LockMode::Read, locks.clone())));
        list.insert(Box::new(LockRecord::new(object, LockMode::Write, locks)));

        let kept = list
            .iter()
            .next()
            .and_then(|r| r.as_any().downcast_ref::<LockRecord>())
            .unwrap();
        assert_eq!(kept.mode(), LockMode::Write);
    }
}
