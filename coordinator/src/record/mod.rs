//! Participant records.
//!
//! Every participant in an action, whatever it wraps, is an [`AbstractRecord`].
//! The action drives records through prepare and commit or abort without
//! knowing their concrete kind; the kind only matters when a record is
//! inserted into a list (equal keys consult the insertion rules) and when it
//! is rebuilt from the log at recovery (its [`RecordType`] selects the
//! factory in the [`RecordTypeRegistry`](crate::registry::RecordTypeRegistry)).

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use durabletx_common::{
    FinishOutcome, InputObjectState, OutputObjectState, PrepareOutcome, RecordType, Result,
    TxError, Uid,
};

pub mod last_resource;
pub mod list;
pub mod lock;
pub mod persistence;
pub mod two_phase;
pub mod unreadable;

pub use last_resource::LastResourceRecord;
pub use list::RecordList;
pub use lock::LockRecord;
pub use persistence::PersistenceRecord;
pub use two_phase::TwoPhaseRecord;
pub use unreadable::UnreadableRecord;

/// A participant in an action.
///
/// `tx` is the uid of the action driving the call. Records that report a
/// heuristic outcome from commit or abort must return the same outcome from
/// [`AbstractRecord::heuristic_outcome`] until it is forgotten.
#[async_trait]
pub trait AbstractRecord: Send + Sync + fmt::Debug {
    /// Identity of this record.
    fn uid(&self) -> Uid;

    /// Sort key within an action's lists.
    fn order(&self) -> Uid;

    fn record_type(&self) -> RecordType;

    async fn top_level_prepare(&mut self, tx: Uid) -> PrepareOutcome;

    async fn top_level_commit(&mut self, tx: Uid) -> FinishOutcome;

    async fn top_level_abort(&mut self, tx: Uid) -> FinishOutcome;

    /// Commit without a separate prepare. `Ok` means committed; `Error` or a
    /// heuristic rollback means the work was rolled back.
    async fn top_level_one_phase_commit(&mut self, tx: Uid) -> FinishOutcome {
        match self.top_level_prepare(tx).await {
            PrepareOutcome::Ok => self.top_level_commit(tx).await,
            PrepareOutcome::ReadOnly => FinishOutcome::Ok,
            PrepareOutcome::NotOk => FinishOutcome::Error,
        }
    }

    fn supports_one_phase(&self) -> bool {
        true
    }

    async fn nested_prepare(&mut self, _tx: Uid) -> PrepareOutcome {
        PrepareOutcome::Ok
    }

    async fn nested_commit(&mut self, _tx: Uid, _parent: Uid) -> FinishOutcome {
        FinishOutcome::Ok
    }

    async fn nested_abort(&mut self, tx: Uid) -> FinishOutcome {
        self.top_level_abort(tx).await
    }

    /// Whether the record writes itself to the transaction log.
    fn does_save(&self) -> bool {
        false
    }

    fn save_state(&self, _os: &mut OutputObjectState) -> Result<()> {
        Ok(())
    }

    fn restore_state(&mut self, _is: &mut InputObjectState) -> Result<()> {
        Ok(())
    }

    /// Move to the parent when a nested action commits.
    fn propagate_on_commit(&self) -> bool {
        true
    }

    /// Move to the parent when a nested action aborts.
    fn propagate_on_abort(&self) -> bool {
        false
    }

    // Insertion rules. Called on the incoming record with the existing record
    // of equal key.

    fn should_add(&self, _existing: &dyn AbstractRecord) -> bool {
        false
    }

    fn should_replace(&self, _existing: &dyn AbstractRecord) -> bool {
        false
    }

    fn should_merge(&self, _existing: &dyn AbstractRecord) -> bool {
        false
    }

    fn should_alter(&self, _existing: &dyn AbstractRecord) -> bool {
        false
    }

    /// Fold `incoming` into this record.
    fn merge(&mut self, _incoming: &dyn AbstractRecord) {}

    /// Adjust this record in light of `incoming`.
    fn alter(&mut self, _incoming: &dyn AbstractRecord) {}

    /// Discard a reported heuristic. Returns `false` if it must be retried.
    async fn forget_heuristic(&mut self, _tx: Uid) -> bool {
        true
    }

    /// The last heuristic outcome this record reported, if not yet forgotten.
    fn heuristic_outcome(&self) -> Option<FinishOutcome> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Persist an optional heuristic outcome.
pub(crate) fn pack_heuristic(os: &mut OutputObjectState, outcome: Option<FinishOutcome>) {
    os.pack_i32(outcome.map(|o| o.code()).unwrap_or(-1));
}

pub(crate) fn unpack_heuristic(is: &mut InputObjectState) -> Result<Option<FinishOutcome>> {
    match is.unpack_i32()? {
        -1 => Ok(None),
        code => FinishOutcome::from_code(code)
            .map(Some)
            .ok_or_else(|| TxError::corrupt(format!("unknown finish outcome {code}"))),
    }
}

/// Compare two records by list key.
pub(crate) fn key_of(record: &dyn AbstractRecord) -> (Uid, RecordType) {
    (record.order(), record.record_type())
}

#[cfg(test)]
pub(crate) mod testing {
    //! A configurable record for exercising lists and actions.

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    pub struct Calls {
        pub prepare: AtomicU32,
        pub commit: AtomicU32,
        pub abort: AtomicU32,
        pub one_phase: AtomicU32,
        pub forget: AtomicU32,
    }

    impl Calls {
        pub fn get(counter: &AtomicU32) -> u32 {
            counter.load(Ordering::SeqCst)
        }
    }

    #[derive(Debug)]
    pub struct TestRecord {
        pub uid: Uid,
        pub order: Uid,
        pub record_type: RecordType,
        pub vote: PrepareOutcome,
        pub finish: FinishOutcome,
        pub replace: bool,
        pub merge: bool,
        pub alter: bool,
        pub add: bool,
        pub merged: u32,
        pub altered: u32,
        pub heuristic: Option<FinishOutcome>,
        pub calls: Arc<Calls>,
    }

    impl TestRecord {
        pub fn new() -> Self {
            let uid = Uid::new();
            Self {
                uid,
                order: uid,
                record_type: RecordType(99),
                vote: PrepareOutcome::Ok,
                finish: FinishOutcome::Ok,
                replace: false,
                merge: false,
                alter: false,
                add: false,
                merged: 0,
                altered: 0,
                heuristic: None,
                calls: Arc::new(Calls::default()),
            }
        }

        pub fn with_order(mut self, order: Uid) -> Self {
            self.order = order;
            self
        }

        pub fn with_vote(mut self, vote: PrepareOutcome) -> Self {
            self.vote = vote;
            self
        }

        pub fn with_finish(mut self, finish: FinishOutcome) -> Self {
            self.finish = finish;
            self
        }

        fn finish(&mut self) -> FinishOutcome {
            if self.finish.is_heuristic() {
                self.heuristic = Some(self.finish);
            }
            self.finish
        }
    }

    #[async_trait]
    impl AbstractRecord for TestRecord {
        fn uid(&self) -> Uid {
            self.uid
        }

        fn order(&self) -> Uid {
            self.order
        }

        fn record_type(&self) -> RecordType {
            self.record_type
        }

        async fn top_level_prepare(&mut self, _tx: Uid) -> PrepareOutcome {
            self.calls.prepare.fetch_add(1, Ordering::SeqCst);
            self.vote
        }

        async fn top_level_commit(&mut self, _tx: Uid) -> FinishOutcome {
            self.calls.commit.fetch_add(1, Ordering::SeqCst);
            self.finish()
        }

        async fn top_level_abort(&mut self, _tx: Uid) -> FinishOutcome {
            self.calls.abort.fetch_add(1, Ordering::SeqCst);
            self.finish()
        }

        async fn top_level_one_phase_commit(&mut self, _tx: Uid) -> FinishOutcome {
            self.calls.one_phase.fetch_add(1, Ordering::SeqCst);
            self.finish()
        }

        fn should_add(&self, _existing: &dyn AbstractRecord) -> bool {
            self.add
        }

        fn should_replace(&self, _existing: &dyn AbstractRecord) -> bool {
            self.replace
        }

        fn should_merge(&self, _existing: &dyn AbstractRecord) -> bool {
            self.merge
        }

        fn should_alter(&self, _existing: &dyn AbstractRecord) -> bool {
            self.alter
        }

        fn merge(&mut self, _incoming: &dyn AbstractRecord) {
            self.merged += 1;
        }

        fn alter(&mut self, _incoming: &dyn AbstractRecord) {
            self.altered += 1;
        }

        async fn forget_heuristic(&mut self, _tx: Uid) -> bool {
            self.calls.forget.fetch_add(1, Ordering::SeqCst);
            self.heuristic = None;
            true
        }

        fn heuristic_outcome(&self) -> Option<FinishOutcome> {
            self.heuristic
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}
