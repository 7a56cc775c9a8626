//! Record making an object's new state durable as part of commit.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use durabletx_common::{
    FinishOutcome, InputObjectState, OutputObjectState, PrepareOutcome, RecordType, Result, Uid,
};
use durabletx_store::{ObjectStore, StateKind, StoreState};

use super::{pack_heuristic, unpack_heuristic, AbstractRecord};

/// Writes an object's state to the object store when its action commits.
///
/// States larger than the abbreviated threshold are written as a shadow at
/// prepare and only the shadow's location goes into the transaction log;
/// commit then promotes the shadow. Smaller states travel inside the log and
/// are written committed at commit time.
#[derive(Debug)]
pub struct PersistenceRecord {
    uid: Uid,
    object: Uid,
    type_name: String,
    state: Option<OutputObjectState>,
    shadowed: bool,
    threshold: usize,
    store: Arc<dyn ObjectStore>,
    heuristic: Option<FinishOutcome>,
}

impl PersistenceRecord {
    /// Record that `state` is the new committed state of `state.uid()`.
    pub fn new(state: OutputObjectState, store: Arc<dyn ObjectStore>, threshold: usize) -> Self {
        Self {
            uid: Uid::new(),
            object: state.uid(),
            type_name: state.type_name().to_string(),
            state: Some(state),
            shadowed: false,
            threshold,
            store,
            heuristic: None,
        }
    }

    /// An empty record to be filled by `restore_state`.
    pub fn for_recovery(store: Arc<dyn ObjectStore>, threshold: usize) -> Self {
        Self {
            uid: Uid::nil(),
            object: Uid::nil(),
            type_name: String::new(),
            state: None,
            shadowed: false,
            threshold,
            store,
            heuristic: None,
        }
    }

    pub fn object(&self) -> Uid {
        self.object
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether the state was written ahead as a shadow.
    pub fn is_shadowed(&self) -> bool {
        self.shadowed
    }

    fn hazard(&mut self, what: &str, detail: &dyn std::fmt::Display) -> FinishOutcome {
        error!(object = %self.object, type_name = %self.type_name, error = %detail, "{what} failed");
        self.heuristic = Some(FinishOutcome::HeuristicHazard);
        FinishOutcome::HeuristicHazard
    }

    /// Promote the shadow. A missing shadow with a committed copy present
    /// means an earlier attempt already promoted it.
    fn promote(&mut self) -> FinishOutcome {
        match self.store.commit(self.object, &self.type_name) {
            Ok(true) => FinishOutcome::Ok,
            Ok(false) => match self.store.current_state(self.object, &self.type_name) {
                Ok(StoreState::Committed) => {
                    debug!(object = %self.object, "Shadow already promoted");
                    FinishOutcome::Ok
                }
                Ok(other) => self.hazard("Shadow promotion", &format!("no shadow, store holds {other:?}")),
                Err(e) => self.hazard("Shadow promotion", &e),
            },
            Err(e) => self.hazard("Shadow promotion", &e),
        }
    }

    fn write_committed(&mut self) -> FinishOutcome {
        let Some(state) = self.state.as_ref() else {
            return self.hazard("Commit", &"no state held");
        };
        match self
            .store
            .write(self.object, &self.type_name, state, StateKind::Committed)
        {
            Ok(true) => FinishOutcome::Ok,
            Ok(false) => self.hazard("Commit", &"committed state is hidden"),
            Err(e) => self.hazard("Commit", &e),
        }
    }
}

#[async_trait]
impl AbstractRecord for PersistenceRecord {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn order(&self) -> Uid {
        self.object
    }

    fn record_type(&self) -> RecordType {
        RecordType::PERSISTENCE
    }

    async fn top_level_prepare(&mut self, tx: Uid) -> PrepareOutcome {
        let Some(state) = self.state.as_ref() else {
            return PrepareOutcome::NotOk;
        };
        if state.size() <= self.threshold {
            return PrepareOutcome::Ok;
        }
        match self
            .store
            .write(self.object, &self.type_name, state, StateKind::Shadow)
        {
            Ok(_) => {
                debug!(tx = %tx, object = %self.object, bytes = state.size(), "State shadowed");
                self.shadowed = true;
                self.state = None;
                PrepareOutcome::Ok
            }
            Err(e) => {
                warn!(tx = %tx, object = %self.object, error = %e, "Shadow write failed");
                PrepareOutcome::NotOk
            }
        }
    }

    async fn top_level_commit(&mut self, _tx: Uid) -> FinishOutcome {
        if self.shadowed {
            self.promote()
        } else {
            self.write_committed()
        }
    }

    async fn top_level_abort(&mut self, _tx: Uid) -> FinishOutcome {
        if !self.shadowed {
            self.state = None;
            return FinishOutcome::Ok;
        }
        match self
            .store
            .remove(self.object, &self.type_name, StateKind::Shadow)
        {
            Ok(_) => FinishOutcome::Ok,
            Err(e) => self.hazard("Shadow removal", &e),
        }
    }

    async fn nested_abort(&mut self, _tx: Uid) -> FinishOutcome {
        self.state = None;
        FinishOutcome::Ok
    }

    fn does_save(&self) -> bool {
        true
    }

    fn save_state(&self, os: &mut OutputObjectState) -> Result<()> {
        os.pack_uid(&self.uid);
        os.pack_uid(&self.object);
        os.pack_string(&self.type_name)?;
        os.pack_bool(self.shadowed);
        pack_heuristic(os, self.heuristic);
        match &self.state {
            Some(state) => {
                os.pack_bool(true);
                os.pack_state(state)?;
            }
            None => os.pack_bool(false),
        }
        Ok(())
    }

    fn restore_state(&mut self, is: &mut InputObjectState) -> Result<()> {
        self.uid = is.unpack_uid()?;
        self.object = is.unpack_uid()?;
        self.type_name = is.unpack_string()?;
        self.shadowed = is.unpack_bool()?;
        self.heuristic = unpack_heuristic(is)?;
        self.state = if is.unpack_bool()? {
            Some(is.unpack_state()?.into_output())
        } else {
            None
        };
        Ok(())
    }

    /// A newer state for the same object supersedes the older one.
    fn should_replace(&self, _existing: &dyn AbstractRecord) -> bool {
        true
    }

    async fn forget_heuristic(&mut self, _tx: Uid) -> bool {
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

#[cfg(test)]
mod tests {
    use super::*;
    use durabletx_store::VolatileObjectStore;

    const TYPE: &str = "/App/Account";

    fn account(object: Uid, balance: i64, padding: usize) -> OutputObjectState {
        let mut os = OutputObjectState::new(object, TYPE);
        os.pack_i64(balance);
        os.pack_bytes(&vec![0u8; padding]).unwrap();
        os
    }

    fn balance(store: &VolatileObjectStore, object: Uid) -> Option<i64> {
        store
            .read(object, TYPE)
            .unwrap()
            .map(|mut is| is.unpack_i64().unwrap())
    }

    #[tokio::test]
    async fn test_small_state_written_at_commit() {
        let store = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let tx = Uid::new();
        let mut record = PersistenceRecord::new(account(object, 10, 0), store.clone(), 1024);

        assert_eq!(record.top_level_prepare(tx).await, PrepareOutcome::Ok);
        assert!(!record.is_shadowed());
        assert_eq!(balance(&store, object), None);

        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(balance(&store, object), Some(10));
    }

    #[tokio::test]
    async fn test_large_state_shadowed_at_prepare() {
        let store = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let tx = Uid::new();
        let mut record = PersistenceRecord::new(account(object, 20, 256), store.clone(), 64);

        assert_eq!(record.top_level_prepare(tx).await, PrepareOutcome::Ok);
        assert!(record.is_shadowed());
        assert_eq!(
            store.current_state(object, TYPE).unwrap(),
            StoreState::Uncommitted
        );

        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(balance(&store, object), Some(20));

        // replay after the shadow is gone
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
    }

    #[tokio::test]
    async fn test_abort_removes_shadow() {
        let store = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let tx = Uid::new();
        let mut record = PersistenceRecord::new(account(object, 30, 256), store.clone(), 64);

        record.top_level_prepare(tx).await;
        assert_eq!(record.top_level_abort(tx).await, FinishOutcome::Ok);
        assert_eq!(store.current_state(object, TYPE).unwrap(), StoreState::Unknown);
    }

    #[tokio::test]
    async fn test_missing_shadow_without_commit_is_hazard() {
        let store = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let tx = Uid::new();
        let mut record = PersistenceRecord::new(account(object, 40, 256), store.clone(), 64);

        record.top_level_prepare(tx).await;
        store.remove(object, TYPE, StateKind::Shadow).unwrap();

        assert_eq!(
            record.top_level_commit(tx).await,
            FinishOutcome::HeuristicHazard
        );
        assert_eq!(
            record.heuristic_outcome(),
            Some(FinishOutcome::HeuristicHazard)
        );
    }

    #[tokio::test]
    async fn test_restored_record_commits_held_state() {
        let store = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let tx = Uid::new();
        let mut record = PersistenceRecord::new(account(object, 50, 0), store.clone(), 1024);
        record.top_level_prepare(tx).await;

        let mut os = OutputObjectState::new(record.uid(), "/Record/Persistence");
        record.save_state(&mut os).unwrap();

        let mut restored = PersistenceRecord::for_recovery(store.clone(), 1024);
        restored.restore_state(&mut os.into_input()).unwrap();
        assert_eq!(restored.object(), object);
        assert_eq!(restored.type_name(), TYPE);

        assert_eq!(restored.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(balance(&store, object), Some(50));
    }

    #[test]
    fn test_newer_state_replaces_older() {
        let store: Arc<dyn ObjectStore> = Arc::new(VolatileObjectStore::new());
        let object = Uid::new();
        let mut list = crate::record::RecordList::new();

        list.insert(Box::new(PersistenceRecord::new(account(object, 1, 0), store.clone(), 1024)));
        let newer = PersistenceRecord::new(account(object, 2, 0), store, 1024);
        let newer_uid = newer.uid();
        list.insert(Box::new(newer));

        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().uid(), newer_uid);
    }
}
