//! Transaction manager: the entry point applications drive transactions
//! through.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use durabletx_common::{
    ActionStatus, AddOutcome, ContextId, NodeId, OutputObjectState, PrepareOutcome, Result,
    TxError, Uid,
};
use durabletx_participant::{Resource, ResourceDirectory};
use durabletx_store::ObjectStore;

use crate::action::{BasicAction, CommitPath};
use crate::config::CoordinatorConfig;
use crate::heuristics::HeuristicAdmin;
use crate::index::{TransactionIndex, TxState};
use crate::lock_manager::{LockManager, LockMode, LockResult};
use crate::metrics::{Metrics, SharedMetrics};
use crate::record::{
    AbstractRecord, LastResourceRecord, LockRecord, PersistenceRecord, TwoPhaseRecord,
};
use crate::recovery::RecoveryManager;
use crate::registry::RecordTypeRegistry;
use crate::state::CoordinatorState;

/// The calling context. Only the context that began a transaction may
/// prepare, commit or roll it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TxContext(ContextId);

impl TxContext {
    pub fn new() -> Self {
        Self(ContextId::new())
    }

    pub fn id(&self) -> ContextId {
        self.0
    }
}

type ActionHandle = Arc<Mutex<BasicAction>>;

/// Begins transactions, enlists participants and drives them to an outcome.
pub struct TransactionManager {
    config: CoordinatorConfig,
    node_id: NodeId,
    state: Arc<RwLock<CoordinatorState>>,
    /// Active actions, top-level and nested.
    actions: Arc<DashMap<Uid, ActionHandle>>,
    index: Arc<TransactionIndex>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<RecordTypeRegistry>,
    directory: Arc<ResourceDirectory>,
    locks: Arc<LockManager>,
    metrics: SharedMetrics,
    recovery: Arc<RecoveryManager>,
}

impl TransactionManager {
    /// Validate `config` and open its store.
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        config.check()?;
        let store = config.store.open()?;
        Ok(Self::with_store(config, store))
    }

    /// Build a manager over an already opened store.
    pub fn with_store(config: CoordinatorConfig, store: Arc<dyn ObjectStore>) -> Self {
        let node_id = config
            .node_id
            .clone()
            .map(NodeId::new)
            .unwrap_or_else(|| NodeId::new(format!("durabletx-{}", uuid::Uuid::new_v4())));

        let directory = Arc::new(ResourceDirectory::new());
        let registry = Arc::new(RecordTypeRegistry::with_builtin(
            Arc::clone(&store),
            Arc::clone(&directory),
            config.max_log_state_size,
        ));
        let index = Arc::new(TransactionIndex::new(Arc::clone(&store)));
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&index),
            Arc::clone(&metrics),
        ));

        Self {
            config,
            node_id,
            state: Arc::new(RwLock::new(CoordinatorState::Starting)),
            actions: Arc::new(DashMap::new()),
            index,
            store,
            registry,
            directory,
            locks: Arc::new(LockManager::new()),
            metrics,
            recovery,
        }
    }

    /// Start the manager, and the recovery loop if enabled.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn start(&self) -> Result<()> {
        info!(store = %self.store.name(), "Starting transaction manager");
        *self.state.write() = CoordinatorState::Running;

        if self.config.recovery.enabled {
            self.recovery.start();
        }

        info!("Transaction manager started");
        Ok(())
    }

    /// Stop accepting transactions and stop the recovery loop.
    ///
    /// Active transactions are left to their owners; any that are logged
    /// will be completed by recovery after a restart.
    #[instrument(skip(self), fields(node_id = %self.node_id))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping transaction manager");
        *self.state.write() = CoordinatorState::ShuttingDown;

        self.recovery.stop().await;

        let active = self.active_count();
        if active > 0 {
            warn!(active, "Stopping with active transactions");
        }

        *self.state.write() = CoordinatorState::Stopped;
        info!("Transaction manager stopped");
        Ok(())
    }

    /// Begin a transaction, nested in `parent` if given.
    #[instrument(skip(self, ctx), fields(ctx = %ctx.id()))]
    pub async fn begin(&self, ctx: &TxContext, parent: Option<Uid>) -> Result<Uid> {
        if !self.state.read().accepts_transactions() {
            return Err(TxError::Unavailable(format!(
                "transaction manager is {:?}",
                self.state()
            )));
        }

        let action = match parent {
            None => BasicAction::new(ctx.id(), Arc::clone(&self.store)),
            Some(parent_uid) => {
                let handle = self.handle(parent_uid)?;
                let mut parent = handle.lock().await;
                Self::check_owner(ctx, &parent)?;
                if parent.status() != ActionStatus::Active {
                    return Err(TxError::WrongState {
                        tx: parent_uid,
                        status: parent.status(),
                        operation: "begin nested",
                    });
                }
                let child = BasicAction::new_nested(ctx.id(), &parent);
                parent.add_child(child.uid());
                child
            }
        };

        let uid = action.uid();
        if action.is_top_level() {
            if !self.index.register_live(uid) {
                return Err(TxError::Internal(format!("{uid} already registered")));
            }
            self.metrics.transaction_begun();
        }
        self.actions.insert(uid, Arc::new(Mutex::new(action)));

        info!(tx = %uid, parent = ?parent, "Transaction begun");
        Ok(uid)
    }

    /// Enlist a record in `tx`.
    pub async fn enlist(
        &self,
        _ctx: &TxContext,
        tx: Uid,
        record: Box<dyn AbstractRecord>,
    ) -> Result<AddOutcome> {
        let handle = self.handle(tx)?;
        let mut action = handle.lock().await;
        let record_uid = record.uid();
        match action.add(record) {
            AddOutcome::Ok => Ok(AddOutcome::Ok),
            AddOutcome::Duplicate => Err(TxError::DuplicateParticipant {
                tx,
                record: record_uid,
            }),
            AddOutcome::Invalid => Err(TxError::InvalidParticipant {
                tx,
                reason: format!("transaction is {}", action.status()),
            }),
        }
    }

    /// Enlist a two-phase resource. The resource is also registered for
    /// recovery under its name.
    pub async fn enlist_resource(
        &self,
        ctx: &TxContext,
        tx: Uid,
        resource: Arc<dyn Resource>,
    ) -> Result<AddOutcome> {
        self.register_resource(Arc::clone(&resource));
        self.enlist(ctx, tx, Box::new(TwoPhaseRecord::new(resource)))
            .await
    }

    /// Enlist a resource that can only commit in one phase. The resource is
    /// also registered for recovery under its name.
    pub async fn enlist_last_resource(
        &self,
        ctx: &TxContext,
        tx: Uid,
        resource: Arc<dyn Resource>,
    ) -> Result<AddOutcome> {
        self.register_resource(Arc::clone(&resource));
        let record = LastResourceRecord::new(resource, self.config.allow_multiple_last_resources);
        self.enlist(ctx, tx, Box::new(record)).await
    }

    /// Make `state` the committed state of its object if `tx` commits.
    pub async fn persist(
        &self,
        ctx: &TxContext,
        tx: Uid,
        state: OutputObjectState,
    ) -> Result<AddOutcome> {
        let record = PersistenceRecord::new(
            state,
            Arc::clone(&self.store),
            self.config.max_log_state_size,
        );
        self.enlist(ctx, tx, Box::new(record)).await
    }

    /// Lock `object` for `tx` until it ends.
    pub async fn lock(
        &self,
        _ctx: &TxContext,
        tx: Uid,
        object: Uid,
        mode: LockMode,
    ) -> Result<LockResult> {
        let handle = self.handle(tx)?;
        let mut action = handle.lock().await;
        if action.status() != ActionStatus::Active {
            return Err(TxError::InvalidParticipant {
                tx,
                reason: format!("transaction is {}", action.status()),
            });
        }

        let result = self.locks.acquire(object, tx, mode, action.ancestors())?;
        let record = LockRecord::new(object, mode, Arc::clone(&self.locks));
        if action.add(Box::new(record)) != AddOutcome::Ok {
            if result == LockResult::Granted {
                self.locks.release_all(object, tx);
            }
            return Err(TxError::Internal(format!(
                "{tx}: lock record for {object} rejected"
            )));
        }
        Ok(result)
    }

    /// Keep `tx`'s lock on a deleted object until `tx` ends.
    pub async fn forget_object(
        &self,
        ctx: &TxContext,
        tx: Uid,
        object: Uid,
        mode: LockMode,
    ) -> Result<AddOutcome> {
        let record = LockRecord::cadaver(object, mode, Arc::clone(&self.locks));
        self.enlist(ctx, tx, Box::new(record)).await
    }

    /// Mark `tx` so that it can only roll back. Any context may do this.
    pub async fn set_rollback_only(&self, tx: Uid) -> Result<()> {
        let handle = self.handle(tx)?;
        let mut action = handle.lock().await;
        action.set_rollback_only()?;
        info!(tx = %tx, "Transaction marked rollback-only");
        Ok(())
    }

    /// Prepare a top-level transaction.
    #[instrument(skip(self, ctx))]
    pub async fn prepare(&self, ctx: &TxContext, tx: Uid) -> Result<PrepareOutcome> {
        let handle = self.handle(tx)?;
        Self::check_owner(ctx, &*handle.lock().await)?;
        self.abort_children(tx).await;

        let mut action = handle.lock().await;
        let outcome = action.prepare().await?;
        if outcome != PrepareOutcome::Ok {
            let status = action.status();
            let path = action.commit_path();
            drop(action);
            self.end_top_level(tx, status, path);
        }
        Ok(outcome)
    }

    /// Commit `tx`.
    ///
    /// A nested transaction hands its records to its parent; a top-level one
    /// runs the commit protocol and returns its final status.
    #[instrument(skip(self, ctx))]
    pub async fn commit(&self, ctx: &TxContext, tx: Uid) -> Result<ActionStatus> {
        let handle = self.handle(tx)?;
        Self::check_owner(ctx, &*handle.lock().await)?;
        self.abort_children(tx).await;

        let mut action = handle.lock().await;
        match action.parent() {
            None => {
                let status = action.commit().await?;
                let path = action.commit_path();
                drop(action);
                self.end_top_level(tx, status, path);
                Ok(status)
            }
            Some(parent) => {
                let (status, propagated) = action.commit_nested().await?;
                drop(action);
                self.actions.remove(&tx);
                self.hand_to_parent(parent, tx, propagated).await;
                Ok(status)
            }
        }
    }

    /// Roll back `tx`.
    #[instrument(skip(self, ctx))]
    pub async fn rollback(&self, ctx: &TxContext, tx: Uid) -> Result<ActionStatus> {
        let handle = self.handle(tx)?;
        Self::check_owner(ctx, &*handle.lock().await)?;
        self.abort_children(tx).await;

        let mut action = handle.lock().await;
        match action.parent() {
            None => {
                let status = action.rollback().await?;
                drop(action);
                self.end_top_level(tx, status, None);
                Ok(status)
            }
            Some(parent) => {
                let (status, propagated) = action.abort_nested().await?;
                drop(action);
                self.actions.remove(&tx);
                self.hand_to_parent(parent, tx, propagated).await;
                Ok(status)
            }
        }
    }

    /// Status of an active transaction.
    pub async fn status(&self, tx: Uid) -> Result<ActionStatus> {
        let handle = self.handle(tx)?;
        let status = handle.lock().await.status();
        Ok(status)
    }

    /// Where `tx` lives: active here, being recovered, only logged, or
    /// unknown.
    pub fn lookup(&self, tx: Uid) -> Result<TxState> {
        self.index.lookup(tx)
    }

    /// Register a resource so that recovery can reach it by name.
    pub fn register_resource(&self, resource: Arc<dyn Resource>) {
        let known = self
            .directory
            .get(resource.name())
            .is_some_and(|existing| Arc::ptr_eq(&existing, &resource));
        if !known {
            self.directory.register(resource);
        }
    }

    /// Operator access to heuristic outcomes.
    pub fn heuristics(&self) -> HeuristicAdmin {
        HeuristicAdmin::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.index),
        )
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get the current manager state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Number of active transactions, nested ones included.
    pub fn active_count(&self) -> usize {
        self.actions.len()
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RecordTypeRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ResourceDirectory> {
        &self.directory
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    // --- Private methods ---

    fn handle(&self, tx: Uid) -> Result<ActionHandle> {
        self.actions
            .get(&tx)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TxError::TransactionNotFound(tx))
    }

    fn check_owner(ctx: &TxContext, action: &BasicAction) -> Result<()> {
        if action.owner() != ctx.id() {
            return Err(TxError::WrongTransaction {
                tx: action.uid(),
                reason: format!("owned by context {}", action.owner()),
            });
        }
        Ok(())
    }

    fn end_top_level(&self, tx: Uid, status: ActionStatus, path: Option<CommitPath>) {
        self.actions.remove(&tx);
        self.index.release_live(tx);
        self.metrics.transaction_ended(status);
        match path {
            Some(CommitPath::OnePhase) => self.metrics.one_phase_commit(),
            Some(CommitPath::ReadOnly) => self.metrics.read_only_commit(),
            _ => {}
        }
        info!(tx = %tx, status = %status, "Transaction ended");
    }

    /// Give the records a finished nested action propagates to its parent.
    /// Records the parent can no longer take are aborted.
    async fn hand_to_parent(
        &self,
        parent: Uid,
        child: Uid,
        records: Vec<Box<dyn AbstractRecord>>,
    ) {
        let Ok(handle) = self.handle(parent) else {
            warn!(tx = %child, parent = %parent, "Parent gone, aborting propagated records");
            Self::abort_records(child, records).await;
            return;
        };
        let mut parent_action = handle.lock().await;
        parent_action.remove_child(child);
        if parent_action.status() != ActionStatus::Active {
            drop(parent_action);
            warn!(tx = %child, parent = %parent, "Parent not active, aborting propagated records");
            Self::abort_records(child, records).await;
            return;
        }
        for record in records {
            let record_uid = record.uid();
            let outcome = parent_action.add(record);
            if outcome != AddOutcome::Ok {
                debug!(tx = %parent, record = %record_uid, outcome = ?outcome, "Propagated record not kept");
            }
        }
    }

    async fn abort_records(tx: Uid, records: Vec<Box<dyn AbstractRecord>>) {
        for mut record in records {
            record.top_level_abort(tx).await;
        }
    }

    /// Abort every live descendant of `tx`, innermost first.
    fn abort_children(&self, tx: Uid) -> BoxFuture<'_, ()> {
        async move {
            let Ok(handle) = self.handle(tx) else {
                return;
            };
            let children = handle.lock().await.children().to_vec();
            for child in children {
                self.abort_children(child).await;
                let Ok(child_handle) = self.handle(child) else {
                    continue;
                };
                warn!(tx = %tx, child = %child, "Aborting live nested transaction");
                let result = child_handle.lock().await.abort_nested().await;
                self.actions.remove(&child);
                match result {
                    Ok((_, propagated)) => self.hand_to_parent(tx, child, propagated).await,
                    Err(e) => {
                        warn!(tx = %child, error = %e, "Nested abort refused");
                        handle.lock().await.remove_child(child);
                    }
                }
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("node_id", &self.node_id)
            .field("state", &self.state())
            .field("active", &self.actions.len())
            .field("store", &self.store.name())
            .finish()
    }
}
