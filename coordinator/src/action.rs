//! The basic action: one transaction's participants and its state machine.
//!
//! A top-level action prepares its pending records in order, writes the
//! transaction log once at least one prepared record has state to save, then
//! commits or aborts the prepared records. Outcomes that disagree with the
//! decision are kept in the heuristic list, and records that could not be
//! reached in the failed list. Both lists survive in the log until recovery
//! or an operator resolves them.
//!
//! Log layout under `(uid, ACTION_TYPE)`:
//!
//! ```text
//! version i32 | past_first_participant bool | status i32 | decision i32
//! prepared list | failed list | heuristic list
//! ```
//!
//! where each list is a sequence of `(record type i32, record state)` pairs
//! terminated by [`RecordType::NONE`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use durabletx_common::{
    ActionStatus, AddOutcome, ContextId, Decision, FinishOutcome, InputObjectState,
    OutputObjectState, PrepareOutcome, RecordType, Result, TxError, Uid,
};
use durabletx_store::{ObjectStore, StateKind};

use crate::record::{AbstractRecord, RecordList, UnreadableRecord};
use crate::registry::RecordTypeRegistry;

/// Type name under which transaction logs are stored.
pub const ACTION_TYPE: &str = "/Action/AtomicAction";

const LOG_VERSION: i32 = 1;

/// Summary of a record for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordInfo {
    pub uid: Uid,
    pub record_type: RecordType,
    pub order: Uid,
    pub outcome: Option<FinishOutcome>,
}

impl RecordInfo {
    fn of(record: &dyn AbstractRecord) -> Self {
        Self {
            uid: record.uid(),
            record_type: record.record_type(),
            order: record.order(),
            outcome: record.heuristic_outcome(),
        }
    }
}

/// How a top-level action reached its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPath {
    TwoPhase,
    OnePhase,
    /// Every participant voted read-only.
    ReadOnly,
}

/// Records taken out of a nested action for its parent.
pub type Propagated = Vec<Box<dyn AbstractRecord>>;

/// A transaction.
#[derive(Debug)]
pub struct BasicAction {
    uid: Uid,
    parent: Option<Uid>,
    /// Enclosing actions, innermost first.
    ancestors: Vec<Uid>,
    owner: ContextId,
    status: ActionStatus,
    decision: Decision,
    /// Set once any participant has completed phase two in line with the
    /// decision.
    past_first_participant: bool,
    pending: RecordList,
    prepared: RecordList,
    read_only: RecordList,
    failed: RecordList,
    heuristic: RecordList,
    children: Vec<Uid>,
    path: Option<CommitPath>,
    logged: bool,
    store: Arc<dyn ObjectStore>,
}

impl BasicAction {
    /// Begin a top-level action.
    pub fn new(owner: ContextId, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            uid: Uid::new(),
            parent: None,
            ancestors: Vec::new(),
            owner,
            status: ActionStatus::Active,
            decision: Decision::Undecided,
            past_first_participant: false,
            pending: RecordList::new(),
            prepared: RecordList::new(),
            read_only: RecordList::new(),
            failed: RecordList::new(),
            heuristic: RecordList::new(),
            children: Vec::new(),
            path: None,
            logged: false,
            store,
        }
    }

    /// Begin an action nested in `parent`.
    pub fn new_nested(owner: ContextId, parent: &BasicAction) -> Self {
        let mut ancestors = Vec::with_capacity(parent.ancestors.len() + 1);
        ancestors.push(parent.uid);
        ancestors.extend_from_slice(&parent.ancestors);
        Self {
            parent: Some(parent.uid),
            ancestors,
            ..Self::new(owner, Arc::clone(&parent.store))
        }
    }

    /// Rebuild an action from its log. Returns `None` if no log exists.
    pub fn restore(
        uid: Uid,
        owner: ContextId,
        store: Arc<dyn ObjectStore>,
        registry: &RecordTypeRegistry,
    ) -> Result<Option<Self>> {
        let Some(mut is) = store.read(uid, ACTION_TYPE)? else {
            return Ok(None);
        };

        let version = is.unpack_i32()?;
        if version != LOG_VERSION {
            return Err(TxError::corrupt(format!(
                "{uid}: unsupported log version {version}"
            )));
        }
        let past_first_participant = is.unpack_bool()?;
        let code = is.unpack_i32()?;
        let status = ActionStatus::from_code(code)
            .ok_or_else(|| TxError::corrupt(format!("{uid}: unknown status {code}")))?;
        let code = is.unpack_i32()?;
        let decision = Decision::from_code(code)
            .ok_or_else(|| TxError::corrupt(format!("{uid}: unknown decision {code}")))?;

        let mut unreadable = RecordList::new();
        let prepared = Self::restore_list(&mut is, registry, &mut unreadable)?;
        let failed = Self::restore_list(&mut is, registry, &mut unreadable)?;
        let mut heuristic = Self::restore_list(&mut is, registry, &mut unreadable)?;

        let mut action = Self::new(owner, store);
        action.uid = uid;
        action.status = status;
        if !unreadable.is_empty() {
            warn!(tx = %uid, records = unreadable.len(), "Log holds unreadable records");
            if status.is_heuristic() {
                action.status = ActionStatus::HeuristicHazard;
            }
            while let Some(record) = unreadable.pop_front() {
                heuristic.push_back(record);
            }
        }
        action.decision = decision;
        action.past_first_participant = past_first_participant;
        action.prepared = prepared;
        action.failed = failed;
        action.heuristic = heuristic;
        action.logged = true;
        Ok(Some(action))
    }

    /// Read one record list. An entry that cannot be rebuilt goes to
    /// `unreadable` as a placeholder; only a broken list framing fails.
    fn restore_list(
        is: &mut InputObjectState,
        registry: &RecordTypeRegistry,
        unreadable: &mut RecordList,
    ) -> Result<RecordList> {
        let mut list = RecordList::new();
        loop {
            let tag = RecordType(is.unpack_i32()?);
            if tag == RecordType::NONE {
                return Ok(list);
            }
            let mut state = is.unpack_state()?;
            let Some(mut record) = registry.create(tag) else {
                error!(record = %state.uid(), record_type = %tag, "No factory for record type");
                unreadable.push_back(Box::new(UnreadableRecord::new(tag, &state, "no factory")));
                continue;
            };
            match record.restore_state(&mut state) {
                Ok(()) => list.push_back(record),
                Err(e) => {
                    error!(record = %state.uid(), record_type = %tag, error = %e, "Record state unreadable");
                    unreadable.push_back(Box::new(UnreadableRecord::new(tag, &state, e.to_string())));
                }
            }
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn parent(&self) -> Option<Uid> {
        self.parent
    }

    pub fn ancestors(&self) -> &[Uid] {
        &self.ancestors
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Set once the action has left phase one.
    pub fn commit_path(&self) -> Option<CommitPath> {
        self.path
    }

    /// Whether a log for this action is in the store.
    pub fn is_logged(&self) -> bool {
        self.logged
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }

    pub fn failed_records(&self) -> Vec<RecordInfo> {
        self.failed.iter().map(RecordInfo::of).collect()
    }

    pub fn heuristic_records(&self) -> Vec<RecordInfo> {
        self.heuristic.iter().map(RecordInfo::of).collect()
    }

    pub fn children(&self) -> &[Uid] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: Uid) {
        self.children.push(child);
    }

    pub(crate) fn remove_child(&mut self, child: Uid) {
        self.children.retain(|c| *c != child);
    }

    /// Enlist a record.
    pub fn add(&mut self, record: Box<dyn AbstractRecord>) -> AddOutcome {
        if self.status != ActionStatus::Active {
            debug!(tx = %self.uid, status = %self.status, "Enlistment refused");
            return AddOutcome::Invalid;
        }
        let record_uid = record.uid();
        let record_type = record.record_type();
        let outcome = self.pending.insert(record);
        debug!(tx = %self.uid, record = %record_uid, record_type = %record_type, outcome = ?outcome, "Record enlisted");
        outcome
    }

    /// Mark the action so that it can only abort.
    pub fn set_rollback_only(&mut self) -> Result<()> {
        match self.status {
            ActionStatus::AbortOnly => Ok(()),
            _ => self.enter(ActionStatus::AbortOnly, "set_rollback_only"),
        }
    }

    /// Prepare a top-level action without committing it.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn prepare(&mut self) -> Result<PrepareOutcome> {
        self.require_top_level("prepare")?;
        match self.status {
            ActionStatus::Active => self.prepare_phase().await,
            ActionStatus::AbortOnly => {
                self.finish(Decision::Abort).await;
                Ok(PrepareOutcome::NotOk)
            }
            status => Err(self.wrong_state(status, "prepare")),
        }
    }

    /// Commit a top-level action.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn commit(&mut self) -> Result<ActionStatus> {
        self.require_top_level("commit")?;
        match self.status {
            ActionStatus::AbortOnly => {
                info!(tx = %self.uid, "Rollback-only action aborted on commit");
                Ok(self.finish(Decision::Abort).await)
            }
            ActionStatus::Active => {
                if self.pending.len() == 1
                    && self.pending.iter().all(|r| r.supports_one_phase())
                {
                    return self.one_phase_commit().await;
                }
                match self.prepare_phase().await? {
                    PrepareOutcome::Ok => Ok(self.finish(Decision::Commit).await),
                    PrepareOutcome::ReadOnly | PrepareOutcome::NotOk => Ok(self.status),
                }
            }
            ActionStatus::Prepared => Ok(self.finish(Decision::Commit).await),
            status => Err(self.wrong_state(status, "commit")),
        }
    }

    /// Roll back a top-level action.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn rollback(&mut self) -> Result<ActionStatus> {
        self.require_top_level("rollback")?;
        match self.status {
            ActionStatus::Active | ActionStatus::AbortOnly => {
                Ok(self.finish(Decision::Abort).await)
            }
            ActionStatus::Prepared => {
                if self.logged {
                    self.status = ActionStatus::Aborting;
                    self.decision = Decision::Abort;
                    if let Err(e) = self.write_log() {
                        error!(tx = %self.uid, error = %e, "Could not record rollback decision");
                        self.status = ActionStatus::Prepared;
                        self.decision = Decision::Commit;
                        return Err(e);
                    }
                }
                Ok(self.finish(Decision::Abort).await)
            }
            status => Err(self.wrong_state(status, "rollback")),
        }
    }

    /// Commit a nested action, returning the records its parent inherits.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn commit_nested(&mut self) -> Result<(ActionStatus, Propagated)> {
        let Some(parent) = self.parent else {
            return Err(self.wrong_state(self.status, "commit_nested"));
        };
        match self.status {
            ActionStatus::Active => {}
            ActionStatus::AbortOnly => return self.abort_nested().await,
            status => return Err(self.wrong_state(status, "commit_nested")),
        }

        let mut records = self.pending.take_all().into_iter();
        let mut prepared = Vec::new();
        let mut refused = false;
        for mut record in records.by_ref() {
            match record.nested_prepare(self.uid).await {
                PrepareOutcome::NotOk => {
                    info!(tx = %self.uid, record = %record.order(), "Nested participant refused");
                    refused = true;
                    break;
                }
                PrepareOutcome::Ok | PrepareOutcome::ReadOnly => prepared.push(record),
            }
        }
        if refused {
            self.pending.extend(prepared);
            self.pending.extend(records);
            return self.abort_nested().await;
        }

        self.enter(ActionStatus::Committed, "commit_nested")?;
        self.decision = Decision::Commit;
        let mut propagated = Vec::new();
        for mut record in prepared {
            let outcome = record.nested_commit(self.uid, parent).await;
            if outcome != FinishOutcome::Ok {
                warn!(tx = %self.uid, record = %record.order(), outcome = ?outcome, "Nested commit outcome");
            }
            if record.propagate_on_commit() {
                propagated.push(record);
            }
        }
        info!(tx = %self.uid, parent = %parent, propagated = propagated.len(), "Nested action committed");
        Ok((ActionStatus::Committed, propagated))
    }

    /// Abort a nested action, returning the records its parent inherits.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn abort_nested(&mut self) -> Result<(ActionStatus, Propagated)> {
        match self.status {
            ActionStatus::Active => {}
            ActionStatus::AbortOnly => self.status = ActionStatus::Aborting,
            status => return Err(self.wrong_state(status, "abort_nested")),
        }
        self.enter(ActionStatus::Aborted, "abort_nested")?;
        self.decision = Decision::Abort;

        let mut propagated = Vec::new();
        for mut record in self.pending.take_all() {
            let outcome = record.nested_abort(self.uid).await;
            if outcome != FinishOutcome::Ok {
                warn!(tx = %self.uid, record = %record.order(), outcome = ?outcome, "Nested abort outcome");
            }
            if record.propagate_on_abort() {
                propagated.push(record);
            }
        }
        info!(tx = %self.uid, "Nested action aborted");
        Ok((ActionStatus::Aborted, propagated))
    }

    /// Complete a logged action rebuilt by [`BasicAction::restore`].
    ///
    /// Safe to repeat: every record kind treats a second commit or abort of
    /// finished work as done.
    #[instrument(skip(self), fields(tx = %self.uid, status = %self.status))]
    pub async fn replay(&mut self) -> ActionStatus {
        match self.status {
            ActionStatus::Prepared | ActionStatus::Committing => {
                let mut records = self.prepared.take_all();
                records.extend(self.failed.take_all());
                self.phase_two(Decision::Commit, records).await
            }
            ActionStatus::Committed | ActionStatus::Aborted => {
                if let Err(e) = self.remove_log() {
                    warn!(tx = %self.uid, error = %e, "Could not remove finished log");
                }
                self.status
            }
            status if status.is_heuristic() => {
                let decision = match self.decision {
                    Decision::Commit => Decision::Commit,
                    Decision::Abort | Decision::Undecided => Decision::Abort,
                };
                let mut records = self.prepared.take_all();
                records.extend(self.failed.take_all());
                self.phase_two(decision, records).await
            }
            _ => {
                // Aborting, or a state that is never logged: presume abort.
                let mut records = self.prepared.take_all();
                records.extend(self.failed.take_all());
                self.phase_two(Decision::Abort, records).await
            }
        }
    }

    /// Ask every heuristic record to forget its outcome.
    ///
    /// Records that cannot forget yet stay in the heuristic list. Once the
    /// list is empty the action takes the clean status for its decision.
    #[instrument(skip(self), fields(tx = %self.uid))]
    pub async fn forget_heuristics(&mut self) -> Result<ActionStatus> {
        let mut kept = RecordList::new();
        for mut record in self.heuristic.take_all() {
            if record.forget_heuristic(self.uid).await {
                info!(tx = %self.uid, record = %record.uid(), "Heuristic forgotten");
            } else {
                kept.push_back(record);
            }
        }
        self.heuristic = kept;

        if self.heuristic.is_empty() && self.failed.is_empty() && self.status.is_heuristic() {
            self.enter(self.decision.clean_status(), "forget")?;
        }
        self.update_log()?;
        Ok(self.status)
    }

    /// Encode the action's log entry.
    pub fn save_state(&self) -> Result<OutputObjectState> {
        let mut os = OutputObjectState::new(self.uid, ACTION_TYPE);
        os.pack_i32(LOG_VERSION);
        os.pack_bool(self.past_first_participant);
        os.pack_i32(self.status.code());
        os.pack_i32(self.decision.code());
        for list in [&self.prepared, &self.failed, &self.heuristic] {
            for record in list.iter().filter(|r| r.does_save()) {
                let mut state = OutputObjectState::new(
                    record.uid(),
                    format!("{ACTION_TYPE}/{}", record.record_type().name()),
                );
                record.save_state(&mut state)?;
                os.pack_i32(record.record_type().0);
                os.pack_state(&state)?;
            }
            os.pack_i32(RecordType::NONE.0);
        }
        Ok(os)
    }

    async fn prepare_phase(&mut self) -> Result<PrepareOutcome> {
        self.enter(ActionStatus::Preparing, "prepare")?;

        let mut refused = false;
        while let Some(mut record) = self.pending.pop_front() {
            match record.top_level_prepare(self.uid).await {
                PrepareOutcome::Ok => self.prepared.push_back(record),
                PrepareOutcome::ReadOnly => self.read_only.push_back(record),
                PrepareOutcome::NotOk => {
                    info!(
                        tx = %self.uid,
                        record = %record.order(),
                        record_type = %record.record_type(),
                        "Participant voted to roll back"
                    );
                    if let Some(outcome) = record.heuristic_outcome() {
                        warn!(
                            tx = %self.uid,
                            record = %record.uid(),
                            outcome = ?outcome,
                            "Heuristic outcome during prepare"
                        );
                        self.heuristic.push_back(record);
                    }
                    refused = true;
                    break;
                }
            }
        }

        if refused {
            self.finish(Decision::Abort).await;
            return Ok(PrepareOutcome::NotOk);
        }

        if self.prepared.is_empty() {
            self.path = Some(CommitPath::ReadOnly);
            self.decision = Decision::Commit;
            self.enter(ActionStatus::Committed, "prepare")?;
            self.notify_read_only(Decision::Commit).await;
            info!(tx = %self.uid, "Read-only action committed");
            return Ok(PrepareOutcome::ReadOnly);
        }

        self.enter(ActionStatus::Prepared, "prepare")?;
        self.path = Some(CommitPath::TwoPhase);
        self.decision = Decision::Commit;
        if self.prepared.iter().any(|r| r.does_save()) {
            if let Err(e) = self.write_log() {
                error!(tx = %self.uid, error = %e, "Transaction log write failed, aborting");
                self.finish(Decision::Abort).await;
                return Ok(PrepareOutcome::NotOk);
            }
        }
        info!(tx = %self.uid, prepared = self.prepared.len(), logged = self.logged, "Action prepared");
        Ok(PrepareOutcome::Ok)
    }

    async fn one_phase_commit(&mut self) -> Result<ActionStatus> {
        let Some(mut record) = self.pending.pop_front() else {
            return Err(TxError::Internal(format!("{}: no record for one-phase commit", self.uid)));
        };
        self.enter(ActionStatus::Committing, "commit")?;
        self.path = Some(CommitPath::OnePhase);
        self.decision = Decision::Commit;

        let status = match record.top_level_one_phase_commit(self.uid).await {
            FinishOutcome::Ok => ActionStatus::Committed,
            FinishOutcome::HeuristicCommit => {
                record.forget_heuristic(self.uid).await;
                ActionStatus::Committed
            }
            FinishOutcome::Error => {
                self.decision = Decision::Abort;
                ActionStatus::Aborted
            }
            FinishOutcome::HeuristicRollback => {
                self.decision = Decision::Abort;
                record.forget_heuristic(self.uid).await;
                ActionStatus::Aborted
            }
            FinishOutcome::HeuristicMixed => {
                self.heuristic.push_back(record);
                ActionStatus::HeuristicMixed
            }
            FinishOutcome::HeuristicHazard => {
                self.heuristic.push_back(record);
                ActionStatus::HeuristicHazard
            }
        };
        self.enter(status, "commit")?;
        self.log_outcome();
        info!(tx = %self.uid, status = %self.status, "One-phase commit finished");
        Ok(self.status)
    }

    async fn finish(&mut self, decision: Decision) -> ActionStatus {
        let mut records = self.prepared.take_all();
        if decision == Decision::Abort {
            records.extend(self.pending.take_all());
        }
        self.phase_two(decision, records).await
    }

    async fn phase_two(
        &mut self,
        decision: Decision,
        records: Vec<Box<dyn AbstractRecord>>,
    ) -> ActionStatus {
        self.decision = decision;
        if !self.status.is_heuristic() {
            let next = match decision {
                Decision::Commit => ActionStatus::Committing,
                Decision::Abort | Decision::Undecided => ActionStatus::Aborting,
            };
            if let Err(e) = self.enter(next, "phase two") {
                error!(tx = %self.uid, error = %e, "Cannot enter phase two");
                self.status = ActionStatus::Invalid;
                for record in records {
                    self.failed.push_back(record);
                }
                return ActionStatus::Invalid;
            }
        }

        for mut record in records {
            let outcome = match decision {
                Decision::Commit => record.top_level_commit(self.uid).await,
                Decision::Abort | Decision::Undecided => record.top_level_abort(self.uid).await,
            };
            self.classify(record, outcome, decision).await;
        }
        self.notify_read_only(decision).await;

        self.status = self.settled_status(decision);
        self.log_outcome();
        info!(
            tx = %self.uid,
            status = %self.status,
            failed = self.failed.len(),
            heuristic = self.heuristic.len(),
            "Phase two finished"
        );
        self.status
    }

    async fn classify(
        &mut self,
        mut record: Box<dyn AbstractRecord>,
        outcome: FinishOutcome,
        decision: Decision,
    ) {
        match outcome {
            FinishOutcome::Error => {
                warn!(tx = %self.uid, record = %record.uid(), "Participant unreachable, left for recovery");
                self.failed.push_back(record);
            }
            outcome if outcome.agrees_with(decision) => {
                if outcome.is_heuristic() {
                    record.forget_heuristic(self.uid).await;
                }
                self.past_first_participant = true;
            }
            outcome => {
                warn!(
                    tx = %self.uid,
                    record = %record.uid(),
                    record_type = %record.record_type(),
                    outcome = ?outcome,
                    "Heuristic outcome"
                );
                self.heuristic.push_back(record);
            }
        }
    }

    /// Status once phase two has run, from the heuristic and failed lists.
    ///
    /// Hazard dominates mixed; a divergent heuristic alongside records that
    /// completed normally is mixed.
    fn settled_status(&self, decision: Decision) -> ActionStatus {
        let (mut hazard, mut mixed, mut divergent) = (false, false, false);
        for record in self.heuristic.iter() {
            match record.heuristic_outcome() {
                Some(FinishOutcome::HeuristicMixed) => mixed = true,
                Some(FinishOutcome::HeuristicCommit) | Some(FinishOutcome::HeuristicRollback) => {
                    divergent = true
                }
                _ => hazard = true,
            }
        }

        if hazard {
            ActionStatus::HeuristicHazard
        } else if mixed || (divergent && self.past_first_participant) {
            ActionStatus::HeuristicMixed
        } else if divergent {
            match decision {
                Decision::Commit => ActionStatus::HeuristicRollback,
                Decision::Abort | Decision::Undecided => ActionStatus::HeuristicCommit,
            }
        } else if !self.failed.is_empty() {
            if self.status.is_heuristic() {
                self.status
            } else {
                match decision {
                    Decision::Commit => ActionStatus::Committing,
                    Decision::Abort | Decision::Undecided => ActionStatus::Aborting,
                }
            }
        } else {
            decision.clean_status()
        }
    }

    async fn notify_read_only(&mut self, decision: Decision) {
        for mut record in self.read_only.take_all() {
            let outcome = match decision {
                Decision::Commit => record.top_level_commit(self.uid).await,
                Decision::Abort | Decision::Undecided => record.top_level_abort(self.uid).await,
            };
            if outcome != FinishOutcome::Ok {
                debug!(tx = %self.uid, record = %record.uid(), outcome = ?outcome, "Read-only record outcome");
            }
        }
    }

    fn log_needed(&self) -> bool {
        self.failed
            .iter()
            .chain(self.heuristic.iter())
            .any(|r| r.does_save())
    }

    /// Keep the log only while a saved record still needs attention.
    fn update_log(&mut self) -> Result<()> {
        if self.log_needed() {
            self.write_log()
        } else {
            self.remove_log()
        }
    }

    /// Log the outcome of a decided action.
    ///
    /// If records that still need attention cannot be written, the action
    /// becomes a hazard and the write is tried once more with that status.
    /// Whatever log is left behind is replayed by recovery.
    fn log_outcome(&mut self) {
        if !self.log_needed() {
            if let Err(e) = self.remove_log() {
                warn!(tx = %self.uid, error = %e, "Could not remove transaction log, left for recovery");
            }
            return;
        }
        if let Err(e) = self.write_log() {
            error!(tx = %self.uid, status = %self.status, error = %e, "Could not log outcome, outcome unknown");
            self.status = ActionStatus::HeuristicHazard;
            if let Err(e) = self.write_log() {
                error!(tx = %self.uid, error = %e, "Transaction log retry failed, left for recovery");
            }
        }
    }

    fn write_log(&mut self) -> Result<()> {
        let os = self.save_state()?;
        if !self
            .store
            .write(self.uid, ACTION_TYPE, &os, StateKind::Committed)?
        {
            return Err(TxError::Internal(format!("{}: log is hidden", self.uid)));
        }
        self.logged = true;
        debug!(tx = %self.uid, status = %self.status, bytes = os.size(), "Transaction log written");
        Ok(())
    }

    fn remove_log(&mut self) -> Result<()> {
        if self.logged {
            self.store
                .remove(self.uid, ACTION_TYPE, StateKind::Committed)?;
            self.logged = false;
            debug!(tx = %self.uid, "Transaction log removed");
        }
        Ok(())
    }

    fn enter(&mut self, next: ActionStatus, operation: &'static str) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(self.wrong_state(self.status, operation));
        }
        self.status = next;
        Ok(())
    }

    fn require_top_level(&self, operation: &'static str) -> Result<()> {
        if self.parent.is_some() {
            return Err(self.wrong_state(self.status, operation));
        }
        Ok(())
    }

    fn wrong_state(&self, status: ActionStatus, operation: &'static str) -> TxError {
        TxError::WrongState {
            tx: self.uid,
            status,
            operation,
        }
    }
}
