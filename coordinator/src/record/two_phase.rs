//! Record wrapping an external two-phase resource.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use durabletx_common::{
    FinishOutcome, InputObjectState, OutputObjectState, PrepareOutcome, RecordType, Result, Uid,
};
use durabletx_participant::{Resource, ResourceDirectory, ResourceError, Vote};

use super::{pack_heuristic, unpack_heuristic, AbstractRecord};

/// Drives a [`Resource`] through prepare, commit and rollback.
///
/// The log entry holds the resource name and the transaction uid; at
/// recovery the resource is found again through the [`ResourceDirectory`].
/// A resource that is not registered yet makes every phase-two call answer
/// [`FinishOutcome::Error`], which leaves the record for the next recovery
/// pass.
#[derive(Debug)]
pub struct TwoPhaseRecord {
    uid: Uid,
    resource_name: String,
    resource: Option<Arc<dyn Resource>>,
    directory: Option<Arc<ResourceDirectory>>,
    xid: Option<Uid>,
    read_only: bool,
    heuristic: Option<FinishOutcome>,
}

impl TwoPhaseRecord {
    pub fn new(resource: Arc<dyn Resource>) -> Self {
        Self {
            uid: Uid::new(),
            resource_name: resource.name().to_string(),
            resource: Some(resource),
            directory: None,
            xid: None,
            read_only: false,
            heuristic: None,
        }
    }

    /// An empty record to be filled by `restore_state`.
    pub fn for_recovery(directory: Arc<ResourceDirectory>) -> Self {
        Self {
            uid: Uid::nil(),
            resource_name: String::new(),
            resource: None,
            directory: Some(directory),
            xid: None,
            read_only: false,
            heuristic: None,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    fn resource(&mut self) -> Option<Arc<dyn Resource>> {
        if self.resource.is_none() {
            self.resource = self
                .directory
                .as_ref()
                .and_then(|directory| directory.get(&self.resource_name));
        }
        self.resource.clone()
    }

    fn xid(&self, tx: Uid) -> Uid {
        self.xid.unwrap_or(tx)
    }

    /// Map the answer to a phase-two call after a successful prepare.
    fn finish(&mut self, result: std::result::Result<(), ResourceError>) -> FinishOutcome {
        let outcome = match result {
            Ok(()) | Err(ResourceError::NotFound(_)) => FinishOutcome::Ok,
            Err(ResourceError::HeuristicCommit) => FinishOutcome::HeuristicCommit,
            Err(ResourceError::HeuristicRollback) => FinishOutcome::HeuristicRollback,
            Err(ResourceError::HeuristicMixed) => FinishOutcome::HeuristicMixed,
            Err(ResourceError::HeuristicHazard) | Err(ResourceError::Failed(_)) => {
                FinishOutcome::HeuristicHazard
            }
            Err(ResourceError::Transient(reason)) => {
                warn!(resource = %self.resource_name, reason = %reason, "Resource unavailable, will retry");
                FinishOutcome::Error
            }
        };
        if outcome.is_heuristic() {
            self.heuristic = Some(outcome);
        }
        outcome
    }

    fn unbound(&self) -> FinishOutcome {
        warn!(
            record = %self.uid,
            resource = %self.resource_name,
            "Resource not registered, will retry"
        );
        FinishOutcome::Error
    }
}

#[async_trait]
impl AbstractRecord for TwoPhaseRecord {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn order(&self) -> Uid {
        self.uid
    }

    fn record_type(&self) -> RecordType {
        RecordType::TWO_PHASE
    }

    async fn top_level_prepare(&mut self, tx: Uid) -> PrepareOutcome {
        self.xid = Some(tx);
        let Some(resource) = self.resource() else {
            return PrepareOutcome::NotOk;
        };
        match resource.prepare(tx).await {
            Ok(Vote::Commit) => PrepareOutcome::Ok,
            Ok(Vote::ReadOnly) => {
                self.read_only = true;
                PrepareOutcome::ReadOnly
            }
            Ok(Vote::Rollback) => PrepareOutcome::NotOk,
            Err(e) => {
                warn!(resource = %self.resource_name, tx = %tx, error = %e, "Prepare failed");
                PrepareOutcome::NotOk
            }
        }
    }

    async fn top_level_commit(&mut self, tx: Uid) -> FinishOutcome {
        if self.read_only {
            return FinishOutcome::Ok;
        }
        let xid = self.xid(tx);
        let Some(resource) = self.resource() else {
            return self.unbound();
        };
        let result = resource.commit(xid, false).await;
        self.finish(result)
    }

    async fn top_level_abort(&mut self, tx: Uid) -> FinishOutcome {
        if self.read_only {
            return FinishOutcome::Ok;
        }
        let xid = self.xid(tx);
        let Some(resource) = self.resource() else {
            return self.unbound();
        };
        let result = resource.rollback(xid).await;
        self.finish(result)
    }

    async fn top_level_one_phase_commit(&mut self, tx: Uid) -> FinishOutcome {
        self.xid = Some(tx);
        let Some(resource) = self.resource() else {
            return FinishOutcome::Error;
        };
        let outcome = match resource.commit(tx, true).await {
            Ok(()) | Err(ResourceError::HeuristicCommit) => FinishOutcome::Ok,
            Err(ResourceError::HeuristicRollback)
            | Err(ResourceError::NotFound(_))
            | Err(ResourceError::Failed(_)) => FinishOutcome::Error,
            Err(ResourceError::HeuristicMixed) => FinishOutcome::HeuristicMixed,
            Err(ResourceError::HeuristicHazard) | Err(ResourceError::Transient(_)) => {
                FinishOutcome::HeuristicHazard
            }
        };
        if outcome.is_heuristic() {
            error!(resource = %self.resource_name, tx = %tx, outcome = ?outcome, "One-phase commit outcome unknown");
            self.heuristic = Some(outcome);
        }
        outcome
    }

    async fn nested_abort(&mut self, tx: Uid) -> FinishOutcome {
        let Some(resource) = self.resource() else {
            return self.unbound();
        };
        let result = resource.rollback(tx).await;
        self.finish(result)
    }

    fn does_save(&self) -> bool {
        true
    }

    fn save_state(&self, os: &mut OutputObjectState) -> Result<()> {
        os.pack_uid(&self.uid);
        os.pack_string(&self.resource_name)?;
        os.pack_bool(self.xid.is_some());
        if let Some(xid) = &self.xid {
            os.pack_uid(xid);
        }
        os.pack_bool(self.read_only);
        pack_heuristic(os, self.heuristic);
        Ok(())
    }

    fn restore_state(&mut self, is: &mut InputObjectState) -> Result<()> {
        self.uid = is.unpack_uid()?;
        self.resource_name = is.unpack_string()?;
        self.xid = if is.unpack_bool()? {
            Some(is.unpack_uid()?)
        } else {
            None
        };
        self.read_only = is.unpack_bool()?;
        self.heuristic = unpack_heuristic(is)?;
        self.resource = None;
        Ok(())
    }

    async fn forget_heuristic(&mut self, tx: Uid) -> bool {
        let xid = self.xid(tx);
        let Some(resource) = self.resource() else {
            return false;
        };
        match resource.forget(xid).await {
            Ok(()) | Err(ResourceError::NotFound(_)) => {
                self.heuristic = None;
                true
            }
            Err(e) => {
                warn!(resource = %self.resource_name, tx = %xid, error = %e, "Forget failed");
                false
            }
        }
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
    use durabletx_participant::ScriptedResource;

    fn create_test_record(resource: ScriptedResource) -> (TwoPhaseRecord, Arc<ScriptedResource>) {
        let resource = Arc::new(resource);
        (TwoPhaseRecord::new(resource.clone()), resource)
    }

    #[tokio::test]
    async fn test_prepare_and_commit() {
        let (mut record, resource) = create_test_record(ScriptedResource::new("db"));
        let tx = Uid::new();

        assert_eq!(record.top_level_prepare(tx).await, PrepareOutcome::Ok);
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
        assert!(resource.is_committed(tx));
        assert_eq!(record.heuristic_outcome(), None);
    }

    #[tokio::test]
    async fn test_replayed_commit_is_ok() {
        let (mut record, resource) = create_test_record(ScriptedResource::new("db"));
        let tx = Uid::new();

        record.top_level_prepare(tx).await;
        record.top_level_commit(tx).await;
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(resource.committed_count(), 1);
    }

    #[tokio::test]
    async fn test_vote_mapping() {
        let tx = Uid::new();
        let (mut no, _) = create_test_record(ScriptedResource::new("a").with_vote(Vote::Rollback));
        assert_eq!(no.top_level_prepare(tx).await, PrepareOutcome::NotOk);

        let (mut ro, resource) =
            create_test_record(ScriptedResource::new("b").with_vote(Vote::ReadOnly));
        assert_eq!(ro.top_level_prepare(tx).await, PrepareOutcome::ReadOnly);
        assert_eq!(ro.top_level_commit(tx).await, FinishOutcome::Ok);
        assert_eq!(resource.calls().commit, 0);

        let (mut err, _) = create_test_record(
            ScriptedResource::new("c").with_prepare_error(ResourceError::Failed("down".into())),
        );
        assert_eq!(err.top_level_prepare(tx).await, PrepareOutcome::NotOk);
    }

    #[tokio::test]
    async fn test_heuristic_is_remembered_and_forgotten() {
        let (mut record, resource) = create_test_record(
            ScriptedResource::new("db").with_commit_error(ResourceError::HeuristicRollback),
        );
        let tx = Uid::new();

        record.top_level_prepare(tx).await;
        assert_eq!(
            record.top_level_commit(tx).await,
            FinishOutcome::HeuristicRollback
        );
        assert_eq!(
            record.heuristic_outcome(),
            Some(FinishOutcome::HeuristicRollback)
        );

        assert!(record.forget_heuristic(tx).await);
        assert_eq!(record.heuristic_outcome(), None);
        assert_eq!(resource.pending_heuristics(), 0);
    }

    #[tokio::test]
    async fn test_transient_commit_is_error() {
        let (mut record, _) =
            create_test_record(ScriptedResource::new("db").with_transient_failures(1));
        let tx = Uid::new();

        record.top_level_prepare(tx).await;
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Error);
        assert_eq!(record.top_level_commit(tx).await, FinishOutcome::Ok);
    }

    #[tokio::test]
    async fn test_save_and_restore_rebinds_resource() {
        let resource = Arc::new(ScriptedResource::new("db"));
        let directory = Arc::new(ResourceDirectory::new());
        directory.register(resource.clone());

        let mut record = TwoPhaseRecord::new(resource.clone());
        let tx = Uid::new();
        record.top_level_prepare(tx).await;

        let mut os = OutputObjectState::new(record.uid(), "/Record/TwoPhase");
        record.save_state(&mut os).unwrap();

        let mut restored = TwoPhaseRecord::for_recovery(directory);
        restored.restore_state(&mut os.into_input()).unwrap();
        assert_eq!(restored.uid(), record.uid());
        assert_eq!(restored.resource_name(), "db");

        assert_eq!(restored.top_level_commit(Uid::nil()).await, FinishOutcome::Ok);
        assert!(resource.is_committed(tx));
    }

    #[tokio::test]
    async fn test_unregistered_resource_is_retried() {
        let mut record = TwoPhaseRecord::new(Arc::new(ScriptedResource::new("gone")));
        let mut os = OutputObjectState::new(record.uid(), "/Record/TwoPhase");
        record.top_level_prepare(Uid::new()).await;
        record.save_state(&mut os).unwrap();

        let mut restored = TwoPhaseRecord::for_recovery(Arc::new(ResourceDirectory::new()));
        restored.restore_state(&mut os.into_input()).unwrap();
        assert_eq!(restored.top_level_commit(Uid::new()).await, FinishOutcome::Error);
    }
}
