//! Last-resource commit optimization.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use durabletx_common::{
    FinishOutcome, InputObjectState, OutputObjectState, PrepareOutcome, RecordType, Result, Uid,
};
use durabletx_participant::{Resource, ResourceDirectory, ResourceError};

use super::{pack_heuristic, unpack_heuristic, AbstractRecord};

/// Enlists a resource that can only commit in one phase.
///
/// The record sorts after every other record, so it is prepared last: by
/// then every two-phase participant has voted, and the one-phase commit of
/// this resource becomes the commit decision. Commit is a no-op afterwards.
///
/// The record is only written to the log while it holds a heuristic
/// outcome, so that the outcome survives until it is forgotten.
#[derive(Debug)]
pub struct LastResourceRecord {
    uid: Uid,
    resource_name: String,
    resource: Option<Arc<dyn Resource>>,
    directory: Option<Arc<ResourceDirectory>>,
    xid: Option<Uid>,
    allow_multiple: bool,
    committed: bool,
    heuristic: Option<FinishOutcome>,
}

impl LastResourceRecord {
    /// `allow_multiple` accepts further last resources in the same action,
    /// giving up atomicity between them.
    pub fn new(resource: Arc<dyn Resource>, allow_multiple: bool) -> Self {
        Self {
            uid: Uid::new(),
            resource_name: resource.name().to_string(),
            resource: Some(resource),
            directory: None,
            xid: None,
            allow_multiple,
            committed: false,
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
            allow_multiple: false,
            committed: false,
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
}

#[async_trait]
impl AbstractRecord for LastResourceRecord {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn order(&self) -> Uid {
        Uid::max()
    }

    fn record_type(&self) -> RecordType {
        RecordType::LAST_RESOURCE
    }

    async fn top_level_prepare(&mut self, tx: Uid) -> PrepareOutcome {
        match self.top_level_one_phase_commit(tx).await {
            FinishOutcome::Ok => PrepareOutcome::Ok,
            outcome => {
                warn!(resource = %self.resource_name, tx = %tx, outcome = ?outcome, "Last resource did not commit");
                PrepareOutcome::NotOk
            }
        }
    }

    async fn top_level_commit(&mut self, _tx: Uid) -> FinishOutcome {
        FinishOutcome::Ok
    }

    async fn top_level_abort(&mut self, tx: Uid) -> FinishOutcome {
        if self.committed {
            error!(resource = %self.resource_name, tx = %tx, "Last resource already committed");
            self.heuristic = Some(FinishOutcome::HeuristicCommit);
            return FinishOutcome::HeuristicCommit;
        }
        let xid = self.xid.unwrap_or(tx);
        let Some(resource) = self.resource() else {
            warn!(resource = %self.resource_name, tx = %xid, "Resource not registered, will retry");
            return FinishOutcome::Error;
        };
        match resource.rollback(xid).await {
            Ok(()) | Err(ResourceError::NotFound(_)) => FinishOutcome::Ok,
            Err(e) => {
                warn!(resource = %self.resource_name, tx = %xid, error = %e, "Rollback failed");
                self.heuristic = Some(FinishOutcome::HeuristicHazard);
                FinishOutcome::HeuristicHazard
            }
        }
    }

    async fn top_level_one_phase_commit(&mut self, tx: Uid) -> FinishOutcome {
        self.xid = Some(tx);
        let Some(resource) = self.resource() else {
            return FinishOutcome::Error;
        };
        let outcome = match resource.commit(tx, true).await {
            Ok(()) | Err(ResourceError::HeuristicCommit) => FinishOutcome::Ok,
            Err(ResourceError::HeuristicMixed) => FinishOutcome::HeuristicMixed,
            Err(ResourceError::HeuristicHazard) | Err(ResourceError::Transient(_)) => {
                FinishOutcome::HeuristicHazard
            }
            Err(_) => FinishOutcome::Error,
        };
        self.committed = outcome == FinishOutcome::Ok;
        if outcome.is_heuristic() {
            self.heuristic = Some(outcome);
        }
        outcome
    }

    fn does_save(&self) -> bool {
        self.heuristic.is_some()
    }

    fn save_state(&self, os: &mut OutputObjectState) -> Result<()> {
        os.pack_uid(&self.uid);
        os.pack_string(&self.resource_name)?;
        os.pack_bool(self.xid.is_some());
        if let Some(xid) = &self.xid {
            os.pack_uid(xid);
        }
        os.pack_bool(self.allow_multiple);
        os.pack_bool(self.committed);
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
        self.allow_multiple = is.unpack_bool()?;
        self.committed = is.unpack_bool()?;
        self.heuristic = unpack_heuristic(is)?;
        self.resource = None;
        Ok(())
    }

    fn should_add(&self, existing: &dyn AbstractRecord) -> bool {
        if self.allow_multiple {
            warn!(
                record = %self.uid,
                existing = %existing.uid(),
                "Multiple last resources enlisted, atomicity between them is not guaranteed"
            );
        }
        self.allow_multiple
    }

    async fn forget_heuristic(&mut self, tx: Uid) -> bool {
        let xid = self.xid.unwrap_or(tx);
        let Some(resource) = self.resource() else {
            return false;
        };
        match resource.forget(xid).await {
            Ok(()) | Err(ResourceError::NotFound(_)) => {
                self.heuristic = None;
                true
            }
            Err(_) => false,
        }
    }

    fn heuristic_outcome(&self) -> Option<FinishOutcome> {
        self.heuristic
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
