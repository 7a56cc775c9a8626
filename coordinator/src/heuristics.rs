//! Operator view of transactions left with heuristic outcomes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use durabletx_common::{ActionStatus, ContextId, Decision, Result, TxError, Uid};
use durabletx_store::ObjectStore;

use crate::action::{BasicAction, RecordInfo, ACTION_TYPE};
use crate::index::TransactionIndex;
use crate::registry::RecordTypeRegistry;

/// A logged transaction with unresolved heuristic outcomes.
///
/// A log that cannot be read at all is reported as a hazard with no
/// records and the read error in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct HeuristicReport {
    pub uid: Uid,
    pub status: ActionStatus,
    pub decision: Decision,
    pub records: Vec<RecordInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lists and forgets heuristic outcomes recorded in transaction logs.
#[derive(Debug)]
pub struct HeuristicAdmin {
    context: ContextId,
    store: Arc<dyn ObjectStore>,
    registry: Arc<RecordTypeRegistry>,
    index: Arc<TransactionIndex>,
}

impl HeuristicAdmin {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<RecordTypeRegistry>,
        index: Arc<TransactionIndex>,
    ) -> Self {
        Self {
            context: ContextId::new(),
            store,
            registry,
            index,
        }
    }

    /// Every logged, non-live transaction whose heuristic list is non-empty,
    /// plus every log that could not be read.
    pub fn list(&self) -> Result<Vec<HeuristicReport>> {
        let mut reports = Vec::new();
        for uid in self.store.all_ids(ACTION_TYPE)? {
            if self.index.is_live(uid) {
                continue;
            }
            let action = match BasicAction::restore(
                uid,
                self.context,
                Arc::clone(&self.store),
                &self.registry,
            ) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tx = %uid, error = %e, "Unreadable transaction log");
                    reports.push(HeuristicReport {
                        uid,
                        status: ActionStatus::HeuristicHazard,
                        decision: Decision::Undecided,
                        records: Vec::new(),
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };
            let records = action.heuristic_records();
            if !records.is_empty() {
                reports.push(HeuristicReport {
                    uid,
                    status: action.status(),
                    decision: action.decision(),
                    records,
                    error: None,
                });
            }
        }
        Ok(reports)
    }

    /// Forget the heuristic outcomes of `uid`, returning its new status.
    #[instrument(skip(self))]
    pub async fn forget(&self, uid: Uid) -> Result<ActionStatus> {
        let Some(_claim) = self.index.claim_for_recovery(uid) else {
            return Err(TxError::Unavailable(format!(
                "transaction {uid} is live or being recovered"
            )));
        };
        let mut action = BasicAction::restore(
            uid,
            self.context,
            Arc::clone(&self.store),
            &self.registry,
        )?
        .ok_or(TxError::TransactionNotFound(uid))?;

        let status = action.forget_heuristics().await?;
        info!(
            tx = %uid,
            status = %status,
            remaining = action.heuristic_records().len(),
            "Heuristic outcomes forgotten"
        );
        Ok(status)
    }
}
