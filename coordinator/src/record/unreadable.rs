//! Placeholder for a log entry that could not be rebuilt.

use std::any::Any;

use async_trait::async_trait;
use tracing::error;

use durabletx_common::{
    FinishOutcome, InputObjectState, OutputObjectState, PrepareOutcome, RecordType, Result, Uid,
};

use super::AbstractRecord;

/// Stands in for a record whose type has no factory or whose state did not
/// unpack.
///
/// The entry's bytes are written back unchanged, so the log keeps what it
/// held. Nothing can be driven through it: every phase answers
/// [`FinishOutcome::HeuristicHazard`] until an operator forgets it.
#[derive(Debug)]
pub struct UnreadableRecord {
    uid: Uid,
    record_type: RecordType,
    state: Vec<u8>,
    reason: String,
    forgotten: bool,
}

impl UnreadableRecord {
    pub fn new(
        record_type: RecordType,
        state: &InputObjectState,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            uid: state.uid(),
            record_type,
            state: state.buffer().to_vec(),
            reason: reason.into(),
            forgotten: false,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn hazard(&self, tx: Uid) -> FinishOutcome {
        error!(
            record = %self.uid,
            record_type = %self.record_type,
            tx = %tx,
            reason = %self.reason,
            "Unreadable record cannot be completed"
        );
        FinishOutcome::HeuristicHazard
    }
}

#[async_trait]
impl AbstractRecord for UnreadableRecord {
    fn uid(&self) -> Uid {
        self.uid
    }

    fn order(&self) -> Uid {
        self.uid
    }

    fn record_type(&self) -> RecordType {
        self.record_type
    }

    async fn top_level_prepare(&mut self, _tx: Uid) -> PrepareOutcome {
        PrepareOutcome::NotOk
    }

    async fn top_level_commit(&mut self, tx: Uid) -> FinishOutcome {
        self.hazard(tx)
    }

    async fn top_level_abort(&mut self, tx: Uid) -> FinishOutcome {
        self.hazard(tx)
    }

    fn supports_one_phase(&self) -> bool {
        false
    }

    fn does_save(&self) -> bool {
        !self.forgotten
    }

    fn save_state(&self, os: &mut OutputObjectState) -> Result<()> {
        os.pack_raw(&self.state);
        Ok(())
    }

    async fn forget_heuristic(&mut self, _tx: Uid) -> bool {
        self.forgotten = true;
        true
    }

    fn heuristic_outcome(&self) -> Option<FinishOutcome> {
        (!self.forgotten).then_some(FinishOutcome::HeuristicHazard)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keeps_bytes_and_reports_hazard() {
        let mut original = OutputObjectState::new(Uid::new(), "/action/user");
        original.pack_i32(7);
        original.pack_string("opaque").unwrap();
        let input = InputObjectState::from_output(&original);

        let mut record = UnreadableRecord::new(RecordType(77), &input, "no factory");
        assert_eq!(record.uid(), original.uid());
        assert_eq!(record.record_type(), RecordType(77));
        assert_eq!(record.reason(), "no factory");
        assert_eq!(
            record.top_level_commit(Uid::new()).await,
            FinishOutcome::HeuristicHazard
        );

        let mut rewritten = OutputObjectState::new(record.uid(), "/action/user");
        record.save_state(&mut rewritten).unwrap();
        assert_eq!(rewritten.buffer(), original.buffer());

        assert!(record.forget_heuristic(Uid::new()).await);
        assert_eq!(record.heuristic_outcome(), None);
        assert!(!record.does_save());
    }
}
