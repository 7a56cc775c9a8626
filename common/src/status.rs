//! Transaction status, two-phase outcomes and the status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an action (transaction) representing its lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Begun, accepting enlistments.
    Active,
    /// Marked rollback-only; can only be aborted.
    AbortOnly,
    /// Running the prepare phase.
    Preparing,
    /// All participants voted to commit and the decision is logged.
    Prepared,
    /// Running phase-two commit.
    Committing,
    /// Committed cleanly.
    Committed,
    /// Running phase-two abort.
    Aborting,
    /// Aborted cleanly.
    Aborted,
    /// Every divergent participant committed although the decision was abort.
    HeuristicCommit,
    /// Every divergent participant rolled back although the decision was commit.
    HeuristicRollback,
    /// Some participants committed and some rolled back.
    HeuristicMixed,
    /// The outcome of at least one participant is unknown.
    HeuristicHazard,
    /// Unrecoverable internal error.
    Invalid,
}

impl ActionStatus {
    /// Check if this is a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Committed
                | ActionStatus::Aborted
                | ActionStatus::HeuristicCommit
                | ActionStatus::HeuristicRollback
                | ActionStatus::HeuristicMixed
                | ActionStatus::HeuristicHazard
        )
    }

    /// Check if this is one of the heuristic outcomes.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            ActionStatus::HeuristicCommit
                | ActionStatus::HeuristicRollback
                | ActionStatus::HeuristicMixed
                | ActionStatus::HeuristicHazard
        )
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[ActionStatus] {
        use ActionStatus::*;
        match self {
            Active => &[
                Preparing, Aborting, AbortOnly, Committing, Committed, Aborted, Invalid,
            ],
            AbortOnly => &[Aborting, Invalid],
            Preparing => &[Prepared, Committed, Aborting, Invalid],
            Prepared => &[Committing, Aborting, Invalid],
            Committing => &[
                Committed,
                HeuristicCommit,
                HeuristicRollback,
                HeuristicMixed,
                HeuristicHazard,
                Aborted,
                Invalid,
            ],
            Aborting => &[
                Aborted,
                HeuristicCommit,
                HeuristicRollback,
                HeuristicMixed,
                HeuristicHazard,
                Invalid,
            ],
            HeuristicCommit | HeuristicRollback | HeuristicMixed | HeuristicHazard => {
                &[Committed, Aborted]
            }
            Committed => &[],
            Aborted => &[],
            Invalid => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Code used in the persisted transaction log.
    pub fn code(&self) -> i32 {
        match self {
            ActionStatus::Active => 0,
            ActionStatus::AbortOnly => 1,
            ActionStatus::Preparing => 2,
            ActionStatus::Prepared => 3,
            ActionStatus::Committing => 4,
            ActionStatus::Committed => 5,
            ActionStatus::Aborting => 6,
            ActionStatus::Aborted => 7,
            ActionStatus::HeuristicCommit => 8,
            ActionStatus::HeuristicRollback => 9,
            ActionStatus::HeuristicMixed => 10,
            ActionStatus::HeuristicHazard => 11,
            ActionStatus::Invalid => 12,
        }
    }

    /// Inverse of [`ActionStatus::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => ActionStatus::Active,
            1 => ActionStatus::AbortOnly,
            2 => ActionStatus::Preparing,
            3 => ActionStatus::Prepared,
            4 => ActionStatus::Committing,
            5 => ActionStatus::Committed,
            6 => ActionStatus::Aborting,
            7 => ActionStatus::Aborted,
            8 => ActionStatus::HeuristicCommit,
            9 => ActionStatus::HeuristicRollback,
            10 => ActionStatus::HeuristicMixed,
            11 => ActionStatus::HeuristicHazard,
            12 => ActionStatus::Invalid,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The coordinator's decision once prepare has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// No decision yet.
    Undecided,
    Commit,
    Abort,
}

impl Decision {
    /// Code used in the persisted transaction log.
    pub fn code(&self) -> i32 {
        match self {
            Decision::Undecided => 0,
            Decision::Commit => 1,
            Decision::Abort => 2,
        }
    }

    /// Inverse of [`Decision::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Decision::Undecided),
            1 => Some(Decision::Commit),
            2 => Some(Decision::Abort),
            _ => None,
        }
    }

    /// The clean terminal status for this decision.
    pub fn clean_status(&self) -> ActionStatus {
        match self {
            Decision::Commit => ActionStatus::Committed,
            Decision::Abort | Decision::Undecided => ActionStatus::Aborted,
        }
    }
}

/// Vote returned by a participant from the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrepareOutcome {
    /// Durable and ready to commit.
    Ok,
    /// Cannot commit; the transaction must abort.
    NotOk,
    /// Did no updates; takes no part in phase two.
    ReadOnly,
}

/// Result of a phase-two call on a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishOutcome {
    /// Completed as requested.
    Ok,
    /// Could not complete now; retry later.
    Error,
    HeuristicCommit,
    HeuristicRollback,
    HeuristicMixed,
    HeuristicHazard,
}

impl FinishOutcome {
    /// Check if this outcome is a heuristic report.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            FinishOutcome::HeuristicCommit
                | FinishOutcome::HeuristicRollback
                | FinishOutcome::HeuristicMixed
                | FinishOutcome::HeuristicHazard
        )
    }

    /// Check if a heuristic outcome agrees with the coordinator's decision.
    pub fn agrees_with(&self, decision: Decision) -> bool {
        match self {
            FinishOutcome::Ok => true,
            FinishOutcome::HeuristicCommit => decision == Decision::Commit,
            FinishOutcome::HeuristicRollback => decision == Decision::Abort,
            _ => false,
        }
    }

    /// Code used in the persisted transaction log.
    pub fn code(&self) -> i32 {
        match self {
            FinishOutcome::Ok => 0,
            FinishOutcome::Error => 1,
            FinishOutcome::HeuristicCommit => 2,
            FinishOutcome::HeuristicRollback => 3,
            FinishOutcome::HeuristicMixed => 4,
            FinishOutcome::HeuristicHazard => 5,
        }
    }

    /// Inverse of [`FinishOutcome::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        let outcome = match code {
            0 => FinishOutcome::Ok,
            1 => FinishOutcome::Error,
            2 => FinishOutcome::HeuristicCommit,
            3 => FinishOutcome::HeuristicRollback,
            4 => FinishOutcome::HeuristicMixed,
            5 => FinishOutcome::HeuristicHazard,
            _ => return None,
        };
        Some(outcome)
    }
}

/// Result of adding a record to an action's intentions list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddOutcome {
    /// Added, merged or replaced an equivalent record.
    Ok,
    /// Rejected by the insertion rules of an equivalent record.
    Duplicate,
    /// The action no longer accepts records.
    Invalid,
}

/// Tag identifying the concrete kind of a record.
///
/// The tag is persisted in front of each record in the transaction log and
/// resolved through the record-type registry during recovery. Ties between
/// records with equal order are broken by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordType(pub i32);

impl RecordType {
    /// Terminates a list of records in the transaction log.
    pub const NONE: RecordType = RecordType(-1);
    pub const PERSISTENCE: RecordType = RecordType(10);
    pub const LOCK: RecordType = RecordType(20);
    pub const TWO_PHASE: RecordType = RecordType(30);
    pub const LAST_RESOURCE: RecordType = RecordType(40);

    /// Human readable name for built-in tags.
    pub fn name(&self) -> &'static str {
        match *self {
            RecordType::NONE => "none",
            RecordType::PERSISTENCE => "persistence",
            RecordType::LOCK => "lock",
            RecordType::TWO_PHASE => "two-phase",
            RecordType::LAST_RESOURCE => "last-resource",
            _ => "user",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_path_transitions() {
        let mut status = ActionStatus::Active;
        for next in [
            ActionStatus::Preparing,
            ActionStatus::Prepared,
            ActionStatus::Committing,
            ActionStatus::Committed,
        ] {
            assert!(status.can_transition_to(next), "{status:?} -> {next:?}");
            status = next;
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!ActionStatus::Prepared.can_transition_to(ActionStatus::Active));
        assert!(!ActionStatus::Committed.can_transition_to(ActionStatus::Committing));
        assert!(!ActionStatus::Aborted.can_transition_to(ActionStatus::Committed));
        assert!(!ActionStatus::AbortOnly.can_transition_to(ActionStatus::Preparing));
    }

    #[test]
    fn test_heuristic_clears_to_clean_outcome() {
        assert!(ActionStatus::HeuristicMixed.can_transition_to(ActionStatus::Committed));
        assert!(ActionStatus::HeuristicHazard.can_transition_to(ActionStatus::Aborted));
        assert!(!ActionStatus::HeuristicMixed.can_transition_to(ActionStatus::HeuristicHazard));
    }

    #[test]
    fn test_status_codes() {
        for code in 0..=12 {
            let status = ActionStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(ActionStatus::from_code(13).is_none());
    }

    #[test]
    fn test_outcome_agreement() {
        assert!(FinishOutcome::HeuristicCommit.agrees_with(Decision::Commit));
        assert!(!FinishOutcome::HeuristicCommit.agrees_with(Decision::Abort));
        assert!(FinishOutcome::HeuristicRollback.agrees_with(Decision::Abort));
        assert!(!FinishOutcome::HeuristicMixed.agrees_with(Decision::Commit));
        assert!(!FinishOutcome::Error.agrees_with(Decision::Commit));
    }

    #[test]
    fn test_record_type_ordering() {
        assert!(RecordType::PERSISTENCE < RecordType::TWO_PHASE);
        assert!(RecordType::TWO_PHASE < RecordType::LAST_RESOURCE);
        assert_eq!(RecordType::LOCK.name(), "lock");
        assert_eq!(RecordType(99).name(), "user");
    }
}
