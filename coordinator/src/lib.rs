//! durabletx coordinator
//!
//! Drives transactions over the two-phase commit protocol: participants are
//! enlisted as records, the outcome is made durable in a transaction log in
//! the object store, and a recovery manager completes any transaction whose
//! log outlives the process that began it.

pub mod action;
pub mod config;
pub mod coordinator;
pub mod heuristics;
pub mod index;
pub mod lock_manager;
pub mod metrics;
pub mod record;
pub mod recovery;
pub mod registry;
pub mod state;

pub use action::{BasicAction, CommitPath, RecordInfo, ACTION_TYPE};
pub use config::{CoordinatorConfig, RecoveryConfig, StoreBackend, StoreConfig};
pub use coordinator::{TransactionManager, TxContext};
pub use heuristics::{HeuristicAdmin, HeuristicReport};
pub use index::{TransactionIndex, TxState};
pub use lock_manager::{LockManager, LockMode, LockResult};
pub use metrics::{Metrics, MetricsSnapshot};
pub use record::{
    AbstractRecord, LastResourceRecord, LockRecord, PersistenceRecord, RecordList, TwoPhaseRecord,
    UnreadableRecord,
};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use registry::{RecordFactory, RecordTypeRegistry};
pub use state::CoordinatorState;
