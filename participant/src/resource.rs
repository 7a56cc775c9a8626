//! The resource manager interface.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use durabletx_common::Uid;

/// A resource's answer to prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    /// Work is durable and can be committed on request.
    Commit,
    /// Nothing was changed; the resource leaves the protocol.
    ReadOnly,
    /// The resource cannot commit and has already rolled back.
    Rollback,
}

/// Errors a resource may report from a protocol call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The resource unilaterally committed.
    #[error("heuristic commit")]
    HeuristicCommit,

    /// The resource unilaterally rolled back.
    #[error("heuristic rollback")]
    HeuristicRollback,

    /// Part of the work committed and part rolled back.
    #[error("heuristic mixed")]
    HeuristicMixed,

    /// The outcome of the work is unknown.
    #[error("heuristic hazard")]
    HeuristicHazard,

    /// The resource has no record of the transaction, usually because it
    /// already completed it.
    #[error("transaction {0} not known to resource")]
    NotFound(Uid),

    /// A temporary failure; the call should be retried later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The resource failed the call.
    #[error("resource failure: {0}")]
    Failed(String),
}

impl ResourceError {
    /// Whether the resource made a heuristic decision.
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            ResourceError::HeuristicCommit
                | ResourceError::HeuristicRollback
                | ResourceError::HeuristicMixed
                | ResourceError::HeuristicHazard
        )
    }
}

/// An external resource manager taking part in two-phase commit.
///
/// The coordinator calls `prepare` once, then exactly one of `commit` or
/// `rollback`; after a crash either may be called again for the same `xid`.
/// Implementations must treat a repeated call as a no-op, typically by
/// answering [`ResourceError::NotFound`].
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    /// Stable name under which the resource is registered in a
    /// [`ResourceDirectory`](crate::ResourceDirectory).
    fn name(&self) -> &str;

    /// Prepare the work done under `xid`.
    async fn prepare(&self, xid: Uid) -> Result<Vote, ResourceError>;

    /// Commit the work. With `one_phase` set, no prepare preceded the call.
    async fn commit(&self, xid: Uid, one_phase: bool) -> Result<(), ResourceError>;

    /// Roll back the work.
    async fn rollback(&self, xid: Uid) -> Result<(), ResourceError>;

    /// Discard a heuristic decision previously reported for `xid`.
    async fn forget(&self, xid: Uid) -> Result<(), ResourceError>;
}
