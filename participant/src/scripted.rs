//! A resource whose behavior is scripted, for tests and simulation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use durabletx_common::Uid;

use crate::resource::{Resource, ResourceError, Vote};

/// Scripted answers for each protocol call.
#[derive(Debug, Clone)]
struct Script {
    vote: Result<Vote, ResourceError>,
    on_commit: Option<ResourceError>,
    on_rollback: Option<ResourceError>,
    transient_failures: u32,
    latency: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            vote: Ok(Vote::Commit),
            on_commit: None,
            on_rollback: None,
            transient_failures: 0,
            latency: None,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    prepared: HashSet<Uid>,
    committed: HashSet<Uid>,
    rolled_back: HashSet<Uid>,
    heuristics: HashMap<Uid, ResourceError>,
}

/// Snapshot of how often each call was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub prepare: u64,
    pub commit: u64,
    pub rollback: u64,
    pub forget: u64,
}

/// In-memory resource driven by a script.
///
/// Keeps a ledger of which transactions it prepared, committed and rolled
/// back. A commit or rollback for a transaction it has already finished
/// answers [`ResourceError::NotFound`], so replays never apply work twice.
#[derive(Debug)]
pub struct ScriptedResource {
    name: String,
    script: Mutex<Script>,
    ledger: Mutex<Ledger>,
    prepare_calls: AtomicU64,
    commit_calls: AtomicU64,
    rollback_calls: AtomicU64,
    forget_calls: AtomicU64,
}

impl ScriptedResource {
    /// A resource that votes commit and completes every call.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(Script::default()),
            ledger: Mutex::new(Ledger::default()),
            prepare_calls: AtomicU64::new(0),
            commit_calls: AtomicU64::new(0),
            rollback_calls: AtomicU64::new(0),
            forget_calls: AtomicU64::new(0),
        }
    }

    pub fn with_vote(self, vote: Vote) -> Self {
        self.script.lock().vote = Ok(vote);
        self
    }

    /// Fail prepare with `error`.
    pub fn with_prepare_error(self, error: ResourceError) -> Self {
        self.script.lock().vote = Err(error);
        self
    }

    /// Answer every commit with `error`.
    pub fn with_commit_error(self, error: ResourceError) -> Self {
        self.set_commit_error(Some(error));
        self
    }

    /// Answer every rollback with `error`.
    pub fn with_rollback_error(self, error: ResourceError) -> Self {
        self.script.lock().on_rollback = Some(error);
        self
    }

    /// Fail the next `count` commit or rollback calls with a transient error.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.script.lock().transient_failures = count;
        self
    }

    /// Delay every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.script.lock().latency = Some(latency);
        self
    }

    /// Change the commit answer after construction.
    pub fn set_commit_error(&self, error: Option<ResourceError>) {
        self.script.lock().on_commit = error;
    }

    /// Call counts so far.
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            prepare: self.prepare_calls.load(Ordering::Relaxed),
            commit: self.commit_calls.load(Ordering::Relaxed),
            rollback: self.rollback_calls.load(Ordering::Relaxed),
            forget: self.forget_calls.load(Ordering::Relaxed),
        }
    }

    /// Number of transactions whose work was applied.
    pub fn committed_count(&self) -> usize {
        self.ledger.lock().committed.len()
    }

    /// Number of transactions whose work was discarded.
    pub fn rolled_back_count(&self) -> usize {
        self.ledger.lock().rolled_back.len()
    }

    pub fn is_committed(&self, xid: Uid) -> bool {
        self.ledger.lock().committed.contains(&xid)
    }

    pub fn is_in_doubt(&self, xid: Uid) -> bool {
        self.ledger.lock().prepared.contains(&xid)
    }

    /// Heuristic decisions not yet forgotten.
    pub fn pending_heuristics(&self) -> usize {
        self.ledger.lock().heuristics.len()
    }

    async fn delay(&self) {
        let latency = self.script.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_transient(&self) -> Option<ResourceError> {
        let mut script = self.script.lock();
        if script.transient_failures > 0 {
            script.transient_failures -= 1;
            Some(ResourceError::Transient(format!("{} unavailable", self.name)))
        } else {
            None
        }
    }

    /// Finish `xid` in the direction given by `commit`, applying `scripted`
    /// if present.
    fn finish(
        &self,
        xid: Uid,
        commit: bool,
        one_phase: bool,
        scripted: Option<ResourceError>,
    ) -> Result<(), ResourceError> {
        let mut ledger = self.ledger.lock();
        if let Some(previous) = ledger.heuristics.get(&xid) {
            return Err(previous.clone());
        }
        if ledger.committed.contains(&xid) || ledger.rolled_back.contains(&xid) {
            return Err(ResourceError::NotFound(xid));
        }
        if !ledger.prepared.remove(&xid) && !one_phase {
            return Err(ResourceError::NotFound(xid));
        }

        match scripted {
            Some(error @ ResourceError::HeuristicCommit) => {
                ledger.committed.insert(xid);
                ledger.heuristics.insert(xid, error.clone());
                Err(error)
            }
            Some(error @ ResourceError::HeuristicRollback) => {
                ledger.rolled_back.insert(xid);
                ledger.heuristics.insert(xid, error.clone());
                Err(error)
            }
            Some(error) if error.is_heuristic() => {
                ledger.heuristics.insert(xid, error.clone());
                Err(error)
            }
            Some(error) => {
                ledger.prepared.insert(xid);
                Err(error)
            }
            None if commit => {
                ledger.committed.insert(xid);
                Ok(())
            }
            None => {
                ledger.rolled_back.insert(xid);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Resource for ScriptedResource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, xid: Uid) -> Result<Vote, ResourceError> {
        self.prepare_calls.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        let vote = self.script.lock().vote.clone()?;
        let mut ledger = self.ledger.lock();
        match vote {
            Vote::Commit => {
                ledger.prepared.insert(xid);
            }
            Vote::Rollback => {
                ledger.rolled_back.insert(xid);
            }
            Vote::ReadOnly => {}
        }
        debug!(resource = %self.name, xid = %xid, vote = ?vote, "Prepared");
        Ok(vote)
    }

    async fn commit(&self, xid: Uid, one_phase: bool) -> Result<(), ResourceError> {
        self.commit_calls.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        if let Some(transient) = self.take_transient() {
            return Err(transient);
        }
        let scripted = self.script.lock().on_commit.clone();
        let result = self.finish(xid, true, one_phase, scripted);
        debug!(resource = %self.name, xid = %xid, one_phase, ok = result.is_ok(), "Commit");
        result
    }

    async fn rollback(&self, xid: Uid) -> Result<(), ResourceError> {
        self.rollback_calls.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        if let Some(transient) = self.take_transient() {
            return Err(transient);
        }
        let scripted = self.script.lock().on_rollback.clone();
        let result = self.finish(xid, false, true, scripted);
        debug!(resource = %self.name, xid = %xid, ok = result.is_ok(), "Rollback");
        result
    }

    async fn forget(&self, xid: Uid) -> Result<(), ResourceError> {
        self.forget_calls.fetch_add(1, Ordering::Relaxed);
        match self.ledger.lock().heuristics.remove(&xid) {
            Some(_) => {
                info!(resource = %self.name, xid = %xid, "Heuristic forgotten");
                Ok(())
            }
            None => Err(ResourceError::NotFound(xid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_once() {
        let resource = ScriptedResource::new("db");
        let xid = Uid::new();

        assert_eq!(resource.prepare(xid).await.unwrap(), Vote::Commit);
        assert!(resource.is_in_doubt(xid));
        resource.commit(xid, false).await.unwrap();
        assert!(resource.is_committed(xid));

        assert_eq!(
            resource.commit(xid, false).await,
            Err(ResourceError::NotFound(xid))
        );
        assert_eq!(resource.committed_count(), 1);
        assert_eq!(resource.calls().commit, 2);
    }

    #[tokio::test]
    async fn test_commit_without_prepare_needs_one_phase() {
        let resource = ScriptedResource::new("db");
        let xid = Uid::new();

        assert_eq!(
            resource.commit(xid, false).await,
            Err(ResourceError::NotFound(xid))
        );
        resource.commit(xid, true).await.unwrap();
        assert!(resource.is_committed(xid));
    }

    #[tokio::test]
    async fn test_rollback_vote() {
        let resource = ScriptedResource::new("db").with_vote(Vote::Rollback);
        let xid = Uid::new();

        assert_eq!(resource.prepare(xid).await.unwrap(), Vote::Rollback);
        assert_eq!(resource.rolled_back_count(), 1);
        assert_eq!(resource.rollback(xid).await, Err(ResourceError::NotFound(xid)));
    }

    #[tokio::test]
    async fn test_heuristic_is_repeated_until_forgotten() {
        let resource =
            ScriptedResource::new("db").with_commit_error(ResourceError::HeuristicRollback);
        let xid = Uid::new();

        resource.prepare(xid).await.unwrap();
        assert_eq!(
            resource.commit(xid, false).await,
            Err(ResourceError::HeuristicRollback)
        );
        assert_eq!(
            resource.commit(xid, false).await,
            Err(ResourceError::HeuristicRollback)
        );
        assert_eq!(resource.pending_heuristics(), 1);

        resource.forget(xid).await.unwrap();
        assert_eq!(resource.pending_heuristics(), 0);
        assert_eq!(resource.forget(xid).await, Err(ResourceError::NotFound(xid)));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let resource = ScriptedResource::new("db").with_transient_failures(2);
        let xid = Uid::new();

        resource.prepare(xid).await.unwrap();
        assert!(matches!(
            resource.commit(xid, false).await,
            Err(ResourceError::Transient(_))
        ));
        assert!(matches!(
            resource.commit(xid, false).await,
            Err(ResourceError::Transient(_))
        ));
        assert!(resource.is_in_doubt(xid));
        resource.commit(xid, false).await.unwrap();
        assert!(resource.is_committed(xid));
    }

    #[tokio::test]
    async fn test_failed_commit_stays_in_doubt() {
        let resource =
            ScriptedResource::new("db").with_commit_error(ResourceError::Failed("disk".into()));
        let xid = Uid::new();

        resource.prepare(xid).await.unwrap();
        assert!(resource.commit(xid, false).await.is_err());
        assert!(resource.is_in_doubt(xid));

        resource.set_commit_error(None);
        resource.commit(xid, false).await.unwrap();
        assert_eq!(resource.committed_count(), 1);
    }

    #[tokio::test]
    async fn test_prepare_error() {
        let resource =
            ScriptedResource::new("db").with_prepare_error(ResourceError::Failed("down".into()));
        assert!(resource.prepare(Uid::new()).await.is_err());
        assert_eq!(resource.calls().prepare, 1);
    }
}
