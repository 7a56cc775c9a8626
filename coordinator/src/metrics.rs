//! Metrics collection for transaction manager monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use durabletx_common::ActionStatus;

/// Transaction manager metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Top-level transactions begun.
    pub transactions_begun: AtomicU64,
    /// Top-level transactions currently active.
    pub transactions_active: AtomicU64,
    pub transactions_committed: AtomicU64,
    pub transactions_aborted: AtomicU64,
    /// Transactions that ended with a heuristic outcome.
    pub transactions_heuristic: AtomicU64,
    /// Commits that took the one-phase path.
    pub one_phase_commits: AtomicU64,
    /// Commits where every participant voted read-only.
    pub read_only_commits: AtomicU64,
    /// Logged transactions completed by recovery.
    pub transactions_recovered: AtomicU64,
    pub recovery_passes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_begun(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
        self.transactions_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a top-level transaction with `status`.
    pub fn transaction_ended(&self, status: ActionStatus) {
        self.transactions_active.fetch_sub(1, Ordering::Relaxed);
        self.record_outcome(status);
    }

    fn record_outcome(&self, status: ActionStatus) {
        match status {
            ActionStatus::Committed => {
                self.transactions_committed.fetch_add(1, Ordering::Relaxed);
            }
            ActionStatus::Aborted => {
                self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
            }
            s if s.is_heuristic() => {
                self.transactions_heuristic.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn one_phase_commit(&self) {
        self.one_phase_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read_only_commit(&self) {
        self.read_only_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transaction_recovered(&self, status: ActionStatus) {
        self.transactions_recovered.fetch_add(1, Ordering::Relaxed);
        self.record_outcome(status);
    }

    pub fn recovery_pass(&self) {
        self.recovery_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions_begun: self.transactions_begun.load(Ordering::Relaxed),
            transactions_active: self.transactions_active.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            transactions_heuristic: self.transactions_heuristic.load(Ordering::Relaxed),
            one_phase_commits: self.one_phase_commits.load(Ordering::Relaxed),
            read_only_commits: self.read_only_commits.load(Ordering::Relaxed),
            transactions_recovered: self.transactions_recovered.load(Ordering::Relaxed),
            recovery_passes: self.recovery_passes.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP durabletx_transactions_begun Total top-level transactions begun
# TYPE durabletx_transactions_begun counter
durabletx_transactions_begun {}

# HELP durabletx_transactions_active Current active top-level transactions
# TYPE durabletx_transactions_active gauge
durabletx_transactions_active {}

# HELP durabletx_transactions_committed Total committed transactions
# TYPE durabletx_transactions_committed counter
durabletx_transactions_committed {}

# HELP durabletx_transactions_aborted Total aborted transactions
# TYPE durabletx_transactions_aborted counter
durabletx_transactions_aborted {}

# HELP durabletx_transactions_heuristic Total transactions with a heuristic outcome
# TYPE durabletx_transactions_heuristic counter
durabletx_transactions_heuristic {}

# HELP durabletx_one_phase_commits Total one-phase commits
# TYPE durabletx_one_phase_commits counter
durabletx_one_phase_commits {}

# HELP durabletx_read_only_commits Total read-only commits
# TYPE durabletx_read_only_commits counter
durabletx_read_only_commits {}

# HELP durabletx_transactions_recovered Total transactions completed by recovery
# TYPE durabletx_transactions_recovered counter
durabletx_transactions_recovered {}

# HELP durabletx_recovery_passes Total recovery passes
# TYPE durabletx_recovery_passes counter
durabletx_recovery_passes {}
"#,
            snapshot.transactions_begun,
            snapshot.transactions_active,
            snapshot.transactions_committed,
            snapshot.transactions_aborted,
            snapshot.transactions_heuristic,
            snapshot.one_phase_commits,
            snapshot.read_only_commits,
            snapshot.transactions_recovered,
            snapshot.recovery_passes,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transactions_begun: u64,
    pub transactions_active: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub transactions_heuristic: u64,
    pub one_phase_commits: u64,
    pub read_only_commits: u64,
    pub transactions_recovered: u64,
    pub recovery_passes: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.transaction_begun();
        metrics.transaction_begun();
        metrics.transaction_ended(ActionStatus::Committed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transactions_begun, 2);
        assert_eq!(snapshot.transactions_committed, 1);
        assert_eq!(snapshot.transactions_active, 1);
    }

    #[test]
    fn test_heuristic_and_recovered() {
        let metrics = Metrics::new();
        metrics.transaction_recovered(ActionStatus::HeuristicMixed);
        metrics.transaction_recovered(ActionStatus::Aborted);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transactions_recovered, 2);
        assert_eq!(snapshot.transactions_heuristic, 1);
        assert_eq!(snapshot.transactions_aborted, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.transaction_begun();

        let output = metrics.to_prometheus();
        assert!(output.contains("durabletx_transactions_begun 1"));
    }
}
