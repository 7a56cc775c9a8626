//! Simulation metrics.

use std::collections::VecDeque;

use durabletx_common::ActionStatus;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Transactions run.
    pub total_transactions: u64,
    pub committed: u64,
    pub aborted: u64,
    /// Transactions that ended with a heuristic outcome.
    pub heuristic: u64,
    /// Transactions left for recovery to finish.
    pub unfinished: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    max_samples: usize,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self {
            total_transactions: 0,
            committed: 0,
            aborted: 0,
            heuristic: 0,
            unfinished: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record how a transaction ended and how long it took.
    pub fn record(&mut self, status: ActionStatus, latency_ms: u64) {
        self.total_transactions += 1;
        match status {
            ActionStatus::Committed => self.committed += 1,
            ActionStatus::Aborted => self.aborted += 1,
            s if s.is_heuristic() => self.heuristic += 1,
            _ => self.unfinished += 1,
        }

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Fraction of transactions that committed.
    pub fn commit_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }

        self.committed as f64 / self.total_transactions as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record(ActionStatus::Committed, 100);
        metrics.record(ActionStatus::Committed, 200);
        metrics.record(ActionStatus::HeuristicMixed, 150);
        metrics.record(ActionStatus::Aborted, 150);

        assert_eq!(metrics.total_transactions, 4);
        assert_eq!(metrics.committed, 2);
        assert_eq!(metrics.aborted, 1);
        assert_eq!(metrics.heuristic, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p50_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.commit_rate(), 0.5);
    }

    #[test]
    fn test_prepared_counts_as_unfinished() {
        let mut metrics = SimulationMetrics::new();
        metrics.record(ActionStatus::Prepared, 5);
        assert_eq!(metrics.unfinished, 1);
        assert_eq!(metrics.commit_rate(), 0.0);
    }
}
