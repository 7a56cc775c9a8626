//! Recovery manager: completes transactions whose logs outlived them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use durabletx_common::{ActionStatus, ContextId, Result, TxError, Uid};
use durabletx_store::ObjectStore;

use crate::action::{BasicAction, ACTION_TYPE};
use crate::config::RecoveryConfig;
use crate::index::TransactionIndex;
use crate::metrics::SharedMetrics;
use crate::registry::RecordTypeRegistry;

/// Outcome of one recovery pass.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub started_at: DateTime<Utc>,
    /// Logs found in the store.
    pub scanned: usize,
    /// Logs belonging to live transactions, or already finished by their owner.
    pub skipped: usize,
    /// Transactions completed and their logs removed.
    pub recovered: usize,
    /// Transactions with participants still unreachable.
    pub pending: usize,
    /// Transactions waiting for their heuristic outcomes to be forgotten.
    pub heuristic: usize,
    /// Logs that could not be read. Left in place.
    pub corrupt: Vec<Uid>,
}

impl RecoveryReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            scanned: 0,
            skipped: 0,
            recovered: 0,
            pending: 0,
            heuristic: 0,
            corrupt: Vec::new(),
        }
    }
}

/// Periodically replays logged transactions that are not live in this
/// process.
#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    context: ContextId,
    store: Arc<dyn ObjectStore>,
    registry: Arc<RecordTypeRegistry>,
    index: Arc<TransactionIndex>,
    metrics: SharedMetrics,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryManager {
    pub fn new(
        config: RecoveryConfig,
        store: Arc<dyn ObjectStore>,
        registry: Arc<RecordTypeRegistry>,
        index: Arc<TransactionIndex>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            config,
            context: ContextId::new(),
            store,
            registry,
            index,
            metrics,
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Context that owns recovered actions.
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run one recovery pass.
    ///
    /// Logs are listed, then the backoff period elapses before any is
    /// replayed, so that transactions finishing normally can remove theirs.
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::new();
        let ids = self.store.all_ids(ACTION_TYPE)?;
        report.scanned = ids.len();
        self.metrics.recovery_pass();

        if ids.is_empty() {
            return Ok(report);
        }
        if !self.config.backoff_period.is_zero() {
            tokio::time::sleep(self.config.backoff_period).await;
        }

        for uid in ids {
            let Some(_claim) = self.index.claim_for_recovery(uid) else {
                debug!(tx = %uid, "Transaction is live, skipping");
                report.skipped += 1;
                continue;
            };

            match self.recover(uid).await {
                Ok(None) => report.skipped += 1,
                Ok(Some(status)) => match status {
                    ActionStatus::Committed | ActionStatus::Aborted => {
                        self.metrics.transaction_recovered(status);
                        report.recovered += 1;
                    }
                    s if s.is_heuristic() => report.heuristic += 1,
                    _ => report.pending += 1,
                },
                Err(TxError::CorruptState(reason)) => {
                    error!(tx = %uid, reason = %reason, "Unreadable transaction log left in place");
                    report.corrupt.push(uid);
                }
                Err(e) => {
                    warn!(tx = %uid, error = %e, "Recovery attempt failed, will retry");
                    report.pending += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            recovered = report.recovered,
            pending = report.pending,
            heuristic = report.heuristic,
            corrupt = report.corrupt.len(),
            "Recovery pass finished"
        );
        Ok(report)
    }

    /// Replay one logged transaction. Returns `None` if its log is gone.
    ///
    /// The caller must hold the recovery claim for `uid`.
    async fn recover(&self, uid: Uid) -> Result<Option<ActionStatus>> {
        let Some(mut action) =
            BasicAction::restore(uid, self.context, Arc::clone(&self.store), &self.registry)?
        else {
            return Ok(None);
        };
        info!(tx = %uid, status = %action.status(), "Recovering transaction");
        Ok(Some(action.replay().await))
    }

    /// Start the periodic recovery loop.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Recovery manager already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let manager = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.scan_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }
                tokio::select! {
                    result = manager.scan_once() => {
                        if let Err(e) = result {
                            warn!(error = %e, "Recovery pass failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("Recovery manager stopped");
        }));

        info!(
            interval_ms = self.config.scan_interval.as_millis() as u64,
            "Recovery manager started"
        );
    }

    /// Stop the periodic loop and wait for it to exit.
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(()).await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Recovery task ended abnormally");
            }
        }
    }
}
