//! Simulation controller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use durabletx_common::{ActionStatus, PrepareOutcome, Uid};
use durabletx_coordinator::{CoordinatorConfig, TransactionManager, TxContext, ACTION_TYPE};
use durabletx_participant::ScriptedResource;
use durabletx_store::ObjectStore;

use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, Fault, ResourceSpec, Scenario, ScenarioStep, TxEnd, VoteSpec};

/// Drives transactions against a transaction manager and simulated
/// resources.
pub struct SimulationController {
    config: CoordinatorConfig,
    store: Arc<dyn ObjectStore>,
    manager: TransactionManager,
    /// Participants per generated transaction.
    participants: usize,
    /// Probability that a generated participant misbehaves.
    failure_rate: f64,
    rng: StdRng,
    resources: HashMap<String, Arc<ScriptedResource>>,
    disconnected: HashSet<String>,
    /// Scenario transactions by label.
    outcomes: HashMap<String, (Uid, ActionStatus)>,
    metrics: SimulationMetrics,
}

impl SimulationController {
    pub fn new(
        config: CoordinatorConfig,
        participants: usize,
        failure_rate: f64,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let store = config.store.open()?;
        let manager = TransactionManager::with_store(config.clone(), Arc::clone(&store));

        Ok(Self {
            config,
            store,
            manager,
            participants: participants.max(1),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng,
            resources: HashMap::new(),
            disconnected: HashSet::new(),
            outcomes: HashMap::new(),
            metrics: SimulationMetrics::new(),
        })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.manager.start().await?;
        info!(
            node = %self.manager.node_id(),
            store = %self.store.name(),
            "Transaction manager started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.manager.stop().await?;
        Ok(())
    }

    /// Run every step of `scenario`, failing on the first assertion that
    /// does not hold.
    pub async fn run_scenario(&mut self, scenario: Scenario) -> anyhow::Result<()> {
        info!(scenario = %scenario.name, "{}", scenario.description);

        for (i, step) in scenario.steps.into_iter().enumerate() {
            self.execute_step(step)
                .await
                .map_err(|e| e.context(format!("step {} of {}", i + 1, scenario.name)))?;
        }

        info!(scenario = %scenario.name, "Scenario passed");
        Ok(())
    }

    async fn execute_step(&mut self, step: ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::AddResource(spec) => {
                let resource = Arc::new(spec.build());
                self.manager.register_resource(resource.clone());
                self.resources.insert(spec.name, resource);
            }
            ScenarioStep::Transaction {
                label,
                resources,
                last_resource,
                end,
            } => {
                let (uid, status) = self
                    .run_transaction(&resources, last_resource.as_deref(), end)
                    .await?;
                info!(label = %label, tx = %uid, status = %status, "Transaction finished");
                self.outcomes.insert(label, (uid, status));
            }
            ScenarioStep::InjectFault { target, fault } => {
                info!(resource = %target, fault = ?fault, "Injecting fault");
                self.resource(&target)?.set_commit_error(Some(fault.to_error()));
            }
            ScenarioStep::ClearFault { target } => {
                self.resource(&target)?.set_commit_error(None);
            }
            ScenarioStep::Disconnect { target } => {
                self.resource(&target)?;
                self.manager.directory().unregister(&target);
                self.disconnected.insert(target);
            }
            ScenarioStep::Reconnect { target } => {
                let resource = self.resource(&target)?;
                self.manager.register_resource(resource);
                self.disconnected.remove(&target);
            }
            ScenarioStep::Restart => self.restart().await?,
            ScenarioStep::Recover => {
                let report = self.manager.recovery().scan_once().await?;
                info!(report = %serde_json::to_string(&report)?, "Recovery pass");
            }
            ScenarioStep::ForgetHeuristics => {
                let admin = self.manager.heuristics();
                for report in admin.list()? {
                    let status = admin.forget(report.uid).await?;
                    info!(tx = %report.uid, status = %status, "Heuristics forgotten");
                }
            }
            ScenarioStep::Wait { millis } => {
                tokio::time::sleep(Duration::from_millis(millis)).await;
            }
            ScenarioStep::Assert { condition } => self.check(&condition)?,
        }
        Ok(())
    }

    /// Discard the manager and its in-memory state, then start a new one
    /// over the same store. Connected resources are registered again.
    async fn restart(&mut self) -> anyhow::Result<()> {
        warn!("Simulating coordinator crash");
        self.manager.stop().await?;
        self.manager = TransactionManager::with_store(self.config.clone(), Arc::clone(&self.store));
        for (name, resource) in &self.resources {
            if !self.disconnected.contains(name) {
                self.manager.register_resource(resource.clone());
            }
        }
        self.manager.start().await?;
        Ok(())
    }

    fn resource(&self, name: &str) -> anyhow::Result<Arc<ScriptedResource>> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown resource: {}", name))
    }

    async fn run_transaction(
        &mut self,
        resources: &[String],
        last_resource: Option<&str>,
        end: TxEnd,
    ) -> anyhow::Result<(Uid, ActionStatus)> {
        let ctx = TxContext::new();
        let started = Instant::now();
        let tx = self.manager.begin(&ctx, None).await?;

        for name in resources {
            let resource = self.resource(name)?;
            self.manager.enlist_resource(&ctx, tx, resource).await?;
        }
        if let Some(name) = last_resource {
            let resource = self.resource(name)?;
            self.manager.enlist_last_resource(&ctx, tx, resource).await?;
        }

        let status = match end {
            TxEnd::Commit => self.manager.commit(&ctx, tx).await?,
            TxEnd::Rollback => self.manager.rollback(&ctx, tx).await?,
            TxEnd::PrepareOnly => match self.manager.prepare(&ctx, tx).await? {
                PrepareOutcome::Ok => ActionStatus::Prepared,
                PrepareOutcome::ReadOnly => ActionStatus::Committed,
                PrepareOutcome::NotOk => ActionStatus::Aborted,
            },
        };

        self.metrics
            .record(status, started.elapsed().as_millis() as u64);
        Ok((tx, status))
    }

    fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::Outcome { label, status } => {
                let (_, actual) = self.outcome(label)?;
                if actual != *status {
                    bail!("{} ended {}, expected {}", label, actual, status);
                }
            }
            AssertCondition::CommittedCount { resource, count } => {
                let actual = self.resource(resource)?.committed_count();
                if actual != *count {
                    bail!("{} committed {} transactions, expected {}", resource, actual, count);
                }
            }
            AssertCondition::RolledBackCount { resource, count } => {
                let actual = self.resource(resource)?.rolled_back_count();
                if actual != *count {
                    bail!("{} rolled back {} transactions, expected {}", resource, actual, count);
                }
            }
            AssertCondition::InDoubt { resource, label } => {
                let (uid, _) = self.outcome(label)?;
                if !self.resource(resource)?.is_in_doubt(uid) {
                    bail!("{} is not in doubt for {}", resource, label);
                }
            }
            AssertCondition::HeuristicCount { count } => {
                let actual = self.manager.heuristics().list()?.len();
                if actual != *count {
                    bail!("{} heuristic transactions, expected {}", actual, count);
                }
            }
            AssertCondition::LogCount { count } => {
                let actual = self.store.all_ids(ACTION_TYPE)?.len();
                if actual != *count {
                    bail!("{} transaction logs, expected {}", actual, count);
                }
            }
        }
        Ok(())
    }

    fn outcome(&self, label: &str) -> anyhow::Result<(Uid, ActionStatus)> {
        self.outcomes
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("No transaction labelled {}", label))
    }

    /// Generate transactions until `count` have run, `duration` has elapsed
    /// or Ctrl+C is pressed.
    pub async fn run(&mut self, count: Option<u64>, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");
        let start = Instant::now();
        let mut shutdown = Box::pin(tokio::signal::ctrl_c());
        let mut n: u64 = 0;

        loop {
            if count.is_some_and(|c| n >= c) || duration.is_some_and(|d| start.elapsed() >= d) {
                break;
            }
            tokio::select! {
                result = self.random_transaction(n) => {
                    if let Err(e) = result {
                        warn!(error = %e, "Transaction failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("Stopping simulation");
                    break;
                }
            }
            n += 1;
        }

        let report = self.manager.recovery().scan_once().await?;
        info!(
            recovered = report.recovered,
            pending = report.pending,
            heuristic = report.heuristic,
            "Final recovery pass"
        );
        Ok(())
    }

    /// One transaction over freshly scripted participants. Clean outcomes
    /// release the participants; heuristic ones stay registered so that
    /// their logs can still be resolved.
    async fn random_transaction(&mut self, n: u64) -> anyhow::Result<()> {
        let mut names = Vec::with_capacity(self.participants);
        for i in 0..self.participants {
            let spec = self.random_spec(format!("p{}-{}", n, i));
            let resource = Arc::new(spec.build());
            self.manager.register_resource(resource.clone());
            self.resources.insert(spec.name.clone(), resource);
            names.push(spec.name);
        }

        let end = if self.rng.gen_bool(self.failure_rate / 4.0) {
            TxEnd::Rollback
        } else {
            TxEnd::Commit
        };
        let (_, status) = self.run_transaction(&names, None, end).await?;

        if matches!(status, ActionStatus::Committed | ActionStatus::Aborted) {
            for name in &names {
                self.manager.directory().unregister(name);
                self.resources.remove(name);
            }
        }
        Ok(())
    }

    fn random_spec(&mut self, name: String) -> ResourceSpec {
        let mut spec = ResourceSpec::named(&name);
        if !self.rng.gen_bool(self.failure_rate) {
            return spec;
        }
        match self.rng.gen_range(0..4) {
            0 => spec.vote = VoteSpec::Rollback,
            1 => spec.vote = VoteSpec::ReadOnly,
            2 => spec.transient_failures = self.rng.gen_range(1..3),
            _ => spec = spec.with_commit_fault(Fault::HeuristicRollback),
        }
        spec
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_controller(failure_rate: f64) -> SimulationController {
        SimulationController::new(CoordinatorConfig::in_memory(), 3, failure_rate, Some(7)).unwrap()
    }

    #[tokio::test]
    async fn test_builtin_scenarios_pass() {
        for name in Scenario::builtin() {
            let mut controller = create_test_controller(0.0);
            controller.initialize().await.unwrap();
            controller
                .run_scenario(Scenario::load(name).unwrap())
                .await
                .unwrap_or_else(|e| panic!("{name}: {e:#}"));
            controller.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_assertion_is_reported() {
        let mut controller = create_test_controller(0.0);
        controller.initialize().await.unwrap();
        let mut scenario = Scenario::load("commit-all").unwrap();
        scenario.steps.push(ScenarioStep::Assert {
            condition: AssertCondition::LogCount { count: 3 },
        });

        let err = controller.run_scenario(scenario).await.unwrap_err();
        assert!(format!("{err:#}").contains("expected 3"));
    }

    #[tokio::test]
    async fn test_continuous_run_without_failures_commits_everything() {
        let mut controller = create_test_controller(0.0);
        controller.initialize().await.unwrap();
        controller.run(Some(20), None).await.unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.total_transactions, 20);
        assert_eq!(metrics.committed, 20);
        assert!(controller.resources.is_empty());
        assert!(controller.store.all_ids(ACTION_TYPE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_continuous_run_with_failures_accounts_for_every_transaction() {
        let mut controller = create_test_controller(0.5);
        controller.initialize().await.unwrap();
        controller.run(Some(30), None).await.unwrap();

        let metrics = controller.metrics();
        assert!(metrics.total_transactions <= 30);
        assert_eq!(
            metrics.committed + metrics.aborted + metrics.heuristic + metrics.unfinished,
            metrics.total_transactions
        );
        assert!(metrics.aborted > 0);
    }
}
