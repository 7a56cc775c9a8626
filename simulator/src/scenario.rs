//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

use durabletx_common::ActionStatus;
use durabletx_participant::{ResourceError, ScriptedResource, Vote};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Make a resource available to later transactions.
    AddResource(ResourceSpec),
    /// Run one transaction over the named resources.
    Transaction {
        label: String,
        resources: Vec<String>,
        #[serde(default)]
        last_resource: Option<String>,
        end: TxEnd,
    },
    /// Change how a resource answers commit.
    InjectFault { target: String, fault: Fault },
    /// Restore a resource's normal behavior.
    ClearFault { target: String },
    /// Make a resource unreachable to recovery.
    Disconnect { target: String },
    /// Make a disconnected resource reachable again.
    Reconnect { target: String },
    /// Discard the transaction manager and start a new one over the same
    /// store, as after a crash.
    Restart,
    /// Run one recovery pass.
    Recover,
    /// Forget every heuristic outcome still in the log.
    ForgetHeuristics,
    /// Sleep.
    Wait { millis: u64 },
    /// Check a condition.
    Assert { condition: AssertCondition },
}

/// How a scenario transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxEnd {
    Commit,
    Rollback,
    /// Prepare and then stop driving the transaction.
    PrepareOnly,
}

/// Behavior of one simulated resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(default)]
    pub vote: VoteSpec,
    #[serde(default)]
    pub commit_fault: Option<Fault>,
    #[serde(default)]
    pub transient_failures: u32,
    #[serde(default)]
    pub latency_ms: u64,
}

impl ResourceSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vote: VoteSpec::Commit,
            commit_fault: None,
            transient_failures: 0,
            latency_ms: 0,
        }
    }

    fn with_vote(mut self, vote: VoteSpec) -> Self {
        self.vote = vote;
        self
    }

    pub fn with_commit_fault(mut self, fault: Fault) -> Self {
        self.commit_fault = Some(fault);
        self
    }

    /// Build the described resource.
    pub fn build(&self) -> ScriptedResource {
        let mut resource = ScriptedResource::new(self.name.clone()).with_vote(self.vote.into());
        if let Some(fault) = &self.commit_fault {
            resource = resource.with_commit_error(fault.to_error());
        }
        if self.transient_failures > 0 {
            resource = resource.with_transient_failures(self.transient_failures);
        }
        if self.latency_ms > 0 {
            resource = resource.with_latency(std::time::Duration::from_millis(self.latency_ms));
        }
        resource
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoteSpec {
    #[default]
    Commit,
    ReadOnly,
    Rollback,
}

impl From<VoteSpec> for Vote {
    fn from(vote: VoteSpec) -> Self {
        match vote {
            VoteSpec::Commit => Vote::Commit,
            VoteSpec::ReadOnly => Vote::ReadOnly,
            VoteSpec::Rollback => Vote::Rollback,
        }
    }
}

/// Faults a resource can report from commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Fault {
    HeuristicCommit,
    HeuristicRollback,
    HeuristicMixed,
    HeuristicHazard,
    Transient { reason: String },
    Failed { reason: String },
}

impl Fault {
    pub fn to_error(&self) -> ResourceError {
        match self {
            Fault::HeuristicCommit => ResourceError::HeuristicCommit,
            Fault::HeuristicRollback => ResourceError::HeuristicRollback,
            Fault::HeuristicMixed => ResourceError::HeuristicMixed,
            Fault::HeuristicHazard => ResourceError::HeuristicHazard,
            Fault::Transient { reason } => ResourceError::Transient(reason.clone()),
            Fault::Failed { reason } => ResourceError::Failed(reason.clone()),
        }
    }
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// The labelled transaction ended with this status.
    Outcome { label: String, status: ActionStatus },
    /// The resource committed exactly this many transactions.
    CommittedCount { resource: String, count: usize },
    /// The resource rolled back exactly this many transactions.
    RolledBackCount { resource: String, count: usize },
    /// The resource is still prepared for the labelled transaction.
    InDoubt { resource: String, label: String },
    /// Number of transactions with heuristic outcomes still logged.
    HeuristicCount { count: usize },
    /// Number of transaction logs left in the store.
    LogCount { count: usize },
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "commit-all" => Ok(Self::commit_all()),
            "vote-no" => Ok(Self::vote_no()),
            "heuristic-mixed" => Ok(Self::heuristic_mixed()),
            "crash-recover" => Ok(Self::crash_recover()),
            "last-resource" => Ok(Self::last_resource()),
            _ if Path::new(name).is_file() => {
                let raw = std::fs::read_to_string(name)?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Names of the built-in scenarios.
    pub fn builtin() -> &'static [&'static str] {
        &[
            "commit-all",
            "vote-no",
            "heuristic-mixed",
            "crash-recover",
            "last-resource",
        ]
    }

    fn outcome(label: &str, status: ActionStatus) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::Outcome {
                label: label.to_string(),
                status,
            },
        }
    }

    fn committed(resource: &str, count: usize) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::CommittedCount {
                resource: resource.to_string(),
                count,
            },
        }
    }

    fn logs(count: usize) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::LogCount { count },
        }
    }

    fn transaction(label: &str, resources: &[&str], end: TxEnd) -> ScenarioStep {
        ScenarioStep::Transaction {
            label: label.to_string(),
            resources: resources.iter().map(|r| r.to_string()).collect(),
            last_resource: None,
            end,
        }
    }

    /// Three resources vote yes and all commit.
    fn commit_all() -> Self {
        Self {
            name: "commit-all".to_string(),
            description: "Three participants vote to commit".to_string(),
            steps: vec![
                ScenarioStep::AddResource(ResourceSpec::named("orders")),
                ScenarioStep::AddResource(ResourceSpec::named("inventory")),
                ScenarioStep::AddResource(ResourceSpec::named("audit").with_vote(VoteSpec::ReadOnly)),
                Self::transaction("t1", &["orders", "inventory", "audit"], TxEnd::Commit),
                Self::outcome("t1", ActionStatus::Committed),
                Self::committed("orders", 1),
                Self::committed("inventory", 1),
                Self::committed("audit", 0),
                Self::logs(0),
            ],
        }
    }

    /// One resource votes no, so nobody commits.
    fn vote_no() -> Self {
        Self {
            name: "vote-no".to_string(),
            description: "A single rollback vote aborts the transaction".to_string(),
            steps: vec![
                ScenarioStep::AddResource(ResourceSpec::named("orders")),
                ScenarioStep::AddResource(
                    ResourceSpec::named("inventory").with_vote(VoteSpec::Rollback),
                ),
                Self::transaction("t1", &["orders", "inventory"], TxEnd::Commit),
                Self::outcome("t1", ActionStatus::Aborted),
                Self::committed("orders", 0),
                ScenarioStep::Assert {
                    condition: AssertCondition::RolledBackCount {
                        resource: "orders".to_string(),
                        count: 1,
                    },
                },
                Self::logs(0),
            ],
        }
    }

    /// A resource rolls back on its own while the others commit.
    fn heuristic_mixed() -> Self {
        Self {
            name: "heuristic-mixed".to_string(),
            description: "A heuristic rollback during commit leaves a mixed outcome".to_string(),
            steps: vec![
                ScenarioStep::AddResource(ResourceSpec::named("orders")),
                ScenarioStep::AddResource(ResourceSpec::named("inventory")),
                ScenarioStep::AddResource(ResourceSpec::named("shipping")),
                Self::transaction("t1", &["orders", "inventory", "shipping"], TxEnd::Commit),
                Self::outcome("t1", ActionStatus::Committed),
                ScenarioStep::InjectFault {
                    target: "inventory".to_string(),
                    fault: Fault::HeuristicRollback,
                },
                Self::transaction("t2", &["orders", "inventory", "shipping"], TxEnd::Commit),
                Self::outcome("t2", ActionStatus::HeuristicMixed),
                ScenarioStep::Assert {
                    condition: AssertCondition::HeuristicCount { count: 1 },
                },
                ScenarioStep::Recover,
                Self::logs(1),
                ScenarioStep::ClearFault {
                    target: "inventory".to_string(),
                },
                ScenarioStep::ForgetHeuristics,
                ScenarioStep::Assert {
                    condition: AssertCondition::HeuristicCount { count: 0 },
                },
                Self::logs(0),
            ],
        }
    }

    /// The manager crashes after prepare and recovery finishes the job.
    fn crash_recover() -> Self {
        Self {
            name: "crash-recover".to_string(),
            description: "Recovery commits a transaction whose manager crashed after prepare"
                .to_string(),
            steps: vec![
                ScenarioStep::AddResource(ResourceSpec::named("orders")),
                ScenarioStep::AddResource(ResourceSpec::named("inventory")),
                Self::transaction("t1", &["orders", "inventory"], TxEnd::PrepareOnly),
                ScenarioStep::Assert {
                    condition: AssertCondition::InDoubt {
                        resource: "orders".to_string(),
                        label: "t1".to_string(),
                    },
                },
                Self::logs(1),
                ScenarioStep::Restart,
                ScenarioStep::Disconnect {
                    target: "inventory".to_string(),
                },
                ScenarioStep::Recover,
                Self::committed("orders", 1),
                Self::committed("inventory", 0),
                Self::logs(1),
                ScenarioStep::Reconnect {
                    target: "inventory".to_string(),
                },
                ScenarioStep::Recover,
                Self::committed("orders", 1),
                Self::committed("inventory", 1),
                Self::logs(0),
            ],
        }
    }

    /// A one-phase resource decides the outcome after the others prepare.
    fn last_resource() -> Self {
        Self {
            name: "last-resource".to_string(),
            description: "A one-phase resource commits after the two-phase votes, and its heuristic outcome is logged".to_string(),
            steps: vec![
                ScenarioStep::AddResource(ResourceSpec::named("orders")),
                ScenarioStep::AddResource(ResourceSpec::named("legacy")),
                ScenarioStep::Transaction {
                    label: "t1".to_string(),
                    resources: vec!["orders".to_string()],
                    last_resource: Some("legacy".to_string()),
                    end: TxEnd::Commit,
                },
                Self::outcome("t1", ActionStatus::Committed),
                Self::committed("orders", 1),
                Self::committed("legacy", 1),
                ScenarioStep::InjectFault {
                    target: "legacy".to_string(),
                    fault: Fault::Failed {
                        reason: "connection reset".to_string(),
                    },
                },
                ScenarioStep::Transaction {
                    label: "t2".to_string(),
                    resources: vec!["orders".to_string()],
                    last_resource: Some("legacy".to_string()),
                    end: TxEnd::Commit,
                },
                Self::outcome("t2", ActionStatus::Aborted),
                Self::committed("orders", 1),
                Self::logs(0),
                ScenarioStep::InjectFault {
                    target: "legacy".to_string(),
                    fault: Fault::HeuristicHazard,
                },
                ScenarioStep::Transaction {
                    label: "t3".to_string(),
                    resources: vec!["orders".to_string()],
                    last_resource: Some("legacy".to_string()),
                    end: TxEnd::Commit,
                },
                Self::outcome("t3", ActionStatus::HeuristicHazard),
                ScenarioStep::Assert {
                    condition: AssertCondition::RolledBackCount {
                        resource: "orders".to_string(),
                        count: 2,
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::HeuristicCount { count: 1 },
                },
                Self::logs(1),
                ScenarioStep::ClearFault {
                    target: "legacy".to_string(),
                },
                ScenarioStep::ForgetHeuristics,
                ScenarioStep::Assert {
                    condition: AssertCondition::HeuristicCount { count: 0 },
                },
                Self::logs(0),
            ],
        }
    }
}
