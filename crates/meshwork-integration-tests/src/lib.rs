//! Shared fixtures for the cross-crate scenario tests.
//!
//! [`Pipeline`] drives a [`MeshNetwork`] and a [`TaskRouter`] by hand and
//! plays each consensus attempt through a [`LocalCluster`], so a scenario
//! can go from submission to commit without an async runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use meshwork_consensus::{
    reply_threshold, ConsensusConfig, LocalCluster, Proposal, TaskId,
};
use meshwork_mesh::{MeshConfig, MeshNetwork};
use meshwork_tasks::{RouterConfig, RouterEvent, TaskRouter, ValidatorReport};
use meshwork_topology::{NodeDescriptor, NodeId};

/// Gossip rounds after which every node in a small mesh knows every other.
pub const SETTLE_ROUNDS: usize = 20;

/// Workers `ids`, each offering `capabilities`.
pub fn workers(ids: impl IntoIterator<Item = u64>, capabilities: &[&str]) -> Vec<NodeDescriptor> {
    ids.into_iter()
        .map(|id| NodeDescriptor::worker(NodeId(id), capabilities.iter().copied()))
        .collect()
}

/// A mesh with `nodes` joined and gossip run to a steady state.
pub fn settled_mesh(config: MeshConfig, nodes: Vec<NodeDescriptor>, now: Instant) -> MeshNetwork {
    let mut mesh = MeshNetwork::new(config);
    for node in nodes {
        if let Err(e) = mesh.join(node, now) {
            panic!("join failed: {e}");
        }
    }
    for _ in 0..SETTLE_ROUNDS {
        mesh.discover(now);
    }
    mesh
}

/// What one attempt produced.
#[derive(Debug, Default)]
pub struct Played {
    pub events: Vec<RouterEvent>,
    /// Nodes flagged because `f + 1` validators accused them.
    pub flagged: BTreeSet<NodeId>,
}

impl Played {
    pub fn committed_value(&self) -> Option<&[u8]> {
        self.events.iter().find_map(|e| match e {
            RouterEvent::Committed { result, .. } => result.value.as_deref(),
            _ => None,
        })
    }
}

pub struct Pipeline {
    pub mesh: MeshNetwork,
    pub router: TaskRouter,
    pub consensus: ConsensusConfig,
    pub now: Instant,
}

impl Pipeline {
    pub fn new(mesh: MeshNetwork, origin: NodeId, config: RouterConfig, now: Instant) -> Self {
        Self {
            mesh,
            router: TaskRouter::new(origin, config),
            consensus: ConsensusConfig::default(),
            now,
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Play the current attempt of `task`. Every assignee computes
    /// `value_of(node)`, reports it, and (for consensus tasks) runs the
    /// round with the others; each validator's verdict goes back to the
    /// router.
    pub fn play(&mut self, task: &TaskId, value_of: impl FnMut(NodeId) -> Vec<u8>) -> Played {
        self.play_with(task, value_of, |_, report| report)
    }

    /// Like [`play`](Self::play), but each validator's report passes
    /// through `rewrite` before it reaches the router.
    pub fn play_with(
        &mut self,
        task: &TaskId,
        mut value_of: impl FnMut(NodeId) -> Vec<u8>,
        mut rewrite: impl FnMut(NodeId, ValidatorReport) -> ValidatorReport,
    ) -> Played {
        let mut played = Played::default();
        let Some(seq) = self.router.attempt(task) else {
            return played;
        };
        let assignees = self.router.assignees(task).to_vec();
        let consensus = self
            .router
            .task(task)
            .is_some_and(|t| t.requires_consensus);
        let values: BTreeMap<NodeId, Vec<u8>> = assignees.iter().map(|n| (*n, value_of(*n))).collect();

        for (node, value) in &values {
            let _ = self.router.started(task, seq, *node);
            let proposal = Proposal::new(task.clone(), value.clone());
            if let Ok(events) = self.router.report(task, seq, *node, proposal, &mut self.mesh) {
                played.events.extend(events);
            }
        }
        if !consensus {
            return played;
        }

        let f = self.router.fault_tolerance(task).unwrap_or(self.consensus.f);
        let mut cluster = LocalCluster::with_validators(assignees.clone(), self.consensus.clone().with_f(f));
        let started = cluster.start(task, f, seq, |id| {
            values.get(&id).map(|v| Proposal::new(task.clone(), v.clone()))
        });
        if started.is_err() {
            return played;
        }
        cluster.settle(task, Duration::from_millis(250), 200);

        for node in &assignees {
            let report = if let Some(result) = cluster.decision_of(*node, task) {
                ValidatorReport::Decided(result.clone())
            } else if let Some(result) = cluster
                .rejections()
                .get(node)
                .and_then(|rs| rs.iter().find(|r| &r.task_id == task))
            {
                ValidatorReport::Rejected(result.clone())
            } else if let Some(error) = cluster.failures().get(node).and_then(|es| es.first()) {
                ValidatorReport::Failed(error.clone())
            } else {
                continue;
            };
            let report = rewrite(*node, report);
            if let Ok(events) = self
                .router
                .validator_report(task, seq, *node, report, &mut self.mesh, self.now)
            {
                played.events.extend(events);
            }
        }

        let mut accusers: BTreeMap<NodeId, usize> = BTreeMap::new();
        for node in &assignees {
            for suspect in cluster.flagged_by(*node) {
                *accusers.entry(suspect).or_default() += 1;
            }
        }
        for (suspect, count) in accusers {
            if count >= reply_threshold(f) && self.mesh.flag_node(suspect, "digest mismatch").is_ok() {
                played.flagged.insert(suspect);
            }
        }
        played
    }
}
