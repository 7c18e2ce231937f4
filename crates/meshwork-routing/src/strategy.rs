//! Route strategies.
//!
//! A route is computed from the origin's own routing table (what it has
//! learned through gossip) combined with a [`MeshView`], which answers the
//! questions only the failure detector can: is a node live, can the origin
//! currently reach it, how loaded is it.
//!
//! | Strategy       | Ranking                                             |
//! |----------------|-----------------------------------------------------|
//! | ShortestPath   | path cost, then lowest id                           |
//! | LoadBalanced   | `max(cost, 1) × (1 + load)`, then lowest id         |
//! | Hierarchical   | in-cluster by cost; else escalate via the Gateway   |
//! | Adaptive       | picks one of the above per request                  |

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use meshwork_topology::{Capability, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::path::ShortestPaths;
use crate::table::RoutingTable;

/// How candidates are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RoutingStrategy {
    ShortestPath,
    LoadBalanced,
    Hierarchical,
    #[default]
    Adaptive,
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ShortestPath => "shortest-path",
            Self::LoadBalanced => "load-balanced",
            Self::Hierarchical => "hierarchical",
            Self::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Liveness and load as seen by the membership layer.
pub trait MeshView {
    /// Not tombstoned and not Unreachable; may still forward traffic.
    fn is_live(&self, node: NodeId) -> bool;
    /// Active, unflagged and not tombstoned.
    fn is_assignable(&self, node: NodeId) -> bool;
    /// Whether traffic from `from` can currently reach `to`.
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool;
    /// Fraction of capacity in use.
    fn load(&self, node: NodeId) -> f64;
}

/// Parameters for the Adaptive strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePolicy {
    /// Budgets at or below this pick ShortestPath.
    pub tight_latency_budget: Duration,
    /// Load spread (max - min) in the origin's cluster at or above this
    /// picks LoadBalanced.
    pub imbalance_threshold: f64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            tight_latency_budget: Duration::from_millis(100),
            imbalance_threshold: 0.5,
        }
    }
}

impl AdaptivePolicy {
    /// Resolve `Adaptive` into a concrete strategy.
    pub fn choose(&self, latency_budget: Option<Duration>, imbalance: f64) -> RoutingStrategy {
        if latency_budget.is_some_and(|b| b <= self.tight_latency_budget) {
            RoutingStrategy::ShortestPath
        } else if imbalance >= self.imbalance_threshold {
            RoutingStrategy::LoadBalanced
        } else {
            RoutingStrategy::Hierarchical
        }
    }
}

/// What to route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub capability: Capability,
    pub strategy: RoutingStrategy,
    pub latency_budget: Option<Duration>,
    /// Nodes that must not be returned (e.g. previous failed assignees).
    pub exclude: BTreeSet<NodeId>,
    /// How many nodes the caller needs. Hierarchical routing escalates
    /// past the origin cluster when it holds fewer.
    pub min_candidates: usize,
}

impl RouteRequest {
    /// Route `capability` with the Adaptive strategy.
    pub fn new(capability: impl Into<Capability>) -> Self {
        Self {
            capability: capability.into(),
            strategy: RoutingStrategy::Adaptive,
            latency_budget: None,
            exclude: BTreeSet::new(),
            min_candidates: 1,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_min_candidates(mut self, n: usize) -> Self {
        self.min_candidates = n.max(1);
        self
    }

    #[must_use]
    pub fn excluding(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.exclude.extend(nodes);
        self
    }
}

/// A ranked node able to serve a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub node: NodeId,
    /// Sum of link costs along `path`.
    pub cost: u64,
    /// Strategy score; lower is better.
    pub score: f64,
    /// Gateway the request escalates through, for Hierarchical escalation.
    pub via: Option<NodeId>,
    /// `origin ..= node`.
    pub path: Vec<NodeId>,
    /// The concrete strategy that ranked this candidate.
    pub strategy: RoutingStrategy,
}

impl Candidate {
    /// Number of links traversed.
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Rank every node that can serve `req`, best first.
///
/// Returns an empty list when nothing known to the origin qualifies.
pub fn route(
    table: &RoutingTable,
    view: &impl MeshView,
    req: &RouteRequest,
    policy: &AdaptivePolicy,
) -> Vec<Candidate> {
    let origin = table.local();
    let adj = table.adjacency(|n| n == origin || (view.is_live(n) && view.can_reach(origin, n)));
    let paths = ShortestPaths::compute(&adj, origin);

    let strategy = match req.strategy {
        RoutingStrategy::Adaptive => policy.choose(req.latency_budget, imbalance(table, view)),
        concrete => concrete,
    };

    let mut candidates: Vec<Candidate> = table
        .nodes_with(&req.capability)
        .filter(|n| !req.exclude.contains(n) && view.is_assignable(*n))
        .filter_map(|n| {
            let cost = paths.cost(&n)?;
            let path = paths.path_to(n)?;
            let score = match strategy {
                RoutingStrategy::LoadBalanced => cost.max(1) as f64 * (1.0 + view.load(n)),
                _ => cost as f64,
            };
            Some(Candidate {
                node: n,
                cost,
                score,
                via: None,
                path,
                strategy,
            })
        })
        .collect();

    if strategy == RoutingStrategy::Hierarchical {
        candidates = hierarchical(table, candidates, req.min_candidates);
    }

    candidates.sort_by(|a, b| {
        a.via
            .is_some()
            .cmp(&b.via.is_some())
            .then(a.score.total_cmp(&b.score))
            .then(a.node.cmp(&b.node))
    });

    debug!(
        origin = %origin,
        capability = %req.capability,
        %strategy,
        found = candidates.len(),
        "computed route"
    );
    candidates
}

/// Keep in-cluster candidates while there are at least `wanted` of them.
/// Otherwise add the remote ones too, marked as escalating through the
/// origin cluster's bridge; they rank after every local candidate.
fn hierarchical(table: &RoutingTable, candidates: Vec<Candidate>, wanted: usize) -> Vec<Candidate> {
    let Some(home) = table.local_cluster() else {
        return candidates;
    };
    let (local, remote): (Vec<Candidate>, Vec<Candidate>) = candidates
        .into_iter()
        .partition(|c| table.get(&c.node).is_some_and(|e| e.cluster == home));

    if local.len() >= wanted {
        return local;
    }

    let gateway = table.bridge_of(home);
    if !remote.is_empty() {
        debug!(local = local.len(), wanted, ?gateway, "escalating past the origin cluster");
    }
    local
        .into_iter()
        .chain(remote.into_iter().map(|c| Candidate { via: gateway, ..c }))
        .collect()
}

/// Spread between the most and least loaded live members of the origin's
/// cluster.
fn imbalance(table: &RoutingTable, view: &impl MeshView) -> f64 {
    let Some(home) = table.local_cluster() else {
        return 0.0;
    };
    let loads: Vec<f64> = table
        .cluster_members(home)
        .filter(|e| view.is_assignable(e.node) && !e.capabilities.is_empty())
        .map(|e| view.load(e.node))
        .collect();
    let max = loads.iter().copied().fold(f64::MIN, f64::max);
    let min = loads.iter().copied().fold(f64::MAX, f64::min);
    if loads.is_empty() {
        0.0
    } else {
        max - min
    }
}
