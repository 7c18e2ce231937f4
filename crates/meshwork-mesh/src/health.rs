//! Health snapshots for an external observability collaborator.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use meshwork_routing::{MeshView, ShortestPaths};
use meshwork_topology::{ClusterId, NodeId, NodeStatus, Role};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::network::MeshNetwork;

/// One member's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub id: NodeId,
    pub role: Role,
    pub status: NodeStatus,
    pub cluster: ClusterId,
    pub load: f64,
    pub flagged: bool,
    /// Live entries in the node's routing table, itself included.
    pub known_peers: usize,
}

/// One cluster's leadership and whether it is cut off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub id: ClusterId,
    pub coordinator: Option<NodeId>,
    pub gateway: Option<NodeId>,
    pub members: usize,
    pub live_members: usize,
    /// No live coordinator, or the gateway cannot reach any other cluster.
    pub degraded: bool,
}

/// A point-in-time view of the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub round: u64,
    pub nodes: Vec<NodeHealth>,
    pub clusters: Vec<ClusterHealth>,
    /// Fraction of ordered live node pairs where the first has a known
    /// route to the second in its own routing table.
    pub connectivity: f64,
    /// Live nodes form more than one connected component.
    pub fragmented: bool,
}

impl HealthReport {
    /// Serialize for export.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeHealth> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&ClusterHealth> {
        self.clusters.iter().find(|c| c.id == id)
    }

    /// Number of members currently Active.
    pub fn active_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Active)
            .count()
    }
}

impl MeshNetwork {
    /// Snapshot per-node status, cluster leadership and connectivity.
    pub fn health(&self) -> HealthReport {
        let nodes: Vec<NodeHealth> = self
            .nodes
            .values()
            .filter(|n| n.tombstoned_at.is_none())
            .map(|n| NodeHealth {
                id: n.id,
                role: n.role,
                status: n.status,
                cluster: n.cluster,
                load: n.load(),
                flagged: n.flagged,
                known_peers: self.tables.get(&n.id).map_or(0, |t| t.live_count()),
            })
            .collect();

        let live: Vec<NodeId> = self.live_nodes().collect();
        let connectivity = self.connectivity(&live);
        let components = self.components(&live);

        let clusters = self
            .clusters
            .values()
            .map(|c| {
                let live_members = c.members.iter().filter(|m| self.is_live(**m)).count();
                let has_coordinator = c.coordinator.is_some_and(|id| self.is_live(id));
                let bridged = self.clusters.len() < 2
                    || c.bridge().is_some_and(|gw| {
                        self.clusters
                            .values()
                            .filter(|other| other.id != c.id)
                            .filter_map(|other| other.bridge())
                            .any(|peer| {
                                self.is_live(gw) && self.is_live(peer) && self.can_reach(gw, peer)
                            })
                    });
                ClusterHealth {
                    id: c.id,
                    coordinator: c.coordinator,
                    gateway: c.gateway,
                    members: c.len(),
                    live_members,
                    degraded: !has_coordinator || !bridged,
                }
            })
            .collect();

        debug!(
            live = live.len(),
            connectivity,
            components,
            "health snapshot"
        );

        HealthReport {
            round: self.round,
            nodes,
            clusters,
            connectivity,
            fragmented: components > 1,
        }
    }

    fn connectivity(&self, live: &[NodeId]) -> f64 {
        if live.len() < 2 {
            return 1.0;
        }
        let mut reachable = 0usize;
        for &origin in live {
            let Some(table) = self.tables.get(&origin) else {
                continue;
            };
            let adj = table.adjacency(|n| {
                n == origin || (self.is_live(n) && self.can_reach(origin, n))
            });
            let paths = ShortestPaths::compute(&adj, origin);
            reachable += live
                .iter()
                .filter(|n| **n != origin && paths.reaches(n))
                .count();
        }
        let pairs = live.len() * (live.len() - 1);
        reachable as f64 / pairs as f64
    }

    /// Connected components among live nodes over the actual links.
    fn components(&self, live: &[NodeId]) -> usize {
        let live_set: BTreeSet<NodeId> = live.iter().copied().collect();
        let mut adj: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for edge in self.edges.values() {
            if live_set.contains(&edge.a)
                && live_set.contains(&edge.b)
                && self.can_reach(edge.a, edge.b)
            {
                adj.entry(edge.a).or_default().push(edge.b);
                adj.entry(edge.b).or_default().push(edge.a);
            }
        }

        let mut seen = BTreeSet::new();
        let mut components = 0;
        for &start in live {
            if !seen.insert(start) {
                continue;
            }
            components += 1;
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for next in adj.get(&n).into_iter().flatten() {
                    if seen.insert(*next) {
                        queue.push_back(*next);
                    }
                }
            }
        }
        components
    }
}
