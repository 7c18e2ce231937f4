//! Cluster maintenance: elections, splits and link layout.
//!
//! Links are derived, never edited by hand. After any membership or
//! leadership change the desired edge set is recomputed:
//!
//! ```text
//! member ── coordinator     (member's link cost)
//! member ── gateway         (member's link cost)
//! gateway ══ gateway        (inter_cluster_cost, every pair of clusters)
//! ```
//!
//! Nodes whose links or role changed bump their own routing entry, and the
//! endpoints of every new link exchange entries (the link handshake).

use std::collections::BTreeMap;
use std::time::Instant;

use meshwork_topology::{
    plan_split, Cluster, ClusterId, Edge, Election, ElectionCandidate, NodeId, Role,
};
use meshwork_routing::MeshView;
use tracing::{debug, info};

use crate::network::{MeshEvent, MeshNetwork};

/// Role a node holds when it leads nothing.
fn resting_role(declared: Role) -> Role {
    match declared {
        Role::Coordinator | Role::Gateway => Role::Worker,
        other => other,
    }
}

impl MeshNetwork {
    /// Whether `cluster` lacks a live coordinator or gateway, or has more
    /// than one live member but a single node holding both roles.
    pub(crate) fn needs_election(&self, cluster: ClusterId) -> bool {
        let Some(c) = self.clusters.get(&cluster) else {
            return false;
        };
        let live = |id: Option<NodeId>| {
            id.is_some_and(|id| {
                c.members.contains(&id) && self.nodes.get(&id).is_some_and(|n| n.is_live())
            })
        };
        let live_members = c
            .members
            .iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.is_live()))
            .count();

        if live_members == 0 {
            return false;
        }
        !live(c.coordinator)
            || !live(c.gateway)
            || (c.coordinator == c.gateway && live_members > 1)
    }

    /// Hold and apply an election for `cluster` among its live members.
    pub(crate) fn elect(&mut self, cluster: ClusterId, now: Instant) {
        let Some(c) = self.clusters.get(&cluster) else {
            return;
        };
        let candidates: Vec<ElectionCandidate> = c
            .members
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.is_live())
            .map(|n| ElectionCandidate {
                id: n.id,
                declared: n.declared_role,
                current: n.role,
                uptime: n.uptime(now),
            })
            .collect();
        let election = Election::hold(cluster, c.term + 1, &candidates);
        self.apply_election(&election);
    }

    /// Apply an election record. This is the only place roles change.
    pub fn apply_election(&mut self, election: &Election) -> bool {
        let Some(cluster) = self.clusters.get_mut(&election.cluster) else {
            return false;
        };
        if !cluster.apply(election) {
            return false;
        }
        for id in &cluster.members {
            if let Some(node) = self.nodes.get_mut(id) {
                let declared = node.declared_role;
                node.role = election
                    .role_of(*id)
                    .unwrap_or_else(|| resting_role(declared));
            }
        }
        info!(
            cluster = %election.cluster,
            term = election.term,
            coordinator = ?election.coordinator,
            gateway = ?election.gateway,
            "cluster leadership elected"
        );
        self.events.push(MeshEvent::Elected(election.clone()));
        true
    }

    /// Cut an oversized cluster in two and elect leaders for both halves.
    pub(crate) fn split(&mut self, cluster: ClusterId, now: Instant) {
        let Some(members) = self.clusters.get(&cluster).map(|c| c.members.clone()) else {
            return;
        };
        let into = self.fresh_cluster_id();
        let plan = plan_split(&members, into);

        if let Some(c) = self.clusters.get_mut(&cluster) {
            c.members = plan.keep.clone();
        }
        let mut fresh = Cluster::new(into);
        fresh.members = plan.moved.clone();
        for id in &plan.moved {
            if let Some(node) = self.nodes.get_mut(id) {
                node.cluster = into;
            }
        }
        self.clusters.insert(into, fresh);

        info!(
            from = %cluster,
            %into,
            kept = plan.keep.len(),
            moved = plan.moved.len(),
            "cluster split"
        );
        self.events.push(MeshEvent::Split {
            from: cluster,
            into,
        });

        self.elect(cluster, now);
        self.elect(into, now);
    }

    fn desired_edges(&self) -> BTreeMap<(NodeId, NodeId), Edge> {
        let mut edges: BTreeMap<(NodeId, NodeId), Edge> = BTreeMap::new();
        let mut add = |x: NodeId, y: NodeId, cost: u32| {
            if x == y {
                return;
            }
            let edge = Edge::new(x, y, cost);
            edges
                .entry(edge.key())
                .and_modify(|e| e.cost = e.cost.min(cost))
                .or_insert(edge);
        };

        for cluster in self.clusters.values() {
            let leaders = cluster.leaders();
            for id in &cluster.members {
                let Some(node) = self.nodes.get(id) else {
                    continue;
                };
                for leader in &leaders {
                    add(*id, *leader, node.link_cost);
                }
            }
        }

        let bridges: Vec<NodeId> = self.clusters.values().filter_map(Cluster::bridge).collect();
        for (i, a) in bridges.iter().enumerate() {
            for b in &bridges[i + 1..] {
                add(*a, *b, self.config.inter_cluster_cost);
            }
        }
        edges
    }

    /// Recompute links, refresh changed entries and handshake new links.
    pub(crate) fn rebuild_edges(&mut self, now: Instant) {
        let desired = self.desired_edges();
        let old = std::mem::replace(&mut self.edges, desired);

        let added: Vec<Edge> = self
            .edges
            .values()
            .filter(|e| old.get(&e.key()) != Some(*e))
            .copied()
            .collect();
        let removed = old.keys().filter(|k| !self.edges.contains_key(k)).count();

        let ids: Vec<NodeId> = self.tables.keys().copied().collect();
        for id in ids {
            self.sync_entry(id);
        }
        for edge in &added {
            self.handshake(edge.a, edge.b, now);
        }

        if !added.is_empty() || removed > 0 {
            debug!(added = added.len(), removed, total = self.edges.len(), "links rebuilt");
        }
    }

    /// Bring a node's own routing entry in line with the registry.
    fn sync_entry(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let desired = self.entry_for(node);
        let Some(table) = self.tables.get_mut(&id) else {
            return;
        };
        let stale = table.local_entry().is_some_and(|e| {
            e.role != desired.role
                || e.cluster != desired.cluster
                || e.links != desired.links
                || e.capabilities != desired.capabilities
        });
        if stale {
            table.update_local(|e| {
                e.role = desired.role;
                e.cluster = desired.cluster;
                e.links = desired.links;
                e.capabilities = desired.capabilities;
            });
        }
    }

    /// Both ends of a new link learn each other's current entry.
    fn handshake(&mut self, a: NodeId, b: NodeId, now: Instant) {
        if !self.can_reach(a, b) {
            return;
        }
        let entry_a = self.tables.get(&a).and_then(|t| t.local_entry().cloned());
        let entry_b = self.tables.get(&b).and_then(|t| t.local_entry().cloned());
        if let (Some(ea), Some(table_b)) = (entry_a, self.tables.get_mut(&b)) {
            table_b.merge_entry(ea, now);
        }
        if let (Some(eb), Some(table_a)) = (entry_b, self.tables.get_mut(&a)) {
            table_a.merge_entry(eb, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use meshwork_topology::{NodeDescriptor, NodeStatus};

    use super::*;
    use crate::config::MeshConfig;

    fn mesh_with(n: u64, bound: usize, now: Instant) -> MeshNetwork {
        let mut mesh = MeshNetwork::new(MeshConfig::default().with_max_cluster_size(bound));
        for id in 1..=n {
            mesh.join(NodeDescriptor::worker(NodeId(id), ["render"]), now)
                .unwrap();
        }
        mesh
    }

    #[test]
    fn every_member_links_to_its_leaders() {
        let now = Instant::now();
        let mesh = mesh_with(6, 20, now);
        let cluster = mesh.clusters().next().unwrap().clone();
        for id in &cluster.members {
            let links = mesh.links_of(*id);
            for leader in cluster.leaders() {
                if leader != *id {
                    assert!(links.contains_key(&leader), "{id} not linked to {leader}");
                }
            }
        }
    }

    #[test]
    fn oversized_cluster_splits_in_two() {
        let now = Instant::now();
        let mesh = mesh_with(21, 20, now);
        let clusters: Vec<&Cluster> = mesh.clusters().collect();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 10);
        assert_eq!(clusters[1].len(), 11);
        assert_ne!(clusters[0].coordinator, clusters[1].coordinator);
        for c in &clusters {
            let coord = c.coordinator.unwrap();
            assert!(c.members.contains(&coord));
            assert_eq!(mesh.node(coord).unwrap().role, Role::Coordinator);
        }
    }

    #[test]
    fn gateways_bridge_clusters() {
        let now = Instant::now();
        let mesh = mesh_with(21, 20, now);
        let bridges: Vec<NodeId> = mesh.clusters().filter_map(Cluster::bridge).collect();
        assert_eq!(bridges.len(), 2);
        let links = mesh.links_of(bridges[0]);
        assert_eq!(links.get(&bridges[1]), Some(&mesh.config().inter_cluster_cost));
    }

    #[test]
    fn declared_roles_are_preferred() {
        let now = Instant::now();
        let mut mesh = MeshNetwork::new(MeshConfig::default());
        mesh.join(NodeDescriptor::worker(NodeId(1), ["a"]), now).unwrap();
        mesh.join(NodeDescriptor::new(NodeId(2), Role::Gateway, ["a"]), now)
            .unwrap();
        let cluster = mesh.clusters().next().unwrap();
        assert_eq!(cluster.gateway, Some(NodeId(2)));
        assert_eq!(mesh.node(NodeId(2)).unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn stale_election_is_ignored() {
        let now = Instant::now();
        let mut mesh = mesh_with(3, 20, now);
        let cluster = mesh.clusters().next().unwrap().clone();
        let stale = Election {
            cluster: cluster.id,
            term: cluster.term,
            coordinator: Some(NodeId(3)),
            gateway: Some(NodeId(2)),
        };
        assert!(!mesh.apply_election(&stale));
        assert_eq!(mesh.node(NodeId(3)).unwrap().role, Role::Worker);
    }

    #[test]
    fn role_changes_reach_the_routing_entry() {
        let now = Instant::now();
        let mesh = mesh_with(3, 20, now);
        let entry = mesh.table(NodeId(2)).unwrap().local_entry().unwrap();
        assert_eq!(entry.role, Role::Gateway);
        assert!(entry.links.contains_key(&NodeId(1)));
    }
}
