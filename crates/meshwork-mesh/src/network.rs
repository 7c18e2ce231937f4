//! The membership registry and the per-node routing views it drives.
//!
//! [`MeshNetwork`] is sans-IO: callers feed it joins, leaves, heartbeats and
//! clock ticks, and it updates its state. It holds two kinds of state:
//!
//! - the **registry**: authoritative liveness, load and cluster leadership.
//!   It acts as the failure detector.
//! - one [`RoutingTable`] per node: that node's gossip-learned picture of
//!   the mesh. Routes are computed from the origin's table, so a node only
//!   routes to what it has actually heard about.
//!
//! # Node lifecycle
//!
//! ```text
//!  join ──▶ Active ──(silent > degraded_after)──▶ Degraded
//!             ▲                                      │
//!             └──────────── heartbeat ◀──────────────┤
//!                                                    ▼
//!                      (silent > heartbeat_timeout) Unreachable
//!                                                    │ + tombstone_grace
//!  leave ───────────────────────────────────────▶ Tombstoned
//!                                                    │ + tombstone_grace
//!                                                    ▼
//!                                                 Evicted (id reusable)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use meshwork_routing::{route, Candidate, MeshView, PeerEntry, RouteRequest, RoutingTable};
use meshwork_topology::{
    Cluster, ClusterId, Edge, Election, Node, NodeDescriptor, NodeId, NodeStatus,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};

/// Something that changed in the mesh. Drained with
/// [`MeshNetwork::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Joined {
        node: NodeId,
        cluster: ClusterId,
    },
    StatusChanged {
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },
    /// `graceful` is false when the node was declared dead.
    Tombstoned {
        node: NodeId,
        graceful: bool,
    },
    Evicted(NodeId),
    Elected(Election),
    Split {
        from: ClusterId,
        into: ClusterId,
    },
    Flagged {
        node: NodeId,
        reason: String,
    },
}

/// Membership, topology and routing for a whole mesh.
pub struct MeshNetwork {
    pub(crate) config: MeshConfig,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) clusters: BTreeMap<ClusterId, Cluster>,
    pub(crate) edges: BTreeMap<(NodeId, NodeId), Edge>,
    pub(crate) tables: BTreeMap<NodeId, RoutingTable>,
    /// Partition group per node; `None` when the mesh is whole.
    pub(crate) groups: Option<HashMap<NodeId, usize>>,
    /// Incarnation of each id at eviction.
    pub(crate) evicted: HashMap<NodeId, u64>,
    pub(crate) next_cluster: u32,
    pub(crate) round: u64,
    pub(crate) rng: StdRng,
    pub(crate) events: Vec<MeshEvent>,
}

impl MeshNetwork {
    /// Create an empty mesh.
    pub fn new(config: MeshConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            nodes: BTreeMap::new(),
            clusters: BTreeMap::new(),
            edges: BTreeMap::new(),
            tables: BTreeMap::new(),
            groups: None,
            evicted: HashMap::new(),
            next_cluster: 0,
            round: 0,
            rng,
            events: Vec::new(),
        }
    }

    /// Admit a node.
    ///
    /// The node is placed in its hinted cluster, or the smallest one. Its
    /// routing table starts as a copy of the cluster coordinator's, and it
    /// links to the cluster's coordinator and gateway. A cluster pushed past
    /// its bound splits immediately.
    pub fn join(&mut self, descriptor: NodeDescriptor, now: Instant) -> Result<NodeId> {
        let id = descriptor.id;
        descriptor
            .validate()
            .map_err(|source| MeshError::CapabilityMismatch { node: id, source })?;
        if self.nodes.contains_key(&id) {
            return Err(MeshError::DuplicateNode(id));
        }

        let cluster = self.place(descriptor.cluster_hint);
        let mut node = Node::from_descriptor(&descriptor, cluster, now);
        node.incarnation = self.evicted.get(&id).map_or(0, |i| i + 1);

        let mut table = RoutingTable::new(self.entry_for(&node));
        if let Some(seed) = self
            .clusters
            .get(&cluster)
            .and_then(|c| c.coordinator)
            .filter(|coord| self.can_reach(*coord, id))
            .and_then(|coord| self.tables.get(&coord))
        {
            for entry in seed.entries() {
                table.merge_entry(entry.clone(), now);
            }
        }

        self.nodes.insert(id, node);
        self.tables.insert(id, table);
        self.clusters
            .entry(cluster)
            .or_insert_with(|| Cluster::new(cluster))
            .members
            .insert(id);

        info!(node = %id, %cluster, role = %descriptor.role, "node joined");
        self.events.push(MeshEvent::Joined { node: id, cluster });

        if self.needs_election(cluster) {
            self.elect(cluster, now);
        }
        if self
            .clusters
            .get(&cluster)
            .is_some_and(|c| c.len() > self.config.max_cluster_size)
        {
            self.split(cluster, now);
        }
        self.rebuild_edges(now);
        Ok(id)
    }

    /// Graceful departure. The node's tombstone is pushed to its neighbours
    /// and spreads from there by gossip.
    pub fn leave(&mut self, id: NodeId, now: Instant) -> Result<()> {
        if !self.is_member(id) {
            return Err(MeshError::UnknownNode(id));
        }
        self.tombstone(id, now, true);
        Ok(())
    }

    /// Record a heartbeat. Restores Active unless the node is flagged.
    pub fn heartbeat(&mut self, id: NodeId, now: Instant) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .filter(|n| n.tombstoned_at.is_none())
            .ok_or(MeshError::UnknownNode(id))?;
        node.last_heartbeat = now;
        if node.status != NodeStatus::Active && !node.flagged {
            let from = node.status;
            node.status = NodeStatus::Active;
            info!(node = %id, %from, "node recovered");
            self.events.push(MeshEvent::StatusChanged {
                node: id,
                from,
                to: NodeStatus::Active,
            });
        }
        Ok(())
    }

    /// Advance the failure detector.
    ///
    /// Escalates silent nodes, declares long-unreachable nodes dead,
    /// re-elects clusters that lost a leader, and evicts expired tombstones
    /// from the registry and from every routing table.
    pub fn tick(&mut self, now: Instant) {
        let degraded_after = self.config.degraded_after;
        let timeout = self.config.heartbeat_timeout;
        let grace = self.config.tombstone_grace;

        let mut dead = Vec::new();
        let mut lost = BTreeSet::new();
        for node in self.nodes.values_mut().filter(|n| n.tombstoned_at.is_none()) {
            let silent = now.saturating_duration_since(node.last_heartbeat);
            let status = if silent > timeout {
                NodeStatus::Unreachable
            } else if node.flagged || silent > degraded_after {
                NodeStatus::Degraded
            } else {
                NodeStatus::Active
            };

            if status != node.status {
                match status {
                    NodeStatus::Unreachable => {
                        warn!(node = %node.id, silent_ms = silent.as_millis() as u64, "node unreachable");
                        lost.insert(node.cluster);
                    }
                    _ => debug!(node = %node.id, from = %node.status, to = %status, "node status changed"),
                }
                self.events.push(MeshEvent::StatusChanged {
                    node: node.id,
                    from: node.status,
                    to: status,
                });
                node.status = status;
            }

            if status == NodeStatus::Unreachable && silent > timeout + grace {
                dead.push(node.id);
            }
        }

        for id in dead {
            self.tombstone(id, now, false);
        }

        let mut relink = false;
        for cluster in lost {
            if self.needs_election(cluster) {
                self.elect(cluster, now);
                relink = true;
            }
        }
        if relink {
            self.rebuild_edges(now);
        }

        let expired: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| {
                n.tombstoned_at
                    .is_some_and(|at| now.saturating_duration_since(at) > grace)
            })
            .map(|n| n.id)
            .collect();
        for id in expired {
            if let Some(node) = self.nodes.remove(&id) {
                self.evicted.insert(id, node.incarnation);
                debug!(node = %id, "evicted from registry");
                self.events.push(MeshEvent::Evicted(id));
            }
        }

        for table in self.tables.values_mut() {
            table.evict_expired(now, grace);
        }
    }

    /// Mark a node Degraded pending operator review. It stays Degraded,
    /// heartbeats notwithstanding, until [`clear_flag`](Self::clear_flag).
    pub fn flag_node(&mut self, id: NodeId, reason: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .filter(|n| n.tombstoned_at.is_none())
            .ok_or(MeshError::UnknownNode(id))?;
        if node.flagged {
            return Ok(());
        }
        node.flagged = true;
        warn!(node = %id, reason, "node flagged for review");
        if node.status == NodeStatus::Active {
            node.status = NodeStatus::Degraded;
            self.events.push(MeshEvent::StatusChanged {
                node: id,
                from: NodeStatus::Active,
                to: NodeStatus::Degraded,
            });
        }
        self.events.push(MeshEvent::Flagged {
            node: id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Operator review passed; the node may be routed to again.
    pub fn clear_flag(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .filter(|n| n.tombstoned_at.is_none())
            .ok_or(MeshError::UnknownNode(id))?;
        node.flagged = false;
        if node.status == NodeStatus::Degraded {
            node.status = NodeStatus::Active;
            info!(node = %id, "flag cleared");
            self.events.push(MeshEvent::StatusChanged {
                node: id,
                from: NodeStatus::Degraded,
                to: NodeStatus::Active,
            });
        }
        Ok(())
    }

    /// Count a task against a node's capacity.
    pub fn record_assignment(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.active_tasks = node.active_tasks.saturating_add(1);
        }
    }

    /// Release a task from a node's capacity.
    pub fn release_assignment(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.active_tasks = node.active_tasks.saturating_sub(1);
        }
    }

    /// Rank candidates for a request, as seen from `origin`'s routing table.
    pub fn route(&self, origin: NodeId, req: &RouteRequest) -> Result<Vec<Candidate>> {
        let table = self
            .tables
            .get(&origin)
            .ok_or(MeshError::UnknownNode(origin))?;
        let candidates = route(table, self, req, &self.config.adaptive);
        if candidates.is_empty() {
            return Err(MeshError::NoRoute {
                capability: req.capability.clone(),
            });
        }
        Ok(candidates)
    }

    /// Take all events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Registry record, tombstoned nodes included until eviction.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// All registry records.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Ids of members that are not tombstoned and not Unreachable.
    pub fn live_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.values().filter(|n| n.is_live()).map(|n| n.id)
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    /// The routing table `id` maintains.
    pub fn table(&self, id: NodeId) -> Option<&RoutingTable> {
        self.tables.get(&id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Number of gossip rounds run so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Coordinator of the cluster `id` belongs to.
    pub fn coordinator_of(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(&id)?;
        self.clusters.get(&node.cluster)?.coordinator
    }

    /// Member that has not left or been declared dead.
    pub fn is_member(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|n| n.tombstoned_at.is_none())
    }

    pub(crate) fn entry_for(&self, node: &Node) -> PeerEntry {
        let mut entry = PeerEntry::new(node.id, node.role, node.cluster)
            .with_capabilities(node.capabilities.clone(), node.capacity)
            .with_incarnation(node.incarnation);
        entry.links = self.links_of(node.id);
        entry
    }

    pub(crate) fn links_of(&self, id: NodeId) -> BTreeMap<NodeId, u32> {
        self.edges
            .values()
            .filter_map(|e| e.other(id).map(|peer| (peer, e.cost)))
            .collect()
    }

    fn place(&mut self, hint: Option<ClusterId>) -> ClusterId {
        if let Some(hint) = hint {
            self.next_cluster = self.next_cluster.max(hint.0.saturating_add(1));
            return hint;
        }
        match self
            .clusters
            .values()
            .filter(|c| !c.is_empty())
            .min_by_key(|c| (c.len(), c.id))
        {
            Some(c) => c.id,
            None => self.fresh_cluster_id(),
        }
    }

    pub(crate) fn fresh_cluster_id(&mut self) -> ClusterId {
        if let Some(next) = self.next_cluster.checked_add(1) {
            let id = ClusterId(self.next_cluster);
            self.next_cluster = next;
            return id;
        }
        // The counter is pinned at the top of the range; take the lowest
        // id no live cluster holds.
        let mut id = 0;
        while self.clusters.contains_key(&ClusterId(id)) && id < u32::MAX {
            id += 1;
        }
        ClusterId(id)
    }

    /// Bury `id`, push its tombstone, drop it from its cluster and heal.
    fn tombstone(&mut self, id: NodeId, now: Instant, graceful: bool) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.tombstoned_at = Some(now);
        let cluster = node.cluster;

        // A dead node cannot announce itself; its coordinator does.
        let announcer = if graceful {
            id
        } else {
            self.clusters
                .get(&cluster)
                .and_then(|c| c.coordinator)
                .filter(|c| *c != id && self.is_live(*c))
                .unwrap_or(id)
        };
        let neighbours: Vec<NodeId> = self
            .edges
            .values()
            .filter_map(|e| e.other(id))
            .chain(std::iter::once(announcer))
            .filter(|n| *n != id && self.can_reach(announcer, *n))
            .collect();

        if let Some(mut table) = self.tables.remove(&id) {
            table.bury_local(now);
            if let Some(tomb) = table.local_entry().cloned() {
                for peer in neighbours {
                    if let Some(t) = self.tables.get_mut(&peer) {
                        t.merge_entry(tomb.clone(), now);
                    }
                }
            }
        }

        if let Some(c) = self.clusters.get_mut(&cluster) {
            c.members.remove(&id);
            if c.is_empty() {
                self.clusters.remove(&cluster);
            }
        }

        if graceful {
            info!(node = %id, %cluster, "node left");
        } else {
            warn!(node = %id, %cluster, "node declared dead");
        }
        self.events.push(MeshEvent::Tombstoned { node: id, graceful });

        if self.needs_election(cluster) {
            self.elect(cluster, now);
        }
        self.rebuild_edges(now);
    }
}

impl MeshView for MeshNetwork {
    fn is_live(&self, node: NodeId) -> bool {
        self.nodes.get(&node).is_some_and(Node::is_live)
    }

    fn is_assignable(&self, node: NodeId) -> bool {
        self.nodes
            .get(&node)
            .is_some_and(|n| n.is_assignable() && !n.flagged)
    }

    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        match &self.groups {
            None => true,
            Some(groups) => groups.get(&from) == groups.get(&to),
        }
    }

    fn load(&self, node: NodeId) -> f64 {
        self.nodes.get(&node).map_or(1.0, Node::load)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use meshwork_routing::RoutingStrategy;
    use meshwork_topology::{DescriptorError, Role};

    use super::*;

    fn worker(id: u64) -> NodeDescriptor {
        NodeDescriptor::worker(NodeId(id), ["render"])
    }

    fn mesh_of(n: u64, now: Instant) -> MeshNetwork {
        let mut mesh = MeshNetwork::new(MeshConfig::default());
        for id in 1..=n {
            mesh.join(worker(id), now).unwrap();
        }
        mesh
    }

    #[test]
    fn the_highest_cluster_id_can_be_hinted() {
        let now = Instant::now();
        let top = ClusterId(u32::MAX);
        let mut mesh = MeshNetwork::new(MeshConfig::default().with_max_cluster_size(2));
        for id in 1..=3 {
            mesh.join(worker(id).in_cluster(top), now).unwrap();
        }

        let ids: BTreeSet<ClusterId> = mesh.clusters().map(|c| c.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&top));
        assert!(mesh.clusters().all(|c| !c.is_empty()));
        assert_eq!(mesh.nodes().filter(|n| n.cluster == top).count(), mesh.cluster(top).unwrap().len());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let now = Instant::now();
        let mut mesh = mesh_of(2, now);
        assert_eq!(
            mesh.join(worker(2), now),
            Err(MeshError::DuplicateNode(NodeId(2)))
        );
    }

    #[test]
    fn invalid_descriptor_rejected() {
        let now = Instant::now();
        let mut mesh = MeshNetwork::new(MeshConfig::default());
        let err = mesh
            .join(NodeDescriptor::worker(NodeId(1), Vec::<&str>::new()), now)
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::CapabilityMismatch {
                node: NodeId(1),
                source: DescriptorError::MissingCapabilities(Role::Worker),
            }
        );
        assert!(mesh.node(NodeId(1)).is_none());
    }

    #[test]
    fn first_node_leads_its_cluster() {
        let now = Instant::now();
        let mesh = mesh_of(1, now);
        let cluster = mesh.clusters().next().unwrap();
        assert_eq!(cluster.coordinator, Some(NodeId(1)));
        assert_eq!(cluster.gateway, Some(NodeId(1)));
    }

    #[test]
    fn second_node_becomes_gateway() {
        let now = Instant::now();
        let mesh = mesh_of(2, now);
        let cluster = mesh.clusters().next().unwrap();
        assert_eq!(cluster.coordinator, Some(NodeId(1)));
        assert_eq!(cluster.gateway, Some(NodeId(2)));
        assert_eq!(mesh.node(NodeId(2)).unwrap().role, Role::Gateway);
    }

    #[test]
    fn joiner_is_seeded_from_coordinator() {
        let now = Instant::now();
        let mesh = mesh_of(5, now);
        let table = mesh.table(NodeId(5)).unwrap();
        for id in 1..=4 {
            assert!(table.knows(&NodeId(id)), "node 5 should know node {id}");
        }
        // The coordinator learned every joiner at handshake.
        assert_eq!(mesh.table(NodeId(1)).unwrap().live_count(), 5);
    }

    #[test]
    fn silence_escalates_status() {
        let t0 = Instant::now();
        let mut mesh = mesh_of(3, t0);
        let cfg = mesh.config().clone();
        for id in [1, 2] {
            mesh.heartbeat(NodeId(id), t0 + cfg.degraded_after * 2).unwrap();
        }
        mesh.tick(t0 + cfg.degraded_after + Duration::from_millis(1));
        assert_eq!(mesh.node(NodeId(3)).unwrap().status, NodeStatus::Degraded);

        mesh.tick(t0 + cfg.heartbeat_timeout + Duration::from_millis(1));
        assert_eq!(mesh.node(NodeId(3)).unwrap().status, NodeStatus::Unreachable);

        mesh.heartbeat(NodeId(3), t0 + cfg.heartbeat_timeout * 2).unwrap();
        assert_eq!(mesh.node(NodeId(3)).unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn dead_nodes_are_tombstoned_then_evicted() {
        let t0 = Instant::now();
        let mut mesh = mesh_of(3, t0);
        let cfg = mesh.config().clone();
        let keep_alive = |mesh: &mut MeshNetwork, at: Instant| {
            mesh.heartbeat(NodeId(1), at).unwrap();
            mesh.heartbeat(NodeId(2), at).unwrap();
        };

        let step = cfg.discovery_interval;
        let mut now = t0;
        while now < t0 + cfg.heartbeat_timeout + cfg.tombstone_grace + step * 2 {
            now += step;
            keep_alive(&mut mesh, now);
            mesh.tick(now);
        }
        assert!(!mesh.is_member(NodeId(3)));
        assert!(mesh.table(NodeId(3)).is_none());
        assert_eq!(
            mesh.join(worker(3), now),
            Err(MeshError::DuplicateNode(NodeId(3)))
        );

        let later = now + cfg.tombstone_grace + step;
        keep_alive(&mut mesh, later);
        mesh.tick(later);
        assert!(mesh.node(NodeId(3)).is_none());
        mesh.join(worker(3), later).unwrap();
        assert_eq!(mesh.node(NodeId(3)).unwrap().incarnation, 1);
    }

    #[test]
    fn leave_pushes_tombstone_to_neighbours() {
        let now = Instant::now();
        let mut mesh = mesh_of(4, now);
        mesh.leave(NodeId(4), now).unwrap();
        let coord = mesh.table(NodeId(1)).unwrap();
        assert!(coord.get(&NodeId(4)).is_some_and(|e| e.tombstone));
        assert_eq!(mesh.leave(NodeId(4), now), Err(MeshError::UnknownNode(NodeId(4))));
    }

    #[test]
    fn coordinator_loss_promotes_gateway() {
        let t0 = Instant::now();
        let mut mesh = mesh_of(4, t0);
        assert_eq!(mesh.coordinator_of(NodeId(3)), Some(NodeId(1)));

        let later = t0 + mesh.config().heartbeat_timeout + Duration::from_millis(1);
        for id in 2..=4 {
            mesh.heartbeat(NodeId(id), later).unwrap();
        }
        mesh.tick(later);
        let cluster = mesh.clusters().next().unwrap();
        assert_eq!(cluster.coordinator, Some(NodeId(2)));
        assert_ne!(cluster.gateway, Some(NodeId(1)));
        assert!(mesh
            .drain_events()
            .iter()
            .any(|e| matches!(e, MeshEvent::Elected(el) if el.coordinator == Some(NodeId(2)))));
    }

    #[test]
    fn flagged_nodes_are_not_routed_to() {
        let now = Instant::now();
        let mut mesh = mesh_of(3, now);
        mesh.flag_node(NodeId(3), "digest mismatch").unwrap();
        mesh.heartbeat(NodeId(3), now).unwrap();
        assert_eq!(mesh.node(NodeId(3)).unwrap().status, NodeStatus::Degraded);

        let req = RouteRequest::new("render").with_strategy(RoutingStrategy::ShortestPath);
        let route = mesh.route(NodeId(1), &req).unwrap();
        assert!(route.iter().all(|c| c.node != NodeId(3)));

        mesh.clear_flag(NodeId(3)).unwrap();
        let route = mesh.route(NodeId(1), &req).unwrap();
        assert!(route.iter().any(|c| c.node == NodeId(3)));
    }

    #[test]
    fn unknown_capability_is_no_route() {
        let now = Instant::now();
        let mesh = mesh_of(3, now);
        let err = mesh.route(NodeId(1), &RouteRequest::new("translate")).unwrap_err();
        assert!(matches!(err, MeshError::NoRoute { .. }));
    }

    #[test]
    fn assignments_drive_load() {
        let now = Instant::now();
        let mut mesh = mesh_of(2, now);
        mesh.record_assignment(NodeId(2));
        mesh.record_assignment(NodeId(2));
        assert!((mesh.load(NodeId(2)) - 0.5).abs() < f64::EPSILON);
        mesh.release_assignment(NodeId(2));
        mesh.release_assignment(NodeId(2));
        mesh.release_assignment(NodeId(2));
        assert_eq!(mesh.node(NodeId(2)).unwrap().active_tasks, 0);
    }
}
