//! Per-node routing table.
//!
//! # Convergence
//!
//! Every table starts from its own entry (plus whatever the join handshake
//! copied in) and learns the rest through gossip:
//!
//! ```text
//! round r:  each node pushes summary(limit) to `fanout` random peers
//! merge:    keep the entry with the larger (incarnation, version, tombstone)
//! result:   every table holds every live entry after O(log N) rounds
//! ```
//!
//! Summaries are bounded, freshest entries first, so new information
//! spreads ahead of entries everyone already has.
//!
//! # Tombstones
//!
//! A tombstone is kept for a grace period (so it can keep overwriting
//! stale copies still in flight) and then evicted. Eviction records the
//! incarnation so stale gossip cannot resurrect the entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use meshwork_topology::{Capability, ClusterId, LinkCost, NodeId, Role};
use tracing::trace;

use crate::entry::{GossipDigest, PeerEntry};

/// One node's view of the mesh.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local: NodeId,
    entries: BTreeMap<NodeId, PeerEntry>,
    /// Capability → nodes advertising it (live entries only).
    by_capability: HashMap<Capability, BTreeSet<NodeId>>,
    /// When this table first saw each tombstone.
    tombstones: HashMap<NodeId, Instant>,
    /// Highest evicted incarnation per id.
    evicted: HashMap<NodeId, u64>,
    /// Logical clock of the last local change per entry.
    touched: HashMap<NodeId, u64>,
    clock: u64,
}

impl RoutingTable {
    /// Create a table that knows only its own entry.
    pub fn new(local: PeerEntry) -> Self {
        let mut table = Self {
            local: local.node,
            entries: BTreeMap::new(),
            by_capability: HashMap::new(),
            tombstones: HashMap::new(),
            evicted: HashMap::new(),
            touched: HashMap::new(),
            clock: 0,
        };
        table.insert(local, None);
        table
    }

    /// The node owning this table.
    pub fn local(&self) -> NodeId {
        self.local
    }

    /// The owning node's own entry.
    pub fn local_entry(&self) -> Option<&PeerEntry> {
        self.entries.get(&self.local)
    }

    /// Cluster the owning node belongs to.
    pub fn local_cluster(&self) -> Option<ClusterId> {
        self.local_entry().map(|e| e.cluster)
    }

    /// Change the owning node's entry and bump its version.
    pub fn update_local(&mut self, change: impl FnOnce(&mut PeerEntry)) {
        if let Some(mut entry) = self.entries.get(&self.local).cloned() {
            change(&mut entry);
            entry.version += 1;
            self.insert(entry, None);
        }
    }

    /// Look up a peer.
    pub fn get(&self, node: &NodeId) -> Option<&PeerEntry> {
        self.entries.get(node)
    }

    /// Whether the table holds a live (non-tombstone) entry for `node`.
    pub fn knows(&self, node: &NodeId) -> bool {
        self.entries.get(node).is_some_and(|e| !e.tombstone)
    }

    /// All entries, tombstones included.
    pub fn entries(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.values()
    }

    /// Entries that are not tombstones.
    pub fn live_entries(&self) -> impl Iterator<Item = &PeerEntry> {
        self.entries.values().filter(|e| !e.tombstone)
    }

    /// Number of live entries (including the local one).
    pub fn live_count(&self) -> usize {
        self.live_entries().count()
    }

    /// Nodes known to advertise a capability.
    pub fn nodes_with(&self, cap: &Capability) -> impl Iterator<Item = NodeId> + '_ {
        self.by_capability.get(cap).into_iter().flatten().copied()
    }

    /// Live members of a cluster.
    pub fn cluster_members(&self, cluster: ClusterId) -> impl Iterator<Item = &PeerEntry> {
        self.live_entries().filter(move |e| e.cluster == cluster)
    }

    /// The node bridging `cluster` to others, as this table sees it: the
    /// Gateway, or the Coordinator when no separate Gateway is known.
    pub fn bridge_of(&self, cluster: ClusterId) -> Option<NodeId> {
        let mut coordinator = None;
        for e in self.cluster_members(cluster) {
            match e.role {
                Role::Gateway => return Some(e.node),
                Role::Coordinator => coordinator = Some(e.node),
                _ => {}
            }
        }
        coordinator
    }

    /// Merge one entry. Returns true if it was new or newer.
    pub fn merge_entry(&mut self, entry: PeerEntry, now: Instant) -> bool {
        // Our own entry is authoritative locally.
        if entry.node == self.local {
            return false;
        }
        if let Some(&gone) = self.evicted.get(&entry.node) {
            if entry.incarnation <= gone {
                return false;
            }
        }
        let newer = match self.entries.get(&entry.node) {
            Some(existing) => entry.is_newer_than(existing),
            None => true,
        };
        if newer {
            self.insert(entry, Some(now));
        }
        newer
    }

    /// Merge a gossip digest. Returns the number of entries updated.
    pub fn merge_digest(&mut self, digest: &GossipDigest, now: Instant) -> usize {
        let updated = digest
            .entries
            .iter()
            .filter(|e| self.merge_entry((*e).clone(), now))
            .count();
        trace!(
            local = %self.local,
            from = %digest.origin,
            round = digest.round,
            received = digest.len(),
            updated,
            "merged gossip digest"
        );
        updated
    }

    /// Build a bounded summary: our own entry first, then the most recently
    /// changed entries.
    pub fn summary(&self, limit: usize, round: u64) -> GossipDigest {
        let mut others: Vec<&PeerEntry> = self
            .entries
            .values()
            .filter(|e| e.node != self.local)
            .collect();
        others.sort_by_key(|e| {
            (
                std::cmp::Reverse(self.touched.get(&e.node).copied().unwrap_or(0)),
                e.node,
            )
        });

        let mut entries = Vec::with_capacity(limit.min(self.entries.len()));
        if let Some(own) = self.local_entry() {
            entries.push(own.clone());
        }
        entries.extend(
            others
                .into_iter()
                .take(limit.saturating_sub(entries.len()))
                .cloned(),
        );

        GossipDigest {
            origin: self.local,
            round,
            entries,
        }
    }

    /// Evict tombstones first seen more than `grace` ago.
    pub fn evict_expired(&mut self, now: Instant, grace: Duration) -> Vec<NodeId> {
        let expired: Vec<NodeId> = self
            .tombstones
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > grace)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.tombstones.remove(id);
            self.touched.remove(id);
            if let Some(entry) = self.entries.remove(id) {
                self.evicted.insert(*id, entry.incarnation);
            }
        }
        expired
    }

    /// Undirected adjacency over live entries accepted by `usable`.
    ///
    /// A link counts if either endpoint advertises it; the cheaper
    /// advertisement wins.
    pub fn adjacency(
        &self,
        usable: impl Fn(NodeId) -> bool,
    ) -> BTreeMap<NodeId, BTreeMap<NodeId, LinkCost>> {
        let mut adj: BTreeMap<NodeId, BTreeMap<NodeId, LinkCost>> = BTreeMap::new();
        let ok = |n: NodeId| self.knows(&n) && usable(n);

        for entry in self.live_entries().filter(|e| usable(e.node)) {
            adj.entry(entry.node).or_default();
            for (&peer, &cost) in &entry.links {
                if !ok(peer) {
                    continue;
                }
                for (from, to) in [(entry.node, peer), (peer, entry.node)] {
                    let slot = adj.entry(from).or_default().entry(to).or_insert(cost);
                    *slot = (*slot).min(cost);
                }
            }
        }
        adj
    }

    fn insert(&mut self, entry: PeerEntry, seen: Option<Instant>) {
        let id = entry.node;
        self.unindex(id);

        if entry.tombstone {
            if let Some(now) = seen {
                self.tombstones.entry(id).or_insert(now);
            }
        } else {
            self.tombstones.remove(&id);
            for cap in &entry.capabilities {
                self.by_capability.entry(cap.clone()).or_default().insert(id);
            }
        }

        self.clock += 1;
        self.touched.insert(id, self.clock);
        self.entries.insert(id, entry);
    }

    fn unindex(&mut self, id: NodeId) {
        if let Some(old) = self.entries.get(&id) {
            for cap in &old.capabilities {
                if let Some(set) = self.by_capability.get_mut(cap) {
                    set.remove(&id);
                }
            }
        }
    }

    /// Mark the local entry as a tombstone (graceful leave).
    pub fn bury_local(&mut self, now: Instant) {
        if let Some(mut entry) = self.entries.get(&self.local).cloned() {
            entry.bury();
            self.insert(entry, Some(now));
        }
    }
}
