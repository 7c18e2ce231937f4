//! Gossiped knowledge about a single peer.

use std::collections::{BTreeMap, BTreeSet};

use meshwork_topology::{Capability, ClusterId, LinkCost, NodeId, Role};
use serde::{Deserialize, Serialize};

/// Everything a node tells the mesh about itself.
///
/// Entries are owned by the node they describe: only that node bumps
/// `version`. A tombstone is the final version of an incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub node: NodeId,
    pub role: Role,
    pub cluster: ClusterId,
    pub capabilities: BTreeSet<Capability>,
    pub capacity: u32,
    /// Direct links with their measured cost.
    pub links: BTreeMap<NodeId, LinkCost>,
    /// Bumped when the id re-joins after eviction.
    pub incarnation: u64,
    /// Bumped on every change within an incarnation.
    pub version: u64,
    /// The node left or was declared dead.
    pub tombstone: bool,
}

impl PeerEntry {
    /// First version of a fresh node.
    pub fn new(node: NodeId, role: Role, cluster: ClusterId) -> Self {
        Self {
            node,
            role,
            cluster,
            capabilities: BTreeSet::new(),
            capacity: 0,
            links: BTreeMap::new(),
            incarnation: 0,
            version: 1,
            tombstone: false,
        }
    }

    /// Set capabilities and capacity.
    #[must_use]
    pub fn with_capabilities(mut self, caps: BTreeSet<Capability>, capacity: u32) -> Self {
        self.capabilities = caps;
        self.capacity = capacity;
        self
    }

    /// Set the incarnation.
    #[must_use]
    pub fn with_incarnation(mut self, incarnation: u64) -> Self {
        self.incarnation = incarnation;
        self
    }

    /// `(incarnation, version, tombstone)`; the larger tuple is newer.
    pub fn freshness(&self) -> (u64, u64, bool) {
        (self.incarnation, self.version, self.tombstone)
    }

    /// Check if this entry supersedes another entry for the same node.
    pub fn is_newer_than(&self, other: &PeerEntry) -> bool {
        self.node == other.node && self.freshness() > other.freshness()
    }

    /// Turn this entry into its tombstone.
    pub fn bury(&mut self) {
        self.tombstone = true;
        self.links.clear();
        self.version += 1;
    }

    /// Whether the node advertises `cap`.
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }
}

/// A bounded summary of known peers, pushed to a random fan-out of peers
/// every discovery round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipDigest {
    pub origin: NodeId,
    pub round: u64,
    pub entries: Vec<PeerEntry>,
}

impl GossipDigest {
    /// Number of entries carried.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the digest carries nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
