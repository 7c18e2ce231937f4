//! Weighted links between nodes.

use crate::node::NodeId;

/// Measured cost of traversing a link (milliseconds of round-trip).
pub type LinkCost = u32;

/// A bidirectional link. Endpoints are stored lowest id first, so the same
/// link always compares equal regardless of the order it was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    pub a: NodeId,
    pub b: NodeId,
    pub cost: LinkCost,
}

impl Edge {
    /// Create a normalised edge.
    pub fn new(x: NodeId, y: NodeId, cost: LinkCost) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self { a, b, cost }
    }

    /// Endpoint pair, lowest first.
    pub const fn key(&self) -> (NodeId, NodeId) {
        (self.a, self.b)
    }

    /// Whether `node` is one of the endpoints.
    pub fn touches(&self, node: NodeId) -> bool {
        self.a == node || self.b == node
    }

    /// The far endpoint as seen from `node`.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if self.a == node {
            Some(self.b)
        } else if self.b == node {
            Some(self.a)
        } else {
            None
        }
    }
}
