//! Meshwork Topology
//!
//! The data model every other meshwork crate is built on: nodes, the
//! clusters they are grouped into, and the weighted edges between them.
//!
//! # Shape of the mesh
//!
//! ```text
//!   cluster 0                          cluster 1
//!   ┌──────────────────────┐           ┌──────────────────────┐
//!   │  Coordinator ─ Gateway ═══════════ Gateway ─ Coordinator │
//!   │      │   ╲   ╱  │    │           │    │  ╲   ╱   │       │
//!   │   Worker  Worker     │           │  Worker  Worker       │
//!   └──────────────────────┘           └──────────────────────┘
//! ```
//!
//! - Every member links to its cluster's Coordinator and Gateway, so the
//!   cluster stays connected while either of them survives.
//! - Gateways link to each other across clusters.
//! - A cluster holds at most [`DEFAULT_MAX_CLUSTER_SIZE`] members before it
//!   splits in two (see [`plan_split`]).
//!
//! Roles are a closed set ([`Role`]) on an otherwise immutable [`Node`]
//! record. They change only when an [`Election`] is applied.

mod cluster;
mod edge;
mod error;
mod node;

pub use cluster::{plan_split, Cluster, ClusterId, Election, ElectionCandidate, SplitPlan};
pub use edge::{Edge, LinkCost};
pub use error::DescriptorError;
pub use node::{Capability, Node, NodeDescriptor, NodeId, NodeStatus, Role};

/// Maximum members in a cluster before it splits.
pub const DEFAULT_MAX_CLUSTER_SIZE: usize = 20;

/// Number of peers each node gossips to per discovery round.
pub const DEFAULT_GOSSIP_FANOUT: usize = 3;

/// Link cost used when a descriptor does not report one.
pub const DEFAULT_LINK_COST: LinkCost = 10;

// A split must leave both halves non-empty and within bounds.
const _: () = assert!(DEFAULT_MAX_CLUSTER_SIZE >= 2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_halves_fit_bound() {
        let half = (DEFAULT_MAX_CLUSTER_SIZE + 1) / 2;
        assert!(half < DEFAULT_MAX_CLUSTER_SIZE);
        assert!(DEFAULT_MAX_CLUSTER_SIZE + 1 - half <= DEFAULT_MAX_CLUSTER_SIZE);
    }
}
