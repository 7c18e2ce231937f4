//! Meshwork Routing
//!
//! Every node keeps its own [`RoutingTable`]: a gossip-maintained map of the
//! peers it knows, the capabilities they advertise and the links between
//! them. Routing is a pure function of that table plus a [`MeshView`] onto
//! the failure detector.
//!
//! # Flow
//!
//! ```text
//!   gossip digests ──merge──▶ RoutingTable ──adjacency──▶ Dijkstra
//!                                  │                          │
//!                          capability index              path costs
//!                                  └────────┬─────────────────┘
//!                                           ▼
//!                                 strategy scoring ──▶ Vec<Candidate>
//! ```
//!
//! Nothing here performs IO; the mesh layer decides when digests are
//! exchanged and which nodes can reach each other.

mod entry;
mod path;
mod strategy;
mod table;

pub use entry::{GossipDigest, PeerEntry};
pub use path::{Adjacency, ShortestPaths};
pub use strategy::{
    route, AdaptivePolicy, Candidate, MeshView, RouteRequest, RoutingStrategy,
};
pub use table::RoutingTable;

/// Default maximum entries in one gossip digest.
pub const DEFAULT_SUMMARY_LIMIT: usize = 64;
