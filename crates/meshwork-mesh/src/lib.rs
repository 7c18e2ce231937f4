//! Meshwork Mesh
//!
//! Membership, discovery and self-healing for a mesh of worker nodes.
//!
//! # Responsibilities
//!
//! ```text
//! join / leave / heartbeat ──▶ registry (failure detector, load, leaders)
//!                                  │
//!                       elections, splits, link layout
//!                                  │
//! discover() ──────────▶ per-node RoutingTables (gossip, tombstones)
//!                                  │
//! route(origin, req) ◀─────────────┘   health() ──▶ HealthReport
//! ```
//!
//! # Self-healing
//!
//! - A cluster that loses its Coordinator re-elects from its live members;
//!   the surviving Gateway with the highest uptime takes over.
//! - Under a partition each side keeps running on what it knows. Clusters
//!   whose gateway is cut off report `degraded` in [`HealthReport`], and
//!   gossip re-merges the tables once the partition heals.
//! - A node flagged for review stays Degraded, and unroutable, until an
//!   operator clears it.

mod clusters;
mod config;
mod error;
mod gossip;
mod health;
mod network;

pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use health::{ClusterHealth, HealthReport, NodeHealth};
pub use network::{MeshEvent, MeshNetwork};

pub use meshwork_routing::{Candidate, MeshView, RouteRequest, RoutingStrategy};

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Instant;

    use meshwork_topology::{NodeDescriptor, NodeId, Role};

    use super::*;

    #[test]
    fn twenty_five_nodes_split_and_route_across_gateways() {
        let now = Instant::now();
        let mut mesh = MeshNetwork::new(MeshConfig::default());
        for id in 1..=24 {
            mesh.join(NodeDescriptor::worker(NodeId(id), ["render"]), now)
                .unwrap();
        }
        mesh.join(NodeDescriptor::worker(NodeId(25), ["encode"]), now)
            .unwrap();

        let clusters: Vec<_> = mesh.clusters().cloned().collect();
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.len() <= 20));
        let coordinators: BTreeSet<_> = clusters.iter().filter_map(|c| c.coordinator).collect();
        assert_eq!(coordinators.len(), 2);

        for _ in 0..20 {
            mesh.discover(now);
        }

        // Route from the coordinator of the cluster that does not hold 25.
        let home = mesh.node(NodeId(25)).unwrap().cluster;
        let origin_cluster = clusters.iter().find(|c| c.id != home).unwrap();
        let origin = origin_cluster.coordinator.unwrap();
        let req = RouteRequest::new("encode").with_strategy(RoutingStrategy::Hierarchical);
        let route = mesh.route(origin, &req).unwrap();

        assert_eq!(route[0].node, NodeId(25));
        assert_eq!(route[0].via, origin_cluster.gateway);
        let gateways: Vec<NodeId> = route[0]
            .path
            .iter()
            .copied()
            .filter(|n| mesh.node(*n).is_some_and(|node| node.role == Role::Gateway))
            .collect();
        assert_eq!(gateways.len(), 2, "path {:?} should cross both gateways", route[0].path);
    }
}
