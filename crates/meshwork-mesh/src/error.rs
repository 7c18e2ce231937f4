//! Error types for the mesh.

use meshwork_topology::{Capability, DescriptorError, NodeId};
use thiserror::Error;

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors returned by [`MeshNetwork`](crate::MeshNetwork).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    /// The id is already held by a member (or by a tombstone still in its
    /// grace period).
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// The join descriptor is inconsistent.
    #[error("capability mismatch for {node}: {source}")]
    CapabilityMismatch {
        node: NodeId,
        #[source]
        source: DescriptorError,
    },

    /// No live member with this id.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// Nothing reachable advertises the capability.
    #[error("no route for capability {capability}")]
    NoRoute { capability: Capability },
}
