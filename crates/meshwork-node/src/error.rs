//! Error types for meshwork-node.

use meshwork_consensus::ConsensusError;
use meshwork_mesh::MeshError;
use meshwork_tasks::TaskError;
use meshwork_topology::NodeId;
use thiserror::Error;

/// Result type for meshwork-node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),

    /// No mailbox is registered for the destination.
    #[error("{0} is not reachable")]
    Unreachable(NodeId),

    /// The driver or an actor has shut down.
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    /// A configuration value could not be parsed.
    #[error("invalid configuration {key}={value}: {reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Protocol(#[from] meshwork_protocols::Error),
}
