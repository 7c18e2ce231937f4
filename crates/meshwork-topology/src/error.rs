//! Descriptor validation errors.

use thiserror::Error;

use crate::node::Role;

/// Why a [`NodeDescriptor`](crate::NodeDescriptor) was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// A capability with an empty name.
    #[error("capability name is empty")]
    EmptyCapability,

    /// A capability name containing whitespace.
    #[error("invalid capability name: {0:?}")]
    InvalidCapability(String),

    /// A role that must execute work declared nothing it can execute.
    #[error("{0} declares no capabilities")]
    MissingCapabilities(Role),

    /// A role that never executes work declared capabilities.
    #[error("{0} nodes cannot declare capabilities")]
    NonExecutingWithCapabilities(Role),

    /// A role that executes work declared zero capacity.
    #[error("{0} declares zero capacity")]
    ZeroCapacity(Role),
}
