//! Task router errors.

use meshwork_consensus::TaskId;
use meshwork_mesh::MeshError;
use meshwork_topology::NodeId;
use thiserror::Error;

use crate::task::TaskStatus;

/// Result type for task router operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors from [`TaskRouter`](crate::TaskRouter).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// Submitting the task would close a dependency cycle.
    #[error("task {task} would create a dependency cycle through {cycle_through}")]
    CyclicDependency { task: TaskId, cycle_through: TaskId },

    #[error("task {0} already submitted")]
    DuplicateTask(TaskId),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// Too few capable nodes to form a validator quorum.
    #[error("quorum unavailable: need {needed} validators, found {available}")]
    QuorumUnavailable { needed: usize, available: usize },

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Some dependency has not committed yet.
    #[error("task {0} is waiting on dependencies")]
    NotReady(TaskId),

    /// A report came from a node outside the current assignment.
    #[error("{node} is not assigned to task {task}")]
    NotAssigned { task: TaskId, node: NodeId },

    #[error(transparent)]
    Mesh(#[from] MeshError),
}
