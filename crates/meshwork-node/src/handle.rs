//! Client side of a running mesh.

use meshwork_consensus::{ConsensusResult, TaskId};
use meshwork_mesh::HealthReport;
use meshwork_tasks::{CancelOutcome, FailureReport, Task, TaskStatus};
use meshwork_topology::{NodeDescriptor, NodeId};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Committed(ConsensusResult),
    Failed(FailureReport),
    Cancelled,
}

impl TaskOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// The agreed value, if the task committed.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Committed(result) => result.value.as_deref(),
            _ => None,
        }
    }
}

/// A submitted task. Await [`outcome`](Self::outcome) for its result.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, outcome: oneshot::Receiver<TaskOutcome>) -> Self {
        Self { id, outcome }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Wait for the task to commit, fail or be cancelled.
    pub async fn outcome(self) -> Result<TaskOutcome> {
        self.outcome
            .await
            .map_err(|_| Error::ChannelClosed("task outcome"))
    }
}

pub(crate) enum Command {
    Submit {
        task: Task,
        respond_to: oneshot::Sender<Result<TaskHandle>>,
    },
    Cancel {
        task: TaskId,
        respond_to: oneshot::Sender<Result<CancelOutcome>>,
    },
    Status {
        task: TaskId,
        respond_to: oneshot::Sender<Option<TaskStatus>>,
    },
    Health {
        respond_to: oneshot::Sender<HealthReport>,
    },
    Join {
        descriptor: NodeDescriptor,
        respond_to: oneshot::Sender<Result<NodeId>>,
    },
    Leave {
        node: NodeId,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// Stop a node without telling the mesh.
    Crash {
        node: NodeId,
        respond_to: oneshot::Sender<bool>,
    },
    Partition {
        groups: Vec<Vec<NodeId>>,
        respond_to: oneshot::Sender<()>,
    },
    Heal {
        respond_to: oneshot::Sender<()>,
    },
    ClearFlag {
        node: NodeId,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running mesh.
#[derive(Debug, Clone)]
pub struct MeshHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl MeshHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<Command>) -> Self {
        Self { cmd_tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| Error::ChannelClosed("mesh driver"))?;
        rx.await.map_err(|_| Error::ChannelClosed("mesh driver"))
    }

    /// Submit a task. Fails if the id is taken or the task would close a
    /// dependency cycle.
    pub async fn submit(&self, task: Task) -> Result<TaskHandle> {
        self.request(|respond_to| Command::Submit { task, respond_to })
            .await?
    }

    /// Cancel a task. While validators are agreeing this is only advisory.
    pub async fn cancel(&self, task: impl Into<TaskId>) -> Result<CancelOutcome> {
        let task = task.into();
        self.request(|respond_to| Command::Cancel { task, respond_to })
            .await?
    }

    pub async fn status(&self, task: impl Into<TaskId>) -> Result<Option<TaskStatus>> {
        let task = task.into();
        self.request(|respond_to| Command::Status { task, respond_to })
            .await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.request(|respond_to| Command::Health { respond_to }).await
    }

    /// Admit a new node and start its actor.
    pub async fn join(&self, descriptor: NodeDescriptor) -> Result<NodeId> {
        self.request(|respond_to| Command::Join {
            descriptor,
            respond_to,
        })
        .await?
    }

    /// Graceful departure.
    pub async fn leave(&self, node: NodeId) -> Result<()> {
        self.request(|respond_to| Command::Leave { node, respond_to })
            .await?
    }

    /// Kill a node's actor without a goodbye; the failure detector has to
    /// notice. Returns whether the node was running.
    pub async fn crash(&self, node: NodeId) -> Result<bool> {
        self.request(|respond_to| Command::Crash { node, respond_to })
            .await
    }

    /// Split the network. Nodes listed in no group share one group.
    pub async fn partition(&self, groups: Vec<Vec<NodeId>>) -> Result<()> {
        self.request(|respond_to| Command::Partition { groups, respond_to })
            .await
    }

    pub async fn heal(&self) -> Result<()> {
        self.request(|respond_to| Command::Heal { respond_to }).await
    }

    /// Lift a node's byzantine flag after review.
    pub async fn clear_flag(&self, node: NodeId) -> Result<()> {
        self.request(|respond_to| Command::ClearFlag { node, respond_to })
            .await?
    }

    /// Stop the driver and every node. Outcomes of open tasks resolve to
    /// `ChannelClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|respond_to| Command::Shutdown { respond_to })
            .await
    }
}
