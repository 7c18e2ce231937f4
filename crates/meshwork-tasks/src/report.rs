//! Failure reports and router events.

use std::fmt;
use std::time::Instant;

use meshwork_consensus::{ConsensusError, ConsensusResult, TaskId};
use meshwork_topology::NodeId;
use serde::{Deserialize, Serialize};

/// Why one attempt at a task did not commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No capable node was reachable.
    NoRoute,
    QuorumUnavailable { needed: usize, available: usize },
    /// An assignee's handler returned an error.
    AssigneeFailed { node: NodeId, error: String },
    DeadlineExceeded,
    /// Validators found no digest with a quorum.
    Rejected { votes: usize, dissenting: Vec<NodeId> },
    Consensus(ConsensusError),
    DependencyFailed(TaskId),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoute => write!(f, "no route to a capable node"),
            Self::QuorumUnavailable { needed, available } => {
                write!(f, "quorum unavailable ({available}/{needed} validators)")
            }
            Self::AssigneeFailed { node, error } => write!(f, "{node} failed: {error}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Rejected { votes, dissenting } => {
                write!(f, "rejected: best digest had {votes} votes, {} dissenting", dissenting.len())
            }
            Self::Consensus(e) => write!(f, "{e}"),
            Self::DependencyFailed(dep) => write!(f, "dependency {dep} did not commit"),
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Attempt number; also the consensus `seq` of that attempt.
    pub attempt: u64,
    pub assignees: Vec<NodeId>,
    pub reason: FailureReason,
}

/// Everything that went wrong with a task that ended Failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task: TaskId,
    pub attempts: Vec<AttemptFailure>,
}

impl FailureReport {
    pub fn last_reason(&self) -> Option<&FailureReason> {
        self.attempts.last().map(|a| &a.reason)
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} failed after {} attempts", self.task, self.attempts.len())?;
        for a in &self.attempts {
            write!(f, "; #{}: {}", a.attempt, a.reason)?;
        }
        Ok(())
    }
}

/// Work handed out by [`TaskRouter::assign`](crate::TaskRouter::assign).
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub task: TaskId,
    /// Attempt number, used as the consensus `seq`.
    pub seq: u64,
    pub assignees: Vec<NodeId>,
    /// `None` for single-assignee tasks.
    pub f: Option<usize>,
    pub deadline: Instant,
}

impl Assignment {
    pub fn requires_consensus(&self) -> bool {
        self.f.is_some()
    }
}

/// What the router asks its runtime to do, or tells it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    Assigned(Assignment),
    /// Validators of an abandoned attempt should stop.
    Abort {
        task: TaskId,
        seq: u64,
        assignees: Vec<NodeId>,
    },
    Retrying {
        task: TaskId,
        attempt: u64,
        at: Instant,
        reason: FailureReason,
    },
    Committed {
        task: TaskId,
        result: ConsensusResult,
    },
    Failed(FailureReport),
    Cancelled(TaskId),
}

/// Result of [`TaskRouter::cancel`](crate::TaskRouter::cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task stopped before agreement started.
    Cancelled,
    /// Agreement is under way: validators that have not committed will
    /// abort, but a decision may still commit the task.
    Advisory,
}
