//! Envelopes: everything one node says to another.

use std::fmt;

use meshwork_consensus::{ConsensusMessage, Proposal, TaskId};
use meshwork_routing::GossipDigest;
use meshwork_tasks::{Task, ValidatorReport};
use meshwork_topology::NodeId;
use serde::{Deserialize, Serialize};

/// Ordering domain of an envelope.
///
/// Envelopes in the same lane from the same sender are delivered in the
/// order they were sent. Different lanes are independent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Lane {
    /// Heartbeats and gossip; delivered as they arrive.
    Control,
    /// Execution traffic for one task attempt.
    Task { task: TaskId, seq: u64 },
    /// One consensus view of one task attempt.
    Round { task: TaskId, seq: u64, view: u64 },
}

impl Lane {
    pub fn is_ordered(&self) -> bool {
        !matches!(self, Self::Control)
    }

    pub fn task(&self) -> Option<&TaskId> {
        match self {
            Self::Control => None,
            Self::Task { task, .. } | Self::Round { task, .. } => Some(task),
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Task { task, seq } => write!(f, "{task}#{seq}"),
            Self::Round { task, seq, view } => write!(f, "{task}#{seq}/v{view}"),
        }
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Heartbeat,
    Gossip(GossipDigest),
    /// Run a task. `validators` is the agreement set for consensus tasks
    /// and empty otherwise.
    Execute {
        task: Task,
        seq: u64,
        validators: Vec<NodeId>,
        f: Option<usize>,
    },
    Started { task: TaskId, seq: u64 },
    Completed { seq: u64, proposal: Proposal },
    ExecutionFailed { task: TaskId, seq: u64, error: String },
    Consensus(ConsensusMessage),
    /// A validator's outcome, sent to the router that assigned the task.
    Verdict { task: TaskId, seq: u64, report: ValidatorReport },
    /// A validator accuses `suspect` of contradicting the decision.
    Suspect {
        suspect: NodeId,
        task: TaskId,
        seq: u64,
        reason: String,
    },
}

impl Payload {
    pub fn lane(&self) -> Lane {
        match self {
            Self::Heartbeat | Self::Gossip(_) => Lane::Control,
            Self::Execute { task, seq, .. } => Lane::Task {
                task: task.id.clone(),
                seq: *seq,
            },
            Self::Started { task, seq }
            | Self::ExecutionFailed { task, seq, .. }
            | Self::Verdict { task, seq, .. }
            | Self::Suspect { task, seq, .. } => Lane::Task {
                task: task.clone(),
                seq: *seq,
            },
            Self::Completed { seq, proposal } => Lane::Task {
                task: proposal.task_id.clone(),
                seq: *seq,
            },
            Self::Consensus(msg) => Lane::Round {
                task: msg.task().clone(),
                seq: msg.seq(),
                view: msg.view(),
            },
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Gossip(_) => "gossip",
            Self::Execute { .. } => "execute",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::ExecutionFailed { .. } => "execution-failed",
            Self::Consensus(msg) => msg.kind(),
            Self::Verdict { .. } => "verdict",
            Self::Suspect { .. } => "suspect",
        }
    }
}

/// Addressed payload with its position in its lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub lane: Lane,
    /// Position within `(from, to, lane)`, starting at 0. Ignored for the
    /// control lane.
    pub lane_seq: u64,
    pub payload: Payload,
}

impl Envelope {
    /// An envelope at position 0 of its payload's lane. Use a
    /// [`Sequencer`](crate::Sequencer) to number a stream of them.
    pub fn new(from: NodeId, to: NodeId, payload: Payload) -> Self {
        Self {
            from,
            to,
            lane: payload.lane(),
            lane_seq: 0,
            payload,
        }
    }
}
