//! Consensus wire messages and outputs.

use std::collections::BTreeSet;

use meshwork_topology::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::proposal::{Digest, Proposal, TaskId};

/// Proof that a validator was prepared on a proposal in some view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCertificate {
    pub view: u64,
    pub digest: Digest,
    pub proposal: Proposal,
    /// Validators whose matching Prepares (or PrePrepare) made up the
    /// certificate.
    pub voters: BTreeSet<NodeId>,
}

/// Messages exchanged between validators of one task.
///
/// `seq` is the task's attempt number; a reassigned task starts a fresh
/// agreement at a higher `seq`, and messages from older attempts are
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    PrePrepare {
        task: TaskId,
        view: u64,
        seq: u64,
        digest: Digest,
        proposal: Proposal,
    },
    Prepare {
        task: TaskId,
        view: u64,
        seq: u64,
        digest: Digest,
    },
    Commit {
        task: TaskId,
        view: u64,
        seq: u64,
        digest: Digest,
    },
    ViewChange {
        task: TaskId,
        seq: u64,
        new_view: u64,
        prepared: Option<PreparedCertificate>,
    },
    /// Sent by the primary of `view` once it holds `2f + 1` ViewChanges.
    /// Doubles as that view's PrePrepare.
    NewView {
        task: TaskId,
        view: u64,
        seq: u64,
        digest: Digest,
        proposal: Proposal,
        view_changes: BTreeSet<NodeId>,
    },
    /// Best-effort cancellation before Commit.
    Abort { task: TaskId, seq: u64 },
}

impl ConsensusMessage {
    pub fn task(&self) -> &TaskId {
        match self {
            Self::PrePrepare { task, .. }
            | Self::Prepare { task, .. }
            | Self::Commit { task, .. }
            | Self::ViewChange { task, .. }
            | Self::NewView { task, .. }
            | Self::Abort { task, .. } => task,
        }
    }

    /// The view this message belongs to. A ViewChange belongs to the view
    /// it asks for.
    pub fn view(&self) -> u64 {
        match self {
            Self::PrePrepare { view, .. }
            | Self::Prepare { view, .. }
            | Self::Commit { view, .. }
            | Self::NewView { view, .. } => *view,
            Self::ViewChange { new_view, .. } => *new_view,
            Self::Abort { .. } => 0,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::PrePrepare { seq, .. }
            | Self::Prepare { seq, .. }
            | Self::Commit { seq, .. }
            | Self::ViewChange { seq, .. }
            | Self::NewView { seq, .. }
            | Self::Abort { seq, .. } => *seq,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PrePrepare { .. } => "pre-prepare",
            Self::Prepare { .. } => "prepare",
            Self::Commit { .. } => "commit",
            Self::ViewChange { .. } => "view-change",
            Self::NewView { .. } => "new-view",
            Self::Abort { .. } => "abort",
        }
    }
}

/// The outcome of one agreement, as seen by one validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub task_id: TaskId,
    pub seq: u64,
    /// True when a value was agreed; false for a rejected round.
    pub decided: bool,
    pub value: Option<Vec<u8>>,
    pub digest: Option<Digest>,
    pub view: u64,
    /// Matching Commits behind the decision, or the largest matching
    /// Prepare count seen by a rejected round.
    pub votes: usize,
    /// Validators that voted for a different digest, or were flagged.
    pub dissenting_nodes: BTreeSet<NodeId>,
}

/// What the engine asks its runtime to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver `message` to each node in `to`.
    Broadcast {
        to: Vec<NodeId>,
        message: ConsensusMessage,
    },
    /// A value was agreed. Emitted once per (task, seq).
    Decided(ConsensusResult),
    /// No digest can reach quorum; the task should be reassigned.
    Rejected(ConsensusResult),
    /// A validator misbehaved in attempt `seq` of `task` and should be
    /// marked for review.
    Flag {
        task: TaskId,
        seq: u64,
        node: NodeId,
        reason: String,
    },
    /// The round gave up.
    Failed {
        task: TaskId,
        seq: u64,
        error: ConsensusError,
    },
}
