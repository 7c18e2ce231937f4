//! Consensus errors.

use meshwork_topology::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proposal::TaskId;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors raised by a [`ConsensusEngine`](crate::ConsensusEngine).
///
/// Round-level failures (`QuorumUnavailable`, `Timeout`, `DigestMismatch`,
/// `ViewChangeExhausted`) are reported to the task router. The rest
/// describe a bad inbound message, which the runtime logs and drops.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConsensusError {
    /// Too few validators to ever reach quorum.
    #[error("quorum unavailable: need {needed} validators, have {available}")]
    QuorumUnavailable { needed: usize, available: usize },

    /// The round did not finish in time.
    #[error("consensus timed out for task {0}")]
    Timeout(TaskId),

    /// Validators disagree and no digest can reach quorum.
    #[error("digest mismatch for task {task}: best digest has {best} of {needed} votes")]
    DigestMismatch {
        task: TaskId,
        best: usize,
        needed: usize,
    },

    /// Too many view changes without progress.
    #[error("view changes exhausted for task {task} after {attempts} attempts")]
    ViewChangeExhausted { task: TaskId, attempts: u32 },

    /// No round for this task at this validator.
    #[error("unknown round for task {0}")]
    UnknownRound(TaskId),

    /// Structurally invalid message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The sender (or this node) is not in the validator set.
    #[error("{0} is not a validator for this task")]
    NotAValidator(NodeId),

    /// Message from an older attempt.
    #[error("stale message for task {task}: seq {got} < {current}")]
    Stale { task: TaskId, got: u64, current: u64 },
}
