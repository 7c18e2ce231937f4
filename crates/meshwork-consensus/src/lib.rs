//! Meshwork Consensus
//!
//! Three-phase Byzantine agreement on task results among `3f + 1`
//! validators.
//!
//! # Protocol
//!
//! ```text
//!  primary            backups
//!     │ PrePrepare(d)    │
//!     ├─────────────────▶│
//!     │    Prepare(d')   │   d' = own digest (d unless the backup disagrees)
//!     │◀────────────────▶│
//!     │  2f matching Prepares ⇒ prepared ⇒ Commit(d)
//!     │◀────────────────▶│
//!     │  2f+1 matching Commits ⇒ Decided
//! ```
//!
//! The primary of view `v` is the `v mod n`-th validator by id. When it is
//! silent past the round timeout, or its proposal is contradicted by a
//! Prepare quorum, validators move to `v + 1` with ViewChange messages that
//! carry any prepared certificate, so a value that may have been decided
//! survives the change.
//!
//! # Outcomes
//!
//! Each validator emits at most one [`Effect::Decided`] or
//! [`Effect::Rejected`] per `(task, seq)`. A round is rejected when no
//! digest can reach `2f + 1` votes; the task router then retries with a
//! larger validator set. Validators whose votes contradict the decision are
//! reported with [`Effect::Flag`].
//!
//! [`ConsensusEngine`] is pure: it never sends anything itself. The
//! runtime delivers [`Effect::Broadcast`]s and calls
//! [`ConsensusEngine::tick`] periodically. [`LocalCluster`] does the same
//! in-process for tests.

mod config;
mod engine;
mod error;
pub mod local;
mod message;
mod proposal;
mod quorum;
mod round;

pub use config::ConsensusConfig;
pub use engine::ConsensusEngine;
pub use error::{ConsensusError, Result};
pub use local::LocalCluster;
pub use message::{ConsensusMessage, ConsensusResult, Effect, PreparedCertificate};
pub use proposal::{Digest, Proposal, TaskId};
pub use quorum::{
    can_reach_quorum, max_faulty, prepare_threshold, quorum, reply_threshold, validators_for,
    view_change_timeout,
};
pub use round::Phase;
