//! Accusations against validators, counted per attempt.
//!
//! A validator that sees a peer contradict a decision reports it. The
//! driver flags the peer once `f + 1` validators of the same attempt agree,
//! so `f` liars cannot flag an honest node, not even by pooling accusations
//! across tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use meshwork_consensus::TaskId;
use meshwork_topology::NodeId;

/// Result of recording one accusation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tally {
    /// Accuser or suspect was not a validator of the attempt.
    Refused,
    /// Distinct accusers so far.
    Pending(usize),
    /// The threshold was reached; the entry is closed.
    Reached,
}

#[derive(Debug)]
struct Open {
    accusers: BTreeSet<NodeId>,
    expires: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct Accusations {
    open: BTreeMap<(TaskId, u64, NodeId), Open>,
}

impl Accusations {
    /// Count `accuser` against `suspect` in attempt `seq` of `task`, whose
    /// validators were `validators`. A new entry lives until `expires`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        &mut self,
        task: &TaskId,
        seq: u64,
        validators: &[NodeId],
        accuser: NodeId,
        suspect: NodeId,
        threshold: usize,
        expires: Instant,
    ) -> Tally {
        if accuser == suspect || !validators.contains(&accuser) || !validators.contains(&suspect) {
            return Tally::Refused;
        }
        let key = (task.clone(), seq, suspect);
        let open = self.open.entry(key.clone()).or_insert_with(|| Open {
            accusers: BTreeSet::new(),
            expires,
        });
        open.accusers.insert(accuser);
        let count = open.accusers.len();
        if count < threshold {
            return Tally::Pending(count);
        }
        self.open.remove(&key);
        Tally::Reached
    }

    /// Entries for `task` expire no later than `by`.
    pub(crate) fn wind_down(&mut self, task: &TaskId, by: Instant) {
        for ((t, _, _), open) in &mut self.open {
            if t == task {
                open.expires = open.expires.min(by);
            }
        }
    }

    pub(crate) fn forget_suspect(&mut self, suspect: NodeId) {
        self.open.retain(|(_, _, s), _| *s != suspect);
    }

    /// Drop entries past their expiry; returns how many went.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let before = self.open.len();
        self.open.retain(|_, open| open.expires > now);
        before - self.open.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }
}
