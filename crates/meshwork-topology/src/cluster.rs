//! Clusters, elections and splits.
//!
//! # Elections
//!
//! Leadership is decided by a pure function of the surviving members, so
//! every node that sees the same membership elects the same leaders:
//!
//! ```text
//! coordinator = max by (is current Coordinator, is current Gateway,
//!                       declared Coordinator, declared Gateway,
//!                       uptime, lowest id)
//! gateway     = same ranking with Gateway preferences first,
//!               drawn from the remaining members
//! ```
//!
//! A live coordinator keeps its seat. When it is gone, the current Gateway
//! ranks next, so coordinator loss heals through the surviving gateway
//! with the highest uptime.
//!
//! # Splits
//!
//! A cluster that exceeds its bound is cut in two by id order: the lower
//! half keeps the cluster id, the upper half moves to a fresh one. Both
//! halves then elect fresh leaders.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::node::{NodeId, Role};

/// Cluster identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster-{}", self.0)
    }
}

/// A bounded group of nodes under one Coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub coordinator: Option<NodeId>,
    pub gateway: Option<NodeId>,
    pub members: BTreeSet<NodeId>,
    /// Incremented on every election.
    pub term: u64,
}

impl Cluster {
    /// Create an empty cluster.
    pub fn new(id: ClusterId) -> Self {
        Self {
            id,
            coordinator: None,
            gateway: None,
            members: BTreeSet::new(),
            term: 0,
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether adding one more member would exceed `bound`.
    pub fn is_full(&self, bound: usize) -> bool {
        self.members.len() >= bound
    }

    /// The node that bridges this cluster to others. Single-member clusters
    /// (and clusters mid-election) fall back to the coordinator.
    pub fn bridge(&self) -> Option<NodeId> {
        self.gateway.or(self.coordinator)
    }

    /// Coordinator and gateway, deduplicated.
    pub fn leaders(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.coordinator.into_iter().collect();
        if let Some(gw) = self.gateway {
            if !out.contains(&gw) {
                out.push(gw);
            }
        }
        out
    }

    /// Apply an election result. Stale terms are ignored.
    pub fn apply(&mut self, election: &Election) -> bool {
        if election.cluster != self.id || election.term <= self.term {
            return false;
        }
        self.coordinator = election.coordinator;
        self.gateway = election.gateway;
        self.term = election.term;
        true
    }
}

/// The outcome of a leadership election for one cluster.
///
/// This is the only message that changes node roles.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Election {
    pub cluster: ClusterId,
    pub term: u64,
    pub coordinator: Option<NodeId>,
    pub gateway: Option<NodeId>,
}

/// A member eligible to stand in an election.
#[derive(Debug, Clone, Copy)]
pub struct ElectionCandidate {
    pub id: NodeId,
    pub declared: Role,
    pub current: Role,
    pub uptime: Duration,
}

impl Election {
    /// Elect coordinator and gateway for `cluster` from `candidates`.
    ///
    /// Candidates whose declared role is not leader-eligible are skipped.
    pub fn hold(cluster: ClusterId, term: u64, candidates: &[ElectionCandidate]) -> Self {
        let eligible: Vec<_> = candidates
            .iter()
            .filter(|c| c.declared.leader_eligible())
            .collect();

        let coordinator = eligible
            .iter()
            .max_by_key(|c| {
                (
                    c.current == Role::Coordinator,
                    c.current == Role::Gateway,
                    c.declared == Role::Coordinator,
                    c.declared == Role::Gateway,
                    c.uptime,
                    Reverse(c.id),
                )
            })
            .map(|c| c.id);

        let gateway = eligible
            .iter()
            .filter(|c| Some(c.id) != coordinator)
            .max_by_key(|c| {
                (
                    c.declared == Role::Gateway,
                    c.current == Role::Gateway,
                    c.declared == Role::Coordinator,
                    c.uptime,
                    Reverse(c.id),
                )
            })
            .map(|c| c.id)
            .or(coordinator);

        Self {
            cluster,
            term,
            coordinator,
            gateway,
        }
    }

    /// Role this election grants `node`, if any.
    pub fn role_of(&self, node: NodeId) -> Option<Role> {
        if self.coordinator == Some(node) {
            Some(Role::Coordinator)
        } else if self.gateway == Some(node) {
            Some(Role::Gateway)
        } else {
            None
        }
    }
}

/// How a full cluster is cut in two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub keep: BTreeSet<NodeId>,
    pub moved: BTreeSet<NodeId>,
    pub new_cluster: ClusterId,
}

/// Split `members` by id order: lower half stays, upper half moves to
/// `new_cluster`.
pub fn plan_split(members: &BTreeSet<NodeId>, new_cluster: ClusterId) -> SplitPlan {
    let keep_count = members.len() / 2;
    let keep: BTreeSet<_> = members.iter().take(keep_count).copied().collect();
    let moved: BTreeSet<_> = members.iter().skip(keep_count).copied().collect();
    SplitPlan {
        keep,
        moved,
        new_cluster,
    }
}
