//! Delegation strategies: choosing assignees from routed candidates.
//!
//! Routing decides who *can* do a task and ranks them by path; delegation
//! decides who *will*, trading route quality against load, skills and
//! fairness.
//!
//! | Strategy      | Picks                                                   |
//! |---------------|---------------------------------------------------------|
//! | RoundRobin    | rotates through capable nodes, per capability           |
//! | LoadBalanced  | least loaded, then best route                           |
//! | SkillBased    | most preferred capabilities, then best route            |
//! | Priority      | High/Critical take the best routes; others take spare   |
//! |               | capacity first, leaving the best nodes free             |
//! | Hybrid        | weighted blend of route, load and skill                 |

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use meshwork_topology::{Capability, NodeId};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::task::{Priority, Task};

/// How assignees are chosen among routed candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DelegationStrategy {
    RoundRobin,
    LoadBalanced,
    SkillBased,
    Priority,
    #[default]
    Hybrid,
}

impl fmt::Display for DelegationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RoundRobin => "round-robin",
            Self::LoadBalanced => "load-balanced",
            Self::SkillBased => "skill-based",
            Self::Priority => "priority",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Weights for [`DelegationStrategy::Hybrid`]. Each term is normalised to
/// `[0, 1]`, lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub route: f64,
    pub load: f64,
    pub skill: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            route: 0.5,
            load: 0.3,
            skill: 0.2,
        }
    }
}

/// Load under which a node counts as having spare capacity.
const SPARE_LOAD: f64 = 0.5;

/// A routed candidate with what delegation needs to know about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignee {
    pub node: NodeId,
    /// Route score; lower is better.
    pub score: f64,
    /// `active_tasks / capacity`.
    pub load: f64,
    /// How many of the task's preferred capabilities the node has.
    pub skills: usize,
}

/// Picks assignees. Holds the round-robin cursors, so one delegator should
/// serve a router for its lifetime.
#[derive(Debug, Default)]
pub struct Delegator {
    cursors: HashMap<Capability, usize>,
}

impl Delegator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose up to `count` distinct nodes from `pool`.
    pub fn select(
        &mut self,
        strategy: DelegationStrategy,
        weights: &HybridWeights,
        task: &Task,
        pool: &[Assignee],
        count: usize,
    ) -> Vec<NodeId> {
        if pool.is_empty() || count == 0 {
            return Vec::new();
        }
        let mut ranked: Vec<&Assignee> = pool.iter().collect();

        match strategy {
            DelegationStrategy::RoundRobin => {
                ranked.sort_by_key(|a| a.node);
                let cursor = self.cursors.entry(task.capability.clone()).or_insert(0);
                let start = *cursor % ranked.len();
                *cursor = cursor.wrapping_add(1);
                ranked.rotate_left(start);
            }
            DelegationStrategy::LoadBalanced => {
                ranked.sort_by(|a, b| {
                    a.load
                        .total_cmp(&b.load)
                        .then(a.score.total_cmp(&b.score))
                        .then(a.node.cmp(&b.node))
                });
            }
            DelegationStrategy::SkillBased => {
                ranked.sort_by(|a, b| {
                    b.skills
                        .cmp(&a.skills)
                        .then(a.score.total_cmp(&b.score))
                        .then(a.node.cmp(&b.node))
                });
            }
            DelegationStrategy::Priority => {
                if task.priority >= Priority::High {
                    ranked.sort_by(|a, b| by_route(a, b));
                } else {
                    ranked.sort_by(|a, b| {
                        let spare_a = a.load < SPARE_LOAD;
                        let spare_b = b.load < SPARE_LOAD;
                        spare_b.cmp(&spare_a).then_with(|| {
                            // Among spare nodes, leave the best routes to urgent work.
                            b.score.total_cmp(&a.score).then(a.node.cmp(&b.node))
                        })
                    });
                }
            }
            DelegationStrategy::Hybrid => {
                let max_score = pool
                    .iter()
                    .map(|a| a.score)
                    .fold(0.0_f64, f64::max)
                    .max(f64::EPSILON);
                let wanted = task.preferred.len().max(1) as f64;
                let blend = |a: &Assignee| {
                    weights.route * (a.score / max_score)
                        + weights.load * a.load.min(1.0)
                        + weights.skill * (1.0 - (a.skills as f64 / wanted).min(1.0))
                };
                ranked.sort_by(|a, b| blend(a).total_cmp(&blend(b)).then(a.node.cmp(&b.node)));
            }
        }

        let chosen: Vec<NodeId> = ranked.into_iter().take(count).map(|a| a.node).collect();
        trace!(task = %task.id, %strategy, ?chosen, "delegated");
        chosen
    }
}

fn by_route(a: &Assignee, b: &Assignee) -> Ordering {
    a.score.total_cmp(&b.score).then(a.node.cmp(&b.node))
}
