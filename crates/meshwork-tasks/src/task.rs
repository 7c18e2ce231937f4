//! Tasks and their lifecycle.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use meshwork_consensus::TaskId;
use meshwork_topology::{Capability, NodeId};
use serde::{Deserialize, Serialize};

/// Scheduling priority. Higher priorities are assigned first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Capability an assignee must have.
    pub capability: Capability,
    /// Opaque input passed to the handler.
    pub params: Vec<u8>,
    /// Tasks that must commit before this one is assigned. May name tasks
    /// not submitted yet.
    pub depends_on: BTreeSet<TaskId>,
    pub priority: Priority,
    /// Time allowed per attempt; the router default applies when unset.
    pub deadline: Option<Duration>,
    /// Nice-to-have capabilities, used by skill-based delegation.
    pub preferred: BTreeSet<Capability>,
    /// Whether the result must be agreed on by validators.
    pub requires_consensus: bool,
    /// Faults to tolerate; the router default applies when unset.
    pub fault_tolerance: Option<usize>,
    /// Latency budget handed to Adaptive routing.
    pub latency_budget: Option<Duration>,
    /// Node whose routing view is used to find assignees; the router's own
    /// node when unset.
    pub origin: Option<NodeId>,
}

impl Task {
    /// A task needing `capability`, agreed on by the router's default
    /// validator set.
    pub fn new(id: impl Into<TaskId>, capability: impl Into<Capability>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            params: Vec::new(),
            depends_on: BTreeSet::new(),
            priority: Priority::Normal,
            deadline: None,
            preferred: BTreeSet::new(),
            requires_consensus: true,
            fault_tolerance: None,
            latency_budget: None,
            origin: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: impl Into<Vec<u8>>) -> Self {
        self.params = params.into();
        self
    }

    #[must_use]
    pub fn depends_on(mut self, task: impl Into<TaskId>) -> Self {
        self.depends_on.insert(task.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn prefer(mut self, capability: impl Into<Capability>) -> Self {
        self.preferred.insert(capability.into());
        self
    }

    #[must_use]
    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn from_origin(mut self, origin: NodeId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Agree on the result among `3f + 1` validators.
    #[must_use]
    pub fn with_fault_tolerance(mut self, f: usize) -> Self {
        self.requires_consensus = true;
        self.fault_tolerance = Some(f);
        self
    }

    /// Run on one assignee and commit its result directly.
    #[must_use]
    pub fn single_assignee(mut self) -> Self {
        self.fault_tolerance = None;
        self.requires_consensus = false;
        self
    }
}

/// Where a task is in its lifecycle.
///
/// ```text
/// Pending ─▶ Assigned ─▶ Executing ─▶ AwaitingConsensus ─▶ Committed
///    ▲           │            │                │
///    └───────────┴── retry ───┴────────────────┘
/// any non-terminal ─▶ Failed | Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned,
    Executing,
    AwaitingConsensus,
    Committed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::Cancelled)
    }

    /// Whether an assignment is out for this task.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::Executing | Self::AwaitingConsensus
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Assigned) => true,
            (Assigned, Executing | AwaitingConsensus | Committed) => true,
            (Executing, AwaitingConsensus | Committed) => true,
            (AwaitingConsensus, Committed) => true,
            // Retry.
            (Assigned | Executing | AwaitingConsensus, Pending) => true,
            (from, Failed | Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::Assigned => "Assigned",
            Self::Executing => "Executing",
            Self::AwaitingConsensus => "AwaitingConsensus",
            Self::Committed => "Committed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_dependencies() {
        let task = Task::new("b", "render")
            .depends_on("a")
            .depends_on("c")
            .with_priority(Priority::High);
        assert_eq!(task.depends_on.len(), 2);
        assert_eq!(task.priority, Priority::High);
        assert!(task.requires_consensus);
    }

    #[test]
    fn single_assignee_skips_consensus() {
        let task = Task::new("a", "render").single_assignee();
        assert!(!task.requires_consensus);
        assert_eq!(task.fault_tolerance, None);
    }

    #[test]
    fn priorities_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn terminal_states_do_not_move() {
        for status in [TaskStatus::Committed, TaskStatus::Failed, TaskStatus::Cancelled] {
            assert!(!status.can_transition_to(TaskStatus::Pending));
            assert!(!status.can_transition_to(TaskStatus::Cancelled));
        }
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::AwaitingConsensus.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Committed));
    }
}
