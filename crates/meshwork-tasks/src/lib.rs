//! Meshwork Tasks
//!
//! Turns submitted work into assignments and tracks each task to Committed,
//! Failed or Cancelled.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ─▶ Assigned ─▶ Executing ─▶ AwaitingConsensus ─▶ Committed
//!    ▲           │            │               │
//!    └───────────┴── retry ───┴───────────────┘
//!  any non-terminal state ─▶ Failed | Cancelled
//! ```
//!
//! - Submission rejects dependency cycles; the task never enters Pending.
//! - A task is assigned only once every dependency committed. A dependency
//!   that fails or is cancelled fails its dependents.
//! - Consensus tasks go to `3f + 1` validators picked by a
//!   [`DelegationStrategy`] from the mesh's routing candidates.
//! - The router acts on validator reports once `f + 1` of them agree.
//! - A rejected round is retried with `f + 1`, a larger validator set.
//! - Retries back off exponentially; after `max_retries` the task fails
//!   with a [`FailureReport`] listing every attempt.

mod config;
mod delegation;
mod error;
mod graph;
mod report;
mod router;
mod task;

pub use config::RouterConfig;
pub use delegation::{Assignee, DelegationStrategy, Delegator, HybridWeights};
pub use error::{Result, TaskError};
pub use graph::DependencyGraph;
pub use report::{
    Assignment, AttemptFailure, CancelOutcome, FailureReason, FailureReport, RouterEvent,
};
pub use router::{TaskRouter, ValidatorReport};
pub use task::{Priority, Task, TaskStatus};

pub use meshwork_consensus::TaskId;

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Instant;

    use meshwork_topology::NodeId;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn mutual_dependency_is_refused_and_router_stays_usable() {
        let now = Instant::now();
        let mut router = TaskRouter::new(NodeId(1), RouterConfig::default());
        router
            .submit(Task::new("t1", "render").depends_on("t2"), now)
            .unwrap();
        let err = router
            .submit(Task::new("t2", "render").depends_on("t1"), now)
            .unwrap_err();
        assert!(matches!(err, TaskError::CyclicDependency { .. }));
        assert_eq!(router.status(&"t2".into()), None);

        // The id is free again once the cycle is gone.
        router.submit(Task::new("t2", "render"), now).unwrap();
        assert_eq!(router.open_count(), 2);
    }

    proptest! {
        /// Whatever edges are offered, accepted ones never form a cycle.
        #[test]
        fn accepted_dependencies_stay_acyclic(
            edges in proptest::collection::vec((0u8..12, 0u8..12), 0..40)
        ) {
            let mut graph = DependencyGraph::new();
            let mut accepted: BTreeSet<(TaskId, TaskId)> = BTreeSet::new();
            for (task, dep) in edges {
                let task = TaskId::new(format!("t{task}"));
                let dep = TaskId::new(format!("t{dep}"));
                if graph.insert(&task, [&dep]).is_ok() {
                    accepted.insert((task, dep));
                }
            }
            let order = graph.order();
            let pos = |t: &TaskId| order.iter().position(|o| o == t);
            for (task, dep) in &accepted {
                let (Some(t), Some(d)) = (pos(task), pos(dep)) else {
                    return Err(TestCaseError::fail("accepted task missing from order"));
                };
                prop_assert!(d < t, "{dep} should come before {task}");
            }
        }
    }
}
