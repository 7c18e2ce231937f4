//! The task router.
//!
//! ```text
//! submit ─▶ Pending ──assign──▶ Assigned ─▶ Executing ─▶ AwaitingConsensus
//!              ▲  (route + delegate)                           │
//!              │                                   f+1 matching reports
//!              └──── retry with backoff ◀── failure            ▼
//!                                                         Committed
//! ```
//!
//! The router never talks to validators. Its methods return
//! [`RouterEvent`]s for the runtime to act on, and the runtime feeds back
//! what assignees and validators report.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use meshwork_consensus::{
    quorum, reply_threshold, validators_for, ConsensusError, ConsensusResult, Digest, Proposal,
    TaskId,
};
use meshwork_mesh::{MeshError, MeshNetwork};
use meshwork_routing::RouteRequest;
use meshwork_topology::NodeId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::delegation::{Assignee, Delegator};
use crate::error::{Result, TaskError};
use crate::graph::DependencyGraph;
use crate::report::{
    AttemptFailure, Assignment, CancelOutcome, FailureReason, FailureReport, RouterEvent,
};
use crate::task::{Task, TaskStatus};

/// What a validator reports about its round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidatorReport {
    Decided(ConsensusResult),
    Rejected(ConsensusResult),
    Failed(ConsensusError),
}

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    status: TaskStatus,
    /// Submission order, for FIFO within a priority.
    order: u64,
    /// Current attempt; 0 before the first assignment.
    attempt: u64,
    /// Fault tolerance for the next (or current) attempt.
    f: usize,
    assignees: Vec<NodeId>,
    deadline: Option<Instant>,
    retry_at: Option<Instant>,
    proposals: BTreeMap<NodeId, Proposal>,
    decided: BTreeMap<Digest, BTreeMap<NodeId, ConsensusResult>>,
    rejected: BTreeMap<NodeId, ConsensusResult>,
    consensus_failed: BTreeMap<NodeId, ConsensusError>,
    executor_failed: BTreeSet<NodeId>,
    excluded: BTreeSet<NodeId>,
    failures: Vec<AttemptFailure>,
    cancel_requested: bool,
    result: Option<ConsensusResult>,
}

impl TaskRecord {
    fn consensus_f(&self) -> Option<usize> {
        self.task.requires_consensus.then_some(self.f)
    }

    fn reset_attempt(&mut self) {
        self.assignees.clear();
        self.deadline = None;
        self.proposals.clear();
        self.decided.clear();
        self.rejected.clear();
        self.consensus_failed.clear();
        self.executor_failed.clear();
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(TaskId),
}

/// Accepts work, picks assignees and tracks each task to a terminal state.
#[derive(Debug)]
pub struct TaskRouter {
    /// Node the router runs on; the default routing origin.
    node: NodeId,
    config: RouterConfig,
    tasks: BTreeMap<TaskId, TaskRecord>,
    graph: DependencyGraph,
    delegator: Delegator,
    next_order: u64,
}

impl TaskRouter {
    pub fn new(node: NodeId, config: RouterConfig) -> Self {
        Self {
            node,
            config,
            tasks: BTreeMap::new(),
            graph: DependencyGraph::new(),
            delegator: Delegator::new(),
            next_order: 0,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Accept a task. It enters Pending unless its dependencies would form
    /// a cycle, in which case nothing is recorded.
    pub fn submit(&mut self, task: Task, now: Instant) -> Result<TaskId> {
        let id = task.id.clone();
        if self.tasks.contains_key(&id) {
            return Err(TaskError::DuplicateTask(id));
        }
        if let Err(through) = self.graph.insert(&id, &task.depends_on) {
            warn!(task = %id, cycle_through = %through, "rejecting cyclic task");
            return Err(TaskError::CyclicDependency {
                task: id,
                cycle_through: through,
            });
        }

        let f = task.fault_tolerance.unwrap_or(self.config.default_f);
        info!(
            task = %id,
            capability = %task.capability,
            deps = task.depends_on.len(),
            priority = ?task.priority,
            consensus = task.requires_consensus,
            "task submitted"
        );
        let order = self.next_order;
        self.next_order += 1;
        self.tasks.insert(
            id.clone(),
            TaskRecord {
                task,
                status: TaskStatus::Pending,
                order,
                attempt: 0,
                f,
                assignees: Vec::new(),
                deadline: None,
                retry_at: Some(now),
                proposals: BTreeMap::new(),
                decided: BTreeMap::new(),
                rejected: BTreeMap::new(),
                consensus_failed: BTreeMap::new(),
                executor_failed: BTreeSet::new(),
                excluded: BTreeSet::new(),
                failures: Vec::new(),
                cancel_requested: false,
                result: None,
            },
        );
        Ok(id)
    }

    fn readiness(&self, id: &TaskId) -> Readiness {
        let Some(rec) = self.tasks.get(id) else {
            return Readiness::Waiting;
        };
        for dep in &rec.task.depends_on {
            match self.tasks.get(dep).map(|d| d.status) {
                Some(TaskStatus::Committed) => {}
                Some(TaskStatus::Failed | TaskStatus::Cancelled) => {
                    return Readiness::Blocked(dep.clone())
                }
                _ => return Readiness::Waiting,
            }
        }
        Readiness::Ready
    }

    /// Whether every dependency of `id` has committed.
    pub fn is_ready(&self, id: &TaskId) -> bool {
        matches!(self.readiness(id), Readiness::Ready)
    }

    /// Route and delegate a Pending task.
    ///
    /// Consensus tasks go to `3f + 1` validators; when fewer capable nodes
    /// are reachable the task still goes out as long as `2f + 1` are, and
    /// fails with `QuorumUnavailable` otherwise.
    pub fn assign(&mut self, id: &TaskId, mesh: &mut MeshNetwork, now: Instant) -> Result<Assignment> {
        let rec = self
            .tasks
            .get(id)
            .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
        if rec.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                task: id.clone(),
                from: rec.status,
                to: TaskStatus::Assigned,
            });
        }
        if !self.is_ready(id) {
            return Err(TaskError::NotReady(id.clone()));
        }

        let task = &rec.task;
        let origin = task.origin.unwrap_or(self.node);
        let f = rec.consensus_f();
        let wanted = f.map_or(1, validators_for);
        let mut req = RouteRequest::new(task.capability.clone())
            .with_strategy(self.config.routing)
            .with_min_candidates(wanted)
            .excluding(rec.excluded.iter().copied());
        if let Some(budget) = task.latency_budget {
            req = req.with_latency_budget(budget);
        }
        let candidates = mesh.route(origin, &req)?;

        let pool: Vec<Assignee> = candidates
            .iter()
            .map(|c| {
                let node = mesh.node(c.node);
                Assignee {
                    node: c.node,
                    score: c.score,
                    load: node.map_or(0.0, |n| n.load()),
                    skills: node.map_or(0, |n| {
                        task.preferred.iter().filter(|p| n.has_capability(p)).count()
                    }),
                }
            })
            .collect();

        let chosen = self.delegator.select(
            self.config.delegation,
            &self.config.hybrid,
            task,
            &pool,
            wanted,
        );
        if let Some(f) = f {
            if chosen.len() < quorum(f) {
                return Err(TaskError::QuorumUnavailable {
                    needed: quorum(f),
                    available: chosen.len(),
                });
            }
            if chosen.len() < wanted {
                warn!(task = %id, f, validators = chosen.len(), wanted, "assigning below 3f+1 validators");
            }
        }

        let deadline = now + task.deadline.unwrap_or(self.config.default_deadline);
        let Some(rec) = self.tasks.get_mut(id) else {
            return Err(TaskError::UnknownTask(id.clone()));
        };
        rec.reset_attempt();
        rec.attempt += 1;
        rec.status = TaskStatus::Assigned;
        rec.assignees = chosen.clone();
        rec.deadline = Some(deadline);
        rec.retry_at = None;
        for node in &chosen {
            mesh.record_assignment(*node);
        }

        info!(
            task = %id,
            seq = rec.attempt,
            assignees = ?chosen,
            f = ?f,
            strategy = %self.config.delegation,
            "task assigned"
        );
        Ok(Assignment {
            task: id.clone(),
            seq: rec.attempt,
            assignees: chosen,
            f,
            deadline,
        })
    }

    /// Assign every Pending task whose dependencies committed and whose
    /// backoff elapsed, highest priority first.
    pub fn assign_ready(&mut self, mesh: &mut MeshNetwork, now: Instant) -> Vec<RouterEvent> {
        let mut due: Vec<(&TaskId, &TaskRecord)> = self
            .tasks
            .iter()
            .filter(|(_, r)| r.status == TaskStatus::Pending)
            .filter(|(_, r)| r.retry_at.map_or(true, |at| at <= now))
            .collect();
        due.sort_by(|(_, a), (_, b)| {
            b.task
                .priority
                .cmp(&a.task.priority)
                .then(a.order.cmp(&b.order))
        });
        let due: Vec<TaskId> = due.into_iter().map(|(id, _)| id.clone()).collect();

        let mut events = Vec::new();
        for id in due {
            match self.readiness(&id) {
                Readiness::Waiting => continue,
                Readiness::Blocked(dep) => {
                    events.extend(self.finish_blocked(&id, dep));
                    continue;
                }
                Readiness::Ready => {}
            }
            match self.assign(&id, mesh, now) {
                Ok(assignment) => events.push(RouterEvent::Assigned(assignment)),
                Err(TaskError::Mesh(MeshError::NoRoute { capability })) => {
                    debug!(task = %id, %capability, "no route");
                    events.extend(self.attempt_failed(&id, FailureReason::NoRoute, false, mesh, now));
                }
                Err(TaskError::QuorumUnavailable { needed, available }) => {
                    events.extend(self.attempt_failed(
                        &id,
                        FailureReason::QuorumUnavailable { needed, available },
                        false,
                        mesh,
                        now,
                    ));
                }
                Err(e) => warn!(task = %id, error = %e, "assignment failed"),
            }
        }
        events
    }

    /// Enforce deadlines, then assign whatever is ready.
    pub fn tick(&mut self, mesh: &mut MeshNetwork, now: Instant) -> Vec<RouterEvent> {
        let expired: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, r)| r.status.is_in_flight())
            .filter(|(_, r)| r.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut events = Vec::new();
        for id in expired {
            warn!(task = %id, "deadline exceeded");
            events.extend(self.attempt_failed(&id, FailureReason::DeadlineExceeded, false, mesh, now));
        }
        events.extend(self.assign_ready(mesh, now));
        events
    }

    /// Look up an in-flight attempt, ignoring reports for older ones.
    fn current_attempt(&mut self, id: &TaskId, seq: u64, from: NodeId) -> Result<Option<&mut TaskRecord>> {
        let rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
        if rec.attempt != seq || !rec.status.is_in_flight() {
            debug!(task = %id, seq, current = rec.attempt, status = %rec.status, "ignoring report for inactive attempt");
            return Ok(None);
        }
        if !rec.assignees.contains(&from) {
            return Err(TaskError::NotAssigned {
                task: id.clone(),
                node: from,
            });
        }
        Ok(Some(rec))
    }

    /// An assignee began executing.
    pub fn started(&mut self, id: &TaskId, seq: u64, node: NodeId) -> Result<()> {
        if let Some(rec) = self.current_attempt(id, seq, node)? {
            if rec.status == TaskStatus::Assigned {
                rec.status = TaskStatus::Executing;
                debug!(task = %id, seq, %node, "task executing");
            }
        }
        Ok(())
    }

    /// An assignee finished and produced `proposal`.
    ///
    /// A single-assignee task commits on the spot. For a consensus task the
    /// proposal is recorded and the task waits for validator reports.
    pub fn report(
        &mut self,
        id: &TaskId,
        seq: u64,
        node: NodeId,
        proposal: Proposal,
        mesh: &mut MeshNetwork,
    ) -> Result<Vec<RouterEvent>> {
        if proposal.task_id != *id {
            warn!(task = %id, proposal_task = %proposal.task_id, %node, "proposal for another task");
            return Ok(Vec::new());
        }
        let Some(rec) = self.current_attempt(id, seq, node)? else {
            return Ok(Vec::new());
        };
        rec.proposals.insert(node, proposal.clone());

        if !rec.task.requires_consensus {
            let result = ConsensusResult {
                task_id: id.clone(),
                seq,
                decided: true,
                digest: Some(proposal.digest()),
                value: Some(proposal.value),
                view: 0,
                votes: 1,
                dissenting_nodes: BTreeSet::new(),
            };
            return Ok(self.commit(id, result, mesh));
        }

        if rec.status != TaskStatus::AwaitingConsensus {
            rec.status = TaskStatus::AwaitingConsensus;
            debug!(task = %id, seq, %node, "awaiting consensus");
        }
        Ok(Vec::new())
    }

    /// A validator's view of the round's outcome. The router acts once
    /// `f + 1` validators agree, so up to `f` lying reporters change
    /// nothing.
    pub fn validator_report(
        &mut self,
        id: &TaskId,
        seq: u64,
        from: NodeId,
        report: ValidatorReport,
        mesh: &mut MeshNetwork,
        now: Instant,
    ) -> Result<Vec<RouterEvent>> {
        let Some(rec) = self.current_attempt(id, seq, from)? else {
            return Ok(Vec::new());
        };
        let threshold = reply_threshold(rec.f);
        rec.status = TaskStatus::AwaitingConsensus;

        match report {
            ValidatorReport::Decided(result) => {
                let Some(digest) = result.digest.filter(|_| result.decided) else {
                    warn!(task = %id, %from, "decided report without a digest");
                    return Ok(Vec::new());
                };
                let bound = result.task_id == *id
                    && result
                        .value
                        .as_ref()
                        .is_some_and(|v| Proposal::new(id.clone(), v.clone()).digest() == digest);
                if !bound {
                    warn!(task = %id, %from, %digest, "decided report value does not match its digest");
                    return Ok(Vec::new());
                }
                let votes = rec.decided.entry(digest).or_default();
                votes.insert(from, result);
                if votes.len() < threshold {
                    return Ok(Vec::new());
                }
                let mut merged: Option<ConsensusResult> = None;
                for r in votes.values() {
                    match merged.as_mut() {
                        None => merged = Some(r.clone()),
                        Some(m) => {
                            m.votes = m.votes.max(r.votes);
                            m.dissenting_nodes.extend(r.dissenting_nodes.iter().copied());
                        }
                    }
                }
                match merged {
                    Some(mut result) => {
                        result.seq = seq;
                        Ok(self.commit(id, result, mesh))
                    }
                    None => Ok(Vec::new()),
                }
            }
            ValidatorReport::Rejected(result) => {
                rec.rejected.insert(from, result);
                if rec.rejected.len() < threshold {
                    return Ok(Vec::new());
                }
                let votes = rec.rejected.values().map(|r| r.votes).max().unwrap_or(0);
                let dissenting: BTreeSet<NodeId> = rec
                    .rejected
                    .values()
                    .flat_map(|r| r.dissenting_nodes.iter().copied())
                    .collect();
                let reason = FailureReason::Rejected {
                    votes,
                    dissenting: dissenting.into_iter().collect(),
                };
                Ok(self.attempt_failed(id, reason, true, mesh, now))
            }
            ValidatorReport::Failed(error) => {
                rec.consensus_failed.insert(from, error.clone());
                if rec.consensus_failed.len() < threshold {
                    return Ok(Vec::new());
                }
                Ok(self.attempt_failed(id, FailureReason::Consensus(error), false, mesh, now))
            }
        }
    }

    /// An assignee's handler failed. A consensus attempt is abandoned only
    /// once too few assignees remain to reach quorum.
    pub fn assignee_failed(
        &mut self,
        id: &TaskId,
        seq: u64,
        node: NodeId,
        error: impl Into<String>,
        mesh: &mut MeshNetwork,
        now: Instant,
    ) -> Result<Vec<RouterEvent>> {
        let error = error.into();
        let Some(rec) = self.current_attempt(id, seq, node)? else {
            return Ok(Vec::new());
        };
        warn!(task = %id, seq, %node, %error, "assignee failed");
        rec.executor_failed.insert(node);

        if let Some(f) = rec.consensus_f() {
            let working = rec.assignees.len() - rec.executor_failed.len();
            if working >= quorum(f) {
                return Ok(Vec::new());
            }
        }
        rec.excluded.extend(rec.executor_failed.iter().copied());
        Ok(self.attempt_failed(id, FailureReason::AssigneeFailed { node, error }, false, mesh, now))
    }

    /// Request cancellation.
    ///
    /// Before agreement starts the task is cancelled outright. While a
    /// round is in flight cancellation is advisory: validators that have
    /// not committed abort, and a decision that still arrives commits the
    /// task.
    pub fn cancel(
        &mut self,
        id: &TaskId,
        mesh: &mut MeshNetwork,
    ) -> Result<(CancelOutcome, Vec<RouterEvent>)> {
        let rec = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
        if rec.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                task: id.clone(),
                from: rec.status,
                to: TaskStatus::Cancelled,
            });
        }

        let mut events = Vec::new();
        if !rec.assignees.is_empty() {
            events.push(RouterEvent::Abort {
                task: id.clone(),
                seq: rec.attempt,
                assignees: rec.assignees.clone(),
            });
        }

        if rec.status == TaskStatus::AwaitingConsensus {
            rec.cancel_requested = true;
            info!(task = %id, seq = rec.attempt, "cancellation is advisory, round in flight");
            return Ok((CancelOutcome::Advisory, events));
        }

        for node in &rec.assignees {
            mesh.release_assignment(*node);
        }
        rec.reset_attempt();
        rec.status = TaskStatus::Cancelled;
        info!(task = %id, "task cancelled");
        events.push(RouterEvent::Cancelled(id.clone()));
        events.extend(self.cascade(id));
        Ok((CancelOutcome::Cancelled, events))
    }

    fn commit(&mut self, id: &TaskId, result: ConsensusResult, mesh: &mut MeshNetwork) -> Vec<RouterEvent> {
        let Some(rec) = self.tasks.get_mut(id) else {
            return Vec::new();
        };
        for node in &rec.assignees {
            mesh.release_assignment(*node);
        }
        rec.status = TaskStatus::Committed;
        rec.deadline = None;
        rec.result = Some(result.clone());
        info!(
            task = %id,
            seq = rec.attempt,
            view = result.view,
            votes = result.votes,
            dissenting = result.dissenting_nodes.len(),
            "task committed"
        );
        vec![RouterEvent::Committed {
            task: id.clone(),
            result,
        }]
    }

    /// Close the current attempt and either retry or give up.
    fn attempt_failed(
        &mut self,
        id: &TaskId,
        reason: FailureReason,
        escalate: bool,
        mesh: &mut MeshNetwork,
        now: Instant,
    ) -> Vec<RouterEvent> {
        let Some(rec) = self.tasks.get_mut(id) else {
            return Vec::new();
        };
        let mut events = Vec::new();

        let assignees = std::mem::take(&mut rec.assignees);
        if rec.status.is_in_flight() {
            for node in &assignees {
                mesh.release_assignment(*node);
            }
            if rec.task.requires_consensus {
                events.push(RouterEvent::Abort {
                    task: id.clone(),
                    seq: rec.attempt,
                    assignees: assignees.clone(),
                });
            }
        }
        rec.failures.push(AttemptFailure {
            attempt: rec.attempt,
            assignees,
            reason: reason.clone(),
        });
        rec.reset_attempt();

        if rec.cancel_requested {
            rec.status = TaskStatus::Cancelled;
            info!(task = %id, "cancelled after failed attempt");
            events.push(RouterEvent::Cancelled(id.clone()));
            events.extend(self.cascade(id));
            return events;
        }

        let failures = rec.failures.len() as u32;
        if failures > self.config.max_retries {
            rec.status = TaskStatus::Failed;
            let report = FailureReport {
                task: id.clone(),
                attempts: rec.failures.clone(),
            };
            warn!(task = %id, attempts = failures, %reason, "task failed, retries exhausted");
            events.push(RouterEvent::Failed(report));
            events.extend(self.cascade(id));
            return events;
        }

        if escalate {
            rec.f += 1;
        }
        let at = now + self.config.backoff(failures);
        rec.status = TaskStatus::Pending;
        rec.retry_at = Some(at);
        info!(task = %id, retry = failures, f = rec.f, %reason, "retrying task");
        events.push(RouterEvent::Retrying {
            task: id.clone(),
            attempt: rec.attempt + 1,
            at,
            reason,
        });
        events
    }

    fn finish_blocked(&mut self, id: &TaskId, dep: TaskId) -> Vec<RouterEvent> {
        let Some(rec) = self.tasks.get_mut(id) else {
            return Vec::new();
        };
        rec.failures.push(AttemptFailure {
            attempt: rec.attempt,
            assignees: Vec::new(),
            reason: FailureReason::DependencyFailed(dep.clone()),
        });
        rec.status = TaskStatus::Failed;
        warn!(task = %id, dependency = %dep, "dependency did not commit");
        let mut events = vec![RouterEvent::Failed(FailureReport {
            task: id.clone(),
            attempts: rec.failures.clone(),
        })];
        events.extend(self.cascade(id));
        events
    }

    /// Fail Pending dependents of a task that will never commit.
    fn cascade(&mut self, id: &TaskId) -> Vec<RouterEvent> {
        let mut events = Vec::new();
        for dependent in self.graph.dependents(id) {
            let pending = self
                .tasks
                .get(&dependent)
                .is_some_and(|r| r.status == TaskStatus::Pending);
            if pending {
                events.extend(self.finish_blocked(&dependent, id.clone()));
            }
        }
        events
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(id).map(|r| r.status)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id).map(|r| &r.task)
    }

    pub fn assignees(&self, id: &TaskId) -> &[NodeId] {
        self.tasks.get(id).map_or(&[], |r| &r.assignees)
    }

    pub fn attempt(&self, id: &TaskId) -> Option<u64> {
        self.tasks.get(id).map(|r| r.attempt)
    }

    /// Fault tolerance the next (or current) attempt runs with.
    pub fn fault_tolerance(&self, id: &TaskId) -> Option<usize> {
        self.tasks.get(id).and_then(TaskRecord::consensus_f)
    }

    pub fn result(&self, id: &TaskId) -> Option<&ConsensusResult> {
        self.tasks.get(id).and_then(|r| r.result.as_ref())
    }

    pub fn proposals(&self, id: &TaskId) -> Option<&BTreeMap<NodeId, Proposal>> {
        self.tasks.get(id).map(|r| &r.proposals)
    }

    pub fn failures(&self, id: &TaskId) -> &[AttemptFailure] {
        self.tasks.get(id).map_or(&[], |r| &r.failures)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&TaskId, TaskStatus)> {
        self.tasks.iter().map(|(id, r)| (id, r.status))
    }

    /// Tasks not yet Committed, Failed or Cancelled.
    pub fn open_count(&self) -> usize {
        self.tasks.values().filter(|r| !r.status.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use meshwork_mesh::MeshConfig;
    use meshwork_topology::NodeDescriptor;

    use super::*;
    use crate::delegation::DelegationStrategy;

    fn mesh(workers: u64, now: Instant) -> MeshNetwork {
        let mut mesh = MeshNetwork::new(MeshConfig::default());
        for id in 1..=workers {
            mesh.join(NodeDescriptor::worker(NodeId(id), ["render"]), now)
                .unwrap();
        }
        for _ in 0..10 {
            mesh.discover(now);
        }
        mesh
    }

    fn router() -> TaskRouter {
        TaskRouter::new(
            NodeId(1),
            RouterConfig::default().with_delegation(DelegationStrategy::RoundRobin),
        )
    }

    fn decided(task: &TaskId, seq: u64, value: &[u8]) -> ConsensusResult {
        let proposal = Proposal::new(task.clone(), value.to_vec());
        ConsensusResult {
            task_id: task.clone(),
            seq,
            decided: true,
            value: Some(value.to_vec()),
            digest: Some(proposal.digest()),
            view: 0,
            votes: 3,
            dissenting_nodes: BTreeSet::new(),
        }
    }

    #[test]
    fn cyclic_submission_never_reaches_pending() {
        let now = Instant::now();
        let mut router = router();
        router.submit(Task::new("a", "render").depends_on("b"), now).unwrap();
        let err = router
            .submit(Task::new("b", "render").depends_on("a"), now)
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::CyclicDependency {
                task: "b".into(),
                cycle_through: "a".into()
            }
        );
        assert_eq!(router.status(&"b".into()), None);
        assert_eq!(router.status(&"a".into()), Some(TaskStatus::Pending));
    }

    #[test]
    fn duplicate_submission_is_rejected() {
        let now = Instant::now();
        let mut router = router();
        router.submit(Task::new("a", "render"), now).unwrap();
        assert_eq!(
            router.submit(Task::new("a", "render"), now),
            Err(TaskError::DuplicateTask("a".into()))
        );
    }

    #[test]
    fn consensus_task_gets_four_validators() {
        let now = Instant::now();
        let mut mesh = mesh(6, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();

        let assignment = router.assign(&id, &mut mesh, now).unwrap();
        assert_eq!(assignment.assignees.len(), 4);
        assert_eq!(assignment.f, Some(1));
        assert_eq!(assignment.seq, 1);
        assert_eq!(router.status(&id), Some(TaskStatus::Assigned));
        for node in &assignment.assignees {
            assert!(mesh.node(*node).unwrap().active_tasks > 0);
        }
    }

    #[test]
    fn too_few_nodes_for_quorum() {
        let now = Instant::now();
        let mut mesh = mesh(2, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        assert_eq!(
            router.assign(&id, &mut mesh, now),
            Err(TaskError::QuorumUnavailable {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn single_assignee_commits_on_report() {
        let now = Instant::now();
        let mut mesh = mesh(3, now);
        let mut router = router();
        let id = router
            .submit(Task::new("a", "render").single_assignee(), now)
            .unwrap();
        let assignment = router.assign(&id, &mut mesh, now).unwrap();
        assert_eq!(assignment.assignees.len(), 1);
        let node = assignment.assignees[0];

        router.started(&id, 1, node).unwrap();
        assert_eq!(router.status(&id), Some(TaskStatus::Executing));
        let events = router
            .report(&id, 1, node, Proposal::new(id.clone(), b"done".to_vec()), &mut mesh)
            .unwrap();
        assert!(matches!(events.as_slice(), [RouterEvent::Committed { .. }]));
        assert_eq!(router.status(&id), Some(TaskStatus::Committed));
        assert_eq!(router.result(&id).unwrap().value.as_deref(), Some(&b"done"[..]));
        assert_eq!(mesh.node(node).unwrap().active_tasks, 0);
    }

    #[test]
    fn commits_after_f_plus_one_matching_reports() {
        let now = Instant::now();
        let mut mesh = mesh(4, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        let a = router.assign(&id, &mut mesh, now).unwrap();

        let first = router
            .validator_report(&id, 1, a.assignees[0], ValidatorReport::Decided(decided(&id, 1, b"v")), &mut mesh, now)
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(router.status(&id), Some(TaskStatus::AwaitingConsensus));

        // A lone liar reporting another value changes nothing.
        let liar = router
            .validator_report(&id, 1, a.assignees[1], ValidatorReport::Decided(decided(&id, 1, b"x")), &mut mesh, now)
            .unwrap();
        assert!(liar.is_empty());

        let second = router
            .validator_report(&id, 1, a.assignees[2], ValidatorReport::Decided(decided(&id, 1, b"v")), &mut mesh, now)
            .unwrap();
        assert!(matches!(second.as_slice(), [RouterEvent::Committed { .. }]));
        assert_eq!(router.result(&id).unwrap().value.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn report_value_must_match_its_digest() {
        let now = Instant::now();
        let mut mesh = mesh(4, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        let a = router.assign(&id, &mut mesh, now).unwrap();
        let first = a.assignees.iter().copied().min().unwrap();

        // Honest digest, rewritten value, from the voter merged first.
        let mut forged = decided(&id, 1, b"v");
        forged.value = Some(b"EVIL".to_vec());
        let events = router
            .validator_report(&id, 1, first, ValidatorReport::Decided(forged), &mut mesh, now)
            .unwrap();
        assert!(events.is_empty());

        // A result for another task, even one that hashes correctly there.
        let second = a.assignees.iter().copied().find(|n| *n != first).unwrap();
        let other: TaskId = "b".into();
        let events = router
            .validator_report(&id, 1, second, ValidatorReport::Decided(decided(&other, 1, b"v")), &mut mesh, now)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(router.status(&id), Some(TaskStatus::AwaitingConsensus));

        let mut committed = Vec::new();
        for node in a.assignees.iter().copied().filter(|n| *n != first) {
            committed.extend(
                router
                    .validator_report(&id, 1, node, ValidatorReport::Decided(decided(&id, 1, b"v")), &mut mesh, now)
                    .unwrap(),
            );
        }
        assert!(matches!(committed.first(), Some(RouterEvent::Committed { .. })));
        assert_eq!(router.result(&id).unwrap().value.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn reports_from_outsiders_are_refused() {
        let now = Instant::now();
        let mut mesh = mesh(6, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        let a = router.assign(&id, &mut mesh, now).unwrap();
        let outsider = (1..=6).map(NodeId).find(|n| !a.assignees.contains(n)).unwrap();
        assert!(matches!(
            router.validator_report(&id, 1, outsider, ValidatorReport::Decided(decided(&id, 1, b"v")), &mut mesh, now),
            Err(TaskError::NotAssigned { .. })
        ));
    }

    #[test]
    fn rejection_retries_with_larger_validator_set() {
        let now = Instant::now();
        let mut mesh = mesh(8, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        let a = router.assign(&id, &mut mesh, now).unwrap();

        let rejected = ConsensusResult {
            decided: false,
            value: None,
            digest: None,
            votes: 2,
            ..decided(&id, 1, b"v")
        };
        let mut events = Vec::new();
        for node in &a.assignees[..2] {
            events.extend(
                router
                    .validator_report(&id, 1, *node, ValidatorReport::Rejected(rejected.clone()), &mut mesh, now)
                    .unwrap(),
            );
        }
        assert!(events.iter().any(|e| matches!(e, RouterEvent::Abort { seq: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, RouterEvent::Retrying { attempt: 2, .. })));
        assert_eq!(router.status(&id), Some(TaskStatus::Pending));
        assert_eq!(router.fault_tolerance(&id), Some(2));

        // Backoff has not elapsed yet.
        assert!(router.assign_ready(&mut mesh, now).is_empty());
        let later = now + Duration::from_millis(250);
        let events = router.assign_ready(&mut mesh, later);
        let [RouterEvent::Assigned(retry)] = events.as_slice() else {
            panic!("expected a reassignment, got {events:?}");
        };
        assert_eq!(retry.seq, 2);
        assert_eq!(retry.f, Some(2));
        assert!(retry.assignees.len() >= 5);
    }

    #[test]
    fn deadline_breach_exhausts_retries() {
        let now = Instant::now();
        let mut mesh = mesh(4, now);
        let mut router = TaskRouter::new(
            NodeId(1),
            RouterConfig::default()
                .with_max_retries(1)
                .with_backoff(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let id = router
            .submit(Task::new("a", "render").with_deadline(Duration::from_secs(1)), now)
            .unwrap();
        assert_eq!(router.tick(&mut mesh, now).len(), 1);

        let t1 = now + Duration::from_secs(2);
        let events = router.tick(&mut mesh, t1);
        assert!(events.iter().any(|e| matches!(e, RouterEvent::Retrying { reason: FailureReason::DeadlineExceeded, .. })));

        let t2 = t1 + Duration::from_millis(20);
        assert!(matches!(router.tick(&mut mesh, t2).as_slice(), [RouterEvent::Assigned(_)]));

        let t3 = t2 + Duration::from_secs(2);
        let events = router.tick(&mut mesh, t3);
        let report = events
            .iter()
            .find_map(|e| match e {
                RouterEvent::Failed(report) => Some(report),
                _ => None,
            })
            .expect("task failed");
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.last_reason(), Some(&FailureReason::DeadlineExceeded));
        assert_eq!(router.status(&id), Some(TaskStatus::Failed));
        for node in 1..=4 {
            assert_eq!(mesh.node(NodeId(node)).unwrap().active_tasks, 0);
        }
    }

    #[test]
    fn dependencies_gate_assignment() {
        let now = Instant::now();
        let mut mesh = mesh(3, now);
        let mut router = router();
        let b = router
            .submit(Task::new("b", "render").single_assignee().depends_on("a"), now)
            .unwrap();
        let a = router
            .submit(Task::new("a", "render").single_assignee(), now)
            .unwrap();
        assert_eq!(router.assign(&b, &mut mesh, now), Err(TaskError::NotReady(b.clone())));

        let events = router.assign_ready(&mut mesh, now);
        let [RouterEvent::Assigned(assignment)] = events.as_slice() else {
            panic!("only the dependency should be assigned: {events:?}");
        };
        assert_eq!(assignment.task, a);
        router
            .report(&a, 1, assignment.assignees[0], Proposal::new(a.clone(), b"ok".to_vec()), &mut mesh)
            .unwrap();
        assert!(router.is_ready(&b));
        assert!(matches!(router.assign_ready(&mut mesh, now).as_slice(), [RouterEvent::Assigned(_)]));
    }

    #[test]
    fn cancelled_dependency_fails_dependents() {
        let now = Instant::now();
        let mut mesh = mesh(3, now);
        let mut router = router();
        router.submit(Task::new("a", "render"), now).unwrap();
        router.submit(Task::new("b", "render").depends_on("a"), now).unwrap();
        router.submit(Task::new("c", "render").depends_on("b"), now).unwrap();

        let (outcome, events) = router.cancel(&"a".into(), &mut mesh).unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(events.iter().filter(|e| matches!(e, RouterEvent::Failed(_))).count(), 2);
        assert_eq!(router.status(&"c".into()), Some(TaskStatus::Failed));
        assert_eq!(
            router.failures(&"b".into())[0].reason,
            FailureReason::DependencyFailed("a".into())
        );
    }

    #[test]
    fn cancel_during_consensus_is_advisory() {
        let now = Instant::now();
        let mut mesh = mesh(4, now);
        let mut router = router();
        let id = router.submit(Task::new("a", "render"), now).unwrap();
        let a = router.assign(&id, &mut mesh, now).unwrap();
        router
            .report(&id, 1, a.assignees[0], Proposal::new(id.clone(), b"v".to_vec()), &mut mesh)
            .unwrap();

        let (outcome, events) = router.cancel(&id, &mut mesh).unwrap();
        assert_eq!(outcome, CancelOutcome::Advisory);
        assert!(matches!(events.as_slice(), [RouterEvent::Abort { .. }]));

        for node in &a.assignees[..2] {
            router
                .validator_report(&id, 1, *node, ValidatorReport::Decided(decided(&id, 1, b"v")), &mut mesh, now)
                .unwrap();
        }
        assert_eq!(router.status(&id), Some(TaskStatus::Committed));
        assert!(router.cancel(&id, &mut mesh).is_err());
    }

    #[test]
    fn higher_priority_is_assigned_first() {
        let now = Instant::now();
        let mut mesh = mesh(4, now);
        let mut router = router();
        router.submit(Task::new("low", "render").single_assignee().with_priority(crate::Priority::Low), now).unwrap();
        router.submit(Task::new("urgent", "render").single_assignee().with_priority(crate::Priority::Critical), now).unwrap();
        let events = router.assign_ready(&mut mesh, now);
        let order: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RouterEvent::Assigned(a) => Some(a.task.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["urgent", "low"]);
    }
}
