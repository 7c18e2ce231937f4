//! Deterministic in-process validator set.
//!
//! [`LocalCluster`] wires a handful of [`ConsensusEngine`]s together with a
//! FIFO queue instead of a network. Time only moves when
//! [`advance`](LocalCluster::advance) is called, so timeouts and view
//! changes are reproducible. Crashed validators and message interceptors
//! stand in for faulty nodes.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use meshwork_topology::NodeId;
use tracing::debug;

use crate::config::ConsensusConfig;
use crate::engine::ConsensusEngine;
use crate::error::ConsensusError;
use crate::message::{ConsensusMessage, ConsensusResult, Effect};
use crate::proposal::{Proposal, TaskId};

/// Rewrites (or drops, by returning `None`) a message sent by one validator
/// to the validator passed as the first argument.
pub type Interceptor = Box<dyn FnMut(NodeId, ConsensusMessage) -> Option<ConsensusMessage> + Send>;

/// Upper bound on deliveries per [`LocalCluster::run`].
const MAX_DELIVERIES: usize = 100_000;

pub struct LocalCluster {
    engines: BTreeMap<NodeId, ConsensusEngine>,
    queue: VecDeque<(NodeId, NodeId, ConsensusMessage)>,
    crashed: BTreeSet<NodeId>,
    interceptors: HashMap<NodeId, Interceptor>,
    now: Instant,
    decided: BTreeMap<NodeId, Vec<ConsensusResult>>,
    rejected: BTreeMap<NodeId, Vec<ConsensusResult>>,
    failed: BTreeMap<NodeId, Vec<ConsensusError>>,
    flags: BTreeMap<NodeId, BTreeSet<NodeId>>,
    dropped: usize,
}

impl LocalCluster {
    /// Validators `1..=n`.
    pub fn new(n: u64, config: ConsensusConfig) -> Self {
        Self::with_validators((1..=n).map(NodeId), config)
    }

    pub fn with_validators(ids: impl IntoIterator<Item = NodeId>, config: ConsensusConfig) -> Self {
        let engines = ids
            .into_iter()
            .map(|id| (id, ConsensusEngine::new(id, config.clone())))
            .collect();
        Self {
            engines,
            queue: VecDeque::new(),
            crashed: BTreeSet::new(),
            interceptors: HashMap::new(),
            now: Instant::now(),
            decided: BTreeMap::new(),
            rejected: BTreeMap::new(),
            failed: BTreeMap::new(),
            flags: BTreeMap::new(),
            dropped: 0,
        }
    }

    pub fn validators(&self) -> Vec<NodeId> {
        self.engines.keys().copied().collect()
    }

    /// Stop a validator: it neither sends nor receives from now on.
    pub fn crash(&mut self, node: NodeId) {
        self.crashed.insert(node);
    }

    pub fn intercept(&mut self, node: NodeId, interceptor: Interceptor) {
        self.interceptors.insert(node, interceptor);
    }

    /// Start `task` at every live validator. `proposal_of` gives each
    /// validator's own result.
    pub fn start(
        &mut self,
        task: &TaskId,
        f: usize,
        seq: u64,
        mut proposal_of: impl FnMut(NodeId) -> Option<Proposal>,
    ) -> Result<(), ConsensusError> {
        let validators = self.validators();
        for id in validators.clone() {
            if self.crashed.contains(&id) {
                continue;
            }
            let Some(engine) = self.engines.get_mut(&id) else {
                continue;
            };
            let effects = engine.start(task.clone(), validators.clone(), f, proposal_of(id), seq, self.now)?;
            self.apply(id, effects);
        }
        self.run();
        Ok(())
    }

    /// Deliver queued messages until none are left.
    pub fn run(&mut self) {
        let mut deliveries = 0;
        while let Some((from, to, msg)) = self.queue.pop_front() {
            deliveries += 1;
            if deliveries > MAX_DELIVERIES {
                debug!(pending = self.queue.len(), "delivery limit reached");
                break;
            }
            if self.crashed.contains(&to) {
                continue;
            }
            let Some(engine) = self.engines.get_mut(&to) else {
                continue;
            };
            match engine.handle(from, msg, self.now) {
                Ok(effects) => self.apply(to, effects),
                Err(e) => {
                    debug!(%from, %to, error = %e, "message dropped");
                    self.dropped += 1;
                }
            }
        }
    }

    /// Move the clock forward, fire timers, and deliver what they produce.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        let ids: Vec<NodeId> = self.engines.keys().copied().collect();
        for id in ids {
            if self.crashed.contains(&id) {
                continue;
            }
            if let Some(engine) = self.engines.get_mut(&id) {
                let effects = engine.tick(self.now);
                self.apply(id, effects);
            }
        }
        self.run();
    }

    /// Advance in `step`s until every live validator finished `task`, or
    /// `max_steps` ran out. Returns whether all finished.
    pub fn settle(&mut self, task: &TaskId, step: Duration, max_steps: usize) -> bool {
        for _ in 0..max_steps {
            if self.all_finished(task) {
                return true;
            }
            self.advance(step);
        }
        self.all_finished(task)
    }

    fn all_finished(&self, task: &TaskId) -> bool {
        self.engines
            .iter()
            .filter(|(id, _)| !self.crashed.contains(id))
            .all(|(_, e)| e.phase(task).is_some_and(|p| p.is_finished()))
    }

    /// Abort `task` at every live validator; returns the validators that
    /// stopped before committing.
    pub fn abort(&mut self, task: &TaskId) -> BTreeSet<NodeId> {
        self.engines
            .iter_mut()
            .filter(|(id, _)| !self.crashed.contains(id))
            .filter_map(|(id, e)| e.abort(task).then_some(*id))
            .collect()
    }

    fn apply(&mut self, from: NodeId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast { to, message } => {
                    if self.crashed.contains(&from) {
                        continue;
                    }
                    for target in to {
                        let msg = match self.interceptors.get_mut(&from) {
                            Some(intercept) => intercept(target, message.clone()),
                            None => Some(message.clone()),
                        };
                        if let Some(msg) = msg {
                            self.queue.push_back((from, target, msg));
                        }
                    }
                }
                Effect::Decided(result) => self.decided.entry(from).or_default().push(result),
                Effect::Rejected(result) => self.rejected.entry(from).or_default().push(result),
                Effect::Failed { error, .. } => self.failed.entry(from).or_default().push(error),
                Effect::Flag { node, .. } => {
                    self.flags.entry(from).or_default().insert(node);
                }
            }
        }
    }

    pub fn engine(&self, id: NodeId) -> Option<&ConsensusEngine> {
        self.engines.get(&id)
    }

    /// Decisions per validator, in the order they were emitted.
    pub fn decisions(&self) -> &BTreeMap<NodeId, Vec<ConsensusResult>> {
        &self.decided
    }

    pub fn decision_of(&self, id: NodeId, task: &TaskId) -> Option<&ConsensusResult> {
        self.decided.get(&id)?.iter().find(|r| &r.task_id == task)
    }

    pub fn rejections(&self) -> &BTreeMap<NodeId, Vec<ConsensusResult>> {
        &self.rejected
    }

    pub fn failures(&self) -> &BTreeMap<NodeId, Vec<ConsensusError>> {
        &self.failed
    }

    /// Validators flagged by `reporter`.
    pub fn flagged_by(&self, reporter: NodeId) -> BTreeSet<NodeId> {
        self.flags.get(&reporter).cloned().unwrap_or_default()
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn now(&self) -> Instant {
        self.now
    }
}
