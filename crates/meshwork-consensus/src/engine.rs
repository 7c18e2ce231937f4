//! Per-validator consensus engine.
//!
//! The engine holds one [`Round`](crate::round) per task and never touches
//! the network. Every call returns the [`Effect`]s the runtime must carry
//! out: messages to send, decisions to report, validators to flag.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use meshwork_topology::NodeId;
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Result};
use crate::message::{ConsensusMessage, ConsensusResult, Effect};
use crate::proposal::{Proposal, TaskId};
use crate::quorum::quorum;
use crate::round::{Phase, Round};

/// One validator's view of every agreement it takes part in.
#[derive(Debug)]
pub struct ConsensusEngine {
    id: NodeId,
    config: ConsensusConfig,
    rounds: HashMap<TaskId, Round>,
    /// Messages for rounds that have not started here yet.
    early: HashMap<TaskId, VecDeque<(NodeId, ConsensusMessage)>>,
}

impl ConsensusEngine {
    pub fn new(id: NodeId, config: ConsensusConfig) -> Self {
        Self {
            id,
            config,
            rounds: HashMap::new(),
            early: HashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Join the agreement for `task` attempt `seq`.
    ///
    /// `own` is this validator's result for the task, if it computed one.
    /// The primary of view 0 (the lowest validator id) proposes it. A start
    /// for an attempt not newer than the current one is ignored; a newer
    /// attempt replaces the old round.
    pub fn start(
        &mut self,
        task: TaskId,
        validators: impl IntoIterator<Item = NodeId>,
        f: usize,
        own: Option<Proposal>,
        seq: u64,
        now: Instant,
    ) -> Result<Vec<Effect>> {
        let mut validators: Vec<NodeId> = validators.into_iter().collect();
        validators.sort();
        validators.dedup();

        if !validators.contains(&self.id) {
            return Err(ConsensusError::NotAValidator(self.id));
        }
        if validators.len() < quorum(f) {
            return Err(ConsensusError::QuorumUnavailable {
                needed: quorum(f),
                available: validators.len(),
            });
        }
        if let Some(p) = &own {
            if p.task_id != task {
                return Err(ConsensusError::Malformed(format!(
                    "proposal for {} started under {task}",
                    p.task_id
                )));
            }
        }
        if let Some(existing) = self.rounds.get(&task) {
            if existing.seq >= seq {
                debug!(%task, seq, current = existing.seq, "ignoring repeated start");
                return Ok(Vec::new());
            }
        }

        let mut round = Round::new(
            self.id,
            task.clone(),
            seq,
            validators,
            f,
            own,
            now + self.config.round_timeout,
        );
        info!(
            node = %self.id,
            %task,
            seq,
            validators = round.validators.len(),
            f,
            primary = %round.primary(0),
            "consensus round started"
        );

        let mut effects = Vec::new();
        round.lead(&self.config, now, &mut effects);
        self.rounds.insert(task.clone(), round);

        if let Some(buffered) = self.early.remove(&task) {
            debug!(%task, count = buffered.len(), "replaying early messages");
            for (from, msg) in buffered {
                match self.handle(from, msg, now) {
                    Ok(more) => effects.extend(more),
                    Err(e) => debug!(%task, %from, error = %e, "dropping buffered message"),
                }
            }
        }
        Ok(effects)
    }

    /// Process a message from another validator.
    ///
    /// Messages for a task with no local round (or a newer attempt) are
    /// buffered until [`start`](Self::start). Errors describe a message the
    /// caller should log and drop; they never disturb the round.
    /// `Abort` is never accepted here; cancellation goes through
    /// [`abort`](Self::abort).
    pub fn handle(&mut self, from: NodeId, msg: ConsensusMessage, now: Instant) -> Result<Vec<Effect>> {
        if let ConsensusMessage::Abort { task, .. } = &msg {
            return Err(ConsensusError::Malformed(format!(
                "abort for {task} from {from} must come from the router"
            )));
        }
        let task = msg.task().clone();
        let seq = msg.seq();

        let current = self.rounds.get(&task).map(|r| r.seq);
        match current {
            Some(current) if seq < current => {
                return Err(ConsensusError::Stale {
                    task,
                    got: seq,
                    current,
                });
            }
            Some(current) if seq == current => {}
            _ => {
                self.buffer(task, from, msg);
                return Ok(Vec::new());
            }
        }

        let Some(round) = self.rounds.get_mut(&task) else {
            return Err(ConsensusError::UnknownRound(task));
        };

        if !round.validators.contains(&from) {
            return Err(ConsensusError::NotAValidator(from));
        }
        if round.flagged.contains(&from) && round.phase != Phase::Decided {
            debug!(%task, %from, kind = msg.kind(), "ignoring flagged validator");
            return Ok(Vec::new());
        }

        let mut effects = Vec::new();
        round.on_message(from, msg, &self.config, now, &mut effects)?;
        Ok(effects)
    }

    fn buffer(&mut self, task: TaskId, from: NodeId, msg: ConsensusMessage) {
        let queue = self.early.entry(task.clone()).or_default();
        if queue.len() >= self.config.max_buffered {
            queue.pop_front();
            warn!(%task, max = self.config.max_buffered, "early message buffer full, dropping oldest");
        }
        debug!(%task, %from, kind = msg.kind(), "buffering message for round not started");
        queue.push_back((from, msg));
    }

    /// Fire expired round timers.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        for round in self.rounds.values_mut() {
            round.tick(&self.config, now, &mut effects);
        }
        effects
    }

    /// Abort the round for `task` unless this validator already sent a
    /// Commit. Returns whether the round stopped.
    pub fn abort(&mut self, task: &TaskId) -> bool {
        self.rounds.get_mut(task).is_some_and(Round::abort)
    }

    /// Drop a finished round and anything buffered for it.
    pub fn forget(&mut self, task: &TaskId) {
        self.rounds.remove(task);
        self.early.remove(task);
    }

    pub fn phase(&self, task: &TaskId) -> Option<Phase> {
        self.rounds.get(task).map(|r| r.phase)
    }

    pub fn view(&self, task: &TaskId) -> Option<u64> {
        self.rounds.get(task).map(|r| r.view)
    }

    pub fn result(&self, task: &TaskId) -> Option<&ConsensusResult> {
        self.rounds.get(task).and_then(|r| r.result.as_ref())
    }

    /// Whether a Commit was sent for `task`.
    pub fn has_committed(&self, task: &TaskId) -> bool {
        self.rounds.get(task).is_some_and(Round::has_committed)
    }

    /// Number of rounds still in progress.
    pub fn active_rounds(&self) -> usize {
        self.rounds.values().filter(|r| !r.phase.is_finished()).count()
    }

    pub fn buffered(&self, task: &TaskId) -> usize {
        self.early.get(task).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::Digest;
    use std::time::Duration;

    fn ids(n: u64) -> Vec<NodeId> {
        (1..=n).map(NodeId).collect()
    }

    #[test]
    fn start_requires_membership() {
        let mut engine = ConsensusEngine::new(NodeId(9), ConsensusConfig::default());
        let err = engine
            .start("t".into(), ids(4), 1, None, 0, Instant::now())
            .unwrap_err();
        assert_eq!(err, ConsensusError::NotAValidator(NodeId(9)));
    }

    #[test]
    fn start_requires_enough_validators() {
        let mut engine = ConsensusEngine::new(NodeId(1), ConsensusConfig::default());
        let err = engine
            .start("t".into(), ids(2), 1, None, 0, Instant::now())
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::QuorumUnavailable {
                needed: 3,
                available: 2
            }
        );
    }

    #[test]
    fn primary_broadcasts_pre_prepare() {
        let mut engine = ConsensusEngine::new(NodeId(1), ConsensusConfig::default());
        let proposal = Proposal::new("t", b"v".to_vec());
        let effects = engine
            .start("t".into(), ids(4), 1, Some(proposal.clone()), 0, Instant::now())
            .unwrap();

        let [Effect::Broadcast { to, message }] = effects.as_slice() else {
            panic!("expected one broadcast, got {effects:?}");
        };
        assert_eq!(to, &vec![NodeId(2), NodeId(3), NodeId(4)]);
        assert!(matches!(
            message,
            ConsensusMessage::PrePrepare { digest, .. } if *digest == proposal.digest()
        ));
    }

    #[test]
    fn single_validator_decides_alone() {
        let mut engine = ConsensusEngine::new(NodeId(1), ConsensusConfig::default());
        let effects = engine
            .start("t".into(), ids(1), 0, Some(Proposal::new("t", b"v".to_vec())), 0, Instant::now())
            .unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::Decided(r) if r.value.as_deref() == Some(&b"v"[..]))));
        assert_eq!(engine.phase(&"t".into()), Some(Phase::Decided));
    }

    #[test]
    fn early_messages_replay_on_start() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let proposal = Proposal::new("t", b"v".to_vec());
        let now = Instant::now();
        let pre = ConsensusMessage::PrePrepare {
            task: "t".into(),
            view: 0,
            seq: 0,
            digest: proposal.digest(),
            proposal: proposal.clone(),
        };
        assert!(engine.handle(NodeId(1), pre, now).unwrap().is_empty());
        assert_eq!(engine.buffered(&"t".into()), 1);

        let effects = engine
            .start("t".into(), ids(4), 1, Some(proposal.clone()), 0, now)
            .unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Broadcast { message: ConsensusMessage::Prepare { digest, .. }, .. } if *digest == proposal.digest()
        )));
        assert_eq!(engine.buffered(&"t".into()), 0);
    }

    #[test]
    fn early_buffer_is_bounded() {
        let config = ConsensusConfig {
            max_buffered: 2,
            ..ConsensusConfig::default()
        };
        let mut engine = ConsensusEngine::new(NodeId(2), config);
        for view in 0..5 {
            let msg = ConsensusMessage::Prepare {
                task: "t".into(),
                view,
                seq: 0,
                digest: Digest([0; 32]),
            };
            engine.handle(NodeId(3), msg, Instant::now()).unwrap();
        }
        assert_eq!(engine.buffered(&"t".into()), 2);
    }

    #[test]
    fn stale_attempts_are_rejected() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 3, now).unwrap();
        let msg = ConsensusMessage::Prepare {
            task: "t".into(),
            view: 0,
            seq: 2,
            digest: Digest([0; 32]),
        };
        assert!(matches!(
            engine.handle(NodeId(3), msg, now),
            Err(ConsensusError::Stale { got: 2, current: 3, .. })
        ));
    }

    #[test]
    fn non_validators_are_rejected() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 0, now).unwrap();
        let msg = ConsensusMessage::Prepare {
            task: "t".into(),
            view: 0,
            seq: 0,
            digest: Digest([0; 32]),
        };
        assert_eq!(
            engine.handle(NodeId(7), msg, now).unwrap_err(),
            ConsensusError::NotAValidator(NodeId(7))
        );
    }

    #[test]
    fn pre_prepare_from_backup_is_malformed() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 0, now).unwrap();
        let proposal = Proposal::new("t", b"v".to_vec());
        let msg = ConsensusMessage::PrePrepare {
            task: "t".into(),
            view: 0,
            seq: 0,
            digest: proposal.digest(),
            proposal,
        };
        assert!(matches!(
            engine.handle(NodeId(3), msg, now),
            Err(ConsensusError::Malformed(_))
        ));
    }

    #[test]
    fn repeated_start_is_ignored() {
        let mut engine = ConsensusEngine::new(NodeId(1), ConsensusConfig::default());
        let now = Instant::now();
        let p = Proposal::new("t", b"v".to_vec());
        assert!(!engine.start("t".into(), ids(4), 1, Some(p.clone()), 0, now).unwrap().is_empty());
        assert!(engine.start("t".into(), ids(4), 1, Some(p), 0, now).unwrap().is_empty());
    }

    #[test]
    fn silent_primary_triggers_view_change_on_tick() {
        let config = ConsensusConfig::default().with_round_timeout(Duration::from_millis(100));
        let mut engine = ConsensusEngine::new(NodeId(2), config);
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 0, now).unwrap();

        assert!(engine.tick(now + Duration::from_millis(50)).is_empty());
        let effects = engine.tick(now + Duration::from_millis(150));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Broadcast { message: ConsensusMessage::ViewChange { new_view: 1, .. }, .. }
        )));
        assert_eq!(engine.phase(&"t".into()), Some(Phase::ViewChange { target: 1 }));
    }

    #[test]
    fn abort_only_before_commit() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 0, now).unwrap();
        assert!(engine.abort(&"t".into()));
        assert_eq!(engine.phase(&"t".into()), Some(Phase::Aborted));
        assert!(!engine.abort(&"t".into()));
        assert!(!engine.abort(&"missing".into()));
    }

    #[test]
    fn abort_from_a_peer_is_refused() {
        let mut engine = ConsensusEngine::new(NodeId(2), ConsensusConfig::default());
        let now = Instant::now();
        engine.start("t".into(), ids(4), 1, None, 0, now).unwrap();

        for from in [NodeId(1), NodeId(3), NodeId(99)] {
            let abort = ConsensusMessage::Abort {
                task: "t".into(),
                seq: 1,
            };
            assert!(matches!(
                engine.handle(from, abort, now),
                Err(ConsensusError::Malformed(_))
            ));
        }
        assert_eq!(engine.phase(&"t".into()), Some(Phase::AwaitingPrePrepare));

        // Nor is a peer's abort for a future attempt kept for replay.
        let future = ConsensusMessage::Abort {
            task: "t".into(),
            seq: 2,
        };
        assert!(engine.handle(NodeId(1), future, now).is_err());
        engine.start("t".into(), ids(4), 1, None, 2, now).unwrap();
        assert_eq!(engine.phase(&"t".into()), Some(Phase::AwaitingPrePrepare));
    }
}
