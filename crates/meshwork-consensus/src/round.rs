//! One task's agreement as seen by one validator.
//!
//! # Phases
//!
//! ```text
//!                PrePrepare / NewView
//! AwaitingPrePrepare ──────────────▶ Preparing
//!        │                             │ 2f matching Prepares
//!        │                             ▼
//!        │                         Committing ──2f+1 Commits──▶ Decided
//!        │ timeout                     │
//!        ▼                             │ timeout / faulty primary
//!   ViewChange{v+1} ◀──────────────────┘
//!        │ 2f+1 ViewChanges, NewView from primary(v+1)
//!        └──────────────▶ Preparing (view v+1)
//! ```
//!
//! A validator whose own result differs from the primary's sends Prepare
//! for its own digest and never commits the primary's. It still decides
//! when it sees 2f+1 Commits, since at least f+1 of those are honest.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use meshwork_topology::NodeId;
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::message::{ConsensusMessage, ConsensusResult, Effect, PreparedCertificate};
use crate::proposal::{Digest, Proposal, TaskId};
use crate::quorum::{prepare_threshold, quorum, reply_threshold, view_change_timeout};

/// Where a round stands at one validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingPrePrepare,
    Preparing,
    /// Sent Commit in the current view.
    Committing,
    ViewChange {
        target: u64,
    },
    Decided,
    Rejected,
    Failed,
    Aborted,
}

impl Phase {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Decided | Self::Rejected | Self::Failed | Self::Aborted
        )
    }
}

#[derive(Debug, Default)]
struct Votes {
    pre_prepare: Option<(Digest, Proposal)>,
    prepares: BTreeMap<NodeId, Digest>,
    commits: BTreeMap<NodeId, Digest>,
}

#[derive(Debug)]
pub(crate) struct Round {
    pub(crate) me: NodeId,
    pub(crate) task: TaskId,
    pub(crate) seq: u64,
    /// Sorted; the primary of view `v` is `validators[v % n]`.
    pub(crate) validators: Vec<NodeId>,
    pub(crate) f: usize,
    own: Option<Proposal>,
    pub(crate) view: u64,
    pub(crate) phase: Phase,
    votes: BTreeMap<u64, Votes>,
    prepared: Option<PreparedCertificate>,
    committed_once: bool,
    view_changes: BTreeMap<u64, BTreeMap<NodeId, Option<PreparedCertificate>>>,
    pub(crate) flagged: BTreeSet<NodeId>,
    view_change_attempts: u32,
    deadline: Instant,
    pub(crate) result: Option<ConsensusResult>,
}

impl Round {
    pub(crate) fn new(
        me: NodeId,
        task: TaskId,
        seq: u64,
        validators: Vec<NodeId>,
        f: usize,
        own: Option<Proposal>,
        deadline: Instant,
    ) -> Self {
        Self {
            me,
            task,
            seq,
            validators,
            f,
            own,
            view: 0,
            phase: Phase::AwaitingPrePrepare,
            votes: BTreeMap::new(),
            prepared: None,
            committed_once: false,
            view_changes: BTreeMap::new(),
            flagged: BTreeSet::new(),
            view_change_attempts: 0,
            deadline,
            result: None,
        }
    }

    /// `start` guarantees a non-empty validator set.
    pub(crate) fn primary(&self, view: u64) -> NodeId {
        let n = self.validators.len() as u64;
        self.validators[(view % n) as usize]
    }

    fn others(&self) -> Vec<NodeId> {
        self.validators
            .iter()
            .copied()
            .filter(|v| *v != self.me)
            .collect()
    }

    fn broadcast(&self, message: ConsensusMessage, effects: &mut Vec<Effect>) {
        effects.push(Effect::Broadcast {
            to: self.others(),
            message,
        });
    }

    fn own_digest(&self) -> Option<Digest> {
        self.own.as_ref().map(Proposal::digest)
    }

    /// Whether this validator ever sent a Commit for this attempt.
    pub(crate) fn has_committed(&self) -> bool {
        self.committed_once
    }

    /// Primary of view 0 puts its own proposal up.
    pub(crate) fn lead(&mut self, cfg: &ConsensusConfig, now: Instant, effects: &mut Vec<Effect>) {
        let Some(proposal) = self.own.clone() else {
            return;
        };
        if self.primary(self.view) != self.me {
            return;
        }
        let digest = proposal.digest();
        self.votes.entry(self.view).or_default().pre_prepare = Some((digest, proposal.clone()));
        self.phase = Phase::Preparing;
        self.deadline = now + cfg.round_timeout;
        debug!(task = %self.task, view = self.view, %digest, "sending pre-prepare");
        self.broadcast(
            ConsensusMessage::PrePrepare {
                task: self.task.clone(),
                view: self.view,
                seq: self.seq,
                digest,
                proposal,
            },
            effects,
        );
        self.evaluate(cfg, now, effects);
    }

    pub(crate) fn on_message(
        &mut self,
        from: NodeId,
        msg: ConsensusMessage,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ConsensusError> {
        if self.phase == Phase::Decided {
            self.flag_late_dissent(from, &msg, effects);
            return Ok(());
        }
        if self.phase.is_finished() {
            return Ok(());
        }

        match msg {
            ConsensusMessage::PrePrepare {
                view,
                digest,
                proposal,
                ..
            } => self.on_pre_prepare(from, view, digest, proposal, cfg, now, effects),
            ConsensusMessage::Prepare { view, digest, .. } => {
                self.on_prepare(from, view, digest, cfg, now, effects);
                Ok(())
            }
            ConsensusMessage::Commit { view, digest, .. } => {
                self.on_commit(from, view, digest, cfg, now, effects);
                Ok(())
            }
            ConsensusMessage::ViewChange {
                new_view, prepared, ..
            } => self.on_view_change(from, new_view, prepared, cfg, now, effects),
            ConsensusMessage::NewView {
                view,
                digest,
                proposal,
                view_changes,
                ..
            } => self.on_new_view(from, view, digest, proposal, view_changes, cfg, now, effects),
            ConsensusMessage::Abort { .. } => Err(ConsensusError::Malformed(
                "abort is not a validator message".to_owned(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_pre_prepare(
        &mut self,
        from: NodeId,
        view: u64,
        digest: Digest,
        proposal: Proposal,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ConsensusError> {
        if from != self.primary(view) {
            return Err(ConsensusError::Malformed(format!(
                "pre-prepare for view {view} from non-primary {from}"
            )));
        }
        if view != self.view || matches!(self.phase, Phase::ViewChange { .. }) {
            debug!(task = %self.task, view, current = self.view, "ignoring pre-prepare outside current view");
            return Ok(());
        }
        if proposal.digest() != digest || proposal.task_id != self.task {
            self.flag(from, "pre-prepare digest does not match proposal", effects);
            self.request_view_change(self.view + 1, cfg, now, effects);
            return Ok(());
        }
        match self.votes.get(&view).and_then(|v| v.pre_prepare.as_ref()) {
            Some((existing, _)) if *existing != digest => {
                self.flag(from, "conflicting pre-prepares", effects);
                self.request_view_change(self.view + 1, cfg, now, effects);
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                self.accept(view, digest, proposal, cfg, now, effects);
                Ok(())
            }
        }
    }

    /// Take a primary's proposal for `view` and send our Prepare.
    fn accept(
        &mut self,
        view: u64,
        digest: Digest,
        proposal: Proposal,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        self.votes.entry(view).or_default().pre_prepare = Some((digest, proposal));
        self.phase = Phase::Preparing;
        self.deadline = now + cfg.round_timeout;

        let mine = match self.own_digest() {
            Some(own) if own != digest => {
                warn!(task = %self.task, view, primary = %digest, own = %own, "own result differs from primary's");
                own
            }
            _ => digest,
        };
        self.votes.entry(view).or_default().prepares.insert(self.me, mine);
        self.broadcast(
            ConsensusMessage::Prepare {
                task: self.task.clone(),
                view,
                seq: self.seq,
                digest: mine,
            },
            effects,
        );
        self.evaluate(cfg, now, effects);
    }

    fn on_prepare(
        &mut self,
        from: NodeId,
        view: u64,
        digest: Digest,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if view < self.view {
            return;
        }
        let votes = self.votes.entry(view).or_default();
        match votes.prepares.get(&from).copied() {
            Some(prev) if prev != digest => {
                self.flag(from, "conflicting prepares", effects);
                return;
            }
            Some(_) => return,
            None => {
                votes.prepares.insert(from, digest);
            }
        }
        if view == self.view {
            self.evaluate(cfg, now, effects);
        }
    }

    fn on_commit(
        &mut self,
        from: NodeId,
        view: u64,
        digest: Digest,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if view < self.view {
            return;
        }
        let votes = self.votes.entry(view).or_default();
        match votes.commits.get(&from).copied() {
            Some(prev) if prev != digest => {
                self.flag(from, "conflicting commits", effects);
                return;
            }
            Some(_) => return,
            None => {
                votes.commits.insert(from, digest);
            }
        }
        if view == self.view {
            self.evaluate(cfg, now, effects);
        }
    }

    /// Advance on the current view's votes: commit once prepared, decide on
    /// a commit quorum, and otherwise check whether the primary's digest can
    /// still win.
    fn evaluate(&mut self, cfg: &ConsensusConfig, now: Instant, effects: &mut Vec<Effect>) {
        if !matches!(self.phase, Phase::Preparing | Phase::Committing) {
            return;
        }
        let view = self.view;
        let primary = self.primary(view);
        let Some((pd, proposal)) = self
            .votes
            .get(&view)
            .and_then(|v| v.pre_prepare.clone())
        else {
            return;
        };

        let votes = self.votes.entry(view).or_default();
        let prepare_voters: BTreeSet<NodeId> = votes
            .prepares
            .iter()
            .filter(|(n, d)| **d == pd && **n != primary && !self.flagged.contains(n))
            .map(|(n, _)| *n)
            .collect();

        let agrees = self.own.as_ref().map_or(true, |p| p.digest() == pd);
        if self.phase == Phase::Preparing
            && agrees
            && prepare_voters.len() >= prepare_threshold(self.f)
        {
            let mut voters = prepare_voters.clone();
            voters.insert(primary);
            self.prepared = Some(PreparedCertificate {
                view,
                digest: pd,
                proposal: proposal.clone(),
                voters,
            });
            self.phase = Phase::Committing;
            self.committed_once = true;
            self.votes.entry(view).or_default().commits.insert(self.me, pd);
            debug!(task = %self.task, view, digest = %pd, "prepared, sending commit");
            self.broadcast(
                ConsensusMessage::Commit {
                    task: self.task.clone(),
                    view,
                    seq: self.seq,
                    digest: pd,
                },
                effects,
            );
        }

        let commit_count = self
            .votes
            .get(&view)
            .map_or(0, |v| {
                v.commits
                    .iter()
                    .filter(|(n, d)| **d == pd && !self.flagged.contains(n))
                    .count()
            });
        if commit_count >= quorum(self.f) {
            self.decide(pd, proposal, commit_count, effects);
            return;
        }

        if self.phase == Phase::Preparing {
            self.check_mismatch(pd, primary, cfg, now, effects);
        }
    }

    /// The primary's digest can no longer gather a quorum of Prepares.
    fn check_mismatch(
        &mut self,
        pd: Digest,
        primary: NodeId,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        let q = quorum(self.f);
        let Some(votes) = self.votes.get(&self.view) else {
            return;
        };

        let mut tallies: BTreeMap<Digest, BTreeSet<NodeId>> = BTreeMap::new();
        tallies.entry(pd).or_default().insert(primary);
        for (node, digest) in &votes.prepares {
            if *node != primary && !self.flagged.contains(node) {
                tallies.entry(*digest).or_default().insert(*node);
            }
        }
        let voted: usize = tallies.values().map(BTreeSet::len).sum();
        let eligible = self
            .validators
            .iter()
            .filter(|v| !self.flagged.contains(v))
            .count();
        let unvoted = eligible.saturating_sub(voted);

        let primary_votes = tallies.get(&pd).map_or(0, BTreeSet::len);
        if primary_votes + unvoted >= q {
            return;
        }

        let winner = tallies
            .iter()
            .find(|(d, voters)| **d != pd && voters.len() >= q)
            .map(|(d, _)| *d);
        if let Some(winner) = winner {
            warn!(
                task = %self.task,
                view = self.view,
                %primary,
                primary_digest = %pd,
                quorum_digest = %winner,
                "primary's proposal lost to a quorum, changing view"
            );
            if primary != self.me {
                self.flag(primary, "proposal contradicted by a prepare quorum", effects);
            }
            self.request_view_change(self.view + 1, cfg, now, effects);
            return;
        }

        let best = tallies.values().map(BTreeSet::len).max().unwrap_or(0);
        if best + unvoted < q {
            let dissenting = tallies
                .iter()
                .filter(|(d, _)| **d != pd)
                .flat_map(|(_, voters)| voters.iter().copied())
                .collect();
            warn!(task = %self.task, view = self.view, best, needed = q, "no digest can reach quorum");
            let result = ConsensusResult {
                task_id: self.task.clone(),
                seq: self.seq,
                decided: false,
                value: None,
                digest: None,
                view: self.view,
                votes: best,
                dissenting_nodes: dissenting,
            };
            self.phase = Phase::Rejected;
            self.result = Some(result.clone());
            effects.push(Effect::Rejected(result));
        }
    }

    fn decide(&mut self, digest: Digest, proposal: Proposal, votes: usize, effects: &mut Vec<Effect>) {
        let mut dissenting: BTreeSet<NodeId> = self.flagged.clone();
        if let Some(v) = self.votes.get(&self.view) {
            dissenting.extend(
                v.prepares
                    .iter()
                    .chain(v.commits.iter())
                    .filter(|(_, d)| **d != digest)
                    .map(|(n, _)| *n),
            );
        }
        for node in dissenting.clone() {
            if node != self.me {
                self.flag(node, "digest mismatch", effects);
            }
        }

        let result = ConsensusResult {
            task_id: self.task.clone(),
            seq: self.seq,
            decided: true,
            value: Some(proposal.value),
            digest: Some(digest),
            view: self.view,
            votes,
            dissenting_nodes: dissenting,
        };
        info!(
            task = %self.task,
            view = self.view,
            %digest,
            votes,
            dissenting = result.dissenting_nodes.len(),
            "consensus decided"
        );
        self.phase = Phase::Decided;
        self.result = Some(result.clone());
        effects.push(Effect::Decided(result));
    }

    /// After deciding, a vote for another digest in the deciding view
    /// still marks its sender. The decision itself never changes.
    fn flag_late_dissent(&mut self, from: NodeId, msg: &ConsensusMessage, effects: &mut Vec<Effect>) {
        let Some(decided) = self.result.as_ref().and_then(|r| r.digest) else {
            return;
        };
        let late = match msg {
            ConsensusMessage::Prepare { view, digest, .. }
            | ConsensusMessage::Commit { view, digest, .. } => {
                *view == self.view && *digest != decided
            }
            _ => false,
        };
        if late && from != self.me && !self.flagged.contains(&from) {
            self.flag(from, "digest mismatch", effects);
            if let Some(result) = self.result.as_mut() {
                result.dissenting_nodes.insert(from);
            }
        }
    }

    fn flag(&mut self, node: NodeId, reason: &str, effects: &mut Vec<Effect>) {
        if self.flagged.insert(node) {
            warn!(task = %self.task, view = self.view, %node, reason, "flagging validator");
            effects.push(Effect::Flag {
                task: self.task.clone(),
                seq: self.seq,
                node,
                reason: reason.to_string(),
            });
        }
    }

    pub(crate) fn request_view_change(
        &mut self,
        new_view: u64,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        if let Phase::ViewChange { target } = self.phase {
            if target >= new_view {
                return;
            }
        }
        if new_view <= self.view || self.phase.is_finished() {
            return;
        }

        self.view_change_attempts += 1;
        if self.view_change_attempts > cfg.max_view_changes {
            warn!(task = %self.task, attempts = self.view_change_attempts - 1, "view changes exhausted");
            self.phase = Phase::Failed;
            effects.push(Effect::Failed {
                task: self.task.clone(),
                seq: self.seq,
                error: ConsensusError::ViewChangeExhausted {
                    task: self.task.clone(),
                    attempts: self.view_change_attempts - 1,
                },
            });
            return;
        }

        info!(task = %self.task, from = self.view, to = new_view, "requesting view change");
        self.phase = Phase::ViewChange { target: new_view };
        self.deadline = now
            + view_change_timeout(self.f, cfg.expected_rtt, self.view_change_attempts - 1);
        self.view_changes
            .entry(new_view)
            .or_default()
            .insert(self.me, self.prepared.clone());
        self.broadcast(
            ConsensusMessage::ViewChange {
                task: self.task.clone(),
                seq: self.seq,
                new_view,
                prepared: self.prepared.clone(),
            },
            effects,
        );
        self.try_new_view(new_view, cfg, now, effects);
    }

    fn on_view_change(
        &mut self,
        from: NodeId,
        new_view: u64,
        prepared: Option<PreparedCertificate>,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ConsensusError> {
        if let Some(cert) = &prepared {
            self.check_certificate(cert, new_view)?;
        }
        if new_view <= self.view {
            return Ok(());
        }
        self.view_changes
            .entry(new_view)
            .or_default()
            .insert(from, prepared);

        let count = self.view_changes.get(&new_view).map_or(0, BTreeMap::len);
        let target = match self.phase {
            Phase::ViewChange { target } => target,
            _ => self.view,
        };
        if count >= reply_threshold(self.f) && new_view > target {
            self.request_view_change(new_view, cfg, now, effects);
        }
        self.try_new_view(new_view, cfg, now, effects);
        Ok(())
    }

    /// A certificate must come from an earlier view and name a quorum of
    /// this round's validators.
    fn check_certificate(&self, cert: &PreparedCertificate, new_view: u64) -> Result<(), ConsensusError> {
        if cert.proposal.digest() != cert.digest || cert.proposal.task_id != self.task {
            return Err(ConsensusError::Malformed(
                "prepared certificate does not match its proposal".into(),
            ));
        }
        if cert.view >= new_view {
            return Err(ConsensusError::Malformed(format!(
                "prepared certificate from view {} offered for view {new_view}",
                cert.view
            )));
        }
        if let Some(outsider) = cert.voters.iter().find(|v| !self.validators.contains(v)) {
            return Err(ConsensusError::Malformed(format!(
                "prepared certificate names non-validator {outsider}"
            )));
        }
        if cert.voters.len() < quorum(self.f) {
            return Err(ConsensusError::Malformed(format!(
                "prepared certificate has {} of {} voters",
                cert.voters.len(),
                quorum(self.f)
            )));
        }
        Ok(())
    }

    /// As primary of `view`, start it once 2f+1 validators asked for it.
    fn try_new_view(&mut self, view: u64, cfg: &ConsensusConfig, now: Instant, effects: &mut Vec<Effect>) {
        if self.primary(view) != self.me || self.phase != (Phase::ViewChange { target: view }) {
            return;
        }
        let Some(requests) = self.view_changes.get(&view) else {
            return;
        };
        if requests.len() < quorum(self.f) {
            return;
        }

        let replay = requests
            .values()
            .flatten()
            .max_by_key(|cert| cert.view)
            .map(|cert| cert.proposal.clone());
        let Some(proposal) = replay.or_else(|| self.own.clone()) else {
            debug!(task = %self.task, view, "no proposal to lead the new view with");
            return;
        };
        let voters: BTreeSet<NodeId> = requests.keys().copied().collect();
        let digest = proposal.digest();

        info!(task = %self.task, view, %digest, "starting new view as primary");
        self.view = view;
        self.phase = Phase::Preparing;
        self.deadline = now + cfg.round_timeout;
        self.votes.entry(view).or_default().pre_prepare = Some((digest, proposal.clone()));
        self.broadcast(
            ConsensusMessage::NewView {
                task: self.task.clone(),
                view,
                seq: self.seq,
                digest,
                proposal,
                view_changes: voters,
            },
            effects,
        );
        self.evaluate(cfg, now, effects);
    }

    #[allow(clippy::too_many_arguments)]
    fn on_new_view(
        &mut self,
        from: NodeId,
        view: u64,
        digest: Digest,
        proposal: Proposal,
        view_changes: BTreeSet<NodeId>,
        cfg: &ConsensusConfig,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ConsensusError> {
        if from != self.primary(view) {
            return Err(ConsensusError::Malformed(format!(
                "new-view {view} from non-primary {from}"
            )));
        }
        let supporters = view_changes
            .iter()
            .filter(|n| self.validators.contains(n))
            .count();
        if supporters < quorum(self.f) {
            return Err(ConsensusError::Malformed(format!(
                "new-view {view} backed by {supporters} validators"
            )));
        }
        let joinable = view > self.view
            || (view == self.view && matches!(self.phase, Phase::AwaitingPrePrepare));
        if !joinable {
            return Ok(());
        }
        if proposal.digest() != digest || proposal.task_id != self.task {
            self.flag(from, "new-view digest does not match proposal", effects);
            self.request_view_change(view + 1, cfg, now, effects);
            return Ok(());
        }

        debug!(task = %self.task, view, %from, "entering new view");
        self.view = view;
        self.accept(view, digest, proposal, cfg, now, effects);
        Ok(())
    }

    /// Fire the round's timer if it has expired.
    pub(crate) fn tick(&mut self, cfg: &ConsensusConfig, now: Instant, effects: &mut Vec<Effect>) {
        if self.phase.is_finished() || now < self.deadline {
            return;
        }
        match self.phase {
            Phase::ViewChange { target } => {
                warn!(task = %self.task, target, "view change timed out");
                self.request_view_change(target + 1, cfg, now, effects);
            }
            _ => {
                warn!(task = %self.task, view = self.view, phase = ?self.phase, "round timed out");
                self.request_view_change(self.view + 1, cfg, now, effects);
            }
        }
    }

    /// Stop participating unless a Commit has already been sent.
    pub(crate) fn abort(&mut self) -> bool {
        if self.committed_once || self.phase.is_finished() {
            return false;
        }
        info!(task = %self.task, view = self.view, "round aborted");
        self.phase = Phase::Aborted;
        true
    }
}
