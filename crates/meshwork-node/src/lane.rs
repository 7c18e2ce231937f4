//! Per-task lanes.
//!
//! A node runs one lane per task it is working on. Envelopes for the same
//! task are handled one at a time, in order; different tasks proceed
//! concurrently. Each lane owns the consensus state for its task.
//!
//! A lane that has been quiet for a while tells its node how many envelopes
//! it has seen. The node closes the lane only if it has forwarded nothing
//! newer, so no envelope is lost to a lane that is shutting down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use meshwork_consensus::{ConsensusEngine, ConsensusMessage, Effect, Proposal, TaskId};
use meshwork_protocols::{Envelope, Payload, Sequencer};
use meshwork_tasks::{Task, ValidatorReport};
use meshwork_topology::NodeId;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::context::MeshContext;
use crate::transport::Transport;

/// Current time as a std `Instant`, following tokio's clock so paused
/// test time applies.
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub(crate) struct TaskLane {
    node: NodeId,
    task: TaskId,
    ctx: Arc<MeshContext>,
    engine: ConsensusEngine,
    sequencer: Sequencer,
    /// Node the current attempt came from; reports go back there.
    router: NodeId,
    rx: mpsc::UnboundedReceiver<Envelope>,
    received: u64,
    idle: mpsc::UnboundedSender<(TaskId, u64)>,
}

impl TaskLane {
    pub(crate) fn spawn(
        node: NodeId,
        task: TaskId,
        ctx: Arc<MeshContext>,
        idle: mpsc::UnboundedSender<(TaskId, u64)>,
    ) -> mpsc::UnboundedSender<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Self {
            node,
            engine: ConsensusEngine::new(node, ctx.config.consensus.clone()),
            router: ctx.driver,
            task,
            ctx,
            sequencer: Sequencer::new(),
            rx,
            received: 0,
            idle,
        };
        tokio::spawn(lane.run());
        tx
    }

    /// How long a lane with nothing in flight stays up for stragglers.
    fn linger(&self) -> Duration {
        self.ctx.config.consensus.round_timeout * 2
    }

    async fn run(mut self) {
        let mut tick = interval(self.ctx.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_activity = now();
        let mut reported = false;

        loop {
            tokio::select! {
                envelope = self.rx.recv() => {
                    // The node dropped its sender: nothing more is coming.
                    let Some(envelope) = envelope else { break };
                    self.received += 1;
                    self.on_envelope(envelope).await;
                    last_activity = now();
                    reported = false;
                }
                _ = tick.tick() => {
                    let at = now();
                    let effects = self.engine.tick(at);
                    if !effects.is_empty() {
                        last_activity = at;
                        reported = false;
                    }
                    self.apply(effects);
                    if !reported
                        && self.engine.active_rounds() == 0
                        && at.duration_since(last_activity) >= self.linger()
                    {
                        debug!(node = %self.node, task = %self.task, received = self.received, "lane idle");
                        reported = self.idle.send((self.task.clone(), self.received)).is_ok();
                    }
                }
            }
        }
        debug!(node = %self.node, task = %self.task, "lane closed");
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        let from = envelope.from;
        match envelope.payload {
            Payload::Execute {
                task,
                seq,
                validators,
                f,
            } => self.execute(from, task, seq, validators, f).await,
            Payload::Consensus(ConsensusMessage::Abort { task, seq }) if from == self.router => {
                if self.engine.abort(&task) {
                    info!(node = %self.node, %task, seq, "round aborted");
                }
            }
            Payload::Consensus(ConsensusMessage::Abort { task, seq }) => {
                warn!(node = %self.node, %from, %task, seq, "ignoring abort from a node other than the router");
            }
            Payload::Consensus(message) => {
                let kind = message.kind();
                match self.engine.handle(from, message, now()) {
                    Ok(effects) => self.apply(effects),
                    Err(e) => warn!(node = %self.node, %from, kind, error = %e, "dropping consensus message"),
                }
            }
            other => warn!(node = %self.node, %from, kind = other.kind(), "unexpected payload on task lane"),
        }
    }

    async fn execute(
        &mut self,
        router: NodeId,
        task: Task,
        seq: u64,
        validators: Vec<NodeId>,
        f: Option<usize>,
    ) {
        self.router = router;
        let id = task.id.clone();
        self.report(Payload::Started {
            task: id.clone(),
            seq,
        });

        let Some(handler) = self.ctx.handlers.get(&task.capability) else {
            warn!(node = %self.node, task = %id, capability = %task.capability, "no handler registered");
            self.report(Payload::ExecutionFailed {
                task: id,
                seq,
                error: format!("no handler for {}", task.capability),
            });
            return;
        };

        match handler.execute(self.node, &task).await {
            Ok(value) => {
                let proposal = Proposal::new(id.clone(), value);
                debug!(node = %self.node, task = %id, seq, digest = %proposal.digest(), "executed");
                self.report(Payload::Completed {
                    seq,
                    proposal: proposal.clone(),
                });
                if let Some(f) = f {
                    match self.engine.start(id.clone(), validators, f, Some(proposal), seq, now()) {
                        Ok(effects) => self.apply(effects),
                        Err(e) => {
                            warn!(node = %self.node, task = %id, seq, error = %e, "could not join round");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(node = %self.node, task = %id, seq, error = %e, "handler failed");
                self.report(Payload::ExecutionFailed {
                    task: id,
                    seq,
                    error: e.to_string(),
                });
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast { to, message } => {
                    for target in to {
                        self.send(target, Payload::Consensus(message.clone()));
                    }
                }
                Effect::Decided(result) => self.report(Payload::Verdict {
                    task: result.task_id.clone(),
                    seq: result.seq,
                    report: ValidatorReport::Decided(result),
                }),
                Effect::Rejected(result) => self.report(Payload::Verdict {
                    task: result.task_id.clone(),
                    seq: result.seq,
                    report: ValidatorReport::Rejected(result),
                }),
                Effect::Failed { task, seq, error } => self.report(Payload::Verdict {
                    task,
                    seq,
                    report: ValidatorReport::Failed(error),
                }),
                Effect::Flag {
                    task,
                    seq,
                    node,
                    reason,
                } => self.report(Payload::Suspect {
                    suspect: node,
                    task,
                    seq,
                    reason,
                }),
            }
        }
    }

    fn report(&mut self, payload: Payload) {
        self.send(self.router, payload);
    }

    fn send(&mut self, to: NodeId, payload: Payload) {
        let envelope = self.sequencer.seal(self.node, to, payload);
        if let Err(e) = self.ctx.transport.send(&envelope) {
            debug!(
                node = %self.node,
                %to,
                kind = envelope.payload.kind(),
                error = %e,
                "send failed"
            );
        }
    }
}
