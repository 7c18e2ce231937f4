//! The mesh driver.
//!
//! One tokio task owns the [`MeshNetwork`] registry and the [`TaskRouter`].
//! Nodes reach it through the transport at [`DRIVER_ADDRESS`]; clients
//! reach it through a [`MeshHandle`].
//!
//! ```text
//!   MeshHandle ──Command──►┐
//!   node mailboxes ───────►│  MeshDriver  ──Execute / Abort / Gossip──► nodes
//!   gossip sink ──────────►│  (mesh, router)
//!   tick / discovery ─────►┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use meshwork_consensus::{reply_threshold, ConsensusMessage, TaskId};
use meshwork_mesh::{MeshError, MeshNetwork};
use meshwork_protocols::{Envelope, OrderedInbox, Payload, ProtocolBridge, Sequencer};
use meshwork_routing::GossipDigest;
use meshwork_tasks::{RouterEvent, Task, TaskRouter};
use meshwork_topology::{NodeDescriptor, NodeId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::accusations::{Accusations, Tally};
use crate::actor::NodeActor;
use crate::config::NodeConfig;
use crate::context::{MeshContext, DRIVER_ADDRESS};
use crate::error::{Error, Result};
use crate::handle::{Command, MeshHandle, TaskHandle, TaskOutcome};
use crate::handler::HandlerTable;
use crate::lane::now;
use crate::transport::{MemoryTransport, Transport};

pub struct MeshDriver {
    ctx: Arc<MeshContext>,
    mesh: MeshNetwork,
    router: TaskRouter,
    sequencer: Sequencer,
    inbox: OrderedInbox,
    mailbox: mpsc::Receiver<Bytes>,
    commands: mpsc::Receiver<Command>,
    gossip_tx: mpsc::Sender<(NodeId, GossipDigest)>,
    gossip_rx: mpsc::Receiver<(NodeId, GossipDigest)>,
    /// Descriptors of nodes whose actors are running.
    running: HashMap<NodeId, NodeDescriptor>,
    waiters: HashMap<TaskId, oneshot::Sender<TaskOutcome>>,
    accusations: Accusations,
}

impl MeshDriver {
    /// Build a mesh from `nodes`, start an actor per node and the driver
    /// itself. Must be called inside a tokio runtime.
    pub fn spawn(
        config: NodeConfig,
        handlers: HandlerTable,
        nodes: impl IntoIterator<Item = NodeDescriptor>,
    ) -> Result<MeshHandle> {
        let started = now();
        let mut mesh = MeshNetwork::new(config.mesh.clone());
        let mut descriptors = Vec::new();
        for descriptor in nodes {
            if descriptor.id == DRIVER_ADDRESS {
                return Err(MeshError::DuplicateNode(descriptor.id).into());
            }
            mesh.join(descriptor.clone(), started)?;
            descriptors.push(descriptor);
        }
        let origin = descriptors.first().map_or(DRIVER_ADDRESS, |d| d.id);
        let router = TaskRouter::new(origin, config.router.clone());

        let bridge = ProtocolBridge::new().with_max_frame(config.max_frame);
        let transport = Arc::new(MemoryTransport::new(bridge, config.mailbox_capacity));
        let mailbox = transport.register(DRIVER_ADDRESS);
        let (cmd_tx, commands) = mpsc::channel(config.command_capacity);
        let (gossip_tx, gossip_rx) = mpsc::channel(config.gossip_queue_capacity);
        let ctx = Arc::new(MeshContext::new(config, handlers, transport));

        let mut driver = Self {
            ctx,
            mesh,
            router,
            sequencer: Sequencer::new(),
            inbox: OrderedInbox::default(),
            mailbox,
            commands,
            gossip_tx,
            gossip_rx,
            running: HashMap::new(),
            waiters: HashMap::new(),
            accusations: Accusations::default(),
        };
        for descriptor in descriptors {
            driver.start_actor(descriptor);
        }
        info!(
            nodes = driver.running.len(),
            handlers = driver.ctx.handlers.len(),
            "mesh started"
        );
        tokio::spawn(driver.run());
        Ok(MeshHandle::new(cmd_tx))
    }

    fn start_actor(&mut self, descriptor: NodeDescriptor) {
        let id = descriptor.id;
        NodeActor::spawn(id, Arc::clone(&self.ctx), self.gossip_tx.clone());
        self.running.insert(id, descriptor);
    }

    async fn run(mut self) {
        let mut tick = interval(self.ctx.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut discovery = interval(self.ctx.config.mesh.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { respond_to }) => {
                        self.stop();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(frame) = self.mailbox.recv() => self.on_frame(&frame),
                Some((to, digest)) = self.gossip_rx.recv() => {
                    let updated = self.mesh.deliver_gossip(to, &digest, now());
                    trace!(%to, from = %digest.origin, updated, "gossip merged");
                }
                _ = tick.tick() => self.on_tick(),
                _ = discovery.tick() => self.gossip_round(),
            }
        }
        info!("mesh driver stopped");
    }

    fn stop(&mut self) {
        for id in self.running.keys() {
            self.ctx.transport.unregister(*id);
        }
        self.running.clear();
        self.ctx.transport.unregister(DRIVER_ADDRESS);
        info!(open_tasks = self.router.open_count(), "mesh shutting down");
    }

    fn on_command(&mut self, command: Command) {
        let at = now();
        match command {
            Command::Submit { task, respond_to } => {
                let result = self.submit(task, at);
                let _ = respond_to.send(result);
                let events = self.router.assign_ready(&mut self.mesh, at);
                self.dispatch(events);
            }
            Command::Cancel { task, respond_to } => {
                match self.router.cancel(&task, &mut self.mesh) {
                    Ok((outcome, events)) => {
                        let _ = respond_to.send(Ok(outcome));
                        self.dispatch(events);
                    }
                    Err(e) => {
                        let _ = respond_to.send(Err(e.into()));
                    }
                }
            }
            Command::Status { task, respond_to } => {
                let _ = respond_to.send(self.router.status(&task));
            }
            Command::Health { respond_to } => {
                let _ = respond_to.send(self.mesh.health());
            }
            Command::Join {
                descriptor,
                respond_to,
            } => {
                let result = self.join(descriptor, at);
                let _ = respond_to.send(result);
            }
            Command::Leave { node, respond_to } => {
                let result = self.mesh.leave(node, at).map_err(Error::from);
                if result.is_ok() {
                    self.ctx.transport.unregister(node);
                    self.running.remove(&node);
                }
                let _ = respond_to.send(result);
            }
            Command::Crash { node, respond_to } => {
                let was_running = self.running.remove(&node).is_some();
                self.ctx.transport.unregister(node);
                warn!(%node, "node crashed");
                let _ = respond_to.send(was_running);
            }
            Command::Partition {
                mut groups,
                respond_to,
            } => {
                self.mesh.partition(groups.clone());
                // The driver stays with the router's own node.
                let home = self.router.node();
                for group in &mut groups {
                    if group.contains(&home) {
                        group.push(DRIVER_ADDRESS);
                    }
                }
                self.ctx.transport.partition(groups);
                let _ = respond_to.send(());
            }
            Command::Heal { respond_to } => {
                self.mesh.heal();
                self.ctx.transport.heal();
                let _ = respond_to.send(());
            }
            Command::ClearFlag { node, respond_to } => {
                self.accusations.forget_suspect(node);
                let _ = respond_to.send(self.mesh.clear_flag(node).map_err(Error::from));
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn submit(&mut self, mut task: Task, at: std::time::Instant) -> Result<TaskHandle> {
        if task.origin.is_none() {
            let home = self.router.node();
            if !self.mesh.is_member(home) {
                if let Some(origin) = self.mesh.live_nodes().next() {
                    task = task.from_origin(origin);
                }
            }
        }
        let id = self.router.submit(task, at)?;
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), tx);
        Ok(TaskHandle::new(id, rx))
    }

    fn join(&mut self, descriptor: NodeDescriptor, at: std::time::Instant) -> Result<NodeId> {
        if descriptor.id == DRIVER_ADDRESS || self.running.contains_key(&descriptor.id) {
            return Err(MeshError::DuplicateNode(descriptor.id).into());
        }
        let id = self.mesh.join(descriptor.clone(), at)?;
        self.start_actor(descriptor);
        Ok(id)
    }

    fn on_tick(&mut self) {
        let at = now();
        self.mesh.tick(at);
        for event in self.mesh.drain_events() {
            trace!(?event, "mesh event");
        }
        let events = self.router.tick(&mut self.mesh, at);
        self.dispatch(events);
        let expired = self.accusations.expire(at);
        if expired > 0 {
            trace!(expired, open = self.accusations.len(), "accusations expired");
        }
    }

    /// Plan a discovery round and push each digest over the transport, so
    /// partitions and dead mailboxes lose them.
    fn gossip_round(&mut self) {
        let plan = self.mesh.plan_gossip();
        let mut sent = 0usize;
        for (to, digest) in plan {
            let envelope = Envelope::new(digest.origin, to, Payload::Gossip(digest));
            match self.ctx.transport.send(&envelope) {
                Ok(()) => sent += 1,
                Err(e) => trace!(%to, error = %e, "gossip push failed"),
            }
        }
        debug!(round = self.mesh.round(), sent, "discovery round");
    }

    fn on_frame(&mut self, frame: &[u8]) {
        let envelope = match self.ctx.transport.bridge().decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable frame");
                return;
            }
        };
        for envelope in self.inbox.accept(envelope) {
            self.on_envelope(envelope);
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let at = now();
        let from = envelope.from;
        let outcome = match envelope.payload {
            Payload::Heartbeat => {
                self.on_heartbeat(from, at);
                return;
            }
            Payload::Started { task, seq } => self.router.started(&task, seq, from).map(|()| Vec::new()),
            Payload::Completed { seq, proposal } => {
                let task = proposal.task_id.clone();
                self.router
                    .report(&task, seq, from, proposal, &mut self.mesh)
            }
            Payload::ExecutionFailed { task, seq, error } => {
                self.router
                    .assignee_failed(&task, seq, from, error, &mut self.mesh, at)
            }
            Payload::Verdict { task, seq, report } => {
                self.router
                    .validator_report(&task, seq, from, report, &mut self.mesh, at)
            }
            Payload::Suspect {
                suspect,
                task,
                seq,
                reason,
            } => {
                self.on_suspect(from, suspect, &task, seq, &reason);
                return;
            }
            other => {
                warn!(%from, kind = other.kind(), "payload not meant for the driver");
                return;
            }
        };
        match outcome {
            Ok(events) => self.dispatch(events),
            Err(e) => debug!(%from, error = %e, "report ignored"),
        }
    }

    fn on_heartbeat(&mut self, from: NodeId, at: std::time::Instant) {
        match self.mesh.heartbeat(from, at) {
            Ok(()) => {}
            Err(MeshError::UnknownNode(_)) => {
                // Declared dead while it was cut off; readmit it.
                let Some(descriptor) = self.running.get(&from).cloned() else {
                    return;
                };
                match self.mesh.join(descriptor, at) {
                    Ok(_) => info!(node = %from, "node rejoined"),
                    Err(e) => trace!(node = %from, error = %e, "rejoin deferred"),
                }
            }
            Err(e) => debug!(node = %from, error = %e, "heartbeat rejected"),
        }
    }

    /// Flag `suspect` once `f + 1` distinct validators of attempt `seq`
    /// of `task` accuse it.
    fn on_suspect(&mut self, accuser: NodeId, suspect: NodeId, task: &TaskId, seq: u64, reason: &str) {
        let Some(validators) = self.attempt_validators(task, seq) else {
            debug!(%accuser, %suspect, %task, seq, "accusation for an unknown attempt ignored");
            return;
        };
        let f = self
            .router
            .fault_tolerance(task)
            .unwrap_or(self.ctx.config.consensus.f);
        let settled = self.router.status(task).is_some_and(|s| s.is_terminal());
        let ttl = if settled {
            self.ctx.config.consensus.round_timeout
        } else {
            self.ctx.config.router.default_deadline
        };
        let tally = self.accusations.record(
            task,
            seq,
            &validators,
            accuser,
            suspect,
            reply_threshold(f),
            now() + ttl,
        );
        match tally {
            Tally::Refused => {
                debug!(%accuser, %suspect, %task, seq, "accusation outside the attempt's validators ignored");
                return;
            }
            Tally::Pending(accusers) => {
                debug!(%suspect, %accuser, %task, seq, accusers, "accusation recorded");
                return;
            }
            Tally::Reached => {}
        }
        match self.mesh.flag_node(suspect, reason) {
            Ok(()) => warn!(node = %suspect, %task, reason, "node flagged byzantine"),
            Err(e) => debug!(node = %suspect, error = %e, "could not flag node"),
        }
    }

    fn dispatch(&mut self, events: Vec<RouterEvent>) {
        let mut queue: VecDeque<RouterEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            match event {
                RouterEvent::Assigned(assignment) => {
                    let Some(task) = self.router.task(&assignment.task).cloned() else {
                        continue;
                    };
                    let validators = if assignment.requires_consensus() {
                        assignment.assignees.clone()
                    } else {
                        Vec::new()
                    };
                    let mut unreachable = Vec::new();
                    for node in &assignment.assignees {
                        let payload = Payload::Execute {
                            task: task.clone(),
                            seq: assignment.seq,
                            validators: validators.clone(),
                            f: assignment.f,
                        };
                        if let Err(Error::Unreachable(node)) = self.send(*node, payload) {
                            unreachable.push(node);
                        }
                    }
                    for node in unreachable {
                        match self.router.assignee_failed(
                            &assignment.task,
                            assignment.seq,
                            node,
                            "unreachable",
                            &mut self.mesh,
                            now(),
                        ) {
                            Ok(more) => queue.extend(more),
                            Err(e) => debug!(%node, error = %e, "unreachable assignee not recorded"),
                        }
                    }
                }
                RouterEvent::Abort {
                    task,
                    seq,
                    assignees,
                } => {
                    for node in assignees {
                        let abort = ConsensusMessage::Abort {
                            task: task.clone(),
                            seq,
                        };
                        let _ = self.send(node, Payload::Consensus(abort));
                    }
                }
                RouterEvent::Retrying { task, attempt, .. } => {
                    debug!(%task, attempt, "retry scheduled");
                }
                RouterEvent::Committed { task, result } => {
                    self.resolve(&task, TaskOutcome::Committed(result));
                }
                RouterEvent::Failed(report) => {
                    let task = report.task.clone();
                    self.resolve(&task, TaskOutcome::Failed(report));
                }
                RouterEvent::Cancelled(task) => self.resolve(&task, TaskOutcome::Cancelled),
            }
        }
    }

    /// Validators of attempt `seq` of `task`, current or failed.
    fn attempt_validators(&self, task: &TaskId, seq: u64) -> Option<Vec<NodeId>> {
        if self.router.attempt(task) == Some(seq) {
            return Some(self.router.assignees(task).to_vec());
        }
        self.router
            .failures(task)
            .iter()
            .find(|a| a.attempt == seq)
            .map(|a| a.assignees.clone())
    }

    fn resolve(&mut self, task: &TaskId, outcome: TaskOutcome) {
        self.sequencer.forget(task);
        // Late accusations from the deciding round still get a short window.
        self.accusations
            .wind_down(task, now() + self.ctx.config.consensus.round_timeout);
        if let Some(waiter) = self.waiters.remove(task) {
            let _ = waiter.send(outcome);
        }
    }

    fn send(&mut self, to: NodeId, payload: Payload) -> Result<()> {
        let envelope = self.sequencer.seal(DRIVER_ADDRESS, to, payload);
        self.ctx.transport.send(&envelope).map_err(|e| {
            debug!(%to, kind = envelope.payload.kind(), error = %e, "send failed");
            e
        })
    }
}
