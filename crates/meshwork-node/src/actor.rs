//! One tokio task per mesh node.
//!
//! ```text
//!   mailbox ──decode──► OrderedInbox ──┬─ Gossip ──► GossipQueue ──► driver
//!                                      └─ Execute / Consensus ──► TaskLane(task)
//!   heartbeat interval ──────────────────────────────────────────► driver
//! ```
//!
//! The actor stops when its mailbox closes, which is how a crash or a
//! departure reaches it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use meshwork_consensus::TaskId;
use meshwork_protocols::{Envelope, OrderedInbox, Payload};
use meshwork_routing::GossipDigest;
use meshwork_topology::NodeId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::context::MeshContext;
use crate::gossip::GossipQueue;
use crate::lane::TaskLane;
use crate::transport::Transport;

struct LaneHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    forwarded: u64,
}

pub(crate) struct NodeActor {
    id: NodeId,
    ctx: Arc<MeshContext>,
    mailbox: mpsc::Receiver<Bytes>,
    inbox: OrderedInbox,
    lanes: HashMap<TaskId, LaneHandle>,
    idle_tx: mpsc::UnboundedSender<(TaskId, u64)>,
    idle_rx: mpsc::UnboundedReceiver<(TaskId, u64)>,
    gossip: Arc<GossipQueue>,
}

impl NodeActor {
    /// Open `id`'s mailbox and start its actor. Gossip the node receives
    /// is forwarded to `gossip_sink` as `(receiver, digest)`.
    pub(crate) fn spawn(
        id: NodeId,
        ctx: Arc<MeshContext>,
        gossip_sink: mpsc::Sender<(NodeId, GossipDigest)>,
    ) -> JoinHandle<()> {
        let mailbox = ctx.transport.register(id);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let actor = Self {
            id,
            gossip: Arc::new(GossipQueue::new(ctx.config.gossip_queue_capacity)),
            ctx,
            mailbox,
            inbox: OrderedInbox::default(),
            lanes: HashMap::new(),
            idle_tx,
            idle_rx,
        };
        tokio::spawn(actor.run(gossip_sink))
    }

    async fn run(mut self, gossip_sink: mpsc::Sender<(NodeId, GossipDigest)>) {
        info!(node = %self.id, "node started");
        let forwarder = tokio::spawn(forward_gossip(
            self.id,
            Arc::clone(&self.gossip),
            gossip_sink,
        ));

        let mut heartbeat = interval(self.ctx.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.mailbox.recv() => {
                    let Some(frame) = frame else { break };
                    self.on_frame(&frame);
                }
                Some((task, seen)) = self.idle_rx.recv() => self.on_idle(task, seen),
                _ = heartbeat.tick() => self.heartbeat(),
            }
        }

        forwarder.abort();
        info!(node = %self.id, lanes = self.lanes.len(), "node stopped");
    }

    fn on_frame(&mut self, frame: &[u8]) {
        let envelope = match self.ctx.transport.bridge().decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(node = %self.id, error = %e, "undecodable frame");
                return;
            }
        };
        if envelope.to != self.id {
            warn!(node = %self.id, to = %envelope.to, "misaddressed envelope");
            return;
        }
        for envelope in self.inbox.accept(envelope) {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match &envelope.payload {
            Payload::Gossip(digest) => {
                self.gossip.push(digest.clone());
            }
            Payload::Heartbeat => trace!(node = %self.id, from = %envelope.from, "heartbeat ignored"),
            Payload::Execute { .. } | Payload::Consensus(_) => {
                let Some(task) = envelope.lane.task().cloned() else {
                    return;
                };
                self.forward(task, envelope);
            }
            other => warn!(
                node = %self.id,
                from = %envelope.from,
                kind = other.kind(),
                "payload meant for the router"
            ),
        }
    }

    /// Hand `envelope` to the lane for `task`, starting one if needed.
    fn forward(&mut self, task: TaskId, envelope: Envelope) {
        let envelope = match self.lanes.get_mut(&task) {
            Some(lane) => match lane.tx.send(envelope) {
                Ok(()) => {
                    lane.forwarded += 1;
                    return;
                }
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        debug!(node = %self.id, %task, "opening lane");
        let tx = TaskLane::spawn(
            self.id,
            task.clone(),
            Arc::clone(&self.ctx),
            self.idle_tx.clone(),
        );
        let forwarded = u64::from(tx.send(envelope).is_ok());
        self.lanes.insert(task, LaneHandle { tx, forwarded });
    }

    /// Close a lane that has seen everything forwarded to it.
    fn on_idle(&mut self, task: TaskId, seen: u64) {
        if self
            .lanes
            .get(&task)
            .is_some_and(|lane| lane.forwarded == seen)
        {
            self.lanes.remove(&task);
            self.inbox.forget(&task);
            debug!(node = %self.id, %task, "lane retired");
        }
    }

    fn heartbeat(&self) {
        let envelope = Envelope::new(self.id, self.ctx.driver, Payload::Heartbeat);
        if let Err(e) = self.ctx.transport.send(&envelope) {
            debug!(node = %self.id, error = %e, "heartbeat not sent");
        }
    }
}

async fn forward_gossip(
    node: NodeId,
    queue: Arc<GossipQueue>,
    sink: mpsc::Sender<(NodeId, GossipDigest)>,
) {
    loop {
        let digest = queue.pop().await;
        // While this waits on a slow driver, newer digests displace older
        // ones in the queue.
        if sink.send((node, digest)).await.is_err() {
            break;
        }
    }
}
