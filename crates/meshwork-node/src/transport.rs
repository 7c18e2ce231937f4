//! In-process transport.
//!
//! Every node owns a bounded mailbox of encoded frames. Envelopes cross
//! the [`ProtocolBridge`] on the way in, so everything a node receives has
//! been through the same encode/decode path a socket transport would use.
//! Partitions silently drop frames between groups, the way a real network
//! loses packets.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use meshwork_protocols::{Envelope, ProtocolBridge};
use meshwork_topology::NodeId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, trace, warn};

use crate::error::{Error, Result};

/// Carries envelopes between nodes.
pub trait Transport: Send + Sync {
    fn send(&self, envelope: &Envelope) -> Result<()>;
}

#[derive(Debug, Default)]
struct Links {
    mailboxes: HashMap<NodeId, mpsc::Sender<Bytes>>,
    groups: Option<HashMap<NodeId, usize>>,
}

impl Links {
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        match &self.groups {
            None => true,
            Some(groups) => groups.get(&from) == groups.get(&to),
        }
    }
}

/// Mailbox-per-node transport with partition support.
#[derive(Debug)]
pub struct MemoryTransport {
    bridge: ProtocolBridge,
    capacity: usize,
    links: RwLock<Links>,
}

impl MemoryTransport {
    pub fn new(bridge: ProtocolBridge, capacity: usize) -> Self {
        Self {
            bridge,
            capacity: capacity.max(1),
            links: RwLock::new(Links::default()),
        }
    }

    pub fn bridge(&self) -> &ProtocolBridge {
        &self.bridge
    }

    /// Open a mailbox for `id`, replacing any previous one.
    pub fn register(&self, id: NodeId) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.write().mailboxes.insert(id, tx);
        rx
    }

    /// Close `id`'s mailbox. Its receiver drains and then ends.
    pub fn unregister(&self, id: NodeId) -> bool {
        self.write().mailboxes.remove(&id).is_some()
    }

    pub fn is_registered(&self, id: NodeId) -> bool {
        self.read().mailboxes.contains_key(&id)
    }

    /// Split delivery into groups. Addresses in no group share one
    /// implicit group.
    pub fn partition<G>(&self, groups: impl IntoIterator<Item = G>)
    where
        G: IntoIterator<Item = NodeId>,
    {
        let mut map = HashMap::new();
        for (index, group) in groups.into_iter().enumerate() {
            for id in group {
                map.insert(id, index);
            }
        }
        info!(addresses = map.len(), "transport partitioned");
        self.write().groups = Some(map);
    }

    pub fn heal(&self) {
        if self.write().groups.take().is_some() {
            info!("transport healed");
        }
    }

    pub fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        self.read().can_reach(from, to)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Links> {
        self.links.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Links> {
        self.links.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.bridge.encode(envelope)?;
        let links = self.read();
        if !links.can_reach(envelope.from, envelope.to) {
            trace!(
                from = %envelope.from,
                to = %envelope.to,
                kind = envelope.payload.kind(),
                "frame lost to partition"
            );
            return Ok(());
        }
        let mailbox = links
            .mailboxes
            .get(&envelope.to)
            .ok_or(Error::Unreachable(envelope.to))?;
        match mailbox.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(to = %envelope.to, kind = envelope.payload.kind(), "mailbox full, frame dropped");
                Err(Error::Transport(format!("mailbox of {} is full", envelope.to)))
            }
            Err(TrySendError::Closed(_)) => Err(Error::Unreachable(envelope.to)),
        }
    }
}
