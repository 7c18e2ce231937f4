//! Per-lane ordering on top of an unordered, at-least-once transport.
//!
//! The sender numbers envelopes per `(destination, lane)` with a
//! [`Sequencer`]; the receiver's [`OrderedInbox`] holds back anything that
//! arrives early, drops duplicates, and releases each lane in send order.

use std::collections::{BTreeMap, HashMap};

use meshwork_consensus::TaskId;
use meshwork_topology::NodeId;
use tracing::{debug, warn};

use crate::envelope::{Envelope, Lane, Payload};

/// Default number of early envelopes held per lane.
pub const DEFAULT_MAX_PENDING: usize = 256;

/// Numbers outgoing envelopes.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: HashMap<(NodeId, Lane), u64>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `envelope` the next position in its lane.
    pub fn stamp(&mut self, mut envelope: Envelope) -> Envelope {
        if envelope.lane.is_ordered() {
            let next = self
                .next
                .entry((envelope.to, envelope.lane.clone()))
                .or_insert(0);
            envelope.lane_seq = *next;
            *next += 1;
        }
        envelope
    }

    pub fn seal(&mut self, from: NodeId, to: NodeId, payload: Payload) -> Envelope {
        self.stamp(Envelope::new(from, to, payload))
    }

    /// Drop counters for every lane of `task`.
    pub fn forget(&mut self, task: &TaskId) {
        self.next.retain(|(_, lane), _| lane.task() != Some(task));
    }
}

#[derive(Debug, Default)]
struct LaneState {
    next: u64,
    early: BTreeMap<u64, Envelope>,
}

/// Reorders incoming envelopes per `(sender, lane)`.
#[derive(Debug)]
pub struct OrderedInbox {
    max_pending: usize,
    lanes: HashMap<(NodeId, Lane), LaneState>,
}

impl Default for OrderedInbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl OrderedInbox {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            lanes: HashMap::new(),
        }
    }

    /// Accept one envelope and return whatever is now deliverable, in
    /// order.
    ///
    /// When a lane holds more than `max_pending` early envelopes the
    /// missing ones are given up on and delivery resumes at the oldest
    /// held envelope.
    pub fn accept(&mut self, envelope: Envelope) -> Vec<Envelope> {
        if !envelope.lane.is_ordered() {
            return vec![envelope];
        }
        let key = (envelope.from, envelope.lane.clone());
        let state = self.lanes.entry(key).or_default();
        if envelope.lane_seq < state.next {
            debug!(
                from = %envelope.from,
                lane = %envelope.lane,
                lane_seq = envelope.lane_seq,
                "dropping duplicate envelope"
            );
            return Vec::new();
        }
        state.early.insert(envelope.lane_seq, envelope);

        let mut ready = Vec::new();
        loop {
            while let Some(env) = state.early.remove(&state.next) {
                state.next += 1;
                ready.push(env);
            }
            if state.early.len() <= self.max_pending {
                break;
            }
            if let Some((&oldest, env)) = state.early.iter().next() {
                warn!(
                    from = %env.from,
                    lane = %env.lane,
                    missing = oldest - state.next,
                    "lane gap not filled, skipping ahead"
                );
                state.next = oldest;
            }
        }
        ready
    }

    /// Envelopes held back across all lanes.
    pub fn pending(&self) -> usize {
        self.lanes.values().map(|l| l.early.len()).sum()
    }

    /// Drop state for every lane of `task`.
    pub fn forget(&mut self, task: &TaskId) {
        self.lanes.retain(|(_, lane), _| lane.task() != Some(task));
    }
}
