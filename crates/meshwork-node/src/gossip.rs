//! Bounded, drop-oldest gossip queue.
//!
//! Gossip is advisory: a newer digest supersedes an older one, so under
//! load the oldest is discarded rather than making the sender wait.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use meshwork_routing::GossipDigest;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
pub struct GossipQueue {
    capacity: usize,
    queue: Mutex<VecDeque<GossipDigest>>,
    ready: Notify,
    dropped: AtomicU64,
}

impl GossipQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking. Returns `false` if the oldest digest was
    /// dropped to make room.
    pub fn push(&self, digest: GossipDigest) -> bool {
        let evicted = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(digest);
            evicted
        };
        self.ready.notify_one();
        match evicted {
            Some(old) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(origin = %old.origin, round = old.round, "gossip queue full, dropped oldest");
                false
            }
            None => true,
        }
    }

    pub fn try_pop(&self) -> Option<GossipDigest> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Wait for the next digest.
    pub async fn pop(&self) -> GossipDigest {
        loop {
            if let Some(digest) = self.try_pop() {
                return digest;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Digests discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
