//! Discovery gossip and partitions.
//!
//! Each round, every live node pushes a bounded summary of its routing
//! table to `gossip_fanout` peers picked at random from the entries it
//! knows. Pushes to peers that are down or on the far side of a partition
//! are lost, exactly as they would be on a real network.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use meshwork_routing::{GossipDigest, MeshView};
use meshwork_topology::NodeId;
use rand::seq::SliceRandom;
use tracing::{debug, info, trace};

use crate::network::MeshNetwork;

impl MeshNetwork {
    /// Run one full gossip round: plan every push and deliver it.
    ///
    /// Returns the number of digests sent.
    pub fn discover(&mut self, now: Instant) -> usize {
        let plan = self.plan_gossip();
        let mut updated = 0;
        for (to, digest) in &plan {
            updated += self.deliver_gossip(*to, digest, now);
        }
        debug!(
            round = self.round,
            digests = plan.len(),
            updated,
            "gossip round complete"
        );
        plan.len()
    }

    /// Pick this round's pushes without delivering them. The runtime sends
    /// these over its transport; [`discover`](Self::discover) delivers them
    /// in place.
    pub fn plan_gossip(&mut self) -> Vec<(NodeId, GossipDigest)> {
        self.round += 1;
        let round = self.round;
        let limit = self.config.gossip_summary_limit;
        let fanout = self.config.gossip_fanout;

        let senders: Vec<NodeId> = self
            .tables
            .keys()
            .copied()
            .filter(|id| self.is_live(*id))
            .collect();

        let mut pushes = Vec::new();
        for sender in senders {
            let Some(table) = self.tables.get(&sender) else {
                continue;
            };
            let peers: Vec<NodeId> = table
                .live_entries()
                .map(|e| e.node)
                .filter(|n| *n != sender)
                .collect();
            if peers.is_empty() {
                continue;
            }
            let digest = table.summary(limit, round);
            for peer in peers.choose_multiple(&mut self.rng, fanout) {
                pushes.push((*peer, digest.clone()));
            }
        }
        pushes
    }

    /// Merge a digest into `to`'s table. Returns the number of entries that
    /// changed; zero if the push could not have arrived.
    pub fn deliver_gossip(&mut self, to: NodeId, digest: &GossipDigest, now: Instant) -> usize {
        if !self.is_live(to) || !self.can_reach(digest.origin, to) {
            trace!(from = %digest.origin, %to, "gossip push lost");
            return 0;
        }
        self.tables
            .get_mut(&to)
            .map_or(0, |table| table.merge_digest(digest, now))
    }

    /// Split the mesh. Nodes in different groups cannot exchange messages;
    /// nodes not listed in any group form one implicit group together.
    pub fn partition<G>(&mut self, groups: impl IntoIterator<Item = G>)
    where
        G: IntoIterator<Item = NodeId>,
    {
        let mut map = HashMap::new();
        let mut sizes = Vec::new();
        for (index, group) in groups.into_iter().enumerate() {
            let members: BTreeSet<NodeId> = group.into_iter().collect();
            sizes.push(members.len());
            for id in members {
                map.insert(id, index);
            }
        }
        info!(groups = sizes.len(), ?sizes, "mesh partitioned");
        self.groups = Some(map);
    }

    /// Remove any partition. Routing tables re-merge through gossip.
    pub fn heal(&mut self) {
        if self.groups.take().is_some() {
            info!("partition healed");
        }
    }

    /// Whether a partition is in effect.
    pub fn is_partitioned(&self) -> bool {
        self.groups.is_some()
    }
}
