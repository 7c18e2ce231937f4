//! Mesh configuration.

use std::time::Duration;

use meshwork_routing::{AdaptivePolicy, DEFAULT_SUMMARY_LIMIT};
use meshwork_topology::{LinkCost, DEFAULT_GOSSIP_FANOUT, DEFAULT_MAX_CLUSTER_SIZE};
use serde::{Deserialize, Serialize};

/// Configuration for a [`MeshNetwork`](crate::MeshNetwork).
///
/// Timeouts other than `discovery_interval` default to multiples of it;
/// [`MeshConfig::with_discovery_interval`] rescales them together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Time between gossip rounds.
    pub discovery_interval: Duration,

    /// Peers each node pushes its summary to per round.
    pub gossip_fanout: usize,

    /// Maximum entries in one gossip summary.
    pub gossip_summary_limit: usize,

    /// Members per cluster before it splits.
    pub max_cluster_size: usize,

    /// Silence after which a node is Degraded.
    pub degraded_after: Duration,

    /// Silence after which a node is Unreachable.
    pub heartbeat_timeout: Duration,

    /// How long tombstones are kept before eviction.
    /// Unreachable nodes are also declared dead after this long past the
    /// heartbeat timeout.
    pub tombstone_grace: Duration,

    /// Cost of a gateway-to-gateway link.
    pub inter_cluster_cost: LinkCost,

    /// Adaptive routing thresholds.
    pub adaptive: AdaptivePolicy,

    /// Seed for gossip peer selection. Fixed seeds make simulations
    /// reproducible.
    pub seed: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self::default_with_interval(Duration::from_secs(1))
    }
}

impl MeshConfig {
    fn default_with_interval(interval: Duration) -> Self {
        Self {
            discovery_interval: interval,
            gossip_fanout: DEFAULT_GOSSIP_FANOUT,
            gossip_summary_limit: DEFAULT_SUMMARY_LIMIT,
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE,
            degraded_after: interval * 2,
            heartbeat_timeout: interval * 3,
            tombstone_grace: interval * 10,
            inter_cluster_cost: 50,
            adaptive: AdaptivePolicy::default(),
            seed: 0x6d65_7368,
        }
    }

    /// Set the discovery interval and rescale the derived timeouts.
    #[must_use]
    pub fn with_discovery_interval(self, interval: Duration) -> Self {
        Self {
            gossip_fanout: self.gossip_fanout,
            gossip_summary_limit: self.gossip_summary_limit,
            max_cluster_size: self.max_cluster_size,
            inter_cluster_cost: self.inter_cluster_cost,
            adaptive: self.adaptive,
            seed: self.seed,
            ..Self::default_with_interval(interval)
        }
    }

    /// Set the gossip fan-out.
    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.gossip_fanout = fanout;
        self
    }

    /// Set the cluster size bound.
    #[must_use]
    pub fn with_max_cluster_size(mut self, size: usize) -> Self {
        self.max_cluster_size = size.max(2);
        self
    }

    /// Set the tombstone grace period.
    #[must_use]
    pub fn with_tombstone_grace(mut self, grace: Duration) -> Self {
        self.tombstone_grace = grace;
        self
    }

    /// Set the RNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the adaptive routing policy.
    #[must_use]
    pub fn with_adaptive(mut self, policy: AdaptivePolicy) -> Self {
        self.adaptive = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_multiples_of_interval() {
        let c = MeshConfig::default();
        assert_eq!(c.heartbeat_timeout, c.discovery_interval * 3);
        assert_eq!(c.gossip_fanout, 3);
        assert_eq!(c.max_cluster_size, 20);
    }

    #[test]
    fn rescaling_keeps_other_settings() {
        let c = MeshConfig::default()
            .with_fanout(5)
            .with_discovery_interval(Duration::from_millis(100));
        assert_eq!(c.gossip_fanout, 5);
        assert_eq!(c.heartbeat_timeout, Duration::from_millis(300));
        assert_eq!(c.tombstone_grace, Duration::from_secs(1));
    }
}
