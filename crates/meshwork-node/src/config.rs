//! Runtime configuration.

use std::str::FromStr;
use std::time::Duration;

use meshwork_consensus::ConsensusConfig;
use meshwork_mesh::MeshConfig;
use meshwork_protocols::DEFAULT_MAX_FRAME;
use meshwork_tasks::{DelegationStrategy, RouterConfig};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a running mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub mesh: MeshConfig,
    pub consensus: ConsensusConfig,
    pub router: RouterConfig,

    /// Frames queued per node before senders see backpressure.
    pub mailbox_capacity: usize,

    /// Gossip digests held per node; the oldest is dropped when full.
    pub gossip_queue_capacity: usize,

    /// How often each node reports liveness.
    pub heartbeat_interval: Duration,

    /// Resolution of the driver's and the consensus lanes' timers.
    pub tick_interval: Duration,

    /// Pending client commands.
    pub command_capacity: usize,

    /// Largest frame the transport accepts.
    pub max_frame: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mesh = MeshConfig::default();
        Self {
            heartbeat_interval: mesh.discovery_interval / 2,
            mesh,
            consensus: ConsensusConfig::default(),
            router: RouterConfig::default(),
            mailbox_capacity: 1024,
            gossip_queue_capacity: 64,
            tick_interval: Duration::from_millis(50),
            command_capacity: 256,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

impl NodeConfig {
    /// Load configuration from `MESHWORK_*` environment variables, using
    /// defaults for anything unset.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `MESHWORK_DISCOVERY_INTERVAL_MS` | `mesh.discovery_interval` (rescales liveness timeouts) |
    /// | `MESHWORK_MAX_CLUSTER_SIZE` | `mesh.max_cluster_size` |
    /// | `MESHWORK_GOSSIP_FANOUT` | `mesh.gossip_fanout` |
    /// | `MESHWORK_SEED` | `mesh.seed` |
    /// | `MESHWORK_FAULT_TOLERANCE` | `consensus.f` and `router.default_f` |
    /// | `MESHWORK_ROUND_TIMEOUT_MS` | `consensus.round_timeout` |
    /// | `MESHWORK_MAX_RETRIES` | `router.max_retries` |
    /// | `MESHWORK_TASK_DEADLINE_MS` | `router.default_deadline` |
    /// | `MESHWORK_DELEGATION` | `router.delegation` |
    /// | `MESHWORK_MAILBOX_CAPACITY` | `mailbox_capacity` |
    /// | `MESHWORK_GOSSIP_QUEUE_CAPACITY` | `gossip_queue_capacity` |
    /// | `MESHWORK_HEARTBEAT_INTERVAL_MS` | `heartbeat_interval` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "MESHWORK_DISCOVERY_INTERVAL_MS")? {
            let interval = Duration::from_millis(ms);
            config.mesh = config.mesh.with_discovery_interval(interval);
            config.heartbeat_interval = interval / 2;
        }
        if let Some(size) = parse(&lookup, "MESHWORK_MAX_CLUSTER_SIZE")? {
            config.mesh = config.mesh.with_max_cluster_size(size);
        }
        if let Some(fanout) = parse(&lookup, "MESHWORK_GOSSIP_FANOUT")? {
            config.mesh = config.mesh.with_fanout(fanout);
        }
        if let Some(seed) = parse(&lookup, "MESHWORK_SEED")? {
            config.mesh = config.mesh.with_seed(seed);
        }
        if let Some(f) = parse(&lookup, "MESHWORK_FAULT_TOLERANCE")? {
            config.consensus = config.consensus.with_f(f);
            config.router = config.router.with_default_f(f);
        }
        if let Some(ms) = parse(&lookup, "MESHWORK_ROUND_TIMEOUT_MS")? {
            config.consensus = config
                .consensus
                .with_round_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = parse(&lookup, "MESHWORK_MAX_RETRIES")? {
            config.router = config.router.with_max_retries(retries);
        }
        if let Some(ms) = parse(&lookup, "MESHWORK_TASK_DEADLINE_MS")? {
            config.router = config
                .router
                .with_default_deadline(Duration::from_millis(ms));
        }
        if let Some(value) = lookup("MESHWORK_DELEGATION") {
            let strategy = parse_delegation(&value).ok_or_else(|| Error::Config {
                key: "MESHWORK_DELEGATION".to_string(),
                value: value.clone(),
                reason: "expected round-robin, load-balanced, skill-based, priority or hybrid"
                    .to_string(),
            })?;
            config.router = config.router.with_delegation(strategy);
        }
        if let Some(n) = parse(&lookup, "MESHWORK_MAILBOX_CAPACITY")? {
            config.mailbox_capacity = n;
        }
        if let Some(n) = parse(&lookup, "MESHWORK_GOSSIP_QUEUE_CAPACITY")? {
            config.gossip_queue_capacity = n;
        }
        if let Some(ms) = parse(&lookup, "MESHWORK_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: MeshConfig) -> Self {
        self.mesh = mesh;
        self
    }

    #[must_use]
    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    #[must_use]
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_gossip_queue_capacity(mut self, capacity: usize) -> Self {
        self.gossip_queue_capacity = capacity;
        self
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => Err(Error::Config {
            key: key.to_string(),
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_delegation(value: &str) -> Option<DelegationStrategy> {
    let strategy = match value.trim().to_ascii_lowercase().as_str() {
        "round-robin" | "roundrobin" => DelegationStrategy::RoundRobin,
        "load-balanced" | "loadbalanced" => DelegationStrategy::LoadBalanced,
        "skill-based" | "skillbased" => DelegationStrategy::SkillBased,
        "priority" => DelegationStrategy::Priority,
        "hybrid" => DelegationStrategy::Hybrid,
        _ => return None,
    };
    Some(strategy)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.mesh.max_cluster_size, 20);
        assert_eq!(config.consensus.f, 1);
        assert_eq!(config.router.max_retries, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
    }

    #[test]
    fn variables_override_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("MESHWORK_DISCOVERY_INTERVAL_MS", "200"),
            ("MESHWORK_FAULT_TOLERANCE", "2"),
            ("MESHWORK_DELEGATION", "Round-Robin"),
            ("MESHWORK_MAX_RETRIES", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.mesh.discovery_interval, Duration::from_millis(200));
        assert_eq!(config.mesh.heartbeat_timeout, Duration::from_millis(600));
        assert_eq!(config.consensus.f, 2);
        assert_eq!(config.router.default_f, 2);
        assert_eq!(config.router.delegation, DelegationStrategy::RoundRobin);
        assert_eq!(config.router.max_retries, 5);
    }

    #[test]
    fn bad_values_are_errors_not_panics() {
        let err = NodeConfig::from_lookup(lookup(&[("MESHWORK_MAX_CLUSTER_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == "MESHWORK_MAX_CLUSTER_SIZE"));

        let err = NodeConfig::from_lookup(lookup(&[("MESHWORK_DELEGATION", "random")])).unwrap_err();
        assert!(err.to_string().contains("MESHWORK_DELEGATION=random"));
    }
}
