//! Router configuration.

use std::time::Duration;

use meshwork_routing::RoutingStrategy;
use serde::{Deserialize, Serialize};

use crate::delegation::{DelegationStrategy, HybridWeights};

/// Configuration for a [`TaskRouter`](crate::TaskRouter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Reassignments after the first attempt before a task fails.
    pub max_retries: u32,

    /// Delay before the first retry; doubles per retry.
    pub base_backoff: Duration,

    /// Cap on the retry delay.
    pub max_backoff: Duration,

    /// Per-attempt deadline for tasks that do not set one.
    pub default_deadline: Duration,

    pub delegation: DelegationStrategy,

    /// Blend used by [`DelegationStrategy::Hybrid`].
    pub hybrid: HybridWeights,

    pub routing: RoutingStrategy,

    /// Faults tolerated for consensus tasks that do not set their own.
    pub default_f: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            default_deadline: Duration::from_secs(30),
            delegation: DelegationStrategy::Hybrid,
            hybrid: HybridWeights::default(),
            routing: RoutingStrategy::Adaptive,
            default_f: 1,
        }
    }
}

impl RouterConfig {
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max.max(base);
        self
    }

    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_delegation(mut self, strategy: DelegationStrategy) -> Self {
        self.delegation = strategy;
        self
    }

    #[must_use]
    pub fn with_routing(mut self, strategy: RoutingStrategy) -> Self {
        self.routing = strategy;
        self
    }

    #[must_use]
    pub fn with_default_f(mut self, f: usize) -> Self {
        self.default_f = f;
        self
    }

    /// Delay before retry number `retry` (1-based): `base × 2^(retry-1)`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}
