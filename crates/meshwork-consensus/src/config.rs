//! Consensus configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`ConsensusEngine`](crate::ConsensusEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Byzantine faults tolerated when the caller does not say otherwise.
    pub f: usize,

    /// How long a view may run without a PrePrepare or a decision before
    /// validators ask for a view change.
    pub round_timeout: Duration,

    /// Expected validator round-trip; the view-change timeout is
    /// `2 × (f + 1) × expected_rtt`.
    pub expected_rtt: Duration,

    /// View changes attempted before the round fails.
    pub max_view_changes: u32,

    /// Messages buffered per task that has not started locally.
    pub max_buffered: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            f: 1,
            round_timeout: Duration::from_secs(5),
            expected_rtt: Duration::from_millis(250),
            max_view_changes: 4,
            max_buffered: 64,
        }
    }
}

impl ConsensusConfig {
    #[must_use]
    pub fn with_f(mut self, f: usize) -> Self {
        self.f = f;
        self
    }

    #[must_use]
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_expected_rtt(mut self, rtt: Duration) -> Self {
        self.expected_rtt = rtt;
        self
    }

    #[must_use]
    pub fn with_max_view_changes(mut self, max: u32) -> Self {
        self.max_view_changes = max;
        self
    }
}
