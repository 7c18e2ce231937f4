//! Quorum arithmetic for `n = 3f + 1` validators.
//!
//! ```text
//!   f   validators   quorum (2f+1)   prepared (2f)   replies (f+1)
//!   0        1             1               0               1
//!   1        4             3               2               2
//!   2        7             5               4               3
//!   3       10             7               6               4
//! ```
//!
//! Any two quorums of `2f + 1` out of `3f + 1` overlap in at least `f + 1`
//! validators, so at least one honest validator sits in both.

use std::time::Duration;

/// Validators needed to tolerate `f` Byzantine faults.
pub const fn validators_for(f: usize) -> usize {
    3 * f + 1
}

/// Matching Commits needed to decide.
pub const fn quorum(f: usize) -> usize {
    2 * f + 1
}

/// Matching Prepares (besides the PrePrepare) needed to be prepared.
pub const fn prepare_threshold(f: usize) -> usize {
    2 * f
}

/// Matching reports that cannot all come from faulty validators.
pub const fn reply_threshold(f: usize) -> usize {
    f + 1
}

/// Largest `f` a set of `n` validators tolerates.
///
/// # Examples
///
/// ```
/// use meshwork_consensus::max_faulty;
///
/// assert_eq!(max_faulty(1), 0);
/// assert_eq!(max_faulty(4), 1);
/// assert_eq!(max_faulty(6), 1);
/// assert_eq!(max_faulty(7), 2);
/// ```
pub const fn max_faulty(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n - 1) / 3
    }
}

/// Whether `n` validators can ever reach a quorum for `f`.
pub const fn can_reach_quorum(n: usize, f: usize) -> bool {
    n >= quorum(f)
}

/// View-change timeout: `2 × (f + 1) × rtt`, doubled for each view change
/// already attempted.
pub fn view_change_timeout(f: usize, rtt: Duration, attempt: u32) -> Duration {
    let base = rtt.saturating_mul(2 * (f as u32 + 1));
    base.saturating_mul(1u32 << attempt.min(16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_fault_tolerance() {
        assert_eq!(validators_for(1), 4);
        assert_eq!(quorum(1), 3);
        assert_eq!(prepare_threshold(1), 2);
        assert_eq!(reply_threshold(1), 2);
    }

    #[test]
    fn three_validators_reach_quorum_for_f1() {
        assert!(can_reach_quorum(3, 1));
        assert!(!can_reach_quorum(2, 1));
    }

    #[test]
    fn view_change_backoff() {
        let rtt = Duration::from_millis(250);
        assert_eq!(view_change_timeout(1, rtt, 0), Duration::from_secs(1));
        assert_eq!(view_change_timeout(1, rtt, 1), Duration::from_secs(2));
        assert_eq!(view_change_timeout(2, rtt, 0), Duration::from_millis(1500));
    }

    proptest! {
        #[test]
        fn quorums_intersect_in_an_honest_validator(f in 0usize..50) {
            let n = validators_for(f);
            let q = quorum(f);
            // |Q1 ∩ Q2| ≥ 2q - n must exceed the faulty count.
            prop_assert!(2 * q - n > f);
            prop_assert_eq!(max_faulty(n), f);
        }

        #[test]
        fn faulty_alone_never_form_a_quorum(f in 0usize..50) {
            prop_assert!(f < quorum(f));
            prop_assert!(f < reply_threshold(f));
            prop_assert!(validators_for(f) - f >= quorum(f));
        }
    }
}
