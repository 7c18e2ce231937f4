//! # Meshwork Logging
//!
//! One place to install the `tracing` subscriber, so every binary and test
//! reads `RUST_LOG` the same way.
//!
//! ```no_run
//! meshwork_logging::init();
//! tracing::info!("mesh starting");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "meshwork=info,mesh_node=info";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber: `RUST_LOG` or [`DEFAULT_FILTER`], human
/// readable output on stderr.
///
/// Returns `false` if a subscriber was already installed.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(filter(DEFAULT_FILTER))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Subscriber for tests: output goes through the test harness capture and
/// defaults to warnings only. Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(filter("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        init_for_tests();
        init_for_tests();
        assert!(!init());
    }
}
