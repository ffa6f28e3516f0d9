//! Tracing setup for binaries and tests
//!
//! `RUST_LOG` wins over the configured level when set.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered at `level`. Returns false if a global
/// subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
