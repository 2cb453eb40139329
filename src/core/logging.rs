//! Diagnostic logging setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is left to the
//! binary (or an embedding host). `PROJSTATE_LOG` takes `EnvFilter` syntax.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PROJSTATE_LOG";

/// Install a stderr fmt subscriber. Safe to call more than once.
pub fn init(verbose: bool) {
    let fallback = if verbose { "projstate=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
