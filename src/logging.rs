//! Logging setup for the `symref` binary.
//!
//! Logs go to stderr so stdout carries only JSON results.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` is honoured unless `verbose`
/// forces debug output. Calling it twice is a no-op.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
