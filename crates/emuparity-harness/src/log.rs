//! Tracing bootstrap shared by the harness binaries.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: `RUST_LOG`-driven filter (default `info`),
/// events on stderr so stdout stays machine-parseable. Safe to call twice.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
