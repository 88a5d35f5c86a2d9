//! `tracing` init helper shared by the daemon binary and its tests.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize the global `tracing` subscriber from a filter string (e.g.
/// `"info"`, `"duskrelay_router=debug,warn"`). Safe to call more than once;
/// subsequent calls are no-ops.
pub fn init(filter: &str) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
