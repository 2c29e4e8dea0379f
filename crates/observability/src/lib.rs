//! Process-wide tracing/logging setup for hosts embedding the engine.
//!
//! The engine crates only emit `tracing` events; how they are rendered is the
//! host's choice. This is the default wiring: JSON lines, `RUST_LOG`
//! filtering, info level when unset.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
