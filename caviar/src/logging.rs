//! Development-time tracing for debugging runs.
//!
//! Reads `RUST_LOG` (which the sandbox forwards to its child as part of the
//! essential allow-list, so a single filter covers both halves). Defaults to
//! `warn` when unset. Output goes to stderr in compact format; the binaries
//! call this once at startup.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=caviar=debug caviar run --dev
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
