//! Console tracing for the runner.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator-facing progress and diagnostics via
//!   `RUST_LOG`, output to stderr. Not persisted.
//!
//! - **Run logging (`io/run_log`)**: product artifacts under the configured
//!   logs directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `info` if unset, since task
/// progress is reported through tracing.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=webtask=debug webtask run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
