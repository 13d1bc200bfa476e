//! Process-wide tracing for the harness.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics on stderr, filtered by `RUST_LOG`
//!   or the CLI `--level`.
//!
//! - **Run log (`io/session`)**: `extensions.log` inside each run directory.
//!   Scoped to one execution and compared against the frozen baseline.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console filter: `RUST_LOG` when set, otherwise `level`.
pub fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the process subscriber.
///
/// Output: stderr, compact format. Calling it twice is harmless; the second
/// call leaves the first subscriber in place.
///
/// # Example
/// ```bash
/// RUST_LOG=ext_runner=debug ext-runner extension builtin.greeting test
/// ```
pub fn init(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(console_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
