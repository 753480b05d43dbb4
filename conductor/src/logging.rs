//! Diagnostics for `conductor` runs, filtered by `RUST_LOG`.
//!
//! Tracing goes to stderr so stdout carries only the rendered report. Handy
//! targets: `conductor::manager` for phase changes and cycles,
//! `conductor::dispatch` for worker threads and deadlines.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Unparseable `RUST_LOG` directives are
/// dropped; with none left only warnings and errors are shown.
///
/// ```bash
/// RUST_LOG=conductor::dispatch=debug conductor run --mode quick-test
/// ```
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    // A subscriber installed earlier (e.g. by a test harness) wins.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
