//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Where log lines go.
///
/// A native messaging host owns stdout for protocol frames, so it logs to
/// stderr instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the JSON subscriber, configurable via `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with(target: LogTarget) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = match target {
        LogTarget::Stdout => builder.with_writer(std::io::stdout).try_init(),
        LogTarget::Stderr => builder.with_writer(std::io::stderr).try_init(),
    };
}
