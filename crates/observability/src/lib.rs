//! Process-wide tracing setup shared by the host binary and tests.

/// Initialize tracing with JSON logs on stdout.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(LogTarget::Stdout);
}

/// Initialize tracing, writing to `target`.
pub fn init_with(target: LogTarget) {
    tracing::init_with(target);
}

pub use crate::tracing::LogTarget;

/// Tracing configuration (filters, layers).
pub mod tracing;
