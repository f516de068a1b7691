//! Process-wide tracing setup shared by the binaries.

/// Subscriber construction (filters, JSON formatting).
pub mod tracing;

/// Initialize process-wide tracing/logging.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}
