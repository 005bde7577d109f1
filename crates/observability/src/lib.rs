//! Tracing and logging setup shared by the campus binaries and tests.

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide structured logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Route log output through the test harness's captured writer.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
