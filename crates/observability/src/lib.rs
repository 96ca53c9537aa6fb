//! Process-wide tracing/logging setup shared by every bindery binary.

/// Tracing configuration (filters, formatter).
pub mod tracing;

pub use self::tracing::{DEFAULT_FILTER, LogFormat};

/// Initialize process-wide observability with JSON logs.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize with an explicit output format (human-readable for demos).
pub fn init_with(format: LogFormat) {
    tracing::init(format);
}
