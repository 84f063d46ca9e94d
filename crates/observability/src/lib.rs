//! Tracing/logging setup shared by Engage360 binaries and test harnesses.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide logging, picking the format from `ENGAGE360_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("ENGAGE360_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    self::tracing::init(format);
}
