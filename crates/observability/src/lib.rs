//! Process-wide tracing setup shared by the relay and tools.

/// Initialize tracing with the format chosen by `SUPPLYREG_LOG_FORMAT`
/// (JSON unless set to `pretty`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format = std::env::var("SUPPLYREG_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    self::tracing::init(format);
}

pub mod tracing;

pub use self::tracing::LogFormat;
