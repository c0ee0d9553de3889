//! Process-wide tracing setup shared by gatekeep binaries and tests.

pub mod subscriber;

pub use subscriber::{LogFormat, init_for_tests, init_with};

/// Initialize process-wide logging.
///
/// The format comes from `GATEKEEP_LOG_FORMAT` (`json` by default, or
/// `pretty`), the filter from `RUST_LOG` (default `info`). Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    subscriber::init_with(LogFormat::from_env());
}
