//! Logging infrastructure
//!
//! The library logs through `tracing`: flush batch sizes, migrations and id
//! reservations at debug, store lifecycle at info. Embedding applications
//! that already install a subscriber need nothing from here; these helpers
//! cover the standalone case.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::Result;

/// Install a global subscriber writing to stderr, filtered by `RUST_LOG`
/// with the given fallback level.
pub fn init(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| crate::error::Error::Configuration(format!("logging init failed: {e}")))?;
    Ok(())
}

/// Initialize logging for tests (captured per test by the test harness).
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
