//! Console logging setup for hosts and tests

use tracing::Level;
use wamd_core::{Result, WamdError};

/// Install a console subscriber at `level`
///
/// Fails when a global subscriber is already installed.
pub fn init_console_logging(level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|err| WamdError::config_error(format!("logging already initialised: {err}")))
}

/// Best-effort debug logging for tests; repeated calls are no-ops
pub fn try_init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
