//! Tunables the original expresses as file-scope `const`s
//! (`COMMAND_PENDING_TIMEOUT`, `EPILOG_TIMEOUT_MS`, the initial credit count).
//!
//! There is no user-facing configuration surface in scope (spec Non-goals);
//! this just gives tests a way to shrink the timeouts without touching the
//! production defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HciConfig {
    /// Bluetooth Core, Vol 2 Part E, 4.4 (Command Flow Control): the host
    /// may have at most one command outstanding until told otherwise.
    pub initial_credits: u8,

    /// A command pending this long without any command-complete/status
    /// activity on the *head* of the pending list is considered fatal.
    pub command_pending_timeout: Duration,

    /// Watchdog bound on the vendor epilog handshake during shutdown.
    pub epilog_timeout: Duration,
}

impl Default for HciConfig {
    fn default() -> Self {
        HciConfig {
            initial_credits: 1,
            command_pending_timeout: Duration::from_millis(8_000),
            epilog_timeout: Duration::from_millis(3_000),
        }
    }
}
