//! Error type for the core.
//!
//! The teacher (`bluez-hci`) overloads `std::io::Error` for everything,
//! including non-I/O domain errors (an out-of-range filter bit becomes
//! `ErrorKind::InvalidInput`). This crate keeps `std::io::Error` for actual
//! syscall failures but gives the rest of the domain its own variants.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HciError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start the hci worker: {0}")]
    Startup(String),

    #[error("filter value out of range: {0}")]
    FilterRange(&'static str),

    #[error("btsnoop log path was empty")]
    EmptyLogPath,
}

/// Narrow `Display` wrapper used when logging an opcode alongside an error,
/// matching the `ALOGE("... opcode: 0x%x", opcode)` style throughout the
/// original.
pub struct Opcode(pub u16);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
