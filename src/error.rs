//! Unified error types for the LumiBus firmware.
//!
//! Follows embedded best practice: a single `Error` enum that every subsystem
//! can convert into, keeping the top-level control loop's error handling
//! uniform.  All variants are `Copy` so they can be cheaply passed around and
//! counted without allocation.
//!
//! Interrupt-context code never returns these synchronously — there is no
//! channel for it.  ISR paths either drop under a documented policy (and
//! bump a [`diagnostics`](crate::diagnostics) counter) or post an error
//! event for main-loop handling.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A fixed-capacity pool or ring rejected a request.
    Resource(ResourceError),
    /// A slave's reported status persistently diverges from its
    /// commanded state (beyond the configured patience window).
    Convergence { slave: u8 },
    /// Configuration or wiring is invalid.  These are init-time mistakes
    /// (duplicate timer registration, out-of-range slave index), not
    /// runtime excursions.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::Convergence { slave } => write!(f, "slave {slave} failed to converge"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource exhaustion
// ---------------------------------------------------------------------------

/// Capacity failures on statically sized structures.
///
/// The original generation of this firmware dropped these silently; they
/// are now surfaced to the caller *and* counted, because a timer that
/// never fires or a command that never leaves is otherwise invisible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// The software timer pool has no free slot.
    TimerPoolFull,
    /// The transport's command ring has no free row.
    CommandRingFull,
    /// `tx_len + rx_len` exceeds the row payload capacity.
    PayloadTooLong,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimerPoolFull => write!(f, "timer pool full"),
            Self::CommandRingFull => write!(f, "command ring full"),
            Self::PayloadTooLong => write!(f, "payload exceeds row capacity"),
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
