//! Serial port abstraction — any byte-at-a-time peripheral.
//!
//! Concrete implementations:
//! - Shared multi-drop bus UART (bus A)
//! - Secondary synchronous link (bus B)
//!
//! The command queue is generic over `SerialPort`, so adding a peripheral
//! requires zero changes to the queue logic.  The contract is the classic
//! interrupt-driven pair: software loads one byte into the transmit
//! register, and the peripheral's transmission-complete interrupt hands
//! back the byte clocked in meanwhile (meaningful only while a reply is
//! expected).

/// Byte-oriented serial peripheral, transmit side.
///
/// Loading a byte starts its transmission; completion is signalled
/// through the peripheral's interrupt, which the integration layer routes
/// to [`CommandQueue::on_byte_complete`](super::CommandQueue::on_byte_complete).
pub trait SerialPort {
    /// Load the next byte into the transmit register.
    fn load_tx(&mut self, byte: u8);
}

/// A port that discards all writes.  Useful as a placeholder before the
/// hardware adapter is wired, and in tests that only exercise queue state.
pub struct NullPort;

impl SerialPort for NullPort {
    fn load_tx(&mut self, _byte: u8) {}
}
