//! Collaborator contract for the transmit path.
//!
//! The engine is transport-agnostic: it only needs a way to place a single
//! byte on the half-duplex wire. The platform supplies that through the
//! [`BusWriter`] trait — a POSIX serial port, a FreeRTOS UART driver or an
//! ESP8266 register write all fit behind the same one-method seam.

/// Writes single bytes to the eBUS wire.
///
/// # Contract
///
/// - `write_byte` must be non-blocking: enqueue into the UART FIFO, trigger
///   DMA, or buffer — but never wait for the wire.
/// - The medium is a single wire, so every transmitted byte loops back
///   through the receive path. The byte handed to `write_byte` must
///   eventually reappear at [`Handler::run`](crate::handler::Handler::run),
///   and it must do so before the next outgoing byte is produced (the
///   handler writes at most one byte per received byte).
/// - The platform's transmit path is also responsible for physically
///   writing the arbitration address byte after a SYN and then reporting
///   [`Handler::bus_request_completed`](crate::handler::Handler::bus_request_completed)
///   exactly once.
pub trait BusWriter {
    /// Places one byte on the wire.
    fn write_byte(&mut self, byte: u8);
}

impl<T: BusWriter + ?Sized> BusWriter for &mut T {
    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte);
    }
}
