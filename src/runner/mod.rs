//! Service glue between byte sources and the engine.
//!
//! The engine only ever sees one byte at a time through
//! [`Handler::run`](crate::handler::Handler::run). How those bytes arrive is
//! a platform concern; this module provides the two common shapes:
//!
//! - [`service_tick`]: a polling step for hosted or main-loop platforms,
//!   draining a [`ByteQueue`] and pacing itself with an
//!   `embedded_hal::delay::DelayNs` while the bus is quiet.
//! - the `isr` submodule (feature `isr`): a `critical-section`-protected
//!   global handler handle plus companion macros for platforms that feed
//!   bytes straight from a UART interrupt.

use crate::bus::BusWriter;
use crate::consts::SYM_SYN;
use crate::handler::Handler;
use crate::queue::ByteQueue;
use embedded_hal::delay::DelayNs;

#[cfg(feature = "isr")]
mod isr;
#[cfg_attr(feature = "isr", allow(unused_imports))]
#[cfg(feature = "isr")]
pub use isr::*;

#[cfg(feature = "isr")]
mod macros;

/// Drains every currently queued byte into the handler; sleeps `idle_us`
/// microseconds when the queue was empty.
///
/// After each SYN byte a pending arbitration request is served through
/// [`Handler::serve_bus_request`], which is how the active path gets onto
/// the bus on platforms without a dedicated arbitration ISR. Call this in a
/// loop:
///
/// ```rust
/// use ebus2400::arbitration::Request;
/// use ebus2400::bus::BusWriter;
/// use ebus2400::handler::Handler;
/// use ebus2400::queue::{ByteQueue, RingQueue};
/// use ebus2400::runner::service_tick;
/// # use embedded_hal_mock::eh1::delay::NoopDelay as Delay;
///
/// struct NullBus;
///
/// impl BusWriter for NullBus {
///     fn write_byte(&mut self, _byte: u8) {}
/// }
///
/// fn main() {
///     let mut handler = Handler::new(0x33, NullBus, Request::new());
///     let mut queue: RingQueue<64> = RingQueue::new();
///     let mut delay = Delay::new();
///     queue.enqueue(0xaa).unwrap();
///     loop {
///         let processed = service_tick(&mut handler, &mut queue, &mut delay, 500);
///         # assert_eq!(processed, 1);
///         # break;
///     }
/// }
/// ```
///
/// Returns the number of bytes processed.
pub fn service_tick<B, Q, D>(
    handler: &mut Handler<B>,
    queue: &mut Q,
    delay: &mut D,
    idle_us: u32,
) -> usize
where
    B: BusWriter,
    Q: ByteQueue,
    D: DelayNs,
{
    let mut processed = 0;
    loop {
        match queue.dequeue() {
            Ok(byte) => {
                handler.run(byte);
                if byte == SYM_SYN {
                    let _ = handler.serve_bus_request();
                }
                processed += 1;
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(never)) => match never {},
        }
    }
    if processed == 0 {
        delay.delay_us(idle_us);
    }
    processed
}
