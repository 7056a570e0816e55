//! # ebus2400
//!
//! A portable, no_std Rust engine for the eBUS (energy bus) protocol used
//! by domestic heating appliances and their controllers over a 2400 baud
//! half-duplex serial wire.
//!
//! This crate implements the protocol core only:
//! - the telegram codec with eBUS byte-stuffing and CRC-8
//! - multi-master bus arbitration with priority-class retry
//! - the fifteen-state send/receive machine covering passive, reactive and
//!   active traffic
//!
//! Serial ports, sockets and schedulers are collaborator concerns; the
//! platform feeds received bytes into [`handler::Handler::run`] and supplies
//! a [`bus::BusWriter`] for the transmit direction.
//!
//! ## Crate features
//! | Feature       | Description |
//! |---------------|-------------|
//! | `std`         | Disables `#![no_std]` support, replaces `heapless::Vec` buffers with `std::vec::Vec` and installs a default wall clock for the timing statistics |
//! | `isr` (default) | `critical_section`-protected global handler handle and macros for interrupt-driven platforms |
//! | `defmt-0-3`   | Derives `defmt::Format` on the public enums |
//! | `log`         | Emits `log` records at protocol error and reset points |
//!
//! ## Usage
//!
//! ```rust
//! use ebus2400::arbitration::Request;
//! use ebus2400::bus::BusWriter;
//! use ebus2400::handler::Handler;
//!
//! struct UartBus;
//!
//! impl BusWriter for UartBus {
//!     fn write_byte(&mut self, _byte: u8) {
//!         // hand the byte to the UART transmit register
//!     }
//! }
//!
//! fn main() {
//!     let mut handler = Handler::new(0x33, UartBus, Request::new());
//!     handler.set_telegram_callback(Box::new(|_message, _telegram, _master, _slave| {
//!         // a completed exchange, e.g. decode it with ebus2400::datatypes
//!     }));
//!     // bytes as they arrive from the wire
//!     for byte in [
//!         0xaa, 0x10, 0x00, 0xb5, 0x05, 0x04, 0x27, 0x00, 0x24, 0x00, 0xd9, 0x00, 0xaa,
//!     ] {
//!         handler.run(byte);
//!     }
//!     assert_eq!(handler.counter().messages_passive_master_master, 1);
//! }
//! ```
//!
//! Interrupt-driven platforms keep the handler in a `critical-section`
//! global and feed it from the UART ISR; see [`runner`] and the
//! `init_ebus_handler!` / `feed_ebus_handler!` macros (feature `isr`).
//! Hosted platforms push bytes into a [`queue::ByteQueue`] from the reader
//! thread and drain it with [`runner::service_tick`].
//!
//! ## Integration Notes
//!
//! - [`handler::Handler::run`] must be called serially; the engine is
//!   single-threaded and runs to completion per byte.
//! - Every byte written through the [`bus::BusWriter`] must loop back
//!   through the receive path — the wire echoes all traffic.
//! - The timing statistics need a monotonic microsecond clock; `no_std`
//!   hosts install one with [`handler::Handler::set_clock`].
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded
//! environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "isr")]
pub use critical_section;

#[cfg(all(feature = "isr", not(feature = "std")))]
pub use heapless;

pub mod addr;
pub mod arbitration;
pub mod bus;
pub mod consts;
pub(crate) mod crc;
pub mod datatypes;
pub(crate) mod fmt;
pub mod handler;
pub mod queue;
pub mod runner;
pub mod sequence;
pub mod statistics;
pub mod telegram;
