//! Constants used across the eBUS protocol implementation.
//!
//! This module defines the reserved byte values of the eBUS wire protocol,
//! the structural size limits of telegrams, and the defaults for bus
//! arbitration.
//!
//! ## Key Concepts
//!
//! - **SYN**: The synchronisation byte emitted roughly every 4.3 ms while the
//!   bus is idle. It delimits telegrams and doubles as the arbitration
//!   trigger.
//! - **EXT**: The extension (escape) byte. Payload occurrences of `SYN` and
//!   `EXT` are never transmitted verbatim; they are replaced by the two-byte
//!   pairs `A9 01` and `A9 00` respectively.
//! - **ACK / NAK**: Positive and negative acknowledgement bytes exchanged
//!   after each telegram half.
//! - **Lock counter**: After winning arbitration a node must observe
//!   `max_lock` further SYN bytes before it may arbitrate again.
//!
//! These values should be used wherever framing or arbitration logic is
//! implemented to ensure consistent message boundaries.

/// The zero byte, used to initialise CRC accumulators and cleared fields.
pub const SYM_ZERO: u8 = 0x00;

/// Synchronisation byte delimiting telegrams on the wire.
pub const SYM_SYN: u8 = 0xaa;

/// Extension (escape) byte introducing a two-byte escape pair.
pub const SYM_EXT: u8 = 0xa9;

/// Second byte of the escape pair that encodes a payload `0xaa`.
pub const SYM_SYN_EXT: u8 = 0x01;

/// Second byte of the escape pair that encodes a payload `0xa9`.
pub const SYM_EXT_EXT: u8 = 0x00;

/// Positive acknowledgement byte.
pub const SYM_ACK: u8 = 0x00;

/// Negative acknowledgement byte.
pub const SYM_NAK: u8 = 0xff;

/// Broadcast destination address. A valid target, but neither master nor
/// slave.
pub const SYM_BROADCAST: u8 = 0xfe;

/// Maximum number of data bytes (`NN`) per telegram half.
pub const MAX_DATA_BYTES: u8 = 0x10;

/// Fallback master address used when a non-master address is configured.
pub const DEFAULT_ADDRESS: u8 = 0xff;

/// Default number of SYN intervals a node stays locked out of arbitration
/// after winning the bus.
pub const DEFAULT_LOCK_COUNTER: u8 = 3;

/// Upper clamp for the configurable lock counter, one interval per possible
/// master address.
pub const MAX_LOCK_COUNTER: u8 = 25;

/// Capacity of the fixed `no_std` sequence buffers.
///
/// Sized for a complete worst-case exchange in extended form: a repeated
/// master half (5 header bytes plus 16 escaped data bytes plus escaped CRC,
/// twice) followed by a repeated slave half and the acknowledgement bytes.
pub const SEQ_MAX_LEN: usize = 192;
