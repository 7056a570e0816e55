//! Byte sequence handling with eBUS byte-stuffing.
//!
//! A [`Sequence`] is an ordered run of bytes together with a mode flag that
//! records whether the bytes are in **reduced** (logical) or **extended**
//! (on-wire) form. The two reserved bytes are never transmitted verbatim
//! inside a telegram; on the wire they are replaced by escape pairs:
//!
//! ```text
//! (reduced) 0xaa <-> 0xa9 0x01 (extended)
//! (reduced) 0xa9 <-> 0xa9 0x00 (extended)
//! ```
//!
//! [`Sequence::extend`] and [`Sequence::reduce`] convert between the two
//! forms and are idempotent; `reduce(extend(s)) == s` for every well-formed
//! sequence. The CRC of a sequence is always computed over the extended
//! form, regardless of the mode the sequence is currently held in.
//!
//! The codec itself never fails: malformed byte stuffing simply produces a
//! sequence that later fails telegram validation (length or CRC).

use crate::consts::{SYM_EXT, SYM_EXT_EXT, SYM_SYN, SYM_SYN_EXT, SYM_ZERO};
use crate::crc::crc_ebus_update;
use core::fmt;
use core::ops::Index;

#[cfg(not(feature = "std"))]
use crate::consts::SEQ_MAX_LEN;

/// Byte buffer type used throughout the crate.
///
/// With the `std` feature this is a growable [`std::vec::Vec`]; without it,
/// a fixed-capacity [`heapless::Vec`] sized by
/// [`SEQ_MAX_LEN`](crate::consts::SEQ_MAX_LEN).
#[cfg(feature = "std")]
pub type Bytes = Vec<u8>;

/// Byte buffer type used throughout the crate.
///
/// With the `std` feature this is a growable [`std::vec::Vec`]; without it,
/// a fixed-capacity [`heapless::Vec`] sized by
/// [`SEQ_MAX_LEN`](crate::consts::SEQ_MAX_LEN).
#[cfg(not(feature = "std"))]
pub type Bytes = heapless::Vec<u8, SEQ_MAX_LEN>;

pub(crate) fn push_raw(buf: &mut Bytes, byte: u8) {
    #[cfg(feature = "std")]
    buf.push(byte);
    // A byte beyond the fixed capacity is dropped; the resulting sequence
    // then fails telegram length validation.
    #[cfg(not(feature = "std"))]
    let _ = buf.push(byte);
}

/// An ordered byte sequence carrying the reduced/extended mode flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    seq: Bytes,
    extended: bool,
}

impl Sequence {
    /// Creates an empty sequence in reduced mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with `bytes` and sets the mode flag.
    ///
    /// Wire bytes captured from the receive path are extended
    /// (`extended = true`); locally assembled payloads are reduced.
    pub fn assign(&mut self, bytes: &[u8], extended: bool) {
        self.clear();
        for byte in bytes {
            self.push_back(*byte, extended);
        }
    }

    /// Appends one byte and sets the mode flag.
    pub fn push_back(&mut self, byte: u8, extended: bool) {
        push_raw(&mut self.seq, byte);
        self.extended = extended;
    }

    /// Returns a copy of `len` bytes starting at `index`, preserving the
    /// mode flag. The slice is clamped to the available bytes.
    pub fn range(&self, index: usize, len: usize) -> Sequence {
        let end = usize::min(index + len, self.seq.len());
        let mut out = Sequence::new();
        if index < end {
            out.assign(&self.seq[index..end], self.extended);
        } else {
            out.extended = self.extended;
        }
        out
    }

    /// Returns a copy of everything from `index` to the end, preserving the
    /// mode flag.
    pub fn tail(&self, index: usize) -> Sequence {
        self.range(index, self.seq.len().saturating_sub(index))
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    /// Returns `true` if the sequence holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Empties the sequence and resets the mode flag to reduced.
    pub fn clear(&mut self) {
        self.seq.clear();
        self.extended = false;
    }

    /// Returns `true` if the sequence is in extended (on-wire) form.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Computes the CRC-8 over the extended form of the sequence.
    ///
    /// The sequence is temporarily extended if necessary; the prior mode is
    /// restored before returning.
    pub fn crc(&mut self) -> u8 {
        let was_extended = self.extended;
        self.extend();

        let mut crc = SYM_ZERO;
        for byte in &self.seq {
            crc = crc_ebus_update(*byte, crc);
        }

        if !was_extended {
            self.reduce();
        }
        crc
    }

    /// Rewrites the sequence into extended form:
    /// `0xaa -> 0xa9 0x01`, `0xa9 -> 0xa9 0x00`.
    ///
    /// Idempotent on an already-extended sequence.
    pub fn extend(&mut self) {
        if self.extended {
            return;
        }

        let mut tmp = Bytes::new();
        for byte in &self.seq {
            match *byte {
                SYM_SYN => {
                    push_raw(&mut tmp, SYM_EXT);
                    push_raw(&mut tmp, SYM_SYN_EXT);
                }
                SYM_EXT => {
                    push_raw(&mut tmp, SYM_EXT);
                    push_raw(&mut tmp, SYM_EXT_EXT);
                }
                other => push_raw(&mut tmp, other),
            }
        }

        self.seq = tmp;
        self.extended = true;
    }

    /// Rewrites the sequence into reduced form, resolving the escape pairs.
    ///
    /// Idempotent on an already-reduced sequence. A stray escape byte
    /// followed by anything other than `0x01` resolves to `0xa9`; this is
    /// the defined behaviour for malformed stuffing, which is then caught by
    /// telegram validation.
    pub fn reduce(&mut self) {
        if !self.extended {
            return;
        }

        let mut tmp = Bytes::new();
        let mut escaped = false;
        for byte in &self.seq {
            if *byte == SYM_SYN || *byte == SYM_EXT {
                escaped = true;
            } else if escaped {
                if *byte == SYM_SYN_EXT {
                    push_raw(&mut tmp, SYM_SYN);
                } else {
                    push_raw(&mut tmp, SYM_EXT);
                }
                escaped = false;
            } else {
                push_raw(&mut tmp, *byte);
            }
        }

        self.seq = tmp;
        self.extended = false;
    }

    /// Returns the raw bytes in the current mode.
    pub fn bytes(&self) -> &[u8] {
        &self.seq
    }

    /// Returns a copy of the raw bytes in the current mode.
    pub fn to_bytes(&self) -> Bytes {
        self.seq.clone()
    }
}

impl Index<usize> for Sequence {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.seq[index]
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.seq {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Deterministic pseudo-random bytes for the roundtrip properties.
    fn xorshift(state: &mut u32) -> u8 {
        let mut x = *state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        *state = x;
        (x >> 16) as u8
    }

    #[test]
    fn test_extend_reduce_roundtrip() {
        let mut state = 0x2400_u32;
        for round in 0..200 {
            let mut bytes = Vec::new();
            for _ in 0..(round % 24) {
                bytes.push(xorshift(&mut state));
            }
            let mut seq = Sequence::new();
            seq.assign(&bytes, false);
            seq.extend();
            seq.reduce();
            assert_eq!(seq.bytes(), &bytes[..]);
        }
    }

    #[test]
    fn test_extend_is_identity_without_reserved_bytes() {
        let mut state = 0x5251_u32;
        for _ in 0..200 {
            let mut bytes = Vec::new();
            for _ in 0..16 {
                let b = xorshift(&mut state);
                if b != SYM_SYN && b != SYM_EXT {
                    bytes.push(b);
                }
            }
            let mut seq = Sequence::new();
            seq.assign(&bytes, false);
            seq.extend();
            assert_eq!(seq.bytes(), &bytes[..]);
        }
    }

    #[test]
    fn test_extend_rewrites_reserved_bytes() {
        let mut seq = Sequence::new();
        seq.assign(&[0x03, 0xb0, 0xfb, 0xaa, 0xa9], false);
        seq.extend();
        assert_eq!(seq.bytes(), &[0x03, 0xb0, 0xfb, 0xa9, 0x01, 0xa9, 0x00][..]);
        assert!(seq.is_extended());
        // Idempotent.
        seq.extend();
        assert_eq!(seq.len(), 7);
        seq.reduce();
        assert_eq!(seq.bytes(), &[0x03, 0xb0, 0xfb, 0xaa, 0xa9][..]);
        // Idempotent.
        seq.reduce();
        assert_eq!(seq.len(), 5);
    }

    #[test]
    fn test_reduce_stray_escape_resolves_to_ext() {
        let mut seq = Sequence::new();
        seq.assign(&[0xa9, 0x47, 0x11], true);
        seq.reduce();
        assert_eq!(seq.bytes(), &[0xa9, 0x11][..]);
    }

    #[test]
    fn test_crc_preserves_mode() {
        let mut reduced = Sequence::new();
        reduced.assign(&[0x03, 0xb0, 0xfb, 0xaa], false);
        assert_eq!(reduced.crc(), 0xd0);
        assert!(!reduced.is_extended());
        assert_eq!(reduced.bytes(), &[0x03, 0xb0, 0xfb, 0xaa][..]);

        let mut extended = Sequence::new();
        extended.assign(&[0x03, 0xb0, 0xfb, 0xa9, 0x01], true);
        assert_eq!(extended.crc(), 0xd0);
        assert!(extended.is_extended());
        assert_eq!(extended.len(), 5);
    }

    #[test]
    fn test_crc_master_frame() {
        let mut seq = Sequence::new();
        seq.assign(&[0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00], false);
        assert_eq!(seq.crc(), 0x43);
    }

    #[test]
    fn test_range_preserves_mode() {
        let mut seq = Sequence::new();
        seq.assign(&[0x10, 0x08, 0xb5, 0x13, 0x03, 0x04], true);
        let part = seq.range(2, 3);
        assert_eq!(part.bytes(), &[0xb5, 0x13, 0x03][..]);
        assert!(part.is_extended());

        let tail = seq.tail(4);
        assert_eq!(tail.bytes(), &[0x03, 0x04][..]);
        assert!(tail.is_extended());
    }

    #[test]
    fn test_range_clamps_to_length() {
        let mut seq = Sequence::new();
        seq.assign(&[0x01, 0x02], false);
        assert_eq!(seq.range(1, 10).bytes(), &[0x02][..]);
        assert!(seq.range(5, 2).is_empty());
        assert!(seq.tail(9).is_empty());
    }

    #[test]
    fn test_display_hex() {
        let mut seq = Sequence::new();
        seq.assign(&[0x00, 0xab, 0x5c], false);
        assert_eq!(format!("{seq}"), "00ab5c");
    }
}
