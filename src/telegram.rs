//! Telegram parsing, building and evaluation.
//!
//! A telegram is one complete protocol exchange consisting of a master half
//! and, depending on the target address, a slave half:
//!
//! ```text
//! Master-slave:  QQ ZZ PB SB NN DBx CRC            ACK  SYN
//!                                        ACK NN DBx CRC
//! Master-master: QQ ZZ PB SB NN DBx CRC      SYN
//!                                        ACK
//! Broadcast:     QQ ZZ PB SB NN DBx CRC  SYN
//! ```
//!
//! `QQ` is the source (always a master address), `ZZ` the target, `PB`/`SB`
//! the primary/secondary command, `NN` the data byte count and `DBx` the
//! payload. Each half carries an 8-bit CRC computed over its extended form.
//!
//! [`Telegram`] validates halves structurally ([`Telegram::build_master`],
//! [`Telegram::build_slave`]) and parses complete on-wire exchanges
//! including a single NAK-and-repeat per half ([`Telegram::parse`]). The
//! outcome of each half is reported as a [`SequenceState`].

use crate::addr::{is_master, is_target};
use crate::consts::{MAX_DATA_BYTES, SYM_ACK, SYM_BROADCAST, SYM_NAK, SYM_ZERO};
use crate::sequence::Sequence;

/// Structural evaluation result for one telegram half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum SequenceState {
    /// No bytes evaluated yet.
    #[default]
    Empty,
    /// The half is structurally valid.
    Ok,
    /// Fewer bytes than the layout requires.
    TooShort,
    /// More bytes than the layout allows.
    TooLong,
    /// `QQ` is not a master address.
    BadSourceAddr,
    /// `ZZ` is not a valid target address.
    BadTargetAddr,
    /// `NN` exceeds the data byte limit.
    BadDataByte,
    /// The CRC byte does not match the computed CRC.
    BadCrc,
    /// The acknowledgement byte is neither ACK nor NAK.
    BadAck,
    /// The acknowledgement byte is missing.
    MissingAck,
    /// The half was negatively acknowledged twice.
    NegativeAck,
}

impl SequenceState {
    /// Human-readable description of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceState::Empty => "sequence is empty",
            SequenceState::Ok => "sequence is ok",
            SequenceState::TooShort => "sequence is too short",
            SequenceState::TooLong => "sequence is too long",
            SequenceState::BadSourceAddr => "source address is invalid",
            SequenceState::BadTargetAddr => "target address is invalid",
            SequenceState::BadDataByte => "data byte is invalid",
            SequenceState::BadCrc => "CRC byte is invalid",
            SequenceState::BadAck => "acknowledge byte is invalid",
            SequenceState::MissingAck => "acknowledge byte is missing",
            SequenceState::NegativeAck => "acknowledge byte is negative",
        }
    }
}

/// Exchange pattern derived from the target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum TelegramType {
    /// Target `0xfe`; no acknowledgement, no slave half.
    Broadcast,
    /// Target is a master; one acknowledgement, no slave half.
    MasterMaster,
    /// Target is a slave; acknowledged in both directions with a slave half
    /// in between.
    MasterSlave,
}

impl TelegramType {
    /// Human-readable name of the exchange pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            TelegramType::Broadcast => "broadcast",
            TelegramType::MasterMaster => "master master",
            TelegramType::MasterSlave => "master slave",
        }
    }
}

/// Classifies a target address byte into the exchange pattern it selects.
pub fn type_of(byte: u8) -> TelegramType {
    if byte == SYM_BROADCAST {
        TelegramType::Broadcast
    } else if is_master(byte) {
        TelegramType::MasterMaster
    } else {
        TelegramType::MasterSlave
    }
}

/// Parsed view over the master and slave halves of one exchange.
#[derive(Debug, Clone, Default)]
pub struct Telegram {
    telegram_type: Option<TelegramType>,

    master: Sequence,
    master_nn: usize,
    master_crc: u8,
    master_ack: u8,
    master_state: SequenceState,

    slave: Sequence,
    slave_nn: usize,
    slave_crc: u8,
    slave_ack: u8,
    slave_state: SequenceState,
}

impl Telegram {
    /// Creates an empty telegram with both halves in [`SequenceState::Empty`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a complete on-wire exchange: master half, acknowledgement(s),
    /// slave half and acknowledgement(s) as the telegram type demands.
    ///
    /// One NAK-and-repeat is tolerated per half; a second NAK is terminal
    /// and reported as [`SequenceState::NegativeAck`].
    pub fn parse(&mut self, seq: &Sequence) {
        self.clear();
        let mut seq = seq.clone();
        seq.reduce();
        let mut offset: usize = 0;

        self.master_state = Self::check_master_sequence(&seq);
        if self.master_state != SequenceState::Ok {
            return;
        }

        let master = seq.range(0, 5 + seq[4] as usize + 1);
        self.build_master_seq(&master);
        if self.master_state != SequenceState::Ok {
            return;
        }

        if self.telegram_type != Some(TelegramType::Broadcast) {
            // acknowledge byte is missing
            if seq.len() <= 5 + self.master_nn + 1 {
                self.master_state = SequenceState::MissingAck;
                return;
            }

            self.master_ack = seq[5 + self.master_nn + 1];

            // acknowledge byte is invalid
            if self.master_ack != SYM_ACK && self.master_ack != SYM_NAK {
                self.master_state = SequenceState::BadAck;
                return;
            }

            // handle first NAK from the receiver
            if self.master_ack == SYM_NAK {
                // sequence is too short for a repeat
                if seq.len() < master.len() + 1 {
                    self.master_state = SequenceState::TooShort;
                    return;
                }

                offset = master.len() + 1;
                self.master.clear();

                let tmp = seq.tail(offset);
                self.master_state = Self::check_master_sequence(&tmp);
                if self.master_state != SequenceState::Ok {
                    return;
                }

                let master2 = tmp.range(0, 5 + tmp[4] as usize + 1);
                self.build_master_seq(&master2);
                if self.master_state != SequenceState::Ok {
                    return;
                }

                // acknowledge byte is missing
                if tmp.len() <= 5 + self.master_nn + 1 {
                    self.master_state = SequenceState::MissingAck;
                    return;
                }

                self.master_ack = tmp[5 + self.master_nn + 1];

                // acknowledge byte is invalid
                if self.master_ack != SYM_ACK && self.master_ack != SYM_NAK {
                    self.master_state = SequenceState::BadAck;
                    return;
                }

                // second NAK is terminal
                if self.master_ack == SYM_NAK {
                    self.master_state = SequenceState::NegativeAck;
                    return;
                }
            }
        }

        if self.telegram_type == Some(TelegramType::MasterSlave) {
            offset += 5 + self.master_nn + 2;

            let seq2 = seq.tail(offset);
            self.slave_state = Self::check_slave_sequence(&seq2);
            if self.slave_state != SequenceState::Ok {
                return;
            }

            let slave = seq2.range(0, 1 + seq2[0] as usize + 1);
            self.build_slave_seq(&slave);
            if self.slave_state != SequenceState::Ok {
                return;
            }

            // acknowledge byte is missing
            if seq2.len() <= 1 + self.slave_nn + 1 {
                self.slave_state = SequenceState::MissingAck;
                return;
            }

            self.slave_ack = seq2[1 + self.slave_nn + 1];

            // acknowledge byte is invalid
            if self.slave_ack != SYM_ACK && self.slave_ack != SYM_NAK {
                self.slave_state = SequenceState::BadAck;
                return;
            }

            // handle first NAK from the master
            if self.slave_ack == SYM_NAK {
                // sequence is too short for a repeat
                if seq2.len() < slave.len() + 2 {
                    self.slave_state = SequenceState::TooShort;
                    return;
                }

                let offset2 = slave.len() + 1;
                self.slave.clear();

                let tmp = seq2.tail(offset2);
                self.slave_state = Self::check_slave_sequence(&tmp);
                if self.slave_state != SequenceState::Ok {
                    return;
                }

                let slave2 = seq2.range(offset2, 1 + seq2[offset2] as usize + 1);
                self.build_slave_seq(&slave2);

                // acknowledge byte is missing
                if tmp.len() <= 1 + self.slave_nn + 1 {
                    self.slave_state = SequenceState::MissingAck;
                    return;
                }

                self.slave_ack = tmp[1 + self.slave_nn + 1];

                // acknowledge byte is invalid
                if self.slave_ack != SYM_ACK && self.slave_ack != SYM_NAK {
                    self.slave_state = SequenceState::BadAck;
                    return;
                }

                // second NAK is terminal
                if self.slave_ack == SYM_NAK {
                    self.slave_state = SequenceState::NegativeAck;
                }
            }
        }
    }

    /// Builds the master half from a source address and the logical bytes
    /// `ZZ PB SB NN DBx` (CRC optional), then validates it.
    pub fn build_master(&mut self, source: u8, bytes: &[u8]) {
        let mut seq = Sequence::new();
        seq.push_back(source, false);
        for byte in bytes {
            seq.push_back(*byte, false);
        }
        self.build_master_seq(&seq);
    }

    /// Validates a master half given as a sequence and stores it.
    ///
    /// Validation order: minimum length, source address, target address,
    /// data byte count, exact length, CRC (when present). The outcome lands
    /// in [`Telegram::master_state`].
    pub fn build_master_seq(&mut self, seq: &Sequence) {
        self.master_state = SequenceState::Ok;
        let mut seq = seq.clone();
        seq.reduce();

        // sequence is too short
        if seq.len() < 5 {
            self.master_state = SequenceState::TooShort;
            return;
        }

        // source address is invalid
        if !is_master(seq[0]) {
            self.master_state = SequenceState::BadSourceAddr;
            return;
        }

        // target address is invalid
        if !is_target(seq[1]) {
            self.master_state = SequenceState::BadTargetAddr;
            return;
        }

        // data byte count is invalid
        if seq[4] > MAX_DATA_BYTES {
            self.master_state = SequenceState::BadDataByte;
            return;
        }

        let nn = seq[4] as usize;

        // sequence is too short (excl. CRC)
        if seq.len() < 5 + nn {
            self.master_state = SequenceState::TooShort;
            return;
        }

        // sequence is too long (incl. CRC)
        if seq.len() > 5 + nn + 1 {
            self.master_state = SequenceState::TooLong;
            return;
        }

        self.telegram_type = Some(type_of(seq[1]));
        self.master_nn = nn;

        if seq.len() == 5 + nn {
            self.master = seq;
            self.master_crc = self.master.crc();
        } else {
            self.master = seq.range(0, 5 + nn);
            self.master_crc = seq[5 + nn];

            // CRC byte is invalid
            if self.master.crc() != self.master_crc {
                self.master_state = SequenceState::BadCrc;
            }
        }
    }

    /// Builds the slave half from the logical bytes `NN DBx` (CRC optional),
    /// then validates it.
    pub fn build_slave(&mut self, bytes: &[u8]) {
        let mut seq = Sequence::new();
        for byte in bytes {
            seq.push_back(*byte, false);
        }
        self.build_slave_seq(&seq);
    }

    /// Validates a slave half given as a sequence and stores it.
    pub fn build_slave_seq(&mut self, seq: &Sequence) {
        self.slave_state = SequenceState::Ok;
        let mut seq = seq.clone();
        seq.reduce();

        // sequence is too short
        if seq.len() < 2 {
            self.slave_state = SequenceState::TooShort;
            return;
        }

        // data byte count is invalid
        if seq[0] > MAX_DATA_BYTES {
            self.slave_state = SequenceState::BadDataByte;
            return;
        }

        let nn = seq[0] as usize;

        // sequence is too short (excl. CRC)
        if seq.len() < 1 + nn {
            self.slave_state = SequenceState::TooShort;
            return;
        }

        // sequence is too long (incl. CRC)
        if seq.len() > 1 + nn + 1 {
            self.slave_state = SequenceState::TooLong;
            return;
        }

        self.slave_nn = nn;

        if seq.len() == 1 + nn {
            self.slave = seq;
            self.slave_crc = self.slave.crc();
        } else {
            self.slave = seq.range(0, 1 + nn);
            self.slave_crc = seq[1 + nn];

            // CRC byte is invalid
            if self.slave.crc() != self.slave_crc {
                self.slave_state = SequenceState::BadCrc;
            }
        }
    }

    /// Resets both halves to their empty state.
    pub fn clear(&mut self) {
        self.telegram_type = None;

        self.master.clear();
        self.master_nn = 0;
        self.master_crc = SYM_ZERO;
        self.master_ack = SYM_ZERO;
        self.master_state = SequenceState::Empty;

        self.slave.clear();
        self.slave_nn = 0;
        self.slave_crc = SYM_ZERO;
        self.slave_ack = SYM_ZERO;
        self.slave_state = SequenceState::Empty;
    }

    /// The stored master half `QQ ZZ PB SB NN DBx` without the CRC byte.
    pub fn master(&self) -> &Sequence {
        &self.master
    }

    /// Source address `QQ`.
    ///
    /// # Panics
    /// Panics if no master half has been stored.
    pub fn source_address(&self) -> u8 {
        self.master[0]
    }

    /// Target address `ZZ`.
    ///
    /// # Panics
    /// Panics if no master half has been stored.
    pub fn target_address(&self) -> u8 {
        self.master[1]
    }

    /// Primary command byte `PB`.
    ///
    /// # Panics
    /// Panics if no master half has been stored.
    pub fn primary_command(&self) -> u8 {
        self.master[2]
    }

    /// Secondary command byte `SB`.
    ///
    /// # Panics
    /// Panics if no master half has been stored.
    pub fn secondary_command(&self) -> u8 {
        self.master[3]
    }

    /// Data byte count `NN` of the master half.
    pub fn master_number_bytes(&self) -> u8 {
        self.master_nn as u8
    }

    /// Payload bytes of the master half, empty when none are stored.
    pub fn master_data_bytes(&self) -> &[u8] {
        self.master.bytes().get(5..).unwrap_or(&[])
    }

    /// CRC of the master half.
    pub fn master_crc(&self) -> u8 {
        self.master_crc
    }

    /// Structural state of the master half.
    pub fn master_state(&self) -> SequenceState {
        self.master_state
    }

    /// Records the acknowledgement byte received for the master half.
    pub fn set_master_ack(&mut self, byte: u8) {
        self.master_ack = byte;
    }

    /// Acknowledgement byte recorded for the master half.
    pub fn master_ack(&self) -> u8 {
        self.master_ack
    }

    /// The stored slave half `NN DBx` without the CRC byte.
    pub fn slave(&self) -> &Sequence {
        &self.slave
    }

    /// Data byte count `NN` of the slave half.
    pub fn slave_number_bytes(&self) -> u8 {
        self.slave_nn as u8
    }

    /// Payload bytes of the slave half, empty when none are stored.
    pub fn slave_data_bytes(&self) -> &[u8] {
        self.slave.bytes().get(1..).unwrap_or(&[])
    }

    /// CRC of the slave half.
    pub fn slave_crc(&self) -> u8 {
        self.slave_crc
    }

    /// Structural state of the slave half.
    pub fn slave_state(&self) -> SequenceState {
        self.slave_state
    }

    /// Records the acknowledgement byte received for the slave half.
    pub fn set_slave_ack(&mut self, byte: u8) {
        self.slave_ack = byte;
    }

    /// Acknowledgement byte recorded for the slave half.
    pub fn slave_ack(&self) -> u8 {
        self.slave_ack
    }

    /// Exchange pattern, known once the target address has been validated.
    pub fn telegram_type(&self) -> Option<TelegramType> {
        self.telegram_type
    }

    /// `true` when the master half is ok and, for master-slave exchanges,
    /// the slave half is ok as well.
    pub fn is_valid(&self) -> bool {
        if self.telegram_type != Some(TelegramType::MasterSlave) {
            return self.master_state == SequenceState::Ok;
        }

        self.master_state == SequenceState::Ok && self.slave_state == SequenceState::Ok
    }

    /// Pre-check whether `seq` starts with a complete master half including
    /// the CRC byte.
    pub fn check_master_sequence(seq: &Sequence) -> SequenceState {
        // sequence is too short
        if seq.len() < 5 {
            return SequenceState::TooShort;
        }

        // source address is invalid
        if !is_master(seq[0]) {
            return SequenceState::BadSourceAddr;
        }

        // target address is invalid
        if !is_target(seq[1]) {
            return SequenceState::BadTargetAddr;
        }

        // data byte count is invalid
        if seq[4] > MAX_DATA_BYTES {
            return SequenceState::BadDataByte;
        }

        // sequence is too short (incl. CRC)
        if seq.len() < 5 + seq[4] as usize + 1 {
            return SequenceState::TooShort;
        }

        SequenceState::Ok
    }

    /// Pre-check whether `seq` starts with a complete slave half including
    /// the CRC byte.
    pub fn check_slave_sequence(seq: &Sequence) -> SequenceState {
        // sequence is too short
        if seq.is_empty() {
            return SequenceState::TooShort;
        }

        // data byte count is invalid
        if seq[0] > MAX_DATA_BYTES {
            return SequenceState::BadDataByte;
        }

        // sequence is too short (incl. CRC)
        if seq.len() < 1 + seq[0] as usize + 1 {
            return SequenceState::TooShort;
        }

        SequenceState::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_from(hex: &[u8], extended: bool) -> Sequence {
        let mut seq = Sequence::new();
        seq.assign(hex, extended);
        seq
    }

    #[test]
    fn test_build_master_computes_crc() {
        let mut telegram = Telegram::new();
        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00]);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.master_crc(), 0x43);
        assert_eq!(telegram.telegram_type(), Some(TelegramType::MasterSlave));
        assert_eq!(telegram.source_address(), 0xff);
        assert_eq!(telegram.target_address(), 0x52);
        assert_eq!(telegram.primary_command(), 0xb5);
        assert_eq!(telegram.secondary_command(), 0x09);
        assert_eq!(telegram.master_number_bytes(), 3);
        assert_eq!(telegram.master_data_bytes(), &[0x0d, 0x06, 0x00][..]);
    }

    #[test]
    fn test_build_master_accepts_trailing_crc() {
        let mut telegram = Telegram::new();
        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43]);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.master_crc(), 0x43);
    }

    #[test]
    fn test_build_master_rejects_wrong_crc() {
        let mut telegram = Telegram::new();
        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x44]);
        assert_eq!(telegram.master_state(), SequenceState::BadCrc);
        assert!(!telegram.is_valid());
    }

    #[test]
    fn test_build_master_validation_order() {
        let mut telegram = Telegram::new();

        telegram.build_master(0x52, &[0x52, 0xb5, 0x09, 0x00]);
        assert_eq!(telegram.master_state(), SequenceState::BadSourceAddr);

        telegram.build_master(0xff, &[0xaa, 0xb5, 0x09, 0x00]);
        assert_eq!(telegram.master_state(), SequenceState::BadTargetAddr);

        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x11]);
        assert_eq!(telegram.master_state(), SequenceState::BadDataByte);

        telegram.build_master(0xff, &[0x52, 0xb5, 0x09]);
        assert_eq!(telegram.master_state(), SequenceState::TooShort);

        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x02, 0x01]);
        assert_eq!(telegram.master_state(), SequenceState::TooShort);

        telegram.build_master(0xff, &[0x52, 0xb5, 0x09, 0x01, 0x01, 0x02, 0x03]);
        assert_eq!(telegram.master_state(), SequenceState::TooLong);
    }

    #[test]
    fn test_build_master_accepts_zero_data_bytes() {
        // The 07 04 identification scan carries NN = 0.
        let mut telegram = Telegram::new();
        telegram.build_master(0x00, &[0x2e, 0x07, 0x04, 0x00, 0x4e]);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.master_number_bytes(), 0);
        assert!(telegram.master_data_bytes().is_empty());
    }

    #[test]
    fn test_build_slave_with_stuffed_payload() {
        let mut telegram = Telegram::new();
        telegram.build_slave(&[0x03, 0xb0, 0xfb, 0xaa]);
        assert_eq!(telegram.slave_state(), SequenceState::Ok);
        assert_eq!(telegram.slave_crc(), 0xd0);
        assert_eq!(telegram.slave_number_bytes(), 3);
        assert_eq!(telegram.slave_data_bytes(), &[0xb0, 0xfb, 0xaa][..]);
    }

    #[test]
    fn test_build_slave_rejects_empty_response() {
        let mut telegram = Telegram::new();
        telegram.build_slave(&[]);
        assert_eq!(telegram.slave_state(), SequenceState::TooShort);
    }

    #[test]
    fn test_parse_master_slave_exchange() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0x00, 0x03, 0xb0, 0xfb,
                0xa9, 0x01, 0xd0, 0x00,
            ],
            true,
        );
        telegram.parse(&seq);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.slave_state(), SequenceState::Ok);
        assert_eq!(telegram.telegram_type(), Some(TelegramType::MasterSlave));
        assert!(telegram.is_valid());
        assert_eq!(telegram.master_ack(), SYM_ACK);
        assert_eq!(telegram.slave_ack(), SYM_ACK);
        assert_eq!(telegram.slave_data_bytes(), &[0xb0, 0xfb, 0xaa][..]);
    }

    #[test]
    fn test_parse_master_master_exchange() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[0x10, 0x00, 0xb5, 0x05, 0x04, 0x27, 0x00, 0x24, 0x00, 0xd9, 0x00],
            true,
        );
        telegram.parse(&seq);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.telegram_type(), Some(TelegramType::MasterMaster));
        assert!(telegram.is_valid());
    }

    #[test]
    fn test_parse_broadcast_needs_no_ack() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0x10, 0xfe, 0x07, 0x00, 0x09, 0x70, 0x16, 0x04, 0x43, 0x18, 0x31, 0x05, 0x05,
                0x25, 0x92,
            ],
            true,
        );
        telegram.parse(&seq);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        assert_eq!(telegram.telegram_type(), Some(TelegramType::Broadcast));
        assert!(telegram.is_valid());
    }

    #[test]
    fn test_parse_master_nak_then_repeat() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0xff, 0xff, 0x52, 0xb5,
                0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0x00, 0x03, 0xb0, 0xfb, 0xa9, 0x01, 0xd0,
                0x00,
            ],
            true,
        );
        telegram.parse(&seq);
        assert!(telegram.is_valid());
        assert_eq!(telegram.master_ack(), SYM_ACK);
    }

    #[test]
    fn test_parse_master_double_nak_is_terminal() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0xff, 0xff, 0x52, 0xb5,
                0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0xff,
            ],
            true,
        );
        telegram.parse(&seq);
        assert_eq!(telegram.master_state(), SequenceState::NegativeAck);
        assert!(!telegram.is_valid());
    }

    #[test]
    fn test_parse_slave_nak_then_repeat() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0x00, 0x03, 0xb0, 0xfb,
                0xa9, 0x01, 0xd0, 0xff, 0x03, 0xb0, 0xfb, 0xa9, 0x01, 0xd0, 0x00,
            ],
            true,
        );
        telegram.parse(&seq);
        assert!(telegram.is_valid());
        assert_eq!(telegram.slave_ack(), SYM_ACK);
    }

    #[test]
    fn test_parse_slave_double_nak_is_terminal() {
        let mut telegram = Telegram::new();
        let seq = seq_from(
            &[
                0xff, 0x52, 0xb5, 0x09, 0x03, 0x0d, 0x06, 0x00, 0x43, 0x00, 0x03, 0xb0, 0xfb,
                0xa9, 0x01, 0xd0, 0xff, 0x03, 0xb0, 0xfb, 0xa9, 0x01, 0xd0, 0xff,
            ],
            true,
        );
        telegram.parse(&seq);
        assert_eq!(telegram.slave_state(), SequenceState::NegativeAck);
        assert!(!telegram.is_valid());
    }

    #[test]
    fn test_parse_missing_ack() {
        let mut telegram = Telegram::new();
        let seq = seq_from(&[0x10, 0x00, 0xb5, 0x05, 0x04, 0x27, 0x00, 0x24, 0x00, 0xd9], true);
        telegram.parse(&seq);
        assert_eq!(telegram.master_state(), SequenceState::MissingAck);
    }

    #[test]
    fn test_build_roundtrip_through_wire_form() {
        // Build, render to on-wire bytes, parse back.
        let mut telegram = Telegram::new();
        telegram.build_master(0x10, &[0xfe, 0xb5, 0x05, 0x02, 0xaa, 0xa9]);
        assert_eq!(telegram.master_state(), SequenceState::Ok);
        let crc = telegram.master_crc();

        let mut wire = telegram.master().clone();
        wire.push_back(crc, false);
        wire.extend();

        let mut reparsed = Telegram::new();
        reparsed.parse(&wire);
        assert_eq!(reparsed.master_state(), SequenceState::Ok);
        assert_eq!(reparsed.master_crc(), crc);
        assert_eq!(reparsed.master().bytes(), telegram.master().bytes());
        assert_eq!(reparsed.master_data_bytes(), &[0xaa, 0xa9][..]);
    }

    #[test]
    fn test_type_of() {
        assert_eq!(type_of(0xfe), TelegramType::Broadcast);
        assert_eq!(type_of(0x10), TelegramType::MasterMaster);
        assert_eq!(type_of(0x52), TelegramType::MasterSlave);
    }

    #[test]
    fn test_state_texts() {
        assert_eq!(SequenceState::Ok.as_str(), "sequence is ok");
        assert_eq!(SequenceState::BadCrc.as_str(), "CRC byte is invalid");
        assert_eq!(TelegramType::MasterSlave.as_str(), "master slave");
    }
}
