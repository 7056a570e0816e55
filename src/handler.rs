//! The eBUS send/receive state machine.
//!
//! [`Handler`] is the heart of the engine: a fifteen-state machine driven by
//! [`Handler::run`] with every byte received from the wire. It covers three
//! flows at once:
//!
//! - **passive** — observing exchanges between other participants and
//!   surfacing completed telegrams,
//! - **reactive** — acknowledging and answering telegrams addressed to the
//!   own master or slave address,
//! - **active** — arbitrating for the bus and transmitting a queued message.
//!
//! Outgoing bytes go through the [`BusWriter`] one at a time; since the
//! medium is a single wire, every written byte loops back through the
//! receive path and drives the machine onward. A large number of counters
//! and timing statistics about the bus are collected along the way.
//!
//! ## Example
//!
//! ```rust
//! use ebus2400::arbitration::Request;
//! use ebus2400::bus::BusWriter;
//! use ebus2400::handler::Handler;
//!
//! struct NullBus;
//!
//! impl BusWriter for NullBus {
//!     fn write_byte(&mut self, _byte: u8) {}
//! }
//!
//! fn main() {
//!     let mut handler = Handler::new(0x33, NullBus, Request::new());
//!     assert_eq!(handler.source(), 0x33);
//!     assert_eq!(handler.target(), 0x38);
//!     for byte in [0xaa, 0xaa, 0xaa] {
//!         handler.run(byte); // normally fed from the UART
//!     }
//! }
//! ```

use crate::addr::{is_master, slave_of};
use crate::arbitration::{Request, RequestResult};
use crate::bus::BusWriter;
use crate::consts::{DEFAULT_ADDRESS, SYM_ACK, SYM_EXT, SYM_NAK, SYM_SYN};
use crate::fmt::{debug, trace};
use crate::sequence::{Bytes, Sequence};
use crate::statistics::{TimingStats, TimingValues};
use crate::telegram::{SequenceState, Telegram, TelegramType};
use core::fmt;

/// Number of handler states, sizing the per-state timing table.
pub const HANDLER_STATE_COUNT: usize = 15;

/// States of the send/receive machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum HandlerState {
    /// Accumulating a master half from the wire.
    #[default]
    PassiveReceiveMaster,
    /// Waiting for the receiver's acknowledgement of a foreign master half.
    PassiveReceiveMasterAcknowledge,
    /// Accumulating a foreign slave half.
    PassiveReceiveSlave,
    /// Waiting for the master's acknowledgement of a foreign slave half.
    PassiveReceiveSlaveAcknowledge,
    /// Own ACK for a telegram addressed to us is echoing back.
    ReactiveSendMasterPositiveAcknowledge,
    /// Own NAK for a defective telegram addressed to us is echoing back.
    ReactiveSendMasterNegativeAcknowledge,
    /// Transmitting the prepared slave response byte by byte.
    ReactiveSendSlave,
    /// Waiting for the requesting master to acknowledge our response.
    ReactiveReceiveSlaveAcknowledge,
    /// Arbitration in flight; interpreting its per-byte results.
    RequestBus,
    /// Transmitting the own master half byte by byte.
    ActiveSendMaster,
    /// Waiting for the target's acknowledgement of our master half.
    ActiveReceiveMasterAcknowledge,
    /// Accumulating the slave response to our master half.
    ActiveReceiveSlave,
    /// Own ACK for a valid slave response is echoing back.
    ActiveSendSlavePositiveAcknowledge,
    /// Own NAK for a defective slave response is echoing back.
    ActiveSendSlaveNegativeAcknowledge,
    /// Own closing SYN is echoing back; the bus returns to idle.
    ReleaseBus,
}

impl HandlerState {
    /// All states in dispatch order.
    pub const ALL: [HandlerState; HANDLER_STATE_COUNT] = [
        HandlerState::PassiveReceiveMaster,
        HandlerState::PassiveReceiveMasterAcknowledge,
        HandlerState::PassiveReceiveSlave,
        HandlerState::PassiveReceiveSlaveAcknowledge,
        HandlerState::ReactiveSendMasterPositiveAcknowledge,
        HandlerState::ReactiveSendMasterNegativeAcknowledge,
        HandlerState::ReactiveSendSlave,
        HandlerState::ReactiveReceiveSlaveAcknowledge,
        HandlerState::RequestBus,
        HandlerState::ActiveSendMaster,
        HandlerState::ActiveReceiveMasterAcknowledge,
        HandlerState::ActiveReceiveSlave,
        HandlerState::ActiveSendSlavePositiveAcknowledge,
        HandlerState::ActiveSendSlaveNegativeAcknowledge,
        HandlerState::ReleaseBus,
    ];

    /// Human-readable name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerState::PassiveReceiveMaster => "passiveReceiveMaster",
            HandlerState::PassiveReceiveMasterAcknowledge => "passiveReceiveMasterAcknowledge",
            HandlerState::PassiveReceiveSlave => "passiveReceiveSlave",
            HandlerState::PassiveReceiveSlaveAcknowledge => "passiveReceiveSlaveAcknowledge",
            HandlerState::ReactiveSendMasterPositiveAcknowledge => {
                "reactiveSendMasterPositiveAcknowledge"
            }
            HandlerState::ReactiveSendMasterNegativeAcknowledge => {
                "reactiveSendMasterNegativeAcknowledge"
            }
            HandlerState::ReactiveSendSlave => "reactiveSendSlave",
            HandlerState::ReactiveReceiveSlaveAcknowledge => "reactiveReceiveSlaveAcknowledge",
            HandlerState::RequestBus => "requestBus",
            HandlerState::ActiveSendMaster => "activeSendMaster",
            HandlerState::ActiveReceiveMasterAcknowledge => "activeReceiveMasterAcknowledge",
            HandlerState::ActiveReceiveSlave => "activeReceiveSlave",
            HandlerState::ActiveSendSlavePositiveAcknowledge => {
                "activeSendSlavePositiveAcknowledge"
            }
            HandlerState::ActiveSendSlaveNegativeAcknowledge => {
                "activeSendSlaveNegativeAcknowledge"
            }
            HandlerState::ReleaseBus => "releaseBus",
        }
    }
}

/// Which of the three flows produced a telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum MessageType {
    /// Initiated by this node.
    Active,
    /// Observed between other participants.
    Passive,
    /// Answered by this node.
    Reactive,
}

impl MessageType {
    /// Human-readable name of the flow.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Active => "active",
            MessageType::Passive => "passive",
            MessageType::Reactive => "reactive",
        }
    }
}

/// Tags handed to the error callback, matching the counter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum ErrorTag {
    /// Malformed foreign master half.
    PassiveMaster,
    /// Foreign master half acknowledged wrongly twice.
    PassiveMasterAck,
    /// Malformed foreign slave half.
    PassiveSlave,
    /// Foreign slave half acknowledged wrongly twice.
    PassiveSlaveAck,
    /// Malformed master half addressed to this node.
    ReactiveMaster,
    /// Repeated master half addressed to this node was defective again.
    ReactiveMasterAck,
    /// The host supplied no valid slave response.
    ReactiveSlave,
    /// Our slave response was rejected twice.
    ReactiveSlaveAck,
    /// The queued active message failed validation.
    ActiveMaster,
    /// Our master half was rejected twice.
    ActiveMasterAck,
    /// The slave response to our master half was malformed.
    ActiveSlave,
    /// The slave response was malformed twice.
    ActiveSlaveAck,
    /// Leftover passive bytes at a SYN boundary.
    PassiveBuffers,
    /// Leftover active bytes at a SYN boundary.
    ActiveBuffers,
}

impl ErrorTag {
    /// The tag string exposed to hosts, matching the counter name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorTag::PassiveMaster => "errorPassiveMaster",
            ErrorTag::PassiveMasterAck => "errorPassiveMasterACK",
            ErrorTag::PassiveSlave => "errorPassiveSlave",
            ErrorTag::PassiveSlaveAck => "errorPassiveSlaveACK",
            ErrorTag::ReactiveMaster => "errorReactiveMaster",
            ErrorTag::ReactiveMasterAck => "errorReactiveMasterACK",
            ErrorTag::ReactiveSlave => "errorReactiveSlave",
            ErrorTag::ReactiveSlaveAck => "errorReactiveSlaveACK",
            ErrorTag::ActiveMaster => "errorActiveMaster",
            ErrorTag::ActiveMasterAck => "errorActiveMasterACK",
            ErrorTag::ActiveSlave => "errorActiveSlave",
            ErrorTag::ActiveSlaveAck => "errorActiveSlaveACK",
            ErrorTag::PassiveBuffers => "checkPassiveBuffers",
            ErrorTag::ActiveBuffers => "checkActiveBuffers",
        }
    }
}

/// Callback answering a master-slave telegram addressed to the own slave
/// address. Receives the master half `QQ ZZ PB SB NN DBx` and returns the
/// reply `NN DBx` (CRC optional), or `None` when no answer is available.
#[cfg(feature = "std")]
pub type ReactiveMasterSlaveCallback = Box<dyn FnMut(&[u8]) -> Option<Bytes> + Send>;

/// Callback answering a master-slave telegram addressed to the own slave
/// address. Receives the master half `QQ ZZ PB SB NN DBx` and returns the
/// reply `NN DBx` (CRC optional), or `None` when no answer is available.
#[cfg(not(feature = "std"))]
pub type ReactiveMasterSlaveCallback = fn(&[u8]) -> Option<Bytes>;

/// Callback invoked for every successfully completed exchange with the
/// message flow, the telegram type and both halves (without CRC bytes).
#[cfg(feature = "std")]
pub type TelegramCallback = Box<dyn FnMut(MessageType, TelegramType, &[u8], &[u8]) + Send>;

/// Callback invoked for every successfully completed exchange with the
/// message flow, the telegram type and both halves (without CRC bytes).
#[cfg(not(feature = "std"))]
pub type TelegramCallback = fn(MessageType, TelegramType, &[u8], &[u8]);

/// Callback invoked for recoverable protocol errors with the tag and the
/// buffers collected so far, for diagnosis.
#[cfg(feature = "std")]
pub type ErrorCallback = Box<dyn FnMut(ErrorTag, &[u8], &[u8]) + Send>;

/// Callback invoked for recoverable protocol errors with the tag and the
/// buffers collected so far, for diagnosis.
#[cfg(not(feature = "std"))]
pub type ErrorCallback = fn(ErrorTag, &[u8], &[u8]);

/// Monotonic microsecond source for the timing statistics.
pub type Clock = fn() -> u64;

#[cfg(feature = "std")]
fn wall_micros() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Event counters of the handler. The `*_total` and per-flow group fields
/// are derived from their parts when a snapshot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerCounter {
    /// All completed telegrams.
    pub messages_total: u32,
    /// Observed master-slave exchanges.
    pub messages_passive_master_slave: u32,
    /// Observed master-master exchanges.
    pub messages_passive_master_master: u32,
    /// Observed broadcasts.
    pub messages_passive_broadcast: u32,
    /// Answered master-slave exchanges.
    pub messages_reactive_master_slave: u32,
    /// Acknowledged master-master exchanges addressed to us.
    pub messages_reactive_master_master: u32,
    /// Own master-slave exchanges.
    pub messages_active_master_slave: u32,
    /// Own master-master exchanges.
    pub messages_active_master_master: u32,
    /// Own broadcasts.
    pub messages_active_broadcast: u32,

    /// All errors.
    pub error_total: u32,
    /// All passive-flow errors.
    pub error_passive: u32,
    /// Malformed foreign master halves.
    pub error_passive_master: u32,
    /// Foreign master halves acknowledged wrongly twice.
    pub error_passive_master_ack: u32,
    /// Malformed foreign slave halves.
    pub error_passive_slave: u32,
    /// Foreign slave halves acknowledged wrongly twice.
    pub error_passive_slave_ack: u32,
    /// All reactive-flow errors.
    pub error_reactive: u32,
    /// Malformed master halves addressed to us.
    pub error_reactive_master: u32,
    /// Repeated master halves addressed to us that stayed defective.
    pub error_reactive_master_ack: u32,
    /// Host responses that failed slave validation.
    pub error_reactive_slave: u32,
    /// Own slave responses rejected twice.
    pub error_reactive_slave_ack: u32,
    /// All active-flow errors.
    pub error_active: u32,
    /// Queued active messages that failed validation.
    pub error_active_master: u32,
    /// Own master halves rejected twice.
    pub error_active_master_ack: u32,
    /// Malformed slave responses to our master half.
    pub error_active_slave: u32,
    /// Slave responses malformed twice.
    pub error_active_slave_ack: u32,

    /// All reset events.
    pub reset_total: u32,
    /// Leftover passive bytes discarded at a SYN boundary.
    pub reset_passive: u32,
    /// A solitary `0x00` discarded at a SYN boundary.
    pub reset_passive00: u32,
    /// `07 04` identification scans aborted before the acknowledgement.
    pub reset_passive0704: u32,
    /// Leftover active bytes discarded at a SYN boundary.
    pub reset_active: u32,
}

/// Snapshot of the handler timing metrics, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandlerTiming {
    /// Interval between consecutive SYN bytes on the idle bus.
    pub sync: TimingValues,
    /// Duration of a single `write_byte` call.
    pub write: TimingValues,
    /// Interval between the SYN and the first passive byte.
    pub passive_first: TimingValues,
    /// Interval between consecutive passive bytes.
    pub passive_data: TimingValues,
    /// Interval between the SYN and the first active byte.
    pub active_first: TimingValues,
    /// Interval between consecutive active bytes.
    pub active_data: TimingValues,
    /// Duration of the reactive master-slave callback.
    pub callback_reactive: TimingValues,
    /// Duration of the telegram callback.
    pub callback_telegram: TimingValues,
    /// Duration of the error callback.
    pub callback_error: TimingValues,
}

/// Timing snapshot of one handler state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateTiming {
    /// The state the metric belongs to.
    pub state: HandlerState,
    /// Wall time bytes spent in this state's handler.
    pub values: TimingValues,
}

/// The eBUS send/receive state machine.
///
/// `B` is the platform transmit path; see [`BusWriter`] for its contract.
/// The handler owns the arbitration [`Request`] and feeds it before
/// dispatching each byte, so the collaborator only ever calls
/// [`Handler::run`].
pub struct Handler<B>
where
    B: BusWriter,
{
    bus: B,
    request: Request,

    source_address: u8,
    target_address: u8,

    reactive_master_slave_callback: Option<ReactiveMasterSlaveCallback>,
    telegram_callback: Option<TelegramCallback>,
    error_callback: Option<ErrorCallback>,

    state: HandlerState,

    // passive
    passive_telegram: Telegram,

    passive_master: Sequence,
    passive_master_dbx: usize,
    passive_master_repeated: bool,

    passive_slave: Sequence,
    passive_slave_dbx: usize,
    passive_slave_index: usize,
    passive_slave_repeated: bool,

    // active
    active_message: bool,
    active_telegram: Telegram,

    active_master: Sequence,
    active_master_index: usize,
    active_master_repeated: bool,

    active_slave: Sequence,
    active_slave_dbx: usize,
    active_slave_repeated: bool,

    // measurement
    counter: HandlerCounter,

    clock: Option<Clock>,
    last_micros: u64,
    measure_sync: bool,

    sync: TimingStats,
    write: TimingStats,
    passive_first: TimingStats,
    passive_data: TimingStats,
    active_first: TimingStats,
    active_data: TimingStats,
    callback_reactive: TimingStats,
    callback_telegram: TimingStats,
    callback_error: TimingStats,

    handler_timing: [TimingStats; HANDLER_STATE_COUNT],
}

impl<B> Handler<B>
where
    B: BusWriter,
{
    /// Creates a handler for the given own master address.
    ///
    /// A non-master `address` falls back to
    /// [`DEFAULT_ADDRESS`](crate::consts::DEFAULT_ADDRESS). The handler owns
    /// the `bus` transmit path and the arbitration `request`; access them
    /// through [`Handler::request`] and [`Handler::request_mut`] where the
    /// platform glue needs to.
    pub fn new(address: u8, bus: B, request: Request) -> Self {
        #[cfg(feature = "std")]
        let clock: Option<Clock> = Some(wall_micros);
        #[cfg(not(feature = "std"))]
        let clock: Option<Clock> = None;

        let mut handler = Self {
            bus,
            request,
            source_address: DEFAULT_ADDRESS,
            target_address: slave_of(DEFAULT_ADDRESS),
            reactive_master_slave_callback: None,
            telegram_callback: None,
            error_callback: None,
            state: HandlerState::PassiveReceiveMaster,
            passive_telegram: Telegram::new(),
            passive_master: Sequence::new(),
            passive_master_dbx: 0,
            passive_master_repeated: false,
            passive_slave: Sequence::new(),
            passive_slave_dbx: 0,
            passive_slave_index: 0,
            passive_slave_repeated: false,
            active_message: false,
            active_telegram: Telegram::new(),
            active_master: Sequence::new(),
            active_master_index: 0,
            active_master_repeated: false,
            active_slave: Sequence::new(),
            active_slave_dbx: 0,
            active_slave_repeated: false,
            counter: HandlerCounter::default(),
            clock,
            last_micros: clock.map(|clock| clock()).unwrap_or(0),
            measure_sync: false,
            sync: TimingStats::new(),
            write: TimingStats::new(),
            passive_first: TimingStats::new(),
            passive_data: TimingStats::new(),
            active_first: TimingStats::new(),
            active_data: TimingStats::new(),
            callback_reactive: TimingStats::new(),
            callback_telegram: TimingStats::new(),
            callback_error: TimingStats::new(),
            handler_timing: [TimingStats::new(); HANDLER_STATE_COUNT],
        };
        handler.set_source(address);
        handler
    }

    /// Sets the own master address; non-master values fall back to
    /// [`DEFAULT_ADDRESS`](crate::consts::DEFAULT_ADDRESS). The own slave
    /// address is recomputed alongside.
    pub fn set_source(&mut self, address: u8) {
        self.source_address = if is_master(address) {
            address
        } else {
            DEFAULT_ADDRESS
        };
        self.target_address = slave_of(self.source_address);
    }

    /// The own master address.
    pub fn source(&self) -> u8 {
        self.source_address
    }

    /// The own slave address, always `slave_of(source)`.
    pub fn target(&self) -> u8 {
        self.target_address
    }

    /// Installs the reactive master-slave callback.
    pub fn set_reactive_master_slave_callback(&mut self, callback: ReactiveMasterSlaveCallback) {
        self.reactive_master_slave_callback = Some(callback);
    }

    /// Installs the telegram callback.
    pub fn set_telegram_callback(&mut self, callback: TelegramCallback) {
        self.telegram_callback = Some(callback);
    }

    /// Installs the error callback.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    /// Installs a monotonic microsecond clock for the timing statistics.
    ///
    /// Under the `std` feature a process-origin clock is installed by
    /// default; `no_std` hosts pass their platform timer here. Without a
    /// clock all timing snapshots stay at zero.
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = Some(clock);
        self.last_micros = clock();
    }

    /// Current state of the machine.
    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Borrows the owned arbitration machine.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutably borrows the owned arbitration machine, e.g. to configure the
    /// lock counter or to place an external request.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Queues one active message `ZZ PB SB NN DBx` for transmission; the
    /// own source address is prepended.
    ///
    /// Returns `false` when the message is empty, another message is
    /// already pending, or validation fails.
    pub fn send_active_message(&mut self, message: &[u8]) -> bool {
        if message.is_empty() || self.active_message {
            return false;
        }

        self.active_telegram.build_master(self.source_address, message);
        if self.active_telegram.master_state() == SequenceState::Ok {
            self.active_message = true;
        } else {
            self.counter.error_active_master += 1;
            self.call_on_error(ErrorTag::ActiveMaster, true);
        }

        self.active_message
    }

    /// `true` while an active message waits for or is in transmission.
    pub fn active_message_pending(&self) -> bool {
        self.active_message
    }

    /// Reports that the arbitration address byte has been physically
    /// written. Switches into the active path for internal requests.
    pub fn bus_request_completed(&mut self) {
        let external = self.request.bus_request_external();
        self.request.bus_request_completed();
        if !external && self.active_message && self.state != HandlerState::RequestBus {
            self.state = HandlerState::RequestBus;
        }
    }

    /// Writes the arbitration address byte and reports completion.
    ///
    /// Platforms without a dedicated arbitration ISR call this right after
    /// feeding a SYN byte; it is a no-op unless a request is pending.
    /// Returns `true` when the address byte was written.
    pub fn serve_bus_request(&mut self) -> bool {
        if self.request.bus_request_pending() {
            let address = self.request.address();
            self.call_write(address);
            self.bus_request_completed();
            true
        } else {
            false
        }
    }

    /// ISR hook forwarding a start-bit edge to the arbitration machine. A
    /// pending active transmission is abandoned.
    pub fn start_bit(&mut self) {
        self.request.start_bit();
        if self.active_message {
            self.call_active_reset();
        }
    }

    /// Puts the machine back into `passiveReceiveMaster` and clears both
    /// the active and the passive scratch state.
    pub fn reset(&mut self) {
        self.state = HandlerState::PassiveReceiveMaster;
        self.call_active_reset();
        self.call_passive_reset();
    }

    /// Feeds one received byte through arbitration and the state machine.
    ///
    /// This is the single entry point of the engine and must be called
    /// serially with respect to all other operations.
    pub fn run(&mut self, byte: u8) {
        // record timing
        if let Some(clock) = self.clock {
            let now = clock();
            let elapsed = now.saturating_sub(self.last_micros) as f64;
            if byte != SYM_SYN {
                if self.active_message {
                    if self.measure_sync {
                        self.active_first.add(elapsed);
                    } else {
                        self.active_data.add(elapsed);
                    }
                } else if self.measure_sync {
                    self.passive_first.add(elapsed);
                } else {
                    self.passive_data.add(elapsed);
                }
            } else if self.measure_sync {
                self.sync.add(elapsed);
            }
            self.last_micros = now;
        }
        self.measure_sync = byte == SYM_SYN;

        let _ = self.request.run(byte);

        let state = self.state;
        match state {
            HandlerState::PassiveReceiveMaster => self.passive_receive_master(byte),
            HandlerState::PassiveReceiveMasterAcknowledge => {
                self.passive_receive_master_acknowledge(byte)
            }
            HandlerState::PassiveReceiveSlave => self.passive_receive_slave(byte),
            HandlerState::PassiveReceiveSlaveAcknowledge => {
                self.passive_receive_slave_acknowledge(byte)
            }
            HandlerState::ReactiveSendMasterPositiveAcknowledge => {
                self.reactive_send_master_positive_acknowledge(byte)
            }
            HandlerState::ReactiveSendMasterNegativeAcknowledge => {
                self.reactive_send_master_negative_acknowledge(byte)
            }
            HandlerState::ReactiveSendSlave => self.reactive_send_slave(byte),
            HandlerState::ReactiveReceiveSlaveAcknowledge => {
                self.reactive_receive_slave_acknowledge(byte)
            }
            HandlerState::RequestBus => self.request_bus(byte),
            HandlerState::ActiveSendMaster => self.active_send_master(byte),
            HandlerState::ActiveReceiveMasterAcknowledge => {
                self.active_receive_master_acknowledge(byte)
            }
            HandlerState::ActiveReceiveSlave => self.active_receive_slave(byte),
            HandlerState::ActiveSendSlavePositiveAcknowledge => {
                self.active_send_slave_positive_acknowledge(byte)
            }
            HandlerState::ActiveSendSlaveNegativeAcknowledge => {
                self.active_send_slave_negative_acknowledge(byte)
            }
            HandlerState::ReleaseBus => self.release_bus(byte),
        }

        if let Some(clock) = self.clock {
            if byte != SYM_SYN || state == HandlerState::ReleaseBus {
                let handled = clock().saturating_sub(self.last_micros) as f64;
                self.handler_timing[state as usize].add(handled);
            }
        }
    }

    /// Clears all event counters.
    pub fn reset_counter(&mut self) {
        self.counter = HandlerCounter::default();
    }

    /// Snapshot of the event counters with the derived totals filled in.
    pub fn counter(&self) -> HandlerCounter {
        let mut counter = self.counter;

        counter.messages_total = counter.messages_passive_master_slave
            + counter.messages_passive_master_master
            + counter.messages_passive_broadcast
            + counter.messages_active_master_slave
            + counter.messages_active_master_master
            + counter.messages_active_broadcast
            + counter.messages_reactive_master_slave
            + counter.messages_reactive_master_master;

        counter.reset_total = counter.reset_passive00
            + counter.reset_passive0704
            + counter.reset_active
            + counter.reset_passive;

        counter.error_passive = counter.error_passive_master
            + counter.error_passive_master_ack
            + counter.error_passive_slave
            + counter.error_passive_slave_ack;

        counter.error_reactive = counter.error_reactive_master
            + counter.error_reactive_master_ack
            + counter.error_reactive_slave
            + counter.error_reactive_slave_ack;

        counter.error_active = counter.error_active_master
            + counter.error_active_master_ack
            + counter.error_active_slave
            + counter.error_active_slave_ack;

        counter.error_total =
            counter.error_passive + counter.error_reactive + counter.error_active;

        counter
    }

    /// Clears all timing metrics including the per-state table.
    pub fn reset_timing(&mut self) {
        self.sync.clear();
        self.write.clear();
        self.passive_first.clear();
        self.passive_data.clear();
        self.active_first.clear();
        self.active_data.clear();
        self.callback_reactive.clear();
        self.callback_telegram.clear();
        self.callback_error.clear();

        self.reset_state_timing();
    }

    /// Snapshot of the handler timing metrics.
    pub fn timing(&self) -> HandlerTiming {
        HandlerTiming {
            sync: self.sync.values(),
            write: self.write.values(),
            passive_first: self.passive_first.values(),
            passive_data: self.passive_data.values(),
            active_first: self.active_first.values(),
            active_data: self.active_data.values(),
            callback_reactive: self.callback_reactive.values(),
            callback_telegram: self.callback_telegram.values(),
            callback_error: self.callback_error.values(),
        }
    }

    /// Clears the per-state timing table.
    pub fn reset_state_timing(&mut self) {
        for stats in &mut self.handler_timing {
            stats.clear();
        }
    }

    /// Snapshot of the wall time bytes spent in each state's handler.
    pub fn state_timing(&self) -> [StateTiming; HANDLER_STATE_COUNT] {
        let mut out = [StateTiming::default(); HANDLER_STATE_COUNT];
        for (index, stats) in self.handler_timing.iter().enumerate() {
            out[index] = StateTiming {
                state: HandlerState::ALL[index],
                values: stats.values(),
            };
        }
        out
    }

    fn passive_receive_master(&mut self, byte: u8) {
        if byte != SYM_SYN {
            self.passive_master.push_back(byte, true);

            if self.passive_master.len() == 5 {
                self.passive_master_dbx = self.passive_master[4] as usize;
            }

            // AA >> A9 + 01 || A9 >> A9 + 00
            if byte == SYM_EXT {
                self.passive_master_dbx += 1;
            }

            // len() > QQ ZZ PB SB NN + DBx + CRC
            if self.passive_master.len() >= 5 + self.passive_master_dbx + 1 {
                self.passive_telegram.build_master_seq(&self.passive_master);
                if self.passive_telegram.master_state() == SequenceState::Ok {
                    if self.passive_telegram.telegram_type() == Some(TelegramType::Broadcast) {
                        self.call_on_telegram(
                            MessageType::Passive,
                            TelegramType::Broadcast,
                            false,
                        );
                        self.counter.messages_passive_broadcast += 1;
                        self.call_passive_reset();
                    } else if self.passive_master[1] == self.source_address {
                        self.call_write(SYM_ACK);
                        self.state = HandlerState::ReactiveSendMasterPositiveAcknowledge;
                    } else if self.passive_master[1] == self.target_address {
                        let response = self.call_reactive_master_slave();
                        self.passive_telegram.build_slave(&response);
                        if self.passive_telegram.slave_state() == SequenceState::Ok {
                            self.passive_slave = self.passive_telegram.slave().clone();
                            let crc = self.passive_telegram.slave_crc();
                            self.passive_slave.push_back(crc, false);
                            self.passive_slave.extend();
                            self.call_write(SYM_ACK);
                            self.state = HandlerState::ReactiveSendMasterPositiveAcknowledge;
                        } else {
                            self.counter.error_reactive_slave += 1;
                            self.call_on_error(ErrorTag::ReactiveSlave, false);
                            self.call_passive_reset();
                            self.call_write(SYM_SYN);
                            self.state = HandlerState::ReleaseBus;
                        }
                    } else {
                        self.state = HandlerState::PassiveReceiveMasterAcknowledge;
                    }
                } else if self.passive_master[1] == self.source_address
                    || self.passive_master[1] == self.target_address
                {
                    self.counter.error_reactive_master += 1;
                    self.call_on_error(ErrorTag::ReactiveMaster, false);
                    self.passive_telegram.clear();
                    self.passive_master.clear();
                    self.passive_master_dbx = 0;
                    self.call_write(SYM_NAK);
                    self.state = HandlerState::ReactiveSendMasterNegativeAcknowledge;
                } else if matches!(
                    self.passive_telegram.telegram_type(),
                    Some(TelegramType::MasterMaster) | Some(TelegramType::MasterSlave)
                ) {
                    // keep framing aligned across the foreign acknowledgement
                    self.state = HandlerState::PassiveReceiveMasterAcknowledge;
                } else {
                    self.counter.error_passive_master += 1;
                    self.call_on_error(ErrorTag::PassiveMaster, false);
                    self.call_passive_reset();
                }
            }
        } else {
            self.check_passive_buffers();
            self.check_active_buffers();

            // Initiate request bus
            if self.active_message {
                let _ = self.request.request_bus(self.source_address, false);
            }
        }
    }

    fn passive_receive_master_acknowledge(&mut self, byte: u8) {
        if byte == SYM_ACK {
            if self.passive_telegram.telegram_type() == Some(TelegramType::MasterMaster) {
                self.call_on_telegram(MessageType::Passive, TelegramType::MasterMaster, false);
                self.counter.messages_passive_master_master += 1;
                self.call_passive_reset();
                self.state = HandlerState::PassiveReceiveMaster;
            } else {
                self.state = HandlerState::PassiveReceiveSlave;
            }
        } else if byte != SYM_SYN && !self.passive_master_repeated {
            self.passive_master_repeated = true;
            self.passive_telegram.clear();
            self.passive_master.clear();
            self.passive_master_dbx = 0;
            self.state = HandlerState::PassiveReceiveMaster;
        } else {
            self.counter.error_passive_master_ack += 1;
            if self.passive_master.len() == 6
                && self.passive_master[2] == 0x07
                && self.passive_master[3] == 0x04
            {
                self.counter.reset_passive0704 += 1;
            }

            self.call_on_error(ErrorTag::PassiveMasterAck, false);
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        }
    }

    fn passive_receive_slave(&mut self, byte: u8) {
        self.passive_slave.push_back(byte, true);

        if self.passive_slave.len() == 1 {
            self.passive_slave_dbx = byte as usize;
        }

        // AA >> A9 + 01 || A9 >> A9 + 00
        if byte == SYM_EXT {
            self.passive_slave_dbx += 1;
        }

        // len() > NN + DBx + CRC
        if self.passive_slave.len() >= 1 + self.passive_slave_dbx + 1 {
            self.passive_telegram.build_slave_seq(&self.passive_slave);
            if self.passive_telegram.slave_state() != SequenceState::Ok {
                self.counter.error_passive_slave += 1;
                self.call_on_error(ErrorTag::PassiveSlave, false);
            }
            self.state = HandlerState::PassiveReceiveSlaveAcknowledge;
        }
    }

    fn passive_receive_slave_acknowledge(&mut self, byte: u8) {
        if byte == SYM_ACK {
            self.call_on_telegram(MessageType::Passive, TelegramType::MasterSlave, false);
            self.counter.messages_passive_master_slave += 1;
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        } else if byte == SYM_NAK && !self.passive_slave_repeated {
            self.passive_slave_repeated = true;
            self.passive_slave.clear();
            self.passive_slave_dbx = 0;
            self.state = HandlerState::PassiveReceiveSlave;
        } else {
            self.counter.error_passive_slave_ack += 1;
            self.call_on_error(ErrorTag::PassiveSlaveAck, false);
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        }
    }

    fn reactive_send_master_positive_acknowledge(&mut self, _byte: u8) {
        if self.passive_telegram.telegram_type() == Some(TelegramType::MasterMaster) {
            self.call_on_telegram(MessageType::Reactive, TelegramType::MasterMaster, false);
            self.counter.messages_reactive_master_master += 1;
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        } else {
            let next = self.passive_slave[self.passive_slave_index];
            self.call_write(next);
            self.state = HandlerState::ReactiveSendSlave;
        }
    }

    fn reactive_send_master_negative_acknowledge(&mut self, _byte: u8) {
        self.state = HandlerState::PassiveReceiveMaster;
        if !self.passive_master_repeated {
            self.passive_master_repeated = true;
        } else {
            self.counter.error_reactive_master_ack += 1;
            self.call_on_error(ErrorTag::ReactiveMasterAck, false);
            self.call_passive_reset();
        }
    }

    fn reactive_send_slave(&mut self, _byte: u8) {
        self.passive_slave_index += 1;
        if self.passive_slave_index >= self.passive_slave.len() {
            self.state = HandlerState::ReactiveReceiveSlaveAcknowledge;
        } else {
            let next = self.passive_slave[self.passive_slave_index];
            self.call_write(next);
        }
    }

    fn reactive_receive_slave_acknowledge(&mut self, byte: u8) {
        if byte == SYM_ACK {
            self.call_on_telegram(MessageType::Reactive, TelegramType::MasterSlave, false);
            self.counter.messages_reactive_master_slave += 1;
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        } else if byte == SYM_NAK && !self.passive_slave_repeated {
            self.passive_slave_repeated = true;
            self.passive_slave_index = 0;
            let next = self.passive_slave[0];
            self.call_write(next);
            self.state = HandlerState::ReactiveSendSlave;
        } else {
            self.counter.error_reactive_slave_ack += 1;
            self.call_on_error(ErrorTag::ReactiveSlaveAck, false);
            self.call_passive_reset();
            self.state = HandlerState::PassiveReceiveMaster;
        }
    }

    fn request_bus(&mut self, byte: u8) {
        match self.request.result() {
            RequestResult::FirstWon | RequestResult::SecondWon => {
                trace!("bus won with {:#04x}", self.source_address);
                self.active_master = self.active_telegram.master().clone();
                let crc = self.active_telegram.master_crc();
                self.active_master.push_back(crc, false);
                self.active_master.extend();
                // byte 0 went out during arbitration
                self.active_master_index = 1;
                let next = self.active_master[1];
                self.call_write(next);
                self.state = HandlerState::ActiveSendMaster;
            }
            RequestResult::FirstLost
            | RequestResult::FirstError
            | RequestResult::SecondLost => {
                trace!("bus lost to {:#04x}", byte);
                // the byte is the start of the winner's master half
                self.passive_master.push_back(byte, true);
                self.active_message = false;
                self.active_telegram.clear();
                self.active_master.clear();
                self.state = HandlerState::PassiveReceiveMaster;
            }
            RequestResult::ObserveSyn
            | RequestResult::ObserveData
            | RequestResult::RetryError
            | RequestResult::SecondError => {
                self.active_message = false;
                self.active_telegram.clear();
                self.active_master.clear();
                self.state = HandlerState::PassiveReceiveMaster;
            }
            RequestResult::FirstSyn | RequestResult::FirstRetry | RequestResult::RetrySyn => {}
        }
    }

    fn active_send_master(&mut self, _byte: u8) {
        self.active_master_index += 1;
        if self.active_master_index >= self.active_master.len() {
            if self.active_telegram.telegram_type() == Some(TelegramType::Broadcast) {
                self.call_on_telegram(MessageType::Active, TelegramType::Broadcast, true);
                self.counter.messages_active_broadcast += 1;
                self.call_active_reset();
                self.call_write(SYM_SYN);
                self.state = HandlerState::ReleaseBus;
            } else {
                self.state = HandlerState::ActiveReceiveMasterAcknowledge;
            }
        } else {
            let next = self.active_master[self.active_master_index];
            self.call_write(next);
        }
    }

    fn active_receive_master_acknowledge(&mut self, byte: u8) {
        if byte == SYM_ACK {
            if self.active_telegram.telegram_type() == Some(TelegramType::MasterMaster) {
                self.call_on_telegram(MessageType::Active, TelegramType::MasterMaster, true);
                self.counter.messages_active_master_master += 1;
                self.call_active_reset();
                self.call_write(SYM_SYN);
                self.state = HandlerState::ReleaseBus;
            } else {
                self.state = HandlerState::ActiveReceiveSlave;
            }
        } else if byte == SYM_NAK && !self.active_master_repeated {
            self.active_master_repeated = true;
            self.active_master_index = 0;
            let next = self.active_master[0];
            self.call_write(next);
            self.state = HandlerState::ActiveSendMaster;
        } else {
            self.counter.error_active_master_ack += 1;
            self.call_on_error(ErrorTag::ActiveMasterAck, true);
            self.call_active_reset();
            self.call_write(SYM_SYN);
            self.state = HandlerState::ReleaseBus;
        }
    }

    fn active_receive_slave(&mut self, byte: u8) {
        self.active_slave.push_back(byte, true);

        if self.active_slave.len() == 1 {
            self.active_slave_dbx = byte as usize;
        }

        // AA >> A9 + 01 || A9 >> A9 + 00
        if byte == SYM_EXT {
            self.active_slave_dbx += 1;
        }

        // len() > NN + DBx + CRC
        if self.active_slave.len() >= 1 + self.active_slave_dbx + 1 {
            self.active_telegram.build_slave_seq(&self.active_slave);
            if self.active_telegram.slave_state() == SequenceState::Ok {
                self.call_write(SYM_ACK);
                self.state = HandlerState::ActiveSendSlavePositiveAcknowledge;
            } else {
                self.counter.error_active_slave += 1;
                self.call_on_error(ErrorTag::ActiveSlave, true);
                self.active_slave.clear();
                self.active_slave_dbx = 0;
                self.call_write(SYM_NAK);
                self.state = HandlerState::ActiveSendSlaveNegativeAcknowledge;
            }
        }
    }

    fn active_send_slave_positive_acknowledge(&mut self, _byte: u8) {
        self.call_on_telegram(MessageType::Active, TelegramType::MasterSlave, true);
        self.counter.messages_active_master_slave += 1;
        self.call_active_reset();
        self.call_write(SYM_SYN);
        self.state = HandlerState::ReleaseBus;
    }

    fn active_send_slave_negative_acknowledge(&mut self, _byte: u8) {
        if !self.active_slave_repeated {
            self.active_slave_repeated = true;
            self.state = HandlerState::ActiveReceiveSlave;
        } else {
            self.counter.error_active_slave_ack += 1;
            self.call_on_error(ErrorTag::ActiveSlaveAck, true);
            self.call_active_reset();
            self.call_write(SYM_SYN);
            self.state = HandlerState::ReleaseBus;
        }
    }

    fn release_bus(&mut self, _byte: u8) {
        self.state = HandlerState::PassiveReceiveMaster;
    }

    // Reports and discards leftover passive bytes at a SYN boundary.
    fn check_passive_buffers(&mut self) {
        if !self.passive_master.is_empty() || !self.passive_slave.is_empty() {
            self.call_on_error(ErrorTag::PassiveBuffers, false);

            if self.passive_master.len() == 1 && self.passive_master[0] == 0x00 {
                self.counter.reset_passive00 += 1;
            } else {
                self.counter.reset_passive += 1;
            }

            self.call_passive_reset();
        }
    }

    // Reports and discards leftover active bytes at a SYN boundary.
    fn check_active_buffers(&mut self) {
        if !self.active_master.is_empty() || !self.active_slave.is_empty() {
            self.call_on_error(ErrorTag::ActiveBuffers, true);
            self.counter.reset_active += 1;
            self.call_active_reset();
        }
    }

    fn call_passive_reset(&mut self) {
        self.passive_telegram.clear();

        self.passive_master.clear();
        self.passive_master_dbx = 0;
        self.passive_master_repeated = false;

        self.passive_slave.clear();
        self.passive_slave_dbx = 0;
        self.passive_slave_index = 0;
        self.passive_slave_repeated = false;
    }

    fn call_active_reset(&mut self) {
        self.active_message = false;
        self.active_telegram.clear();

        self.active_master.clear();
        self.active_master_index = 0;
        self.active_master_repeated = false;

        self.active_slave.clear();
        self.active_slave_dbx = 0;
        self.active_slave_repeated = false;
    }

    fn call_write(&mut self, byte: u8) {
        let begin = self.clock.map(|clock| clock());
        self.bus.write_byte(byte);
        if let (Some(clock), Some(begin)) = (self.clock, begin) {
            self.write.add(clock().saturating_sub(begin) as f64);
        }
    }

    fn call_reactive_master_slave(&mut self) -> Bytes {
        let mut response = Bytes::new();
        if let Some(callback) = self.reactive_master_slave_callback.as_mut() {
            let begin = self.clock.map(|clock| clock());
            if let Some(reply) = callback(self.passive_telegram.master().bytes()) {
                response = reply;
            }
            if let (Some(clock), Some(begin)) = (self.clock, begin) {
                self.callback_reactive.add(clock().saturating_sub(begin) as f64);
            }
        }
        response
    }

    fn call_on_telegram(
        &mut self,
        message_type: MessageType,
        telegram_type: TelegramType,
        active: bool,
    ) {
        if let Some(callback) = self.telegram_callback.as_mut() {
            let telegram = if active {
                &self.active_telegram
            } else {
                &self.passive_telegram
            };
            let begin = self.clock.map(|clock| clock());
            callback(
                message_type,
                telegram_type,
                telegram.master().bytes(),
                telegram.slave().bytes(),
            );
            if let (Some(clock), Some(begin)) = (self.clock, begin) {
                self.callback_telegram.add(clock().saturating_sub(begin) as f64);
            }
        }
    }

    fn call_on_error(&mut self, tag: ErrorTag, active: bool) {
        debug!("{}", tag.as_str());
        if let Some(callback) = self.error_callback.as_mut() {
            let begin = self.clock.map(|clock| clock());
            if active {
                callback(tag, self.active_master.bytes(), self.active_slave.bytes());
            } else {
                callback(tag, self.passive_master.bytes(), self.passive_slave.bytes());
            }
            if let (Some(clock), Some(begin)) = (self.clock, begin) {
                self.callback_error.add(clock().saturating_sub(begin) as f64);
            }
        }
    }
}

impl<B> fmt::Debug for Handler<B>
where
    B: BusWriter,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("source_address", &self.source_address)
            .field("target_address", &self.target_address)
            .field("state", &self.state)
            .field("active_message", &self.active_message)
            .finish_non_exhaustive()
    }
}
