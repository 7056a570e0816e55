//! eBUS bus-acquisition (arbitration) state machine.
//!
//! The bus is multi-drop: any master may start transmitting its own address
//! immediately after a SYN byte. Because the wire is a logical AND of all
//! transmitters, a node detects collisions by comparing the byte that comes
//! back on the receive path with the address it wrote. The low nibble of a
//! master address is its **priority class**; a node that loses the first
//! comparison only against a competitor of its own priority class may retry
//! once after the next SYN.
//!
//! [`Request`] tracks this procedure as a four-state machine fed with every
//! received byte. The caller (normally the [`Handler`](crate::handler))
//! asks for the bus with [`Request::request_bus`]; the platform's transmit
//! path writes the address byte after the next SYN and then reports
//! [`Request::bus_request_completed`]. From that point each received byte
//! advances the machine and yields a [`RequestResult`] that the protocol
//! layer interprets.
//!
//! A **lock counter** enforces fairness: after winning, the node must
//! observe `max_lock` further SYN bytes before [`Request::bus_available`]
//! opens again.

use crate::addr::is_master;
use crate::consts::{DEFAULT_LOCK_COUNTER, MAX_LOCK_COUNTER, SYM_SYN};
use crate::statistics::{TimingStats, TimingValues};

/// Phase of the arbitration procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum RequestState {
    /// Watching traffic; no arbitration attempt in flight.
    #[default]
    Observe,
    /// Own address written, waiting for the byte to come back.
    First,
    /// Same-class competitor won; waiting for the next SYN to retry.
    Retry,
    /// Address re-written after the retry SYN, waiting for the echo.
    Second,
}

impl RequestState {
    /// Human-readable name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Observe => "observe",
            RequestState::First => "first",
            RequestState::Retry => "retry",
            RequestState::Second => "second",
        }
    }
}

/// Outcome of feeding one byte into the arbitration machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum RequestResult {
    /// SYN seen while observing; the lock counter ticks down.
    #[default]
    ObserveSyn,
    /// Traffic byte seen while observing.
    ObserveData,
    /// SYN seen while waiting for the first echo.
    FirstSyn,
    /// Own address came back unchanged; the bus is won.
    FirstWon,
    /// Same priority class with a lower sub-address won; retry follows.
    FirstRetry,
    /// A foreign master address came back; arbitration lost.
    FirstLost,
    /// A non-master byte came back; arbitration aborted.
    FirstError,
    /// Retry SYN seen; the address is asserted a second time.
    RetrySyn,
    /// Retry interrupted by a non-SYN byte.
    RetryError,
    /// Own address came back on the second attempt; the bus is won.
    SecondWon,
    /// A foreign master address won the second attempt.
    SecondLost,
    /// A non-master byte came back on the second attempt.
    SecondError,
}

impl RequestResult {
    /// Human-readable name of the result.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestResult::ObserveSyn => "observeSyn",
            RequestResult::ObserveData => "observeData",
            RequestResult::FirstSyn => "firstSyn",
            RequestResult::FirstWon => "firstWon",
            RequestResult::FirstRetry => "firstRetry",
            RequestResult::FirstLost => "firstLost",
            RequestResult::FirstError => "firstError",
            RequestResult::RetrySyn => "retrySyn",
            RequestResult::RetryError => "retryError",
            RequestResult::SecondWon => "secondWon",
            RequestResult::SecondLost => "secondLost",
            RequestResult::SecondError => "secondError",
        }
    }
}

/// Event counters of the arbitration machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounter {
    /// Start-bit edges reported by the platform ISR.
    pub requests_start_bit: u32,
    /// SYN bytes seen while waiting for the first echo.
    pub requests_first_syn: u32,
    /// First attempts won.
    pub requests_first_won: u32,
    /// First attempts deferred into a priority retry.
    pub requests_first_retry: u32,
    /// First attempts lost to another master.
    pub requests_first_lost: u32,
    /// First attempts aborted by an invalid byte.
    pub requests_first_error: u32,
    /// Retry SYNs that re-asserted the address.
    pub requests_retry_syn: u32,
    /// Retries interrupted before the SYN arrived.
    pub requests_retry_error: u32,
    /// Second attempts won.
    pub requests_second_won: u32,
    /// Second attempts lost to another master.
    pub requests_second_lost: u32,
    /// Second attempts aborted by an invalid byte.
    pub requests_second_error: u32,
}

/// Snapshot of the ISR timing metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestTiming {
    /// Delay between the SYN edge and the arbitration address write.
    pub bus_isr_delay: TimingValues,
    /// Width of the arbitration window measured by the ISR.
    pub bus_isr_window: TimingValues,
}

/// Arbitration state machine with priority-class retry.
#[derive(Debug)]
pub struct Request {
    source_address: u8,

    max_lock_counter: u8,
    lock_counter: u8,

    // Indicates whether a bus request is waiting for the address write
    bus_request: bool,

    // Indicates whether the request came from outside the handler
    external_bus_request: bool,

    state: RequestState,
    result: RequestResult,

    counter: RequestCounter,

    bus_isr_delay: TimingStats,
    bus_isr_window: TimingStats,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Creates an arbitration machine in `Observe` with the default lock
    /// counter.
    pub fn new() -> Self {
        Self {
            source_address: 0,
            max_lock_counter: DEFAULT_LOCK_COUNTER,
            lock_counter: DEFAULT_LOCK_COUNTER,
            bus_request: false,
            external_bus_request: false,
            state: RequestState::Observe,
            result: RequestResult::ObserveSyn,
            counter: RequestCounter::default(),
            bus_isr_delay: TimingStats::new(),
            bus_isr_window: TimingStats::new(),
        }
    }

    /// Sets the lock counter maximum, clamped to
    /// [`MAX_LOCK_COUNTER`](crate::consts::MAX_LOCK_COUNTER).
    pub fn set_max_lock_counter(&mut self, max_counter: u8) {
        self.max_lock_counter = u8::min(max_counter, MAX_LOCK_COUNTER);
        if self.lock_counter > self.max_lock_counter {
            self.lock_counter = self.max_lock_counter;
        }
    }

    /// Current value of the lock counter.
    pub fn lock_counter(&self) -> u8 {
        self.lock_counter
    }

    /// The address the pending or last arbitration attempt asserts.
    pub fn address(&self) -> u8 {
        self.source_address
    }

    /// `true` when a request would be accepted right now: the machine just
    /// saw a SYN while observing, the lock counter has drained and no other
    /// request is pending.
    pub fn bus_available(&self) -> bool {
        self.result == RequestResult::ObserveSyn && self.lock_counter == 0 && !self.bus_request
    }

    /// Requests the bus for `address`.
    ///
    /// `external` marks requests placed on behalf of another participant
    /// (a proxied client); the handler does not enter its active path for
    /// those. Returns `true` if a request is pending afterwards.
    pub fn request_bus(&mut self, address: u8, external: bool) -> bool {
        if self.bus_available() {
            self.bus_request = true;
            self.source_address = address;
            self.external_bus_request = external;
        }
        self.bus_request
    }

    /// `true` while a request waits for the address byte to be written.
    pub fn bus_request_pending(&self) -> bool {
        self.bus_request
    }

    /// `true` when the pending or last request was placed with
    /// `external = true`.
    pub fn bus_request_external(&self) -> bool {
        self.external_bus_request
    }

    /// Reports that the arbitration address byte has been physically
    /// transmitted. Must be called exactly once per accepted request.
    pub fn bus_request_completed(&mut self) {
        self.bus_request = false;
        if self.state == RequestState::Observe {
            self.state = RequestState::First;
        }
    }

    /// ISR hook for platforms with a start-bit edge detector. Forces the
    /// machine back to `Observe` so the upcoming byte is classified fresh.
    pub fn start_bit(&mut self) {
        self.counter.requests_start_bit += 1;
        self.state = RequestState::Observe;
        self.result = RequestResult::ObserveSyn;
    }

    /// Current phase of the machine.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Result of the most recently processed byte.
    pub fn result(&self) -> RequestResult {
        self.result
    }

    /// Puts the machine back into `Observe` with a full lock counter and no
    /// pending request.
    pub fn reset(&mut self) {
        self.lock_counter = self.max_lock_counter;
        self.bus_request = false;
        self.state = RequestState::Observe;
    }

    /// Feeds one received byte and returns the classification.
    pub fn run(&mut self, byte: u8) -> RequestResult {
        match self.state {
            RequestState::Observe => self.observe(byte),
            RequestState::First => self.first(byte),
            RequestState::Retry => self.retry(byte),
            RequestState::Second => self.second(byte),
        }
        self.result
    }

    /// Records the SYN-to-write delay measured by the platform ISR, in
    /// microseconds.
    pub fn micros_last_delay(&mut self, delay: f64) {
        self.bus_isr_delay.add(delay);
    }

    /// Records the arbitration window width measured by the platform ISR,
    /// in microseconds.
    pub fn micros_last_window(&mut self, window: f64) {
        self.bus_isr_window.add(window);
    }

    /// Clears all event counters.
    pub fn reset_counter(&mut self) {
        self.counter = RequestCounter::default();
    }

    /// Copy of the event counters.
    pub fn counter(&self) -> RequestCounter {
        self.counter
    }

    /// Clears the ISR timing metrics.
    pub fn reset_timing(&mut self) {
        self.bus_isr_delay.clear();
        self.bus_isr_window.clear();
    }

    /// Snapshot of the ISR timing metrics.
    pub fn timing(&self) -> RequestTiming {
        RequestTiming {
            bus_isr_delay: self.bus_isr_delay.values(),
            bus_isr_window: self.bus_isr_window.values(),
        }
    }

    fn observe(&mut self, byte: u8) {
        if byte == SYM_SYN {
            if self.lock_counter > 0 {
                self.lock_counter -= 1;
            }
            self.result = RequestResult::ObserveSyn;
        } else {
            self.result = RequestResult::ObserveData;
        }
    }

    fn first(&mut self, byte: u8) {
        if byte == SYM_SYN {
            self.counter.requests_first_syn += 1;
            self.result = RequestResult::FirstSyn;
        } else if byte == self.source_address {
            self.counter.requests_first_won += 1;
            self.lock_counter = self.max_lock_counter;
            self.state = RequestState::Observe;
            self.result = RequestResult::FirstWon;
        } else if is_master(byte) {
            if self.fits_priority_class(byte) {
                self.counter.requests_first_retry += 1;
                self.state = RequestState::Retry;
                self.result = RequestResult::FirstRetry;
            } else {
                self.counter.requests_first_lost += 1;
                self.state = RequestState::Observe;
                self.result = RequestResult::FirstLost;
            }
        } else {
            self.counter.requests_first_error += 1;
            self.state = RequestState::Observe;
            self.result = RequestResult::FirstError;
        }
    }

    fn retry(&mut self, byte: u8) {
        if byte == SYM_SYN {
            self.counter.requests_retry_syn += 1;
            self.bus_request = true;
            self.state = RequestState::Second;
            self.result = RequestResult::RetrySyn;
        } else {
            self.counter.requests_retry_error += 1;
            self.state = RequestState::Observe;
            self.result = RequestResult::RetryError;
        }
    }

    fn second(&mut self, byte: u8) {
        if byte == self.source_address {
            self.counter.requests_second_won += 1;
            self.lock_counter = self.max_lock_counter;
            self.state = RequestState::Observe;
            self.result = RequestResult::SecondWon;
        } else if is_master(byte) {
            self.counter.requests_second_lost += 1;
            self.state = RequestState::Observe;
            self.result = RequestResult::SecondLost;
        } else {
            self.counter.requests_second_error += 1;
            self.state = RequestState::Observe;
            self.result = RequestResult::SecondError;
        }
    }

    // same priority class (lower nibble), higher sub address (upper nibble)
    fn fits_priority_class(&self, byte: u8) -> bool {
        (byte & 0x0f) == (self.source_address & 0x0f)
            && (byte & 0xf0) > (self.source_address & 0xf0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Drives a request through `aa aa aa` + `sequence`, writing the address
    // byte whenever a request is pending after a SYN, like the platform
    // transmit path would.
    fn run_sequence(request: &mut Request, address: u8, sequence: &[u8]) -> RequestResult {
        let mut result = RequestResult::ObserveSyn;
        let mut wire = vec![SYM_SYN; 3];
        wire.extend_from_slice(sequence);
        for byte in wire {
            result = request.run(byte);
            let _ = request.request_bus(address, false);
            if request.bus_request_pending() {
                request.bus_request_completed();
            }
        }
        result
    }

    #[test]
    fn test_first_attempt_won() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x33]);
        assert_eq!(result, RequestResult::FirstWon);
        assert_eq!(request.state(), RequestState::Observe);
        assert_eq!(request.lock_counter(), DEFAULT_LOCK_COUNTER);
        assert_eq!(request.counter().requests_first_won, 1);
    }

    #[test]
    fn test_lock_counter_gates_request() {
        let mut request = Request::new();
        assert!(!request.bus_available());
        let _ = request.run(SYM_SYN);
        assert!(!request.bus_available());
        let _ = request.run(SYM_SYN);
        let _ = request.run(SYM_SYN);
        // Three SYNs drained the default lock counter.
        assert!(request.bus_available());
        assert!(request.request_bus(0x33, false));
        assert!(request.bus_request_pending());
    }

    #[test]
    fn test_first_lost_to_other_class() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x01]);
        assert_eq!(result, RequestResult::FirstLost);
        assert_eq!(request.counter().requests_first_lost, 1);
        assert_eq!(request.state(), RequestState::Observe);
    }

    #[test]
    fn test_first_error_on_invalid_byte() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x5c]);
        assert_eq!(result, RequestResult::FirstError);
        assert_eq!(request.counter().requests_first_error, 1);
    }

    #[test]
    fn test_priority_retry_then_won() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x73, SYM_SYN, 0x33]);
        assert_eq!(result, RequestResult::SecondWon);
        let counter = request.counter();
        assert_eq!(counter.requests_first_retry, 1);
        assert_eq!(counter.requests_retry_syn, 1);
        assert_eq!(counter.requests_second_won, 1);
        assert_eq!(request.lock_counter(), DEFAULT_LOCK_COUNTER);
    }

    #[test]
    fn test_priority_retry_then_lost() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x73, SYM_SYN, 0x13]);
        assert_eq!(result, RequestResult::SecondLost);
        assert_eq!(request.counter().requests_second_lost, 1);
    }

    #[test]
    fn test_retry_aborts_on_data_byte() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x73, 0xa0]);
        assert_eq!(result, RequestResult::RetryError);
        assert_eq!(request.counter().requests_retry_error, 1);
        assert_eq!(request.state(), RequestState::Observe);
    }

    #[test]
    fn test_lower_sub_address_does_not_retry() {
        // 0x13 shares priority class 3 but has a lower sub address, so the
        // first comparison is simply lost.
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[0x13]);
        assert_eq!(result, RequestResult::FirstLost);
        assert_eq!(request.counter().requests_first_retry, 0);
    }

    #[test]
    fn test_syn_while_waiting_for_echo() {
        let mut request = Request::new();
        let result = run_sequence(&mut request, 0x33, &[SYM_SYN, 0x33]);
        assert_eq!(result, RequestResult::FirstWon);
        assert_eq!(request.counter().requests_first_syn, 1);
    }

    #[test]
    fn test_max_lock_counter_clamped() {
        let mut request = Request::new();
        request.set_max_lock_counter(200);
        request.reset();
        assert_eq!(request.lock_counter(), MAX_LOCK_COUNTER);
    }

    #[test]
    fn test_start_bit_resets_state() {
        let mut request = Request::new();
        let _ = run_sequence(&mut request, 0x33, &[0x73]);
        request.start_bit();
        assert_eq!(request.state(), RequestState::Observe);
        assert_eq!(request.result(), RequestResult::ObserveSyn);
        assert_eq!(request.counter().requests_start_bit, 1);
    }

    #[test]
    fn test_isr_timing_statistics() {
        let mut request = Request::new();
        request.micros_last_delay(120.0);
        request.micros_last_delay(140.0);
        request.micros_last_window(4300.0);
        let timing = request.timing();
        assert_eq!(timing.bus_isr_delay.count, 2);
        assert_eq!(timing.bus_isr_delay.mean, 130.0);
        assert_eq!(timing.bus_isr_window.count, 1);
        request.reset_timing();
        assert_eq!(request.timing().bus_isr_delay.count, 0);
    }

    #[test]
    fn test_reset_counter() {
        let mut request = Request::new();
        let _ = run_sequence(&mut request, 0x33, &[0x33]);
        request.reset_counter();
        assert_eq!(request.counter(), RequestCounter::default());
    }
}
