use crate::arbitration::Request;
use crate::bus::BusWriter;
use crate::handler::Handler;
use core::cell::RefCell;
use critical_section::Mutex;

/// Used to initialize the global static [`Handler`] for use with
/// `critical_section`.
///
/// # Returns
/// * An empty mutable ref-cell
///
/// # Example
/// ```rust
/// use core::cell::RefCell;
/// use critical_section::Mutex;
/// use ebus2400::bus::BusWriter;
/// use ebus2400::handler::Handler;
/// use ebus2400::runner::global_handler_init;
///
/// struct UartBus;
///
/// impl BusWriter for UartBus {
///     fn write_byte(&mut self, _byte: u8) {}
/// }
///
/// static EBUS_HANDLER: Mutex<RefCell<Option<Handler<UartBus>>>> =
///     global_handler_init::<UartBus>();
/// ```
pub const fn global_handler_init<B: BusWriter>() -> Mutex<RefCell<Option<Handler<B>>>> {
    Mutex::new(RefCell::new(None))
}

/// Initializes the global handler singleton with a new engine instance.
///
/// # Arguments
/// * The global static handler slot
/// * The own master address
/// * The platform transmit path
/// * The arbitration machine
pub fn global_handler_setup<B: BusWriter>(
    global_handler: &'static Mutex<RefCell<Option<Handler<B>>>>,
    address: u8,
    bus: B,
    request: Request,
) {
    critical_section::with(|cs| {
        let _ = global_handler
            .borrow(cs)
            .replace(Some(Handler::new(address, bus, request)));
    });
}

/// Feeds one received byte into the global handler.
///
/// Call this from the UART receive interrupt, one byte per invocation.
pub fn global_handler_feed<B: BusWriter>(
    global_handler: &'static Mutex<RefCell<Option<Handler<B>>>>,
    byte: u8,
) {
    critical_section::with(|cs| {
        if let Some(handler) = global_handler.borrow(cs).borrow_mut().as_mut() {
            handler.run(byte);
        }
    });
}

/// Serves a pending arbitration request from the global handler.
///
/// Call this from the SYN-edge timer interrupt; it writes the arbitration
/// address byte when a request is pending. Returns `true` when a byte went
/// out.
pub fn global_handler_serve_request<B: BusWriter>(
    global_handler: &'static Mutex<RefCell<Option<Handler<B>>>>,
) -> bool {
    critical_section::with(|cs| {
        if let Some(handler) = global_handler.borrow(cs).borrow_mut().as_mut() {
            handler.serve_bus_request()
        } else {
            false
        }
    })
}

/// Forwards a start-bit edge to the global handler's arbitration machine.
///
/// Call this from the GPIO edge interrupt on platforms with a start-bit
/// detector.
pub fn global_handler_start_bit<B: BusWriter>(
    global_handler: &'static Mutex<RefCell<Option<Handler<B>>>>,
) {
    critical_section::with(|cs| {
        if let Some(handler) = global_handler.borrow(cs).borrow_mut().as_mut() {
            handler.start_bit();
        }
    });
}

/// Queues an active message on the global handler.
///
/// Returns `false` when no handler is installed, the message is empty,
/// another message is pending or validation fails.
pub fn global_handler_send<B: BusWriter>(
    global_handler: &'static Mutex<RefCell<Option<Handler<B>>>>,
    message: &[u8],
) -> bool {
    critical_section::with(|cs| {
        if let Some(handler) = global_handler.borrow(cs).borrow_mut().as_mut() {
            handler.send_active_message(message)
        } else {
            false
        }
    })
}
