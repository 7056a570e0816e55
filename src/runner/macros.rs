/// Declares a static global `EBUS_HANDLER` instance protected by a
/// `critical_section` mutex.
///
/// This macro creates a `static` singleton suitable for interrupt-based
/// environments, where both the main task and the UART ISR need to access
/// the shared engine state.
///
/// # Arguments
/// - `$bus`: The concrete type of the transmit path (must implement
///   [`BusWriter`](crate::bus::BusWriter))
///
/// # Example
/// ```rust,ignore
/// init_ebus_handler!(UartBus);
/// ```
#[macro_export]
macro_rules! init_ebus_handler {
    ( $bus:ty ) => {
        pub static EBUS_HANDLER: $crate::critical_section::Mutex<
            core::cell::RefCell<Option<$crate::handler::Handler<$bus>>>,
        > = $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
    };
}

/// Initializes the global `EBUS_HANDLER` singleton with a new engine
/// instance.
///
/// # Arguments
/// - `$address`: The own master address
/// - `$bus`: The transmit path value
///
/// # Example
/// ```rust,ignore
/// fn main() {
///     setup_ebus_handler!(0x33, bus);
/// }
/// ```
///
/// # Notes
/// - Requires `init_ebus_handler!` to have been used earlier.
#[macro_export]
macro_rules! setup_ebus_handler {
    ( $address:expr, $bus:expr ) => {
        $crate::critical_section::with(|cs| {
            let _ = EBUS_HANDLER.borrow(cs).replace(Some(
                $crate::handler::Handler::new(
                    $address,
                    $bus,
                    $crate::arbitration::Request::new(),
                ),
            ));
        })
    };
}

/// Feeds one received byte into the global `EBUS_HANDLER`.
///
/// Call from the UART receive interrupt.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn USART_RX() {
///     feed_ebus_handler!(read_rx_register());
/// }
/// ```
#[macro_export]
macro_rules! feed_ebus_handler {
    ( $byte:expr ) => {
        $crate::critical_section::with(|cs| {
            if let Some(handler) = EBUS_HANDLER.borrow(cs).borrow_mut().as_mut() {
                handler.run($byte);
            }
        })
    };
}

/// Queues an active message `ZZ PB SB NN DBx` on the global `EBUS_HANDLER`.
///
/// Evaluates to the result of
/// [`send_active_message`](crate::handler::Handler::send_active_message),
/// or `false` when no handler is installed.
///
/// # Example
/// ```rust,ignore
/// let queued = send_from_ebus![0xfe, 0xb5, 0x05, 0x04, 0x27, 0x00, 0x2d, 0x00];
/// ```
#[macro_export]
macro_rules! send_from_ebus {
    ( $( $byte:expr ),* $(,)? ) => {
        $crate::critical_section::with(|cs| {
            if let Some(handler) = EBUS_HANDLER.borrow(cs).borrow_mut().as_mut() {
                handler.send_active_message(&[ $( $byte ),* ])
            } else {
                false
            }
        })
    };
}
