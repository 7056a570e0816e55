//! Byte queues between the receive path and the engine.
//!
//! The engine itself is single-threaded: bytes must reach
//! [`Handler::run`](crate::handler::Handler::run) serially. The receive
//! path, however, usually lives somewhere else — a reader thread on hosted
//! platforms, a UART interrupt on embedded ones. The [`ByteQueue`] trait
//! captures the contract between the two sides: a bounded producer-consumer
//! channel of bytes.
//!
//! Two implementations are provided:
//!
//! - [`RingQueue`], a fixed-capacity ring on [`heapless::spsc`] for
//!   `no_std` targets where the producer runs in interrupt context,
//! - [`BlockingQueue`] (`std` feature), a mutex-and-condvar queue whose
//!   [`BlockingQueue::pop_timeout`] lets a service thread sleep until bytes
//!   arrive.
//!
//! Consumers poll with [`ByteQueue::dequeue`], which follows the [`nb`]
//! convention and returns [`nb::Error::WouldBlock`] while the queue is
//! empty.

use core::convert::Infallible;
use thiserror::Error;

/// Error returned when a bounded queue cannot accept another byte.
///
/// On the receive path this means bytes are arriving faster than the
/// service loop drains them; the affected byte is lost and the current
/// telegram will fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("byte queue overrun")]
pub struct Overrun;

/// A bounded producer-consumer channel of bytes.
pub trait ByteQueue {
    /// Appends one byte, or reports an [`Overrun`] when the queue is full.
    fn enqueue(&mut self, byte: u8) -> Result<(), Overrun>;

    /// Removes the oldest byte; [`nb::Error::WouldBlock`] while empty.
    fn dequeue(&mut self) -> nb::Result<u8, Infallible>;

    /// Number of bytes currently queued.
    fn len(&self) -> usize;

    /// Returns `true` when no bytes are queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity single-producer single-consumer ring.
///
/// Backed by [`heapless::spsc::Queue`]; one slot is reserved by the ring
/// arithmetic, so `N` of 64 stores up to 63 bytes — plenty for the ~4.3 ms
/// SYN interval at 2400 baud.
pub struct RingQueue<const N: usize> {
    queue: heapless::spsc::Queue<u8, N>,
}

impl<const N: usize> RingQueue<N> {
    /// Creates an empty ring.
    pub const fn new() -> Self {
        Self {
            queue: heapless::spsc::Queue::new(),
        }
    }
}

impl<const N: usize> Default for RingQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for RingQueue<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingQueue")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

impl<const N: usize> ByteQueue for RingQueue<N> {
    fn enqueue(&mut self, byte: u8) -> Result<(), Overrun> {
        self.queue.enqueue(byte).map_err(|_| Overrun)
    }

    fn dequeue(&mut self) -> nb::Result<u8, Infallible> {
        self.queue.dequeue().ok_or(nb::Error::WouldBlock)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Bounded mutex-and-condvar queue for hosted platforms.
///
/// The reader thread pushes received bytes with [`ByteQueue::enqueue`]; the
/// service thread drains with [`BlockingQueue::pop_timeout`] so it sleeps
/// while the bus is quiet.
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct BlockingQueue {
    inner: std::sync::Mutex<std::collections::VecDeque<u8>>,
    not_empty: std::sync::Condvar,
    capacity: usize,
}

#[cfg(feature = "std")]
impl BlockingQueue {
    /// Creates a queue holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: std::sync::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
            not_empty: std::sync::Condvar::new(),
            capacity,
        }
    }

    /// Removes the oldest byte, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: core::time::Duration) -> Option<u8> {
        let guard = self.inner.lock().ok()?;
        let (mut guard, result) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |queue| queue.is_empty())
            .ok()?;
        if result.timed_out() && guard.is_empty() {
            return None;
        }
        guard.pop_front()
    }

    /// Thread-safe push usable through a shared reference.
    pub fn push(&self, byte: u8) -> Result<(), Overrun> {
        let mut guard = self.inner.lock().map_err(|_| Overrun)?;
        if guard.len() >= self.capacity {
            return Err(Overrun);
        }
        guard.push_back(byte);
        self.not_empty.notify_one();
        Ok(())
    }
}

#[cfg(feature = "std")]
impl ByteQueue for BlockingQueue {
    fn enqueue(&mut self, byte: u8) -> Result<(), Overrun> {
        self.push(byte)
    }

    fn dequeue(&mut self) -> nb::Result<u8, Infallible> {
        let mut guard = self.inner.lock().map_err(|_| nb::Error::WouldBlock)?;
        guard.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}
