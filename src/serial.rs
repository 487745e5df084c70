//! RS-485 byte transport.
//!
//! Receive side: the UART receiver pushes bytes into a bounded single
//! producer single consumer queue. A frame is ready once a full request
//! (8 bytes) is buffered; the consumer then drains everything buffered as one
//! candidate frame. A partial frame followed by [`FRAME_GAP`] of line silence
//! is discarded, which puts the receiver back on a frame boundary after a
//! noise byte.
//!
//! Transmit side: [`Rs485Tx`] asserts the transceiver driver enable around
//! each write and releases it once the bytes have left the shift register.

use embedded_hal::digital::v2::OutputPin;
use heapless::Vec;
use heapless::spsc::{Consumer, Producer, Queue};

use crate::time::{Duration, Instant, elapsed};

/// Bytes the receive buffer holds.
pub const RX_CAPACITY: usize = 16;
/// Bytes in the shortest request frame.
pub const MIN_FRAME_LEN: usize = 8;
/// Line silence that ends a frame: 3.5 characters at 9600 baud, rounded up.
pub const FRAME_GAP: Duration = Duration::from_ticks(4);

/// Backing storage for the receive queue. The spsc queue keeps one slot free.
pub type RxQueue = Queue<u8, { RX_CAPACITY + 1 }>;

/// Candidate frame drained from the receive queue.
pub type Frame = Vec<u8, RX_CAPACITY>;

/// Splits the receive queue into its interrupt side and its loop side.
pub fn split(queue: &mut RxQueue) -> (RxProducer<'_>, RxFrames<'_>) {
    let (producer, consumer) = queue.split();
    let frames = RxFrames {
        consumer,
        pending: 0,
        last_rx: Instant::from_ticks(0),
    };
    (RxProducer { producer }, frames)
}

/// Receiver side of the queue.
pub struct RxProducer<'a> {
    producer: Producer<'a, u8, { RX_CAPACITY + 1 }>,
}

impl RxProducer<'_> {
    /// Buffers one received byte. Returns `false` if the buffer was full and
    /// the byte was dropped.
    pub fn push(&mut self, byte: u8) -> bool {
        self.producer.enqueue(byte).is_ok()
    }

    /// Buffers as many of `bytes` as fit. Returns the number dropped.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().filter(|&&byte| !self.push(byte)).count()
    }
}

/// Control loop side of the queue.
pub struct RxFrames<'a> {
    consumer: Consumer<'a, u8, { RX_CAPACITY + 1 }>,
    /// Buffered length at the last poll
    pending: usize,
    /// When `pending` last changed
    last_rx: Instant,
}

impl RxFrames<'_> {
    /// True once at least a full request is buffered.
    pub fn is_ready(&self) -> bool {
        self.consumer.len() >= MIN_FRAME_LEN
    }

    /// Drains everything buffered if a frame is ready.
    ///
    /// Arrival times are taken from the polls themselves: a partial frame
    /// whose length has not changed for [`FRAME_GAP`] is thrown away.
    pub fn take_frame(&mut self, now: Instant) -> Option<Frame> {
        let len = self.consumer.len();
        if len != self.pending {
            self.pending = len;
            self.last_rx = now;
        }

        if len >= MIN_FRAME_LEN {
            let mut frame = Frame::new();
            while let Some(byte) = self.consumer.dequeue() {
                // Capacity matches the queue, so this cannot overflow.
                if frame.push(byte).is_err() {
                    break;
                }
            }
            self.pending = 0;
            return Some(frame);
        }

        if len > 0 && elapsed(now, self.last_rx) >= FRAME_GAP {
            debug!("serial: discarding {} byte partial frame", len);
            for _ in 0..len {
                self.consumer.dequeue();
            }
            self.pending = 0;
        }
        None
    }
}

/// Half duplex RS-485 transmitter with a GPIO driver enable.
pub struct Rs485Tx<W, DE> {
    uart: W,
    de: DE,
}

impl<W, DE> Rs485Tx<W, DE>
where
    W: embedded_io::Write,
    DE: OutputPin,
{
    /// Wraps `uart`, leaving the transceiver in receive mode.
    pub fn new(uart: W, mut de: DE) -> Self {
        let _ = de.set_low();
        Self { uart, de }
    }
}

impl<W: embedded_io::ErrorType, DE> embedded_io::ErrorType for Rs485Tx<W, DE> {
    type Error = W::Error;
}

impl<W, DE> embedded_io::Write for Rs485Tx<W, DE>
where
    W: embedded_io::Write,
    DE: OutputPin,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let _ = self.de.set_high();
        let result = self.uart.write_all(buf).and_then(|()| self.uart.flush());
        let _ = self.de.set_low();
        result.map(|()| buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.flush()
    }
}
