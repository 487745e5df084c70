//! Field bus request handler.
//!
//! A Modbus RTU subset over RS-485: read one holding register (0x03) and write
//! one register (0x06). Requests are fixed 8 byte frames:
//!
//! ```text
//! [id] [function] [addr hi] [addr lo] [data hi] [data lo] [crc lo] [crc hi]
//! ```
//!
//! Anything malformed (short, bad CRC, other device) is dropped silently;
//! the bus master retries on timeout. Reads of unknown registers answer
//! `0xFFFF` instead of an exception response.

use heapless::Vec;

use crate::config::TelemetryConfig;
use crate::crc;
use crate::error::{FrameError, TransmitError};
use crate::registers::{Register, Snapshot, read_address};
use crate::serial::{MIN_FRAME_LEN, RxFrames};
use crate::time::Instant;

/// Read holding register.
pub const READ_HOLDING: u8 = 0x03;
/// Write single register.
pub const WRITE_SINGLE: u8 = 0x06;

/// Largest reply this device sends.
pub type Reply = Vec<u8, MIN_FRAME_LEN>;

/// What the telemetry engine needs from the rest of the system.
pub trait FieldDevice {
    /// Current values of everything the register map exposes.
    fn snapshot(&self) -> Snapshot;
    fn open_valve(&mut self);
    fn close_valve(&mut self);
}

/// Outcome of one [`Telemetry::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dispatch {
    /// No complete frame buffered
    NoFrame,
    /// Frame failed validation
    Dropped(FrameError),
    /// Register read answered
    Read { address: u16, value: u16 },
    /// Valve command accepted and echoed
    Command { open: bool },
    /// Valid frame with a function or address this device does not serve
    Ignored { function: u8, address: u16 },
}

/// Validated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Request {
    function: u8,
    address: u16,
    data: u16,
}

/// Request/response engine bound to a receive queue and a transmitter.
pub struct Telemetry<'a, W> {
    config: TelemetryConfig,
    rx: RxFrames<'a>,
    tx: W,
}

impl<'a, W: embedded_io::Write> Telemetry<'a, W> {
    /// # Arguments
    ///
    /// * `config` - bus address
    /// * `rx` - loop side of the receive queue
    /// * `tx` - serial transmitter for replies
    pub fn new(config: TelemetryConfig, rx: RxFrames<'a>, tx: W) -> Self {
        Self { config, rx, tx }
    }

    /// Handles at most one buffered frame. Never blocks waiting for input.
    ///
    /// `now` times the line silence that discards a partial frame.
    pub fn step<D: FieldDevice>(
        &mut self,
        now: Instant,
        device: &mut D,
    ) -> Result<Dispatch, TransmitError> {
        let Some(frame) = self.rx.take_frame(now) else {
            return Ok(Dispatch::NoFrame);
        };

        let (dispatch, reply) = self.handle(&frame, device);
        if let Some(reply) = reply {
            self.tx.write_all(&reply).map_err(TransmitError::from_io)?;
            self.tx.flush().map_err(TransmitError::from_io)?;
        }
        Ok(dispatch)
    }

    /// Validates and dispatches one frame, returning the reply to send.
    pub fn handle<D: FieldDevice>(&self, frame: &[u8], device: &mut D) -> (Dispatch, Option<Reply>) {
        let request = match self.validate(frame) {
            Ok(request) => request,
            Err(err) => {
                debug!("telemetry: dropped frame, {}", err);
                return (Dispatch::Dropped(err), None);
            }
        };

        match request.function {
            READ_HOLDING => {
                let value = read_address(request.address, &device.snapshot());
                trace!("telemetry: read {=u16:#x} = {}", request.address, value);
                let reply = self.read_reply(value);
                (
                    Dispatch::Read {
                        address: request.address,
                        value,
                    },
                    Some(reply),
                )
            }
            WRITE_SINGLE if request.address == Register::ValveCommand.address() => {
                let open = request.data == 1;
                if open {
                    device.open_valve();
                } else {
                    device.close_valve();
                }
                info!("telemetry: valve {}", if open { "open" } else { "close" });
                let mut echo = Reply::new();
                // A validated frame is at least as long as the echo.
                let _ = echo.extend_from_slice(&frame[..MIN_FRAME_LEN]);
                (Dispatch::Command { open }, Some(echo))
            }
            function => {
                debug!(
                    "telemetry: ignored function {=u8:#x} at {=u16:#x}",
                    function,
                    request.address
                );
                (
                    Dispatch::Ignored {
                        function,
                        address: request.address,
                    },
                    None,
                )
            }
        }
    }

    fn validate(&self, frame: &[u8]) -> Result<Request, FrameError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(frame.len()));
        }

        let expected = crc::crc16(&frame[..6]);
        let received = u16::from_le_bytes([frame[6], frame[7]]);
        if expected != received {
            return Err(FrameError::CrcMismatch { expected, received });
        }

        if frame[0] != self.config.device_id {
            return Err(FrameError::OtherDevice(frame[0]));
        }

        Ok(Request {
            function: frame[1],
            address: u16::from_be_bytes([frame[2], frame[3]]),
            data: u16::from_be_bytes([frame[4], frame[5]]),
        })
    }

    fn read_reply(&self, value: u16) -> Reply {
        let [hi, lo] = value.to_be_bytes();
        let mut reply = Reply::new();
        // Seven bytes always fit.
        let _ = reply.extend_from_slice(&[self.config.device_id, READ_HOLDING, 0x02, hi, lo]);
        let checksum = crc::crc16_le_bytes(&reply);
        let _ = reply.extend_from_slice(&checksum);
        reply
    }
}
