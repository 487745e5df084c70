//! Error types.

use core::fmt;

use crate::charge::ChargeFault;

/// Reason an incoming frame was dropped without a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Fewer bytes than a full request
    TooShort(usize),
    /// Trailer does not match the checksum of the payload
    CrcMismatch { expected: u16, received: u16 },
    /// Frame addressed to another device on the bus
    OtherDevice(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort(len) => write!(f, "short frame ({} bytes)", len),
            FrameError::CrcMismatch { expected, received } => {
                write!(f, "crc mismatch: expected {:#06x}, got {:#06x}", expected, received)
            }
            FrameError::OtherDevice(id) => write!(f, "frame for device {:#04x}", id),
        }
    }
}

/// `clear_faults` was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClearFaultError {
    /// The charger is not latched in fault
    NotFaulted,
    /// The fault condition is still present in the latest measurement
    StillPresent(ChargeFault),
}

impl fmt::Display for ClearFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearFaultError::NotFaulted => f.write_str("charger is not in fault"),
            ClearFaultError::StillPresent(fault) => write!(f, "{:?} still present", fault),
        }
    }
}

/// A response could not be handed to the serial transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitError(pub embedded_io::ErrorKind);

impl TransmitError {
    pub fn from_io<E: embedded_io::Error>(err: E) -> Self {
        TransmitError(err.kind())
    }
}

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial transmit failed: {:?}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TransmitError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "TransmitError({})", defmt::Debug2Format(&self.0))
    }
}
