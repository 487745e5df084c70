//! Field bus register map.
//!
//! | Address | Access | Value                                   |
//! |---------|--------|-----------------------------------------|
//! | 0x0001  | read   | valve state code                        |
//! | 0x0002  | read   | battery voltage (mV)                    |
//! | 0x0003  | read   | panel voltage (mV)                      |
//! | 0x0004  | read   | battery current (mA)                    |
//! | 0x0005  | read   | encoder pulses (low 16 bits)            |
//! | 0x0006  | read   | alarm flags (bit 0 leak, bit 1 burst)   |
//! | 0x0007  | read   | charge state code                       |
//! | 0x0008  | read   | charge fault code                       |
//! | 0x0009  | read   | energy today (Wh, saturated)            |
//! | 0x0010  | write  | valve command (1 opens, anything closes)|

use crate::charge::ChargeStatus;
use crate::flow::Alarms;
use crate::valve::ValveState;

/// Value returned for unmapped and write-only registers.
pub const UNMAPPED: u16 = 0xFFFF;

/// Register access direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Read,
    Write,
}

/// Addressable register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Register {
    ValveState = 0x0001,
    BatteryVoltage = 0x0002,
    PvVoltage = 0x0003,
    BatteryCurrent = 0x0004,
    EncoderCount = 0x0005,
    AlarmFlags = 0x0006,
    ChargeState = 0x0007,
    ChargeFault = 0x0008,
    EnergyToday = 0x0009,
    ValveCommand = 0x0010,
}

impl Register {
    pub const fn from_address(address: u16) -> Option<Self> {
        Some(match address {
            0x0001 => Register::ValveState,
            0x0002 => Register::BatteryVoltage,
            0x0003 => Register::PvVoltage,
            0x0004 => Register::BatteryCurrent,
            0x0005 => Register::EncoderCount,
            0x0006 => Register::AlarmFlags,
            0x0007 => Register::ChargeState,
            0x0008 => Register::ChargeFault,
            0x0009 => Register::EnergyToday,
            0x0010 => Register::ValveCommand,
            _ => return None,
        })
    }

    pub const fn address(self) -> u16 {
        self as u16
    }

    pub const fn access(self) -> Access {
        match self {
            Register::ValveCommand => Access::Write,
            _ => Access::Read,
        }
    }

    /// Value of a readable register, `None` for write-only ones.
    pub fn read(self, snapshot: &Snapshot) -> Option<u16> {
        let value = match self {
            Register::ValveState => snapshot.valve.code(),
            Register::BatteryVoltage => snapshot.charge.battery_voltage_mv,
            Register::PvVoltage => snapshot.charge.pv_voltage_mv,
            Register::BatteryCurrent => snapshot.charge.battery_current_ma,
            Register::EncoderCount => snapshot.encoder_count as u16,
            Register::AlarmFlags => snapshot.alarms.bits(),
            Register::ChargeState => snapshot.charge.state.code(),
            Register::ChargeFault => snapshot.charge.fault.code(),
            Register::EnergyToday => snapshot.charge.energy_today_wh.min(u16::MAX as u32) as u16,
            Register::ValveCommand => return None,
        };
        Some(value)
    }
}

/// Everything the register map projects, captured at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub valve: ValveState,
    pub charge: ChargeStatus,
    pub encoder_count: u32,
    pub alarms: Alarms,
}

/// Reads `address`, answering [`UNMAPPED`] for anything not readable.
pub fn read_address(address: u16, snapshot: &Snapshot) -> u16 {
    Register::from_address(address)
        .and_then(|register| register.read(snapshot))
        .unwrap_or(UNMAPPED)
}
