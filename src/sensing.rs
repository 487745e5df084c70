//! Analog measurements.
//!
//! Five channels are sampled in one sequence against a 2.5 V reference:
//! panel voltage, battery voltage, panel current, battery current and load
//! (motor) current. Voltages come through a 178k/10k divider; currents through
//! shunt amplifiers scaled to 1 mA per mV at the ADC pin.
//!
//! All scaling is integer math on `u32` intermediates; the largest
//! intermediate (full scale voltage) is below 2^31.

use portable_atomic::{AtomicU16, Ordering};

/// ADC full scale in counts (12 bit)
pub const ADC_RESOLUTION: u32 = 4096;
/// ADC reference voltage
pub const ADC_VREF_MV: u32 = 2_500;
/// Voltage divider ratio times ten: (178k + 10k) / 10k
pub const VOLTAGE_RATIO_X10: u32 = 188;
/// Current amplifier factor times ten
pub const CURRENT_FACTOR_X10: u32 = 10;
/// Motor current scale used by the stall detector (mA at full scale)
pub const MOTOR_CURRENT_FULL_SCALE_MA: u32 = 5_000;

/// Converts a raw divider sample to millivolts.
pub const fn voltage_mv(raw: u16) -> u16 {
    let calc = raw as u32 * ADC_VREF_MV * VOLTAGE_RATIO_X10 / ADC_RESOLUTION / 10;
    calc as u16
}

/// Converts a raw shunt amplifier sample to milliamps.
pub const fn current_ma(raw: u16) -> u16 {
    let calc = raw as u32 * ADC_VREF_MV / ADC_RESOLUTION * CURRENT_FACTOR_X10 / 10;
    calc as u16
}

/// Converts a raw load current sample to motor milliamps.
pub const fn motor_current_ma(raw: u16) -> u16 {
    let calc = raw as u32 * MOTOR_CURRENT_FULL_SCALE_MA / (ADC_RESOLUTION - 1);
    if calc > u16::MAX as u32 {
        u16::MAX
    } else {
        calc as u16
    }
}

/// One raw conversion sequence, in ADC counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RawSamples {
    pub pv_voltage: u16,
    pub battery_voltage: u16,
    pub pv_current: u16,
    pub battery_current: u16,
    pub load_current: u16,
}

impl RawSamples {
    /// Scales every channel to engineering units.
    pub fn scale(&self) -> Measurements {
        Measurements {
            pv_mv: voltage_mv(self.pv_voltage),
            pv_ma: current_ma(self.pv_current),
            battery_mv: voltage_mv(self.battery_voltage),
            battery_ma: current_ma(self.battery_current),
            load_ma: current_ma(self.load_current),
        }
    }
}

/// Scaled measurements in mV and mA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurements {
    pub pv_mv: u16,
    pub pv_ma: u16,
    pub battery_mv: u16,
    pub battery_ma: u16,
    pub load_ma: u16,
}

/// Power in mW from mV and mA.
pub const fn power_mw(mv: u16, ma: u16) -> u32 {
    mv as u32 * ma as u32 / 1000
}

/// Source of charger measurements.
///
/// Implementations run one full conversion sequence per call; the charge
/// controller calls it once per control cycle.
pub trait AnalogFrontEnd {
    fn measure(&mut self) -> Measurements;
}

/// Source of motor current for stall detection.
pub trait CurrentSense {
    fn current_ma(&mut self) -> u16;
}

/// Latest raw load current sample, shared between the charger's conversion
/// sequence and the valve's stall detector.
///
/// The charger publishes on every cycle; the valve reads whatever was last
/// published, the same way both engines share one sampled channel on the
/// board.
pub struct LoadCurrentTap {
    raw: AtomicU16,
}

impl LoadCurrentTap {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU16::new(0),
        }
    }

    pub fn publish(&self, raw: u16) {
        self.raw.store(raw, Ordering::Relaxed);
    }

    pub fn raw(&self) -> u16 {
        self.raw.load(Ordering::Relaxed)
    }
}

impl Default for LoadCurrentTap {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentSense for &LoadCurrentTap {
    fn current_ma(&mut self) -> u16 {
        motor_current_ma(self.raw())
    }
}
