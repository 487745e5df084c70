//! Leak and burst protection.
//!
//! Once a second the ultrasonic flow meter is sampled. Flow through a closed
//! valve is a leak; flow above the burst limit means a broken pipe downstream
//! and the valve is closed whatever its state. Alarms latch until they are
//! acknowledged.

use bitflags::bitflags;

use crate::config::FlowConfig;
use crate::valve::ValveState;

bitflags! {
    /// Latched flow alarms, published as a register bit field.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Alarms: u16 {
        /// Flow seen while the valve was closed
        const LEAK = 1 << 0;
        /// Flow above the burst limit
        const BURST = 1 << 1;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Alarms {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Alarms({=u16:#x})", self.bits())
    }
}

/// Flow rate source.
///
/// The measurement itself (transducer excitation, time of flight) lives
/// behind this trait.
pub trait FlowMeter {
    /// Flow in litres per hour, or `None` if the measurement failed.
    fn measure_lph(&mut self) -> Option<f32>;

    /// False when no measurement path is fitted, so every
    /// [`measure_lph`](Self::measure_lph) will fail.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Checks flow against the leak and burst limits.
pub struct FlowGuard<F> {
    config: FlowConfig,
    meter: F,
    alarms: Alarms,
    last_rate_lph: Option<f32>,
}

impl<F: FlowMeter> FlowGuard<F> {
    /// Warns once if `meter` is not connected: leak and burst protection
    /// is then inactive.
    pub fn new(config: FlowConfig, meter: F) -> Self {
        if !meter.is_connected() {
            warn!("flow: meter not connected, leak and burst protection inactive");
        }
        Self {
            config,
            meter,
            alarms: Alarms::empty(),
            last_rate_lph: None,
        }
    }

    /// Measures flow and raises alarms.
    ///
    /// Returns the conditions detected by this measurement, or `None` if the
    /// meter failed. The caller closes the valve when the result contains
    /// [`Alarms::BURST`].
    ///
    /// # Arguments
    ///
    /// * `valve` - valve state at the time of the measurement
    pub fn check(&mut self, valve: ValveState) -> Option<Alarms> {
        let Some(rate) = self
            .meter
            .measure_lph()
            .filter(|rate| rate.is_finite() && *rate >= 0.0)
        else {
            debug!("flow: measurement failed");
            return None;
        };
        self.last_rate_lph = Some(rate);

        let mut detected = Alarms::empty();
        if valve == ValveState::IdleClosed && rate > self.config.leak_limit_lph {
            detected |= Alarms::LEAK;
        }
        if rate > self.config.burst_limit_lph {
            detected |= Alarms::BURST;
        }

        let new = detected.difference(self.alarms);
        if new.contains(Alarms::LEAK) {
            warn!("flow: leak, {} l/h through closed valve", rate);
        }
        if new.contains(Alarms::BURST) {
            warn!("flow: burst, {} l/h", rate);
        }
        self.alarms |= detected;
        Some(detected)
    }

    /// True if measurements can raise alarms at all.
    pub fn is_protecting(&self) -> bool {
        self.meter.is_connected()
    }

    /// Latched alarms.
    pub fn alarms(&self) -> Alarms {
        self.alarms
    }

    /// Returns the latched alarms and clears them.
    pub fn acknowledge(&mut self) -> Alarms {
        core::mem::take(&mut self.alarms)
    }

    /// Last successful measurement.
    pub fn last_rate_lph(&self) -> Option<f32> {
        self.last_rate_lph
    }
}
