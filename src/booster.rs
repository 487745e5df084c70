//! Ultrasonic transducer booster.
//!
//! The flow meter's analog front end has a four switch multiplexer selecting
//! which transducer pair is excited and two op-amp power downs. It sleeps
//! between measurements; [`BoostedMeter`] wakes it around each one.

use embedded_hal::digital::v2::OutputPin;

use crate::flow::FlowMeter;

/// Multiplexer and op-amp configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoosterMode {
    /// Everything off
    #[default]
    Sleep,
    /// Upstream pair: S1, S3, PD1
    Pair1,
    /// Downstream pair: S2, S4, PD2
    Pair2,
    /// Every switch and amplifier on
    Test,
}

impl BoosterMode {
    /// Levels for `[s1, s2, s3, s4, pd1, pd2]`.
    const fn levels(self) -> [bool; 6] {
        match self {
            BoosterMode::Sleep => [false; 6],
            BoosterMode::Pair1 => [true, false, true, false, true, false],
            BoosterMode::Pair2 => [false, true, false, true, false, true],
            BoosterMode::Test => [true; 6],
        }
    }
}

/// Booster control pins.
pub struct Booster<O> {
    /// `[s1, s2, s3, s4, pd1, pd2]`
    pins: [O; 6],
    mode: BoosterMode,
}

impl<O: OutputPin> Booster<O> {
    /// Takes the pins in the order S1, S2, S3, S4, PD1, PD2 and puts the
    /// booster to sleep.
    pub fn new(pins: [O; 6]) -> Self {
        let mut booster = Self {
            pins,
            mode: BoosterMode::Sleep,
        };
        booster.set_mode(BoosterMode::Sleep);
        booster
    }

    pub fn set_mode(&mut self, mode: BoosterMode) {
        for (pin, level) in self.pins.iter_mut().zip(mode.levels()) {
            let _ = if level { pin.set_high() } else { pin.set_low() };
        }
        self.mode = mode;
    }

    pub fn mode(&self) -> BoosterMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode != BoosterMode::Sleep
    }
}

/// Flow meter whose transducers are fed through the booster.
///
/// The time of flight computation is done by `meter`; this wrapper only
/// powers the front end for the duration of the measurement.
pub struct BoostedMeter<O, M> {
    booster: Booster<O>,
    meter: M,
}

impl<O: OutputPin, M: FlowMeter> BoostedMeter<O, M> {
    pub fn new(booster: Booster<O>, meter: M) -> Self {
        Self { booster, meter }
    }

    pub fn booster(&self) -> &Booster<O> {
        &self.booster
    }
}

impl<O: OutputPin, M: FlowMeter> FlowMeter for BoostedMeter<O, M> {
    fn measure_lph(&mut self) -> Option<f32> {
        self.booster.set_mode(BoosterMode::Pair1);
        let rate = self.meter.measure_lph();
        self.booster.set_mode(BoosterMode::Sleep);
        rate
    }

    fn is_connected(&self) -> bool {
        self.meter.is_connected()
    }
}
