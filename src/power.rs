//! Power stage of the solar charger.
//!
//! The charger is a two-phase interleaved synchronous buck converter between
//! the panel and the battery. Dead time, phase offset and gate drive are
//! generated by the timer hardware; this module only decides the duty and
//! which rails are enabled.
//!
//! # Hardware Design
//!
//! - P_EN: panel side MOSFET gate enable, active high
//! - L_EN: load side (battery/motor rail) enable, active high
//! - Timer channels for phase 1 and phase 2 high side switches
//!
//! Duty is expressed in ticks of the 40 tick switching period, so 36 ticks is
//! 90 % (the bootstrap limit) and 2 ticks is 5 %.

use embedded_hal::Pwm;
use embedded_hal::digital::v2::OutputPin;

/// Number of duty ticks in one switching period.
pub const PERIOD_TICKS: u16 = 40;

/// Interface the charge controller uses to actuate the converter.
pub trait PowerStage {
    /// Sets the duty of both phases.
    fn set_duty(&mut self, ticks: u16);
    /// Starts switching at the last set duty.
    fn start(&mut self);
    /// Stops switching and parks both phases low.
    fn stop(&mut self);
    /// Drives the panel and load rail enables.
    fn enable_drivers(&mut self, panel: bool, load: bool);
}

/// Buck converter built from a PWM timer and two enable pins.
///
/// Keeps track of the running state so repeated `start`/`stop` calls from the
/// control loop do not restart the timer every cycle.
pub struct BuckConverter<T, P, L>
where
    T: Pwm,
{
    /// PWM timer driving both phases
    timer: T,
    /// Timer channel for phase 1
    phase1: T::Channel,
    /// Timer channel for phase 2 (180 degrees offset in hardware)
    phase2: T::Channel,
    /// Panel side gate enable
    panel_en: P,
    /// Load side rail enable
    load_en: L,
    /// Duty currently loaded into the timer (ticks)
    duty_ticks: u16,
    /// Whether the timer outputs are enabled
    running: bool,
}

impl<T, P, L> BuckConverter<T, P, L>
where
    T: Pwm,
    T::Channel: Clone,
    T::Duty: From<u16> + Into<u32>,
    P: OutputPin,
    L: OutputPin,
{
    /// Creates the power stage with both rails disabled and switching off.
    ///
    /// # Arguments
    ///
    /// * `timer` - PWM timer driving the high side switches
    /// * `phase1` - timer channel for phase 1
    /// * `phase2` - timer channel for phase 2
    /// * `panel_en` - panel side gate enable pin
    /// * `load_en` - load side rail enable pin
    pub fn new(timer: T, phase1: T::Channel, phase2: T::Channel, panel_en: P, load_en: L) -> Self {
        let mut stage = Self {
            timer,
            phase1,
            phase2,
            panel_en,
            load_en,
            duty_ticks: 0,
            running: true,
        };
        stage.enable_drivers(false, false);
        stage.stop();
        stage
    }

    /// Duty currently loaded into the timer, in ticks.
    pub fn duty_ticks(&self) -> u16 {
        self.duty_ticks
    }

    /// True while the phases are switching.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Converts ticks of the switching period into timer compare units.
    fn compare_value(&self, ticks: u16) -> T::Duty {
        let max: u32 = self.timer.get_max_duty().into();
        let ticks = ticks.min(PERIOD_TICKS) as u32;
        // Timer max duty on this board is well inside u16.
        let value = (max * ticks / PERIOD_TICKS as u32).min(u16::MAX as u32) as u16;
        T::Duty::from(value)
    }
}

impl<T, P, L> PowerStage for BuckConverter<T, P, L>
where
    T: Pwm,
    T::Channel: Clone,
    T::Duty: From<u16> + Into<u32>,
    P: OutputPin,
    L: OutputPin,
{
    fn set_duty(&mut self, ticks: u16) {
        let value = self.compare_value(ticks);
        self.timer.set_duty(self.phase1.clone(), value);
        let value = self.compare_value(ticks);
        self.timer.set_duty(self.phase2.clone(), value);
        self.duty_ticks = ticks;
    }

    fn start(&mut self) {
        if !self.running {
            self.timer.enable(self.phase1.clone());
            self.timer.enable(self.phase2.clone());
            self.running = true;
        }
    }

    fn stop(&mut self) {
        if self.running {
            self.timer.set_duty(self.phase1.clone(), T::Duty::from(0));
            self.timer.set_duty(self.phase2.clone(), T::Duty::from(0));
            self.timer.disable(self.phase1.clone());
            self.timer.disable(self.phase2.clone());
            self.running = false;
        }
    }

    fn enable_drivers(&mut self, panel: bool, load: bool) {
        // Enable pins on this board cannot fail; errors are Infallible.
        let _ = if panel {
            self.panel_en.set_high()
        } else {
            self.panel_en.set_low()
        };
        let _ = if load {
            self.load_en.set_high()
        } else {
            self.load_en.set_low()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockPin, MockPwm};

    fn stage() -> BuckConverter<MockPwm, MockPin, MockPin> {
        BuckConverter::new(MockPwm::new(400), 1, 2, MockPin::new(), MockPin::new())
    }

    #[test]
    fn starts_safe() {
        let stage = stage();
        assert!(!stage.is_running());
        assert!(!stage.panel_en.is_high());
        assert!(!stage.load_en.is_high());
        assert!(!stage.timer.is_enabled(1));
        assert!(!stage.timer.is_enabled(2));
    }

    #[test]
    fn duty_is_scaled_to_timer_range() {
        let mut stage = stage();
        stage.set_duty(12);
        stage.start();
        // 12 / 40 of 400
        assert_eq!(stage.timer.duty(1), 120);
        assert_eq!(stage.timer.duty(2), 120);
        assert!(stage.timer.is_enabled(1));
        assert_eq!(stage.duty_ticks(), 12);
    }

    #[test]
    fn stop_parks_phases_low() {
        let mut stage = stage();
        stage.set_duty(20);
        stage.start();
        stage.stop();
        assert_eq!(stage.timer.duty(1), 0);
        assert!(!stage.timer.is_enabled(2));
        assert!(!stage.is_running());
    }

    #[test]
    fn rails_follow_enable_request() {
        let mut stage = stage();
        stage.enable_drivers(true, false);
        assert!(stage.panel_en.is_high());
        assert!(!stage.load_en.is_high());
        stage.enable_drivers(true, true);
        assert!(stage.load_en.is_high());
    }
}
