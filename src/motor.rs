//! Valve actuator motor.
//!
//! Brushed DC motor behind an H-bridge driver with a separate main power
//! switch, a logic enable, a direction input, an electrical brake and an
//! open-drain fault output. A hall encoder on the gearbox input shaft produces
//! one pulse per revolution, counted from an edge interrupt.
//!
//! # Hardware Design
//!
//! - PWR_EN: main motor supply switch, active high
//! - ENABLE: driver logic enable, active high
//! - DIR: high opens, low closes
//! - BRAKE: shorts the motor windings, active high
//! - FAULT: driver fault output, active high
//! - PWM: speed, 20 kHz, duty proportional to speed percent
//! - ENC: encoder pulses, falling edge

use embedded_hal::Pwm;
use embedded_hal::digital::v2::{InputPin, OutputPin};
use portable_atomic::{AtomicU32, Ordering};

use crate::sensing::CurrentSense;

/// Commanded rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Opening,
    Closing,
    Stop,
}

/// Interface the valve controller uses to move the actuator.
pub trait MotorDrive {
    /// Switches the motor supply.
    fn set_main_power(&mut self, on: bool);
    /// Drives the motor in `direction` at `speed` percent (clamped to 100).
    /// `Direction::Stop` disables the driver logic and ignores `speed`.
    fn drive(&mut self, direction: Direction, speed: u8);
    /// Engaging the brake also stops the motor.
    fn brake(&mut self, engage: bool);
    /// Encoder pulses since the last reset.
    fn encoder_count(&self) -> u32;
    fn reset_encoder(&mut self);
    /// True while the driver reports a fault.
    fn is_fault(&mut self) -> bool;
    /// Motor current in mA.
    fn current_ma(&mut self) -> u16;
}

/// Encoder pulse counter shared between the edge interrupt and the motor
/// driver.
pub struct EncoderCounter {
    pulses: AtomicU32,
}

impl EncoderCounter {
    pub const fn new() -> Self {
        Self {
            pulses: AtomicU32::new(0),
        }
    }

    /// Counts one encoder edge. Called from the interrupt side.
    pub fn pulse(&self) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.pulses.store(0, Ordering::Relaxed);
    }
}

impl Default for EncoderCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// H-bridge motor driver built from GPIO outputs, a PWM channel, the shared
/// encoder counter and a current sensor.
pub struct HBridgeMotor<'a, O, F, T, C>
where
    T: Pwm,
{
    /// Main motor supply switch
    power_en: O,
    /// Driver logic enable
    logic_en: O,
    /// Direction select
    dir: O,
    /// Winding brake
    brake: O,
    /// Driver fault output
    fault: F,
    /// Speed PWM timer
    timer: T,
    /// Speed PWM channel
    channel: T::Channel,
    /// Encoder pulse counter fed by the edge interrupt
    encoder: &'a EncoderCounter,
    /// Motor current source
    current: C,
}

impl<'a, O, F, T, C> HBridgeMotor<'a, O, F, T, C>
where
    O: OutputPin,
    F: InputPin,
    T: Pwm,
    T::Channel: Clone,
    T::Duty: From<u16> + Into<u32>,
    C: CurrentSense,
{
    /// Creates the driver and puts the motor in its safe state: supply off,
    /// stopped, brake engaged.
    ///
    /// # Arguments
    ///
    /// * `power_en` - main supply switch
    /// * `logic_en` - driver logic enable
    /// * `dir` - direction select
    /// * `brake` - brake control
    /// * `fault` - driver fault input
    /// * `timer` / `channel` - speed PWM
    /// * `encoder` - pulse counter fed by the encoder interrupt
    /// * `current` - motor current source
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        power_en: O,
        logic_en: O,
        dir: O,
        brake: O,
        fault: F,
        mut timer: T,
        channel: T::Channel,
        encoder: &'a EncoderCounter,
        current: C,
    ) -> Self {
        timer.set_duty(channel.clone(), T::Duty::from(0));
        timer.enable(channel.clone());
        let mut motor = Self {
            power_en,
            logic_en,
            dir,
            brake,
            fault,
            timer,
            channel,
            encoder,
            current,
        };
        motor.set_main_power(false);
        motor.drive(Direction::Stop, 0);
        motor.brake(true);
        motor
    }

    fn set_speed(&mut self, speed: u8) {
        let max: u32 = self.timer.get_max_duty().into();
        let duty = (max * speed as u32 / 100).min(u16::MAX as u32) as u16;
        self.timer.set_duty(self.channel.clone(), T::Duty::from(duty));
    }
}

/// Drives `pin` to `level`. GPIO writes on this board cannot fail.
fn write<O: OutputPin>(pin: &mut O, level: bool) {
    let _ = if level { pin.set_high() } else { pin.set_low() };
}

impl<O, F, T, C> MotorDrive for HBridgeMotor<'_, O, F, T, C>
where
    O: OutputPin,
    F: InputPin,
    T: Pwm,
    T::Channel: Clone,
    T::Duty: From<u16> + Into<u32>,
    C: CurrentSense,
{
    fn set_main_power(&mut self, on: bool) {
        write(&mut self.power_en, on);
    }

    fn drive(&mut self, direction: Direction, speed: u8) {
        let mut speed = speed.min(100);
        write(&mut self.logic_en, true);
        match direction {
            Direction::Opening => {
                write(&mut self.dir, true);
                self.brake(false);
            }
            Direction::Closing => {
                write(&mut self.dir, false);
                self.brake(false);
            }
            Direction::Stop => {
                speed = 0;
                write(&mut self.logic_en, false);
            }
        }
        self.set_speed(speed);
    }

    fn brake(&mut self, engage: bool) {
        if engage {
            self.drive(Direction::Stop, 0);
        }
        write(&mut self.brake, engage);
    }

    fn encoder_count(&self) -> u32 {
        self.encoder.count()
    }

    fn reset_encoder(&mut self) {
        self.encoder.reset();
    }

    fn is_fault(&mut self) -> bool {
        // An unreadable fault line is treated as a fault.
        self.fault.is_high().unwrap_or(true)
    }

    fn current_ma(&mut self) -> u16 {
        self.current.current_ma()
    }
}
