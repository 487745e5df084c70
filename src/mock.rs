//! Test doubles for the driver traits.
//!
//! Handles share their state through `Rc`, so a test keeps a clone to steer
//! inputs and inspect outputs while the engine owns the other.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::Pwm;
use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::flow::FlowMeter;
use crate::motor::{Direction, MotorDrive};
use crate::power::PowerStage;
use crate::sensing::{AnalogFrontEnd, CurrentSense, Measurements};

/// Output pin remembering its level.
#[derive(Debug, Default)]
pub struct MockPin {
    high: bool,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high
    }
}

impl OutputPin for MockPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

/// Input pin with a level set by the test.
#[derive(Debug)]
pub struct MockInputPin {
    high: bool,
}

impl MockInputPin {
    pub fn new(high: bool) -> Self {
        Self { high }
    }

    pub fn set(&mut self, high: bool) {
        self.high = high;
    }
}

impl InputPin for MockInputPin {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.high)
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.high)
    }
}

/// Four channel PWM timer.
#[derive(Debug)]
pub struct MockPwm {
    max_duty: u16,
    duty: [u16; 4],
    enabled: [bool; 4],
}

impl MockPwm {
    pub fn new(max_duty: u16) -> Self {
        Self {
            max_duty,
            duty: [0; 4],
            enabled: [false; 4],
        }
    }

    pub fn duty(&self, channel: u8) -> u16 {
        self.duty[channel as usize]
    }

    pub fn is_enabled(&self, channel: u8) -> bool {
        self.enabled[channel as usize]
    }
}

impl Pwm for MockPwm {
    type Channel = u8;
    type Time = u32;
    type Duty = u16;

    fn disable(&mut self, channel: u8) {
        self.enabled[channel as usize] = false;
    }

    fn enable(&mut self, channel: u8) {
        self.enabled[channel as usize] = true;
    }

    fn get_period(&self) -> u32 {
        self.max_duty as u32
    }

    fn get_duty(&self, channel: u8) -> u16 {
        self.duty[channel as usize]
    }

    fn get_max_duty(&self) -> u16 {
        self.max_duty
    }

    fn set_duty(&mut self, channel: u8, duty: u16) {
        self.duty[channel as usize] = duty;
    }

    fn set_period<P>(&mut self, period: P)
    where
        P: Into<Self::Time>,
    {
        self.max_duty = period.into() as u16;
    }
}

/// Analog front end returning whatever the test last set.
#[derive(Clone, Debug)]
pub struct MockFrontEnd {
    reading: Rc<Cell<Measurements>>,
}

impl MockFrontEnd {
    pub fn new(reading: Measurements) -> Self {
        Self {
            reading: Rc::new(Cell::new(reading)),
        }
    }

    pub fn set(&self, reading: Measurements) {
        self.reading.set(reading);
    }
}

impl AnalogFrontEnd for MockFrontEnd {
    fn measure(&mut self) -> Measurements {
        self.reading.get()
    }
}

#[derive(Debug, Default)]
struct StageLog {
    duty: u16,
    running: bool,
    rails: (bool, bool),
}

/// Power stage recording the last command of each kind.
#[derive(Clone, Debug, Default)]
pub struct MockStage {
    log: Rc<RefCell<StageLog>>,
}

impl MockStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duty(&self) -> u16 {
        self.log.borrow().duty
    }

    pub fn running(&self) -> bool {
        self.log.borrow().running
    }

    /// `(panel, load)`
    pub fn rails(&self) -> (bool, bool) {
        self.log.borrow().rails
    }
}

impl PowerStage for MockStage {
    fn set_duty(&mut self, ticks: u16) {
        self.log.borrow_mut().duty = ticks;
    }

    fn start(&mut self) {
        self.log.borrow_mut().running = true;
    }

    fn stop(&mut self) {
        self.log.borrow_mut().running = false;
    }

    fn enable_drivers(&mut self, panel: bool, load: bool) {
        self.log.borrow_mut().rails = (panel, load);
    }
}

/// Fixed motor current.
#[derive(Debug)]
pub struct MockCurrent {
    ma: u16,
}

impl MockCurrent {
    pub fn new(ma: u16) -> Self {
        Self { ma }
    }
}

impl CurrentSense for MockCurrent {
    fn current_ma(&mut self) -> u16 {
        self.ma
    }
}

#[derive(Debug)]
struct MotorLog {
    powered: bool,
    direction: Direction,
    speed: u8,
    braked: bool,
    encoder: u32,
    pulses_per_drive: u32,
    fault: bool,
    current_ma: u16,
}

/// Motor whose encoder advances a fixed number of pulses per drive command.
#[derive(Clone, Debug)]
pub struct MockMotor {
    log: Rc<RefCell<MotorLog>>,
}

impl MockMotor {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(MotorLog {
                powered: false,
                direction: Direction::Stop,
                speed: 0,
                braked: false,
                encoder: 0,
                pulses_per_drive: 0,
                fault: false,
                current_ma: 100,
            })),
        }
    }

    pub fn set_pulses_per_drive(&self, pulses: u32) {
        self.log.borrow_mut().pulses_per_drive = pulses;
    }

    pub fn set_current_ma(&self, ma: u16) {
        self.log.borrow_mut().current_ma = ma;
    }

    pub fn set_fault(&self, fault: bool) {
        self.log.borrow_mut().fault = fault;
    }

    pub fn powered(&self) -> bool {
        self.log.borrow().powered
    }

    pub fn braked(&self) -> bool {
        self.log.borrow().braked
    }

    pub fn direction(&self) -> Direction {
        self.log.borrow().direction
    }

    pub fn speed(&self) -> u8 {
        self.log.borrow().speed
    }
}

impl MotorDrive for MockMotor {
    fn set_main_power(&mut self, on: bool) {
        self.log.borrow_mut().powered = on;
    }

    fn drive(&mut self, direction: Direction, speed: u8) {
        let mut log = self.log.borrow_mut();
        log.direction = direction;
        if direction == Direction::Stop {
            log.speed = 0;
        } else {
            log.speed = speed.min(100);
            log.braked = false;
            log.encoder = log.encoder.wrapping_add(log.pulses_per_drive);
        }
    }

    fn brake(&mut self, engage: bool) {
        if engage {
            self.drive(Direction::Stop, 0);
        }
        self.log.borrow_mut().braked = engage;
    }

    fn encoder_count(&self) -> u32 {
        self.log.borrow().encoder
    }

    fn reset_encoder(&mut self) {
        self.log.borrow_mut().encoder = 0;
    }

    fn is_fault(&mut self) -> bool {
        self.log.borrow().fault
    }

    fn current_ma(&mut self) -> u16 {
        self.log.borrow().current_ma
    }
}

/// Flow meter returning whatever the test last set.
#[derive(Clone, Debug)]
pub struct MockFlowMeter {
    rate: Rc<Cell<Option<f32>>>,
    connected: bool,
}

impl MockFlowMeter {
    pub fn new(rate: Option<f32>) -> Self {
        Self {
            rate: Rc::new(Cell::new(rate)),
            connected: true,
        }
    }

    /// Meter with no measurement path fitted.
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::new(None)
        }
    }

    pub fn set(&self, rate: Option<f32>) {
        self.rate.set(rate);
    }
}

impl FlowMeter for MockFlowMeter {
    fn measure_lph(&mut self) -> Option<f32> {
        self.rate.get()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, Default)]
struct SerialLog {
    sent: Vec<u8>,
    flushes: usize,
    failing: bool,
}

/// Serial transmitter capturing everything written.
#[derive(Clone, Debug, Default)]
pub struct MockSerial {
    log: Rc<RefCell<SerialLog>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmitter whose every write fails.
    pub fn failing() -> Self {
        let serial = Self::default();
        serial.log.borrow_mut().failing = true;
        serial
    }

    pub fn sent(&self) -> Vec<u8> {
        self.log.borrow().sent.clone()
    }

    pub fn flushes(&self) -> usize {
        self.log.borrow().flushes
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut log = self.log.borrow_mut();
        if log.failing {
            return Err(embedded_io::ErrorKind::Other);
        }
        log.sent.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.log.borrow_mut().flushes += 1;
        Ok(())
    }
}
