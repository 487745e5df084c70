//! Valve actuator controller.
//!
//! Moves the valve between its end stops. There are no limit switches: the
//! end of travel is found by stall detection, either a motor current spike or
//! the encoder no longer turning. Every move runs through a power-up phase, a
//! soft-start ramp and a timeout.
//!
//! ```text
//!   IdleClosed --open--> PreOpening --100 ms--> Opening --stall--> IdleOpen
//!   IdleOpen --close--> PreClosing --100 ms--> Closing --stall--> IdleClosed
//!
//!   Opening/Closing --15 s--> Fault      any --driver fault--> Fault
//! ```
//!
//! `Fault` is left only through [`ValveController::init`].

use crate::config::ValveConfig;
use crate::motor::{Direction, MotorDrive};
use crate::time::{Duration, accumulate};

/// Valve position and motion state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValveState {
    #[default]
    IdleClosed,
    IdleOpen,
    /// Powering the driver before opening
    PreOpening,
    Opening,
    /// Powering the driver before closing
    PreClosing,
    Closing,
    /// Driver fault or motion timeout
    Fault,
}

impl ValveState {
    /// Numeric code published on the field bus.
    pub const fn code(self) -> u16 {
        match self {
            ValveState::IdleClosed => 0,
            ValveState::IdleOpen => 1,
            ValveState::PreOpening => 2,
            ValveState::Opening => 3,
            ValveState::PreClosing => 4,
            ValveState::Closing => 5,
            ValveState::Fault => 6,
        }
    }

    pub const fn is_idle(self) -> bool {
        matches!(self, ValveState::IdleClosed | ValveState::IdleOpen)
    }
}

/// Valve motion state machine driving a [`MotorDrive`].
pub struct ValveController<M> {
    config: ValveConfig,
    motor: M,
    state: ValveState,
    /// Time spent in the current phase
    phase_time: Duration,
    /// Encoder count at the previous stall check
    last_encoder: u32,
    /// Commanded speed in percent
    speed: u8,
}

impl<M: MotorDrive> ValveController<M> {
    /// Creates the controller and parks the motor.
    ///
    /// The valve is assumed closed at power up.
    pub fn new(config: ValveConfig, motor: M) -> Self {
        let mut valve = Self {
            config,
            motor,
            state: ValveState::IdleClosed,
            phase_time: Duration::from_ticks(0),
            last_encoder: 0,
            speed: 0,
        };
        valve.init();
        valve
    }

    /// Parks the motor (supply off, stopped, brake on) and resets to
    /// `IdleClosed`. This is also the only way out of `Fault`.
    pub fn init(&mut self) {
        self.motor.set_main_power(false);
        self.motor.drive(Direction::Stop, 0);
        self.motor.brake(true);
        self.enter(ValveState::IdleClosed);
        self.phase_time = Duration::from_ticks(0);
        self.last_encoder = 0;
        self.speed = 0;
    }

    /// Starts opening. Ignored unless the valve is idle.
    ///
    /// Returns `true` if the command was accepted.
    pub fn open(&mut self) -> bool {
        self.command(ValveState::PreOpening)
    }

    /// Starts closing. Ignored unless the valve is idle.
    ///
    /// Returns `true` if the command was accepted.
    pub fn close(&mut self) -> bool {
        self.command(ValveState::PreClosing)
    }

    pub fn state(&self) -> ValveState {
        self.state
    }

    /// Commanded motor speed in percent.
    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Encoder pulses since the current move began.
    pub fn encoder_count(&self) -> u32 {
        self.motor.encoder_count()
    }

    /// Advances the state machine by `interval`.
    ///
    /// # Arguments
    ///
    /// * `interval` - time since the previous call (50 ms in the main loop)
    pub fn step(&mut self, interval: Duration) {
        self.phase_time = accumulate(self.phase_time, interval);

        if self.motor.is_fault() {
            self.motor.set_main_power(false);
            if self.state != ValveState::Fault {
                warn!("valve: driver fault in {}", self.state);
            }
            self.enter(ValveState::Fault);
            return;
        }

        let next = match self.state {
            ValveState::PreOpening => self.power_up(ValveState::Opening),
            ValveState::Opening => self.travel(Direction::Opening, ValveState::IdleOpen),
            ValveState::PreClosing => self.power_up(ValveState::Closing),
            ValveState::Closing => self.travel(Direction::Closing, ValveState::IdleClosed),
            idle_or_fault => idle_or_fault,
        };
        self.enter(next);
    }

    fn command(&mut self, target: ValveState) -> bool {
        if !self.state.is_idle() {
            debug!("valve: {} ignored in {}", target, self.state);
            return false;
        }
        self.enter(target);
        self.phase_time = Duration::from_ticks(0);
        true
    }

    /// Supply on, encoder zeroed, then wait for the supply to settle.
    fn power_up(&mut self, moving: ValveState) -> ValveState {
        self.motor.set_main_power(true);
        self.motor.reset_encoder();
        self.last_encoder = 0;
        self.speed = self.config.start_speed;

        if self.phase_time > self.config.power_up_delay {
            self.phase_time = Duration::from_ticks(0);
            moving
        } else {
            self.state
        }
    }

    /// Ramps the motor and watches for timeout and end of travel.
    fn travel(&mut self, direction: Direction, arrived: ValveState) -> ValveState {
        self.speed = self.speed.saturating_add(self.config.ramp_step).min(100);
        self.motor.drive(direction, self.speed);

        if self.timed_out() {
            warn!("valve: {} timed out after {} ms", direction, self.phase_time.ticks());
            self.motor.drive(Direction::Stop, 0);
            self.motor.set_main_power(false);
            return ValveState::Fault;
        }

        if self.past_inrush() && self.stalled() {
            self.motor.brake(true);
            self.motor.set_main_power(false);
            return arrived;
        }

        self.state
    }

    fn timed_out(&self) -> bool {
        self.phase_time > self.config.motion_timeout
    }

    fn past_inrush(&self) -> bool {
        self.phase_time > self.config.inrush_guard
    }

    /// End of travel: current spike, or too few encoder pulses since the
    /// previous check once the motor is up to speed.
    fn stalled(&mut self) -> bool {
        let current = self.motor.current_ma();
        if current > self.config.stall_current_ma {
            debug!("valve: stall on current ({} mA)", current);
            return true;
        }

        if self.speed > self.config.encoder_check_min_speed {
            let count = self.motor.encoder_count();
            let delta = count.wrapping_sub(self.last_encoder);
            self.last_encoder = count;
            if delta < self.config.min_encoder_delta {
                debug!("valve: stall on encoder ({} pulses)", delta);
                return true;
            }
        }

        false
    }

    fn enter(&mut self, next: ValveState) {
        if next != self.state {
            info!("valve: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
