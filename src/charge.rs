//! Solar charge controller.
//!
//! Multi-stage battery charger wrapped around a Perturb & Observe maximum
//! power point tracker. The controller owns the power stage and the analog
//! front end and is stepped from the main loop; it rate-limits itself to one
//! control cycle per `update_interval` no matter how often it is called.
//!
//! # Charging Stages
//!
//! ```text
//!            enable & sun           1 s settle
//!   Idle ----------------> Startup -----------> Bulk (P&O)
//!    |  ^                                        |   ^
//!    |  | sunrise                     V >= absorb|   | V < float - margin
//!    v  |                                        v   |
//!   Night                    Float <---------- Absorb (CV)
//!                                   I < exit
//! ```
//!
//! Any state drops into `Fault` on overvoltage or a shorted panel; only
//! [`ChargeController::clear_faults`] leaves it. Undervoltage is a soft fault:
//! the load rail is dropped but the stage keeps running.
//!
//! # Control Cycle
//!
//! measure -> fault checks -> runtime -> stage state machine -> energy

use crate::config::ChargeConfig;
use crate::error::ClearFaultError;
use crate::power::PowerStage;
use crate::sensing::{AnalogFrontEnd, Measurements, power_mw};
use crate::time::{Instant, elapsed};

/// Charging stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeState {
    /// Waiting for permission and enough sun
    #[default]
    Idle,
    /// Rails enabled, letting the stage settle before switching
    Startup,
    /// Maximum power point tracking
    Bulk,
    /// Constant voltage at the absorb setpoint
    Absorb,
    /// Constant voltage at the float setpoint
    Float,
    /// Latched protection stop
    Fault,
    /// Panel below the startup minimum
    Night,
}

impl ChargeState {
    /// Numeric code published on the field bus.
    pub const fn code(self) -> u16 {
        match self {
            ChargeState::Idle => 0,
            ChargeState::Startup => 1,
            ChargeState::Bulk => 2,
            ChargeState::Absorb => 3,
            ChargeState::Float => 4,
            ChargeState::Fault => 5,
            ChargeState::Night => 6,
        }
    }
}

/// Protection fault recorded in the status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargeFault {
    #[default]
    None,
    Overvoltage,
    Undervoltage,
    /// Set by an emergency stop
    Overcurrent,
    PvShort,
}

impl ChargeFault {
    /// Numeric code published on the field bus.
    pub const fn code(self) -> u16 {
        match self {
            ChargeFault::None => 0,
            ChargeFault::Overvoltage => 1,
            ChargeFault::Undervoltage => 2,
            ChargeFault::Overcurrent => 3,
            ChargeFault::PvShort => 4,
        }
    }
}

/// Power stage duty in ticks of the 40 tick switching period.
///
/// Always within `[MIN, MAX]`: 5 % keeps the bootstrap capacitors charged and
/// 90 % is the highest duty the high side drivers tolerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyTicks(u16);

impl DutyTicks {
    pub const MIN: Self = DutyTicks(2);
    pub const MAX: Self = DutyTicks(36);

    /// Duty clamped into the allowed range.
    pub const fn new(ticks: u16) -> Self {
        if ticks < Self::MIN.0 {
            Self::MIN
        } else if ticks > Self::MAX.0 {
            Self::MAX
        } else {
            DutyTicks(ticks)
        }
    }

    pub const fn ticks(self) -> u16 {
        self.0
    }

    /// Duty moved by `delta` ticks, clamped.
    pub fn offset(self, delta: i32) -> Self {
        let ticks = (self.0 as i32 + delta).clamp(Self::MIN.0 as i32, Self::MAX.0 as i32);
        DutyTicks(ticks as u16)
    }
}

impl Default for DutyTicks {
    fn default() -> Self {
        Self::MIN
    }
}

/// Perturbation direction of the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Perturb {
    Up,
    Down,
}

impl Perturb {
    fn reversed(self) -> Self {
        match self {
            Perturb::Up => Perturb::Down,
            Perturb::Down => Perturb::Up,
        }
    }

    fn steps(self, step: u16) -> i32 {
        match self {
            Perturb::Up => step as i32,
            Perturb::Down => -(step as i32),
        }
    }
}

/// Snapshot of the charger, handed out by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChargeStatus {
    pub state: ChargeState,
    pub fault: ChargeFault,

    pub pv_voltage_mv: u16,
    pub pv_current_ma: u16,
    pub pv_power_mw: u32,

    pub battery_voltage_mv: u16,
    pub battery_current_ma: u16,
    pub battery_power_mw: u32,

    pub duty_ticks: DutyTicks,
    /// Whether the power stage is switching
    pub pwm_running: bool,

    /// Energy delivered to the battery since the last daily reset
    pub energy_today_wh: u32,
    /// Seconds since boot
    pub runtime_s: u32,

    pub charging_enabled: bool,
    pub panel_connected: bool,
    pub battery_connected: bool,
}

/// Battery charger driving a [`PowerStage`] from [`AnalogFrontEnd`] readings.
pub struct ChargeController<S, P> {
    config: ChargeConfig,
    sensors: S,
    stage: P,
    status: ChargeStatus,
    /// Tracker direction
    perturb: Perturb,
    /// Panel power seen on the previous tracking step
    last_power_mw: u32,
    /// Consecutive improvements seen in the current direction
    hysteresis: u8,
    /// When the current stage was entered
    state_entered: Instant,
    /// When the last control cycle ran
    last_run: Instant,
    /// Energy not yet carried into whole watt-hours
    residual_uwh: u32,
}

impl<S, P> ChargeController<S, P>
where
    S: AnalogFrontEnd,
    P: PowerStage,
{
    /// Creates a charger in `Idle` with both rails disabled.
    ///
    /// Charging stays off until [`enable`](Self::enable) is called.
    ///
    /// # Arguments
    ///
    /// * `config` - charge thresholds and timing
    /// * `sensors` - analog front end sampled once per control cycle
    /// * `stage` - buck converter the charger drives
    pub fn new(config: ChargeConfig, sensors: S, stage: P) -> Self {
        let mut charger = Self {
            config,
            sensors,
            stage,
            status: ChargeStatus::default(),
            perturb: Perturb::Up,
            last_power_mw: 0,
            hysteresis: 0,
            state_entered: Instant::from_ticks(0),
            last_run: Instant::from_ticks(0),
            residual_uwh: 0,
        };
        charger.init(Instant::from_ticks(0));
        charger
    }

    /// Resets the charger to `Idle` with actuation off.
    ///
    /// Measurements, counters and the enable flag are cleared. The first
    /// control cycle runs one `update_interval` after `now`.
    pub fn init(&mut self, now: Instant) {
        self.status = ChargeStatus::default();
        self.stage.stop();
        self.stage.enable_drivers(false, false);
        self.perturb = Perturb::Up;
        self.last_power_mw = 0;
        self.hysteresis = 0;
        self.state_entered = now;
        self.last_run = now;
        self.residual_uwh = 0;
    }

    /// Runs one control cycle if `update_interval` has elapsed since the last.
    ///
    /// Returns `true` if a cycle ran.
    pub fn step(&mut self, now: Instant) -> bool {
        if elapsed(now, self.last_run) < self.config.update_interval {
            return false;
        }
        self.last_run = now;

        self.update_measurements();
        self.check_faults(now);
        self.status.runtime_s = now.ticks() / 1000;

        let next = match self.status.state {
            ChargeState::Idle => {
                self.park();
                self.stage.enable_drivers(false, false);
                if self.status.charging_enabled {
                    self.restart_target()
                } else {
                    ChargeState::Idle
                }
            }
            ChargeState::Startup => {
                self.stage.enable_drivers(true, true);
                if elapsed(now, self.state_entered) > self.config.startup_delay {
                    self.begin_switching();
                    ChargeState::Bulk
                } else {
                    ChargeState::Startup
                }
            }
            ChargeState::Bulk => {
                self.perturb_and_observe();
                if self.reached_absorb() {
                    ChargeState::Absorb
                } else {
                    ChargeState::Bulk
                }
            }
            ChargeState::Absorb => {
                self.constant_voltage(self.config.absorb_mv);
                if self.absorb_complete() {
                    ChargeState::Float
                } else {
                    ChargeState::Absorb
                }
            }
            ChargeState::Float => {
                self.constant_voltage(self.config.float_mv);
                if self.dropped_out_of_float() {
                    ChargeState::Bulk
                } else {
                    ChargeState::Float
                }
            }
            ChargeState::Night => {
                self.park();
                if self.panel_above_battery() {
                    ChargeState::Idle
                } else {
                    ChargeState::Night
                }
            }
            ChargeState::Fault => {
                self.park();
                self.stage.enable_drivers(false, false);
                ChargeState::Fault
            }
        };
        self.enter(next, now);

        self.accumulate_energy();
        true
    }

    /// Current status snapshot.
    pub fn status(&self) -> ChargeStatus {
        self.status
    }

    /// True while the charger is delivering energy (bulk, absorb or float).
    pub fn is_charging(&self) -> bool {
        matches!(
            self.status.state,
            ChargeState::Bulk | ChargeState::Absorb | ChargeState::Float
        )
    }

    /// Allows automatic startup from `Idle`.
    pub fn enable(&mut self) {
        self.status.charging_enabled = true;
    }

    /// Stops charging and returns to `Idle`.
    ///
    /// A latched fault stays latched.
    pub fn disable(&mut self) {
        self.status.charging_enabled = false;
        self.park();
        self.stage.enable_drivers(false, false);
        if self.status.state != ChargeState::Fault {
            self.enter(ChargeState::Idle, self.last_run);
        }
    }

    /// Stops the power stage immediately and latches an overcurrent fault.
    pub fn emergency_stop(&mut self) {
        warn!("charge: emergency stop");
        self.status.fault = ChargeFault::Overcurrent;
        self.park();
        self.stage.enable_drivers(false, false);
        self.enter(ChargeState::Fault, self.last_run);
    }

    /// Leaves `Fault` for `Idle`.
    ///
    /// Refused while the latched condition is still present in the latest
    /// measurements. An emergency stop can always be cleared.
    pub fn clear_faults(&mut self) -> Result<(), ClearFaultError> {
        if self.status.state != ChargeState::Fault {
            return Err(ClearFaultError::NotFaulted);
        }
        let present = match self.status.fault {
            ChargeFault::Overvoltage => self.overvoltage(),
            ChargeFault::PvShort => self.pv_short(),
            _ => false,
        };
        if present {
            return Err(ClearFaultError::StillPresent(self.status.fault));
        }
        info!("charge: {} cleared", self.status.fault);
        self.status.fault = ChargeFault::None;
        self.enter(ChargeState::Idle, self.last_run);
        Ok(())
    }

    /// Zeroes the daily energy counter.
    pub fn reset_daily_energy(&mut self) {
        self.status.energy_today_wh = 0;
        self.residual_uwh = 0;
    }

    fn update_measurements(&mut self) {
        let Measurements {
            pv_mv,
            pv_ma,
            battery_mv,
            battery_ma,
            ..
        } = self.sensors.measure();

        self.status.pv_voltage_mv = pv_mv;
        self.status.pv_current_ma = pv_ma;
        self.status.pv_power_mw = power_mw(pv_mv, pv_ma);
        self.status.battery_voltage_mv = battery_mv;
        self.status.battery_current_ma = battery_ma;
        self.status.battery_power_mw = power_mw(battery_mv, battery_ma);

        self.status.panel_connected = pv_mv > self.config.panel_present_mv;
        self.status.battery_connected = battery_mv > self.config.battery_present_mv;
    }

    /// Protection checks, in priority order. Overvoltage short-circuits the
    /// rest.
    fn check_faults(&mut self, now: Instant) {
        if self.overvoltage() {
            self.latch(ChargeFault::Overvoltage, now);
            return;
        }

        if self.status.state != ChargeState::Fault {
            if self.undervoltage() {
                if self.status.fault != ChargeFault::Undervoltage {
                    warn!("charge: battery low ({} mV), load off", self.status.battery_voltage_mv);
                }
                self.status.fault = ChargeFault::Undervoltage;
                self.stage.enable_drivers(true, false);
            } else if self.battery_recovered() && self.status.fault == ChargeFault::Undervoltage {
                info!("charge: battery recovered, load on");
                self.status.fault = ChargeFault::None;
                self.stage.enable_drivers(true, true);
            }
        }

        if self.pv_short() {
            self.latch(ChargeFault::PvShort, now);
        }
    }

    fn latch(&mut self, fault: ChargeFault, now: Instant) {
        if self.status.fault != fault {
            warn!(
                "charge: {} (pv {} mV {} mA, battery {} mV)",
                fault,
                self.status.pv_voltage_mv,
                self.status.pv_current_ma,
                self.status.battery_voltage_mv
            );
        }
        self.status.fault = fault;
        self.stage.stop();
        self.status.pwm_running = false;
        self.enter(ChargeState::Fault, now);
    }

    fn overvoltage(&self) -> bool {
        let limit = self.config.absorb_mv as u32 + self.config.overvoltage_margin_mv as u32;
        self.status.battery_voltage_mv as u32 > limit
    }

    fn undervoltage(&self) -> bool {
        self.status.battery_voltage_mv < self.config.battery_low_mv && self.status.battery_connected
    }

    fn battery_recovered(&self) -> bool {
        self.status.battery_voltage_mv > self.config.battery_reconnect_mv
    }

    fn pv_short(&self) -> bool {
        self.status.pv_current_ma > self.config.pv_short_ma
            && self.status.pv_voltage_mv < self.config.pv_short_mv
    }

    fn panel_above_minimum(&self) -> bool {
        self.status.pv_voltage_mv >= self.config.panel_min_mv
    }

    fn panel_above_battery(&self) -> bool {
        let start = self.status.battery_voltage_mv as u32 + self.config.panel_start_delta_mv as u32;
        self.status.pv_voltage_mv as u32 > start
    }

    fn reached_absorb(&self) -> bool {
        self.status.battery_voltage_mv >= self.config.absorb_mv
    }

    fn absorb_complete(&self) -> bool {
        self.status.battery_current_ma < self.config.absorb_exit_ma
    }

    fn dropped_out_of_float(&self) -> bool {
        let exit = self.config.float_mv.saturating_sub(self.config.float_exit_margin_mv);
        self.status.battery_voltage_mv < exit
    }

    /// Where `Idle` goes when charging is enabled.
    fn restart_target(&self) -> ChargeState {
        if !self.panel_above_minimum() {
            ChargeState::Night
        } else if self.panel_above_battery() && self.status.battery_connected {
            ChargeState::Startup
        } else {
            ChargeState::Idle
        }
    }

    /// Stops switching and parks the duty at its minimum.
    fn park(&mut self) {
        self.stage.stop();
        self.status.pwm_running = false;
        self.status.duty_ticks = DutyTicks::MIN;
    }

    fn begin_switching(&mut self) {
        self.status.duty_ticks = DutyTicks::new(self.config.startup_duty_ticks);
        self.stage.set_duty(self.status.duty_ticks.ticks());
        self.stage.start();
        self.status.pwm_running = true;

        self.last_power_mw = self.status.pv_power_mw;
        self.hysteresis = 0;
    }

    fn perturb_and_observe(&mut self) {
        let power = self.status.pv_power_mw;
        let delta = power as i64 - self.last_power_mw as i64;
        let threshold = self.config.power_threshold_mw as i64;

        if delta > threshold {
            self.hysteresis = self.hysteresis.saturating_add(1);
            if self.hysteresis >= self.config.hysteresis_count {
                self.step_duty();
                self.hysteresis = 0;
            }
        } else if delta < -threshold {
            self.perturb = self.perturb.reversed();
            trace!("charge: p&o reverse to {}", self.perturb);
            self.step_duty();
            self.hysteresis = 0;
        } else {
            self.hysteresis = 0;
        }

        self.stage.set_duty(self.status.duty_ticks.ticks());
        self.last_power_mw = power;
    }

    fn step_duty(&mut self) {
        let delta = self.perturb.steps(self.config.perturb_step_ticks);
        self.status.duty_ticks = self.status.duty_ticks.offset(delta);
    }

    /// Proportional voltage hold around `target_mv`.
    fn constant_voltage(&mut self, target_mv: u16) {
        let error_mv = target_mv as i32 - self.status.battery_voltage_mv as i32;
        let adjust = error_mv / self.config.cv_divisor_mv;
        self.status.duty_ticks = self.status.duty_ticks.offset(adjust);
        self.stage.set_duty(self.status.duty_ticks.ticks());
    }

    fn accumulate_energy(&mut self) {
        let interval_ms = self.config.update_interval.ticks();
        let increment_uwh = self.status.battery_power_mw.saturating_mul(interval_ms) / 3_600;
        self.residual_uwh = self.residual_uwh.saturating_add(increment_uwh);
        let whole = self.residual_uwh / 1_000_000;
        self.residual_uwh %= 1_000_000;
        self.status.energy_today_wh = self.status.energy_today_wh.saturating_add(whole);
    }

    fn enter(&mut self, next: ChargeState, now: Instant) {
        if next != self.status.state {
            info!("charge: {} -> {}", self.status.state, next);
            self.status.state = next;
            self.state_entered = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFrontEnd, MockStage};

    const SUNNY: Measurements = Measurements {
        pv_mv: 34_000,
        pv_ma: 3_000,
        battery_mv: 25_000,
        battery_ma: 3_000,
        load_ma: 0,
    };

    struct Rig {
        charger: ChargeController<MockFrontEnd, MockStage>,
        sensors: MockFrontEnd,
        stage: MockStage,
        now: u32,
    }

    impl Rig {
        fn new(reading: Measurements) -> Self {
            let sensors = MockFrontEnd::new(reading);
            let stage = MockStage::new();
            let charger = ChargeController::new(ChargeConfig::DEFAULT, sensors.clone(), stage.clone());
            Self {
                charger,
                sensors,
                stage,
                now: 0,
            }
        }

        /// Advances one control cycle.
        fn cycle(&mut self) -> ChargeStatus {
            self.now += 100;
            assert!(self.charger.step(Instant::from_ticks(self.now)));
            let status = self.charger.status();
            assert!(status.duty_ticks >= DutyTicks::MIN && status.duty_ticks <= DutyTicks::MAX);
            status
        }

        fn cycles(&mut self, n: usize) -> ChargeStatus {
            for _ in 0..n {
                self.cycle();
            }
            self.charger.status()
        }

        /// Enabled charger brought into bulk under `SUNNY`.
        fn bulk() -> Self {
            let mut rig = Self::new(SUNNY);
            rig.charger.enable();
            assert_eq!(rig.cycle().state, ChargeState::Startup);
            // startup needs strictly more than 1000 ms
            rig.cycles(10);
            assert_eq!(rig.charger.status().state, ChargeState::Startup);
            assert_eq!(rig.cycle().state, ChargeState::Bulk);
            rig
        }
    }

    #[test]
    fn init_is_idle_with_rails_off() {
        let rig = Rig::new(SUNNY);
        let status = rig.charger.status();
        assert_eq!(status.state, ChargeState::Idle);
        assert_eq!(status.fault, ChargeFault::None);
        assert!(!status.charging_enabled);
        assert_eq!(rig.stage.rails(), (false, false));
        assert!(!rig.stage.running());
    }

    #[test]
    fn step_is_rate_limited() {
        let mut rig = Rig::new(SUNNY);
        assert!(!rig.charger.step(Instant::from_ticks(20)));
        assert!(!rig.charger.step(Instant::from_ticks(99)));
        assert!(rig.charger.step(Instant::from_ticks(100)));
        assert!(!rig.charger.step(Instant::from_ticks(180)));
        assert!(rig.charger.step(Instant::from_ticks(200)));
    }

    #[test]
    fn stays_idle_until_enabled() {
        let mut rig = Rig::new(SUNNY);
        assert_eq!(rig.cycles(5).state, ChargeState::Idle);
        assert_eq!(rig.stage.rails(), (false, false));
    }

    #[test]
    fn startup_runs_stage_at_thirty_percent() {
        let rig = Rig::bulk();
        let status = rig.charger.status();
        assert_eq!(status.duty_ticks.ticks(), 12);
        assert!(status.pwm_running);
        assert!(rig.stage.running());
        assert_eq!(rig.stage.rails(), (true, true));
        assert!(rig.charger.is_charging());
    }

    #[test]
    fn dim_panel_goes_to_night_and_returns_at_sunrise() {
        let mut rig = Rig::new(Measurements {
            pv_mv: 20_000,
            ..SUNNY
        });
        rig.charger.enable();
        assert_eq!(rig.cycle().state, ChargeState::Night);
        assert!(!rig.stage.running());

        // still below battery + 1 V
        rig.sensors.set(Measurements {
            pv_mv: 26_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Night);

        rig.sensors.set(Measurements {
            pv_mv: 26_001,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Idle);
        assert_eq!(rig.cycle().state, ChargeState::Startup);
    }

    #[test]
    fn startup_needs_panel_above_battery() {
        let mut rig = Rig::new(Measurements {
            pv_mv: 26_000,
            battery_mv: 25_000,
            ..SUNNY
        });
        rig.charger.enable();
        assert_eq!(rig.cycle().state, ChargeState::Idle);
    }

    #[test]
    fn startup_needs_battery() {
        let mut rig = Rig::new(Measurements {
            battery_mv: 9_000,
            ..SUNNY
        });
        rig.charger.enable();
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Idle);
        assert!(!status.battery_connected);
        assert!(status.panel_connected);
    }

    #[test]
    fn tracker_steps_after_three_improvements() {
        let mut rig = Rig::bulk();
        let mut power = SUNNY;
        for expected in [12, 12, 13] {
            power.pv_ma += 100;
            rig.sensors.set(power);
            assert_eq!(rig.cycle().duty_ticks.ticks(), expected);
        }
        assert_eq!(rig.stage.duty(), 13);
    }

    #[test]
    fn tracker_reverses_on_power_drop() {
        let mut rig = Rig::bulk();
        let mut power = SUNNY;
        power.pv_ma -= 100;
        rig.sensors.set(power);
        assert_eq!(rig.cycle().duty_ticks.ticks(), 11);
        power.pv_ma -= 100;
        rig.sensors.set(power);
        assert_eq!(rig.cycle().duty_ticks.ticks(), 12);
    }

    #[test]
    fn small_changes_reset_hysteresis() {
        let mut rig = Rig::bulk();
        let mut power = SUNNY;
        power.pv_ma += 100;
        rig.sensors.set(power);
        rig.cycle();
        power.pv_ma += 100;
        rig.sensors.set(power);
        rig.cycle();
        // 34 V * 1 mA = 34 mW, below the threshold
        power.pv_ma += 1;
        rig.sensors.set(power);
        rig.cycle();
        power.pv_ma += 100;
        rig.sensors.set(power);
        assert_eq!(rig.cycle().duty_ticks.ticks(), 12);
    }

    #[test]
    fn tracker_duty_stays_clamped() {
        let mut rig = Rig::bulk();
        let mut power = SUNNY;
        // Alternate drops keep reversing; steady climbs push to the limit.
        for _ in 0..200 {
            power.pv_ma += 100;
            rig.sensors.set(power);
            rig.cycle();
        }
        assert_eq!(rig.charger.status().duty_ticks, DutyTicks::MAX);
        for _ in 0..40 {
            power.pv_ma -= 100;
            rig.sensors.set(power);
            rig.cycle();
        }
        let duty = rig.charger.status().duty_ticks.ticks();
        assert!((35..=36).contains(&duty));
    }

    #[test]
    fn bulk_to_absorb_at_setpoint() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 28_799,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Bulk);
        rig.sensors.set(Measurements {
            battery_mv: 28_800,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Absorb);
    }

    #[test]
    fn absorb_holds_voltage_then_floats() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 28_800,
            battery_ma: 6_000,
            ..SUNNY
        });
        rig.cycle();
        // 300 mV below setpoint adds three ticks
        rig.sensors.set(Measurements {
            battery_mv: 28_500,
            battery_ma: 6_000,
            ..SUNNY
        });
        let before = rig.charger.status().duty_ticks.ticks();
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Absorb);
        assert_eq!(status.duty_ticks.ticks(), before + 3);
        assert_eq!(rig.stage.duty(), before + 3);

        rig.sensors.set(Measurements {
            battery_mv: 28_500,
            battery_ma: 4_999,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Float);
    }

    #[test]
    fn float_exit_boundary() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 28_800,
            battery_ma: 1_000,
            ..SUNNY
        });
        rig.cycle();
        assert_eq!(rig.cycle().state, ChargeState::Float);

        rig.sensors.set(Measurements {
            battery_mv: 26_900,
            battery_ma: 1_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Float);
        rig.sensors.set(Measurements {
            battery_mv: 26_899,
            battery_ma: 1_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Bulk);
    }

    #[test]
    fn cv_correction_truncates_toward_zero() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 28_800,
            battery_ma: 6_000,
            ..SUNNY
        });
        rig.cycle();
        let before = rig.charger.status().duty_ticks.ticks();
        // 199 mV high is one tick down, not two
        rig.sensors.set(Measurements {
            battery_mv: 28_999,
            battery_ma: 6_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().duty_ticks.ticks(), before - 1);
    }

    #[test]
    fn overvoltage_latches_fault() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 29_301,
            ..SUNNY
        });
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Fault);
        assert_eq!(status.fault, ChargeFault::Overvoltage);
        assert!(!status.pwm_running);
        assert!(!rig.stage.running());
        assert_eq!(rig.stage.rails(), (false, false));

        // stays latched once the battery is back in range
        rig.sensors.set(SUNNY);
        assert_eq!(rig.cycles(5).state, ChargeState::Fault);
        assert!(!rig.charger.is_charging());
    }

    #[test]
    fn overvoltage_boundary() {
        let mut rig = Rig::new(Measurements {
            battery_mv: 29_300,
            ..SUNNY
        });
        assert_eq!(rig.cycle().state, ChargeState::Idle);
    }

    #[test]
    fn clear_faults_refused_while_present() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 29_500,
            ..SUNNY
        });
        rig.cycle();
        assert_eq!(
            rig.charger.clear_faults(),
            Err(ClearFaultError::StillPresent(ChargeFault::Overvoltage))
        );
        assert_eq!(rig.charger.status().state, ChargeState::Fault);

        rig.sensors.set(SUNNY);
        rig.cycle();
        assert_eq!(rig.charger.clear_faults(), Ok(()));
        let status = rig.charger.status();
        assert_eq!(status.state, ChargeState::Idle);
        assert_eq!(status.fault, ChargeFault::None);
        // charging stays enabled, so the sun restarts it
        assert_eq!(rig.cycle().state, ChargeState::Startup);
    }

    #[test]
    fn clear_faults_outside_fault_is_an_error() {
        let mut rig = Rig::new(SUNNY);
        assert_eq!(rig.charger.clear_faults(), Err(ClearFaultError::NotFaulted));
    }

    #[test]
    fn pv_short_latches_fault() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            pv_mv: 4_000,
            pv_ma: 15_001,
            ..SUNNY
        });
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Fault);
        assert_eq!(status.fault, ChargeFault::PvShort);
        assert!(rig.charger.clear_faults().is_err());
    }

    #[test]
    fn undervoltage_drops_load_without_stopping() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 20_000,
            ..SUNNY
        });
        let status = rig.cycle();
        assert_eq!(status.fault, ChargeFault::Undervoltage);
        assert_eq!(status.state, ChargeState::Bulk);
        assert_eq!(rig.stage.rails(), (true, false));
        assert!(rig.stage.running());

        // between the thresholds nothing changes
        rig.sensors.set(Measurements {
            battery_mv: 23_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().fault, ChargeFault::Undervoltage);

        rig.sensors.set(Measurements {
            battery_mv: 24_001,
            ..SUNNY
        });
        assert_eq!(rig.cycle().fault, ChargeFault::None);
        assert_eq!(rig.stage.rails(), (true, true));
    }

    #[test]
    fn pv_short_overrides_undervoltage_in_same_cycle() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            pv_mv: 4_000,
            pv_ma: 15_001,
            battery_mv: 20_000,
            ..SUNNY
        });
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Fault);
        assert_eq!(status.fault, ChargeFault::PvShort);
        assert_eq!(rig.stage.rails(), (false, false));
        assert!(!rig.stage.running());
    }

    #[test]
    fn overvoltage_overrides_undervoltage_and_keeps_rails_off() {
        let mut rig = Rig::bulk();
        rig.sensors.set(Measurements {
            battery_mv: 20_000,
            ..SUNNY
        });
        assert_eq!(rig.cycle().fault, ChargeFault::Undervoltage);
        assert_eq!(rig.stage.rails(), (true, false));

        rig.sensors.set(Measurements {
            battery_mv: 29_400,
            ..SUNNY
        });
        let status = rig.cycle();
        assert_eq!(status.state, ChargeState::Fault);
        assert_eq!(status.fault, ChargeFault::Overvoltage);
        assert_eq!(rig.stage.rails(), (false, false));

        // a healthy battery again must not bring the load back while latched
        rig.sensors.set(SUNNY);
        let status = rig.cycle();
        assert_eq!(status.fault, ChargeFault::Overvoltage);
        assert_eq!(rig.stage.rails(), (false, false));
        assert!(!rig.stage.running());
    }

    #[test]
    fn emergency_stop_is_always_clearable() {
        let mut rig = Rig::bulk();
        rig.charger.emergency_stop();
        let status = rig.charger.status();
        assert_eq!(status.state, ChargeState::Fault);
        assert_eq!(status.fault, ChargeFault::Overcurrent);
        assert!(!rig.stage.running());
        assert_eq!(rig.stage.rails(), (false, false));

        assert_eq!(rig.charger.clear_faults(), Ok(()));
        assert_eq!(rig.charger.status().state, ChargeState::Idle);
    }

    #[test]
    fn disable_returns_to_idle() {
        let mut rig = Rig::bulk();
        rig.charger.disable();
        let status = rig.charger.status();
        assert_eq!(status.state, ChargeState::Idle);
        assert!(!status.charging_enabled);
        assert!(!rig.stage.running());
        assert_eq!(rig.cycles(3).state, ChargeState::Idle);
    }

    #[test]
    fn disable_keeps_fault_latched() {
        let mut rig = Rig::bulk();
        rig.charger.emergency_stop();
        rig.charger.disable();
        assert_eq!(rig.charger.status().state, ChargeState::Fault);
    }

    #[test]
    fn energy_carries_residual() {
        // 25 V * 14.4 A = 360 W; 100 ms of that is 10 mWh
        let mut rig = Rig::new(Measurements {
            battery_mv: 25_000,
            battery_ma: 14_400,
            ..SUNNY
        });
        assert_eq!(rig.cycles(99).energy_today_wh, 0);
        assert_eq!(rig.cycle().energy_today_wh, 1);
        assert_eq!(rig.cycles(100).energy_today_wh, 2);

        rig.charger.reset_daily_energy();
        assert_eq!(rig.charger.status().energy_today_wh, 0);
        assert_eq!(rig.cycles(99).energy_today_wh, 0);
    }

    #[test]
    fn runtime_tracks_clock() {
        let mut rig = Rig::new(SUNNY);
        assert_eq!(rig.cycles(25).runtime_s, 2);
    }

    #[test]
    fn duty_ticks_clamp() {
        assert_eq!(DutyTicks::new(0), DutyTicks::MIN);
        assert_eq!(DutyTicks::new(40), DutyTicks::MAX);
        assert_eq!(DutyTicks::new(20).offset(-100), DutyTicks::MIN);
        assert_eq!(DutyTicks::new(20).offset(3).ticks(), 23);
    }
}
