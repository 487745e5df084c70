//! Tuning constants for every engine.
//!
//! Each engine takes its config by value at construction. The `DEFAULT`
//! constants carry the values the board was commissioned with; tests build
//! variants with struct update syntax.

use crate::time::Duration;

/// Battery charger thresholds. All voltages in mV, currents in mA, power in mW.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChargeConfig {
    /// Absorb (maximum charge) voltage
    pub absorb_mv: u16,
    /// Float voltage
    pub float_mv: u16,
    /// Float drops back to bulk below `float_mv - float_exit_margin_mv`
    pub float_exit_margin_mv: u16,
    /// Overvoltage trips above `absorb_mv + overvoltage_margin_mv`
    pub overvoltage_margin_mv: u16,
    /// Load rail is disconnected below this
    pub battery_low_mv: u16,
    /// Load rail reconnects above this
    pub battery_reconnect_mv: u16,
    /// Battery counts as connected above this
    pub battery_present_mv: u16,
    /// Minimum panel voltage for startup; below it the charger goes to night
    pub panel_min_mv: u16,
    /// Panel must exceed the battery by this much to start
    pub panel_start_delta_mv: u16,
    /// Panel counts as connected above this
    pub panel_present_mv: u16,
    /// Absorb hands over to float once charge current falls below this
    pub absorb_exit_ma: u16,
    /// PV short circuit: current above this...
    pub pv_short_ma: u16,
    /// ...while voltage is below this
    pub pv_short_mv: u16,
    /// Duty applied when leaving startup (ticks)
    pub startup_duty_ticks: u16,
    /// P&O step size (ticks)
    pub perturb_step_ticks: u16,
    /// Minimum power change the tracker reacts to
    pub power_threshold_mw: u32,
    /// Consecutive improvements required before stepping
    pub hysteresis_count: u8,
    /// Constant voltage loop divisor (mV of error per tick of correction)
    pub cv_divisor_mv: i32,
    /// Control loop period
    pub update_interval: Duration,
    /// Time spent in startup before switching starts
    pub startup_delay: Duration,
}

impl ChargeConfig {
    pub const DEFAULT: Self = Self {
        absorb_mv: 28_800,
        float_mv: 27_400,
        float_exit_margin_mv: 500,
        overvoltage_margin_mv: 500,
        battery_low_mv: 21_000,
        battery_reconnect_mv: 24_000,
        battery_present_mv: 10_000,
        panel_min_mv: 25_000,
        panel_start_delta_mv: 1_000,
        panel_present_mv: 5_000,
        absorb_exit_ma: 5_000,
        pv_short_ma: 15_000,
        pv_short_mv: 5_000,
        startup_duty_ticks: 12,
        perturb_step_ticks: 1,
        power_threshold_mw: 50,
        hysteresis_count: 3,
        cv_divisor_mv: 100,
        update_interval: Duration::from_ticks(100),
        startup_delay: Duration::from_ticks(1_000),
    };
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Valve actuator timing and stall thresholds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValveConfig {
    /// Settling time after powering the driver, before motion starts
    pub power_up_delay: Duration,
    /// Stall checks are suppressed for this long after motion starts
    pub inrush_guard: Duration,
    /// Motion taking longer than this is a fault
    pub motion_timeout: Duration,
    /// Motor current above this means end of travel (mA)
    pub stall_current_ma: u16,
    /// Fewer encoder pulses than this per check means end of travel
    pub min_encoder_delta: u32,
    /// Encoder check only runs above this commanded speed (%)
    pub encoder_check_min_speed: u8,
    /// Speed commanded while powering up (%)
    pub start_speed: u8,
    /// Soft start increment per step (%)
    pub ramp_step: u8,
}

impl ValveConfig {
    pub const DEFAULT: Self = Self {
        power_up_delay: Duration::from_ticks(100),
        inrush_guard: Duration::from_ticks(500),
        motion_timeout: Duration::from_ticks(15_000),
        stall_current_ma: 1_200,
        min_encoder_delta: 5,
        encoder_check_min_speed: 50,
        start_speed: 20,
        ramp_step: 5,
    };
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Field bus settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetryConfig {
    /// Bus address this device answers to
    pub device_id: u8,
}

impl TelemetryConfig {
    pub const DEFAULT: Self = Self { device_id: 0x01 };
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Flow protection limits in litres per hour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowConfig {
    /// Flow through a closed valve above this is a leak
    pub leak_limit_lph: f32,
    /// Flow above this is a burst pipe and closes the valve
    pub burst_limit_lph: f32,
}

impl FlowConfig {
    pub const DEFAULT: Self = Self {
        leak_limit_lph: 10.0,
        burst_limit_lph: 500.0,
    };
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Cooperative scheduler cadences.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduleConfig {
    pub charge_period: Duration,
    pub valve_period: Duration,
    pub flow_period: Duration,
}

impl ScheduleConfig {
    pub const DEFAULT: Self = Self {
        charge_period: Duration::from_ticks(20),
        valve_period: Duration::from_ticks(50),
        flow_period: Duration::from_ticks(1_000),
    };
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
