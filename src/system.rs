//! Cooperative scheduler.
//!
//! One loop body, called as often as the firmware can manage:
//!
//! | Task      | Cadence        |
//! |-----------|----------------|
//! | telemetry | every call     |
//! | charger   | 20 ms (self-limits to its 100 ms cycle) |
//! | valve     | 50 ms          |
//! | flow      | 1000 ms        |
//!
//! Nothing here blocks. Each engine only touches its own state inside its
//! own step; the field bus reaches the engines through [`FieldDevice`].

use crate::charge::ChargeController;
use crate::config::ScheduleConfig;
use crate::error::TransmitError;
use crate::flow::{Alarms, FlowGuard, FlowMeter};
use crate::motor::MotorDrive;
use crate::power::PowerStage;
use crate::registers::Snapshot;
use crate::sensing::AnalogFrontEnd;
use crate::telemetry::{Dispatch, FieldDevice, Telemetry};
use crate::time::{Duration, Instant, elapsed};
use crate::valve::ValveController;

/// Fixed period task trigger on the wrapping millisecond clock.
#[derive(Clone, Copy, Debug)]
pub struct Cadence {
    period: Duration,
    last: Instant,
}

impl Cadence {
    pub const fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            last: start,
        }
    }

    /// True once `period` has elapsed since the last time this returned true.
    pub fn due(&mut self, now: Instant) -> bool {
        if elapsed(now, self.last) >= self.period {
            self.last = now;
            true
        } else {
            false
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// The engines the field bus talks to.
pub struct Controllers<S, P, M, F> {
    pub charger: ChargeController<S, P>,
    pub valve: ValveController<M>,
    pub flow: FlowGuard<F>,
}

impl<S, P, M, F> FieldDevice for Controllers<S, P, M, F>
where
    S: AnalogFrontEnd,
    P: PowerStage,
    M: MotorDrive,
    F: FlowMeter,
{
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            valve: self.valve.state(),
            charge: self.charger.status(),
            encoder_count: self.valve.encoder_count(),
            alarms: self.flow.alarms(),
        }
    }

    fn open_valve(&mut self) {
        self.valve.open();
    }

    fn close_valve(&mut self) {
        self.valve.close();
    }
}

/// What one pass of the loop did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pass {
    /// Field bus outcome
    pub telemetry: Result<Dispatch, TransmitError>,
    /// A charger control cycle ran
    pub charged: bool,
    /// The valve state machine was stepped
    pub valve_stepped: bool,
    /// The flow check ran; `Some` holds what the measurement detected
    pub flow: Option<Option<Alarms>>,
}

/// Whole device: engines, field bus and their cadences.
pub struct SmartValve<'a, S, P, M, F, W> {
    controllers: Controllers<S, P, M, F>,
    telemetry: Telemetry<'a, W>,
    charge_cadence: Cadence,
    valve_cadence: Cadence,
    flow_cadence: Cadence,
}

impl<'a, S, P, M, F, W> SmartValve<'a, S, P, M, F, W>
where
    S: AnalogFrontEnd,
    P: PowerStage,
    M: MotorDrive,
    F: FlowMeter,
    W: embedded_io::Write,
{
    /// # Arguments
    ///
    /// * `schedule` - task cadences
    /// * `controllers` - charger, valve and flow guard
    /// * `telemetry` - field bus engine
    /// * `now` - boot time; every cadence first fires one period later
    pub fn new(
        schedule: ScheduleConfig,
        controllers: Controllers<S, P, M, F>,
        telemetry: Telemetry<'a, W>,
        now: Instant,
    ) -> Self {
        Self {
            controllers,
            telemetry,
            charge_cadence: Cadence::new(schedule.charge_period, now),
            valve_cadence: Cadence::new(schedule.valve_period, now),
            flow_cadence: Cadence::new(schedule.flow_period, now),
        }
    }

    pub fn controllers(&self) -> &Controllers<S, P, M, F> {
        &self.controllers
    }

    pub fn controllers_mut(&mut self) -> &mut Controllers<S, P, M, F> {
        &mut self.controllers
    }

    /// Runs one pass of the loop at time `now`.
    pub fn run_once(&mut self, now: Instant) -> Pass {
        let telemetry = self.telemetry.step(now, &mut self.controllers);
        if let Err(err) = telemetry {
            warn!("telemetry: {}", err);
        }

        let charged = self.charge_cadence.due(now) && self.controllers.charger.step(now);

        let valve_stepped = self.valve_cadence.due(now);
        if valve_stepped {
            self.controllers.valve.step(self.valve_cadence.period());
        }

        let flow = self.flow_cadence.due(now).then(|| self.check_flow());

        Pass {
            telemetry,
            charged,
            valve_stepped,
            flow,
        }
    }

    fn check_flow(&mut self) -> Option<Alarms> {
        let Controllers { valve, flow, .. } = &mut self.controllers;
        let detected = flow.check(valve.state())?;
        if detected.contains(Alarms::BURST) && valve.close() {
            warn!("flow: closing valve");
        }
        Some(detected)
    }
}
