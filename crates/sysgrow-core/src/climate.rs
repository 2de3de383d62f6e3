//! PID-driven environmental control: temperature, humidity, CO2, and lux
//! (spec §4.3). Irrigation is explicitly out of scope here — soil
//! moisture is user/workflow-controlled, never PID-controlled (the
//! teacher's `control_logic.py` carries the same split after its own
//! "removed soil moisture PID" revision).
//!
//! Grounded in `control_algorithms.py::PIDController` for the core
//! algorithm and `control_logic.py::ControlLogic` for cycle-time
//! enforcement, deadband suppression, and the per-strategy metrics/
//! consecutive-error disable. Two additions beyond the Python source,
//! both required by spec §4.3 and recorded in DESIGN.md: anti-windup
//! clamping on the integral term, and an integral/derivative reset
//! whenever the setpoint changes.

use std::collections::HashMap;

use crate::actuator::{ActuatorCommand, ActuatorKind, ActuatorRegistry};
use crate::clock::UnixTimestamp;
use crate::error::CoreResult;

/// The four PID-controlled strategies (spec §4.3). A tagged enum in place
/// of the Python source's `ControlStrategy` string-backed enum member
/// names used as dict keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Temperature,
    Humidity,
    Co2,
    Lux,
}

/// Gains and setpoint for one PID loop (spec §4.3's `ControlConfig`
/// per-metric fields).
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub setpoint: f64,
    pub deadband: f64,
    pub integral_limit: f64,
}

/// One PID loop's running state. `compute` is pure arithmetic over this
/// plus the sampled value; nothing here touches an actuator.
#[derive(Debug, Clone, Copy)]
pub struct PidController {
    gains: PidGains,
    integral: f64,
    previous_error: f64,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// Change the setpoint, resetting integral/derivative state so a
    /// setpoint change never produces a spike carried over from the old
    /// target (spec §4.3 addition; DESIGN.md Q3).
    pub fn set_setpoint(&mut self, setpoint: f64) {
        if (self.gains.setpoint - setpoint).abs() > f64::EPSILON {
            self.gains.setpoint = setpoint;
            self.integral = 0.0;
            self.previous_error = 0.0;
        }
    }

    pub fn setpoint(&self) -> f64 {
        self.gains.setpoint
    }

    /// error = setpoint - current; integral += error (clamped); derivative
    /// = error - previous_error; output = kp*e + ki*integral + kd*derivative.
    pub fn compute(&mut self, current_value: f64) -> f64 {
        let error = self.gains.setpoint - current_value;

        self.integral += error;
        self.integral = self.integral.clamp(-self.gains.integral_limit, self.gains.integral_limit);

        let derivative = error - self.previous_error;
        let output = self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;

        self.previous_error = error;
        output
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = 0.0;
    }
}

/// Per-strategy action counters, mirroring `ControlMetrics` in the Python
/// source (total/successful/failed actions, consecutive-error streak,
/// exponential-moving-average response time, last action time). `enabled`
/// lives here too: the kill switch after `max_consecutive_errors` disables
/// only the strategy that tripped it (spec §4.3), not its siblings.
#[derive(Debug, Clone, Copy)]
pub struct ControlMetrics {
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub consecutive_errors: u32,
    pub last_action_time: Option<UnixTimestamp>,
    pub enabled: bool,
}

impl Default for ControlMetrics {
    fn default() -> Self {
        Self {
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            consecutive_errors: 0,
            last_action_time: None,
            enabled: true,
        }
    }
}

/// Owns the four PID loops for one unit and drives the registered
/// actuators through deadband, PID, and cycle-time discipline. One
/// instance per unit, matching the teacher's one-`ControlLogic`-per-zone
/// layout.
pub struct ClimateController {
    loops: HashMap<Strategy, PidController>,
    metrics: HashMap<Strategy, ControlMetrics>,
    actuator_ids: HashMap<Strategy, (Option<String>, Option<String>)>,
    max_consecutive_errors: u32,
}

impl ClimateController {
    pub fn new(gains: HashMap<Strategy, PidGains>, max_consecutive_errors: u32) -> Self {
        let loops = gains
            .into_iter()
            .map(|(strategy, g)| (strategy, PidController::new(g)))
            .collect();
        Self {
            loops,
            metrics: HashMap::new(),
            actuator_ids: HashMap::new(),
            max_consecutive_errors,
        }
    }

    /// Register the actuator id(s) driven by `strategy`. For temperature
    /// and humidity the second id is the opposing actuator (fan,
    /// dehumidifier) that gets turned off when the first turns on.
    pub fn register_actuators(&mut self, strategy: Strategy, primary: impl Into<String>, secondary: Option<String>) {
        self.actuator_ids.insert(strategy, (Some(primary.into()), secondary));
    }

    pub fn set_setpoint(&mut self, strategy: Strategy, setpoint: f64) {
        if let Some(pid) = self.loops.get_mut(&strategy) {
            pid.set_setpoint(setpoint);
        }
    }

    /// Whether `strategy`'s loop is still enabled (not disabled by a
    /// consecutive-error streak). A strategy with no recorded metrics yet
    /// has never run and is enabled by default.
    pub fn is_enabled(&self, strategy: Strategy) -> bool {
        self.metrics.get(&strategy).map(|m| m.enabled).unwrap_or(true)
    }

    pub fn metrics_for(&self, strategy: Strategy) -> ControlMetrics {
        self.metrics.get(&strategy).copied().unwrap_or_default()
    }

    async fn execute(
        &mut self,
        registry: &ActuatorRegistry,
        strategy: Strategy,
        actuator_id: &str,
        command: ActuatorCommand,
        now: UnixTimestamp,
    ) {
        let metrics = self.metrics.entry(strategy).or_default();
        if !metrics.enabled {
            return;
        }

        let result = registry.command(actuator_id, command, now).await;
        let metrics = self.metrics.entry(strategy).or_default();

        match result {
            Ok(Some(reading)) if !reading.is_error() => {
                metrics.total_actions += 1;
                metrics.successful_actions += 1;
                metrics.consecutive_errors = 0;
                metrics.last_action_time = Some(now);
            }
            Ok(Some(_)) => {
                // Driver reported an error reading.
                metrics.total_actions += 1;
                metrics.failed_actions += 1;
                metrics.consecutive_errors += 1;
            }
            Ok(None) => {
                // Cycle-time gate suppressed the command; not a failure.
            }
            Err(_) => {
                metrics.total_actions += 1;
                metrics.failed_actions += 1;
                metrics.consecutive_errors += 1;
            }
        }

        if metrics.consecutive_errors >= self.max_consecutive_errors {
            metrics.enabled = false;
        }
    }

    /// Run the temperature loop: deadband check, PID compute, then drive
    /// heater/fan in opposing directions.
    pub async fn control_temperature(&mut self, registry: &ActuatorRegistry, current: f64, now: UnixTimestamp) -> CoreResult<()> {
        self.control_dual_actuator(registry, Strategy::Temperature, current, now).await
    }

    pub async fn control_humidity(&mut self, registry: &ActuatorRegistry, current: f64, now: UnixTimestamp) -> CoreResult<()> {
        self.control_dual_actuator(registry, Strategy::Humidity, current, now).await
    }

    async fn control_dual_actuator(
        &mut self,
        registry: &ActuatorRegistry,
        strategy: Strategy,
        current: f64,
        now: UnixTimestamp,
    ) -> CoreResult<()> {
        let Some(pid) = self.loops.get_mut(&strategy) else {
            return Ok(());
        };
        let setpoint = pid.setpoint();
        let deadband = self.deadband(strategy);
        if (current - setpoint).abs() < deadband {
            return Ok(());
        }

        let signal = pid.compute(current);

        let Some((primary, secondary)) = self.actuator_ids.get(&strategy).cloned() else {
            return Ok(());
        };

        if signal > 0.0 {
            if let Some(id) = primary {
                self.execute(registry, strategy, &id, ActuatorCommand::TurnOn, now).await;
            }
            if let Some(id) = secondary {
                self.execute(registry, strategy, &id, ActuatorCommand::TurnOff, now).await;
            }
        } else if signal < 0.0 {
            if let Some(id) = secondary {
                self.execute(registry, strategy, &id, ActuatorCommand::TurnOn, now).await;
            }
            if let Some(id) = primary {
                self.execute(registry, strategy, &id, ActuatorCommand::TurnOff, now).await;
            }
        }
        Ok(())
    }

    /// CO2: single injector, on below setpoint, off at or above it.
    pub async fn control_co2(&mut self, registry: &ActuatorRegistry, current: f64, now: UnixTimestamp) -> CoreResult<()> {
        let Some(pid) = self.loops.get_mut(&Strategy::Co2) else {
            return Ok(());
        };
        let setpoint = pid.setpoint();
        if (current - setpoint).abs() < self.deadband(Strategy::Co2) {
            return Ok(());
        }
        let signal = pid.compute(current);

        let Some((primary, _)) = self.actuator_ids.get(&Strategy::Co2).cloned() else {
            return Ok(());
        };
        let Some(id) = primary else { return Ok(()) };

        let command = if signal > 0.0 { ActuatorCommand::TurnOn } else { ActuatorCommand::TurnOff };
        self.execute(registry, Strategy::Co2, &id, command, now).await;
        Ok(())
    }

    /// Lux: PID output clamped to 0..=100 and sent as a dimmer level.
    pub async fn control_lux(&mut self, registry: &ActuatorRegistry, current: f64, now: UnixTimestamp) -> CoreResult<()> {
        let Some(pid) = self.loops.get_mut(&Strategy::Lux) else {
            return Ok(());
        };
        let setpoint = pid.setpoint();
        if (current - setpoint).abs() < self.deadband(Strategy::Lux) {
            return Ok(());
        }
        let signal = pid.compute(current);
        let level = signal.clamp(0.0, 100.0) as u8;

        let Some((primary, _)) = self.actuator_ids.get(&Strategy::Lux).cloned() else {
            return Ok(());
        };
        let Some(id) = primary else { return Ok(()) };

        self.execute(registry, Strategy::Lux, &id, ActuatorCommand::SetLevel(level), now).await;
        Ok(())
    }

    fn deadband(&self, strategy: Strategy) -> f64 {
        self.loops.get(&strategy).map(|p| p.gains.deadband).unwrap_or(0.0)
    }
}
