//! Stateful environment and soil-moisture simulator for local development,
//! standing in for the concrete sensor adapters spec §1 puts out of scope.
//!
//! Grounded in the teacher's `node/src/sim.rs` `SoilMoistureSim`: the same
//! random-walk-with-mean-reversion-plus-drift model and Irwin-Hall Gaussian
//! approximation (no extra dependency beyond the teacher's own `fastrand`),
//! generalized from one ADC channel to the four PID-controlled environment
//! metrics plus soil moisture, all in physical units instead of raw ADC
//! counts.

use std::fmt;

/// Approximate a sample from N(0,1) via the Irwin-Hall method (teacher
/// `sim.rs::approx_std_normal`): sum of 12 uniforms minus 6.
fn approx_std_normal() -> f64 {
    let mut sum = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// One metric's random-walk state: current value, mean-reversion target,
/// drift, and per-tick noise.
#[derive(Debug, Clone, Copy)]
struct Walker {
    value: f64,
    center: f64,
    mean_reversion: f64,
    drift_per_tick: f64,
    noise_sigma: f64,
}

impl Walker {
    fn new(start: f64, center: f64, mean_reversion: f64, drift_per_tick: f64, noise_sigma: f64) -> Self {
        Self {
            value: start,
            center,
            mean_reversion,
            drift_per_tick,
            noise_sigma,
        }
    }

    fn step(&mut self, external_push: f64, lo: f64, hi: f64) -> f64 {
        let pull = self.mean_reversion * (self.center - self.value);
        let walk = gaussian(0.0, self.noise_sigma);
        self.value = (self.value + self.drift_per_tick + pull + walk + external_push).clamp(lo, hi);
        self.value
    }
}

/// Simulated environment profile. `Hot` and `Dry` exercise the climate
/// controller and irrigation detection against a setpoint that is
/// deliberately off-target at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Stable,
    Hot,
    Dry,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Self::Hot,
            "dry" => Self::Dry,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Hot => write!(f, "hot"),
            Self::Dry => write!(f, "dry"),
        }
    }
}

/// One grow unit's simulated environment and soil moisture. Call
/// [`GrowUnitSim::tick`] once per sampling interval; closed-loop actuator
/// feedback (heater/humidifier/injector/pump state) nudges the next
/// reading the way the teacher's `set_watering` flag nudges moisture.
pub struct GrowUnitSim {
    temperature: Walker,
    humidity: Walker,
    co2: Walker,
    lux: Walker,
    soil_moisture: Walker,
    soil_dry_rate_per_tick: f64,
    watering_rate_per_tick: f64,
    watering: bool,
}

impl GrowUnitSim {
    pub fn new(scenario: Scenario) -> Self {
        let (temp_start, temp_drift) = match scenario {
            Scenario::Hot => (27.5, 0.05),
            _ => (23.0, 0.0),
        };
        let (moisture_start, moisture_center) = match scenario {
            Scenario::Dry => (38.0, 35.0),
            _ => (55.0, 55.0),
        };
        Self {
            temperature: Walker::new(temp_start, 24.0, 0.04, temp_drift, 0.15),
            humidity: Walker::new(55.0, 55.0, 0.05, 0.0, 0.6),
            co2: Walker::new(650.0, 650.0, 0.03, 0.0, 8.0),
            lux: Walker::new(12_000.0, 12_000.0, 0.05, 0.0, 150.0),
            soil_moisture: Walker::new(moisture_start, moisture_center, 0.01, 0.0, 0.3),
            soil_dry_rate_per_tick: 0.08,
            watering_rate_per_tick: 4.0,
            watering: false,
        }
    }

    /// Inform the simulator whether a pump/valve is currently open, so the
    /// next soil-moisture sample rises while irrigation is active.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    /// Nudge the temperature walker toward warmer/cooler readings when the
    /// heater or fan is actuated, so the PID loop sees its own effect.
    pub fn apply_heater(&mut self, on: bool) {
        if on {
            self.temperature.value += 0.3;
        }
    }

    pub fn apply_fan(&mut self, on: bool) {
        if on {
            self.temperature.value -= 0.3;
        }
    }

    pub fn apply_humidifier(&mut self, on: bool) {
        if on {
            self.humidity.value += 0.8;
        }
    }

    pub fn apply_dehumidifier(&mut self, on: bool) {
        if on {
            self.humidity.value -= 0.8;
        }
    }

    pub fn apply_co2_injector(&mut self, on: bool) {
        if on {
            self.co2.value += 15.0;
        }
    }

    pub fn apply_light_level(&mut self, level: u8) {
        self.lux.value = 200.0 * f64::from(level);
    }

    /// Advance every walker by one tick and return the new readings.
    pub fn tick(&mut self) -> EnvironmentSample {
        let drying = -self.soil_dry_rate_per_tick;
        let wetting = if self.watering { self.watering_rate_per_tick } else { 0.0 };

        EnvironmentSample {
            temperature: self.temperature.step(0.0, -20.0, 60.0),
            humidity: self.humidity.step(0.0, 0.0, 100.0),
            co2: self.co2.step(0.0, 300.0, 5000.0),
            lux: self.lux.step(0.0, 0.0, 100_000.0),
            soil_moisture: self.soil_moisture.step(drying + wetting, 0.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvironmentSample {
    pub temperature: f64,
    pub humidity: f64,
    pub co2: f64,
    pub lux: f64,
    pub soil_moisture: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_stay_within_physical_bounds() {
        let mut sim = GrowUnitSim::new(Scenario::Hot);
        for _ in 0..200 {
            let sample = sim.tick();
            assert!(sample.temperature >= -20.0 && sample.temperature <= 60.0);
            assert!(sample.humidity >= 0.0 && sample.humidity <= 100.0);
            assert!(sample.soil_moisture >= 0.0 && sample.soil_moisture <= 100.0);
        }
    }

    #[test]
    fn watering_raises_soil_moisture_relative_to_not_watering() {
        let mut dry = GrowUnitSim::new(Scenario::Dry);
        let mut wet = GrowUnitSim::new(Scenario::Dry);
        wet.set_watering(true);

        let mut dry_end = 0.0;
        let mut wet_end = 0.0;
        for _ in 0..50 {
            dry_end = dry.tick().soil_moisture;
            wet_end = wet.tick().soil_moisture;
        }
        assert!(wet_end > dry_end);
    }

    #[test]
    fn scenario_parses_case_insensitively_and_defaults_to_stable() {
        assert_eq!(Scenario::from_str_lossy("HOT"), Scenario::Hot);
        assert_eq!(Scenario::from_str_lossy("dry"), Scenario::Dry);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Stable);
    }
}
