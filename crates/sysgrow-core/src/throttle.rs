//! Throttled persistence: the hybrid time-or-change decision for which
//! sensor samples are worth a database write (spec §4.2).
//!
//! Grounded directly in `throttle_config.py` (the per-metric interval and
//! change-threshold table, `to_dict`/`from_dict` with legacy key aliases)
//! and `throttled_analytics_writer.py::_should_store_metric`. Per
//! DESIGN.md Q5, the first-run fallback to a cached "latest reading" as a
//! change baseline is dropped: the first sample for a metric always
//! stores, full stop, which is both simpler and matches spec §4.2's
//! stated behavior more closely than the Python source's fallback does.

use std::collections::HashMap;

use crate::clock::UnixTimestamp;
use crate::sensor::Metric;

/// Per-metric time interval and change threshold, plus the alert bands
/// pH/EC readings are checked against. Mirrors `ThrottleConfig`'s field
/// set one for one.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub interval_minutes: HashMap<Metric, u32>,
    pub change_threshold: HashMap<Metric, f64>,
    pub use_hybrid_strategy: bool,
    pub throttling_enabled: bool,
    pub ph_warning_min: f64,
    pub ph_warning_max: f64,
    pub ph_critical_min: f64,
    pub ph_critical_max: f64,
    pub ec_warning_max: f64,
    pub ec_critical_max: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        use Metric::*;
        let interval_minutes = HashMap::from([
            (Temperature, 30),
            (Humidity, 30),
            (Co2, 30),
            (Voc, 30),
            (AirQuality, 30),
            (SoilMoisture, 60),
            (Lux, 30),
            (Pressure, 30),
            (Ph, 60),
            (Ec, 60),
        ]);
        let change_threshold = HashMap::from([
            (Temperature, 1.0),
            (Humidity, 5.0),
            (SoilMoisture, 10.0),
            (Co2, 100.0),
            (Voc, 50.0),
            (AirQuality, 10.0),
            (Lux, 50.0),
            (Pressure, 1.0),
            (Ph, 0.2),
            (Ec, 150.0),
        ]);
        Self {
            interval_minutes,
            change_threshold,
            use_hybrid_strategy: true,
            throttling_enabled: true,
            ph_warning_min: 5.2,
            ph_warning_max: 7.2,
            ph_critical_min: 4.5,
            ph_critical_max: 8.0,
            ec_warning_max: 3.0,
            ec_critical_max: 4.5,
        }
    }
}

impl ThrottleConfig {
    fn interval(&self, metric: Metric) -> u32 {
        *self.interval_minutes.get(&metric).unwrap_or(&5)
    }

    fn threshold(&self, metric: Metric) -> f64 {
        *self.change_threshold.get(&metric).unwrap_or(&0.1)
    }

    /// Export as the nested JSON shape `throttle_config.py::to_dict`
    /// produces (spec §6/R2), so callers persisting config as JSON need no
    /// translation layer.
    pub fn to_json(&self) -> serde_json::Value {
        use Metric::*;
        serde_json::json!({
            "time_intervals": {
                "temperature_minutes": self.interval(Temperature),
                "humidity_minutes": self.interval(Humidity),
                "co2_minutes": self.interval(Co2),
                "voc_minutes": self.interval(Voc),
                "air_quality_minutes": self.interval(AirQuality),
                "soil_moisture_minutes": self.interval(SoilMoisture),
                "lux_minutes": self.interval(Lux),
                "pressure_minutes": self.interval(Pressure),
                "ph_minutes": self.interval(Ph),
                "ec_minutes": self.interval(Ec),
            },
            "change_thresholds": {
                "temp_celsius": self.threshold(Temperature),
                "humidity_percent": self.threshold(Humidity),
                "soil_moisture_percent": self.threshold(SoilMoisture),
                "co2": self.threshold(Co2),
                "voc": self.threshold(Voc),
                "air_quality": self.threshold(AirQuality),
                "lux": self.threshold(Lux),
                "pressure_hpa": self.threshold(Pressure),
                "ph": self.threshold(Ph),
                "ec_us_cm": self.threshold(Ec),
            },
            "strategy": if self.use_hybrid_strategy { "hybrid" } else { "time_only" },
            "throttling_enabled": self.throttling_enabled,
            "alert_thresholds": {
                "ph_warning_min": self.ph_warning_min,
                "ph_warning_max": self.ph_warning_max,
                "ph_critical_min": self.ph_critical_min,
                "ph_critical_max": self.ph_critical_max,
                "ec_warning_max": self.ec_warning_max,
                "ec_critical_max": self.ec_critical_max,
            },
        })
    }

    /// Parse the nested JSON shape, honoring the Python source's legacy
    /// combined keys (`temp_humidity_minutes`, `co2_voc_minutes`,
    /// `light_pressure_minutes`, `ph_ec_minutes`) when the per-metric key
    /// is absent, exactly as `throttle_config.py::from_dict` falls back.
    pub fn from_json(data: &serde_json::Value) -> Self {
        let defaults = Self::default();
        let intervals = data.get("time_intervals").cloned().unwrap_or_default();
        let thresholds = data.get("change_thresholds").cloned().unwrap_or_default();
        let alerts = data.get("alert_thresholds").cloned().unwrap_or_default();

        let interval_u32 = |key: &str, legacy: &str, default: u32| -> u32 {
            intervals
                .get(key)
                .or_else(|| intervals.get(legacy))
                .and_then(|v| v.as_u64())
                .map(|v| v as u32)
                .unwrap_or(default)
        };
        let threshold_f64 = |key: &str, default: f64| -> f64 {
            thresholds.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
        };
        let alert_f64 = |key: &str, default: f64| -> f64 {
            alerts.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
        };

        use Metric::*;
        let interval_minutes = HashMap::from([
            (Temperature, interval_u32("temperature_minutes", "temp_humidity_minutes", 30)),
            (Humidity, interval_u32("humidity_minutes", "temp_humidity_minutes", 30)),
            (Co2, interval_u32("co2_minutes", "co2_voc_minutes", 30)),
            (Voc, interval_u32("voc_minutes", "co2_voc_minutes", 30)),
            (AirQuality, interval_u32("air_quality_minutes", "air_quality_minutes", 30)),
            (SoilMoisture, interval_u32("soil_moisture_minutes", "soil_moisture_minutes", 60)),
            (Lux, interval_u32("lux_minutes", "light_pressure_minutes", 30)),
            (Pressure, interval_u32("pressure_minutes", "light_pressure_minutes", 30)),
            (Ph, interval_u32("ph_minutes", "ph_ec_minutes", 60)),
            (Ec, interval_u32("ec_minutes", "ph_ec_minutes", 60)),
        ]);
        let change_threshold = HashMap::from([
            (Temperature, threshold_f64("temp_celsius", defaults.threshold(Temperature))),
            (Humidity, threshold_f64("humidity_percent", defaults.threshold(Humidity))),
            (SoilMoisture, threshold_f64("soil_moisture_percent", defaults.threshold(SoilMoisture))),
            (Co2, threshold_f64("co2", defaults.threshold(Co2))),
            (Voc, threshold_f64("voc", defaults.threshold(Voc))),
            (AirQuality, threshold_f64("air_quality", defaults.threshold(AirQuality))),
            (Lux, threshold_f64("lux", defaults.threshold(Lux))),
            (Pressure, threshold_f64("pressure_hpa", defaults.threshold(Pressure))),
            (Ph, threshold_f64("ph", defaults.threshold(Ph))),
            (Ec, threshold_f64("ec_us_cm", defaults.threshold(Ec))),
        ]);

        Self {
            interval_minutes,
            change_threshold,
            use_hybrid_strategy: data.get("strategy").and_then(|v| v.as_str()).map(|s| s == "hybrid").unwrap_or(true),
            throttling_enabled: data.get("throttling_enabled").and_then(|v| v.as_bool()).unwrap_or(true),
            ph_warning_min: alert_f64("ph_warning_min", 5.2),
            ph_warning_max: alert_f64("ph_warning_max", 7.2),
            ph_critical_min: alert_f64("ph_critical_min", 4.5),
            ph_critical_max: alert_f64("ph_critical_max", 8.0),
            ec_warning_max: alert_f64("ec_warning_max", 3.0),
            ec_critical_max: alert_f64("ec_critical_max", 4.5),
        }
    }
}

/// Per-metric throttle bookkeeping: when it was last written, and what
/// value it was last written with.
#[derive(Debug, Clone, Copy, Default)]
struct MetricState {
    last_insert: Option<UnixTimestamp>,
    last_stored_value: Option<f64>,
}

/// Tracks throttle state across metrics for one controller (spec §4.2).
/// A controller owns one of these per unit it manages.
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    metrics: HashMap<Metric, MetricState>,
}

impl ThrottleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The six-step decision (spec §4.2): if throttling is globally
    /// disabled, always store. Otherwise check the time interval; if the
    /// hybrid strategy is off, that result is final. With hybrid on, a
    /// first-ever sample for the metric always stores, and otherwise a
    /// sample stores if either the interval elapsed or the value moved by
    /// at least the metric's change threshold relative to the last stored
    /// value.
    pub fn should_store(&self, config: &ThrottleConfig, metric: Metric, value: f64, now: UnixTimestamp) -> bool {
        if !config.throttling_enabled {
            return true;
        }

        let state = self.metrics.get(&metric).copied().unwrap_or_default();

        let interval = config.interval(metric);
        let time_elapsed = match state.last_insert {
            None => true,
            Some(last) => now.seconds_since(last) >= i64::from(interval) * 60,
        };

        if !config.use_hybrid_strategy {
            return time_elapsed;
        }

        let Some(baseline) = state.last_stored_value else {
            return true;
        };

        let significant_change = (value - baseline).abs() >= config.threshold(metric);
        time_elapsed || significant_change
    }

    /// Record that `metric` was just stored with `value` at `now`.
    pub fn record_stored(&mut self, metric: Metric, value: f64, now: UnixTimestamp) {
        let entry = self.metrics.entry(metric).or_default();
        entry.last_insert = Some(now);
        entry.last_stored_value = Some(value);
    }
}

/// Alert severity derived from pH/EC bands (spec §4.2's alert thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

pub fn ph_alert_level(config: &ThrottleConfig, ph: f64) -> AlertLevel {
    if ph <= config.ph_critical_min || ph >= config.ph_critical_max {
        AlertLevel::Critical
    } else if ph <= config.ph_warning_min || ph >= config.ph_warning_max {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

pub fn ec_alert_level(config: &ThrottleConfig, ec: f64) -> AlertLevel {
    if ec >= config.ec_critical_max {
        AlertLevel::Critical
    } else if ec >= config.ec_warning_max {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_for_a_metric_always_stores() {
        let config = ThrottleConfig::default();
        let state = ThrottleState::new();
        assert!(state.should_store(&config, Metric::Temperature, 22.0, UnixTimestamp(0)));
    }

    #[test]
    fn unchanged_value_within_interval_is_throttled() {
        let config = ThrottleConfig::default();
        let mut state = ThrottleState::new();
        state.record_stored(Metric::Temperature, 22.0, UnixTimestamp(0));

        let soon = UnixTimestamp(60);
        assert!(!state.should_store(&config, Metric::Temperature, 22.1, soon));
    }

    #[test]
    fn significant_change_stores_even_within_interval() {
        let config = ThrottleConfig::default();
        let mut state = ThrottleState::new();
        state.record_stored(Metric::Temperature, 22.0, UnixTimestamp(0));

        let soon = UnixTimestamp(60);
        assert!(state.should_store(&config, Metric::Temperature, 24.0, soon));
    }

    #[test]
    fn elapsed_interval_stores_even_without_change() {
        let config = ThrottleConfig::default();
        let mut state = ThrottleState::new();
        state.record_stored(Metric::Temperature, 22.0, UnixTimestamp(0));

        let later = UnixTimestamp(31 * 60);
        assert!(state.should_store(&config, Metric::Temperature, 22.0, later));
    }

    #[test]
    fn time_only_strategy_ignores_change_magnitude() {
        let mut config = ThrottleConfig::default();
        config.use_hybrid_strategy = false;
        let mut state = ThrottleState::new();
        state.record_stored(Metric::Temperature, 22.0, UnixTimestamp(0));

        let soon = UnixTimestamp(60);
        assert!(!state.should_store(&config, Metric::Temperature, 40.0, soon));
    }

    #[test]
    fn globally_disabled_throttling_always_stores() {
        let mut config = ThrottleConfig::default();
        config.throttling_enabled = false;
        let mut state = ThrottleState::new();
        state.record_stored(Metric::Temperature, 22.0, UnixTimestamp(0));
        assert!(state.should_store(&config, Metric::Temperature, 22.0, UnixTimestamp(1)));
    }

    #[test]
    fn ph_bands_classify_into_normal_warning_critical() {
        let config = ThrottleConfig::default();
        assert_eq!(ph_alert_level(&config, 6.2), AlertLevel::Normal);
        assert_eq!(ph_alert_level(&config, 5.0), AlertLevel::Warning);
        assert_eq!(ph_alert_level(&config, 4.0), AlertLevel::Critical);
    }

    #[test]
    fn ec_bands_classify_into_normal_warning_critical() {
        let config = ThrottleConfig::default();
        assert_eq!(ec_alert_level(&config, 2.0), AlertLevel::Normal);
        assert_eq!(ec_alert_level(&config, 3.5), AlertLevel::Warning);
        assert_eq!(ec_alert_level(&config, 5.0), AlertLevel::Critical);
    }

    #[test]
    fn json_round_trip_is_the_identity() {
        let config = ThrottleConfig::default();
        let json = config.to_json();
        let restored = ThrottleConfig::from_json(&json);
        assert_eq!(restored.interval_minutes, config.interval_minutes);
        assert_eq!(restored.use_hybrid_strategy, config.use_hybrid_strategy);
        assert_eq!(restored.ph_warning_min, config.ph_warning_min);
    }

    #[test]
    fn legacy_combined_interval_keys_are_honored_as_fallback() {
        let legacy = serde_json::json!({
            "time_intervals": { "temp_humidity_minutes": 15, "co2_voc_minutes": 45 },
        });
        let config = ThrottleConfig::from_json(&legacy);
        assert_eq!(config.interval_minutes[&Metric::Temperature], 15);
        assert_eq!(config.interval_minutes[&Metric::Humidity], 15);
        assert_eq!(config.interval_minutes[&Metric::Co2], 45);
    }
}
