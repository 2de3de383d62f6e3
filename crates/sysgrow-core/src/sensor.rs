//! Sensor ingestion: the metric vocabulary and the normalized reading
//! shape published onto the event bus (spec §3/§4.2).
//!
//! Grounded in the teacher's `mqtt.rs` topic/payload parsing (a closed set
//! of recognized shapes, malformed input rejected rather than coerced) and
//! `db.rs::compute_moisture`/the plausibility-margin check ahead of it —
//! here generalized from soil moisture alone to every metric spec §3 names.

use std::collections::HashMap;

use crate::clock::UnixTimestamp;

/// Closed metric vocabulary (spec §3). A tagged enum, not a string key, so
/// an unrecognized metric is a compile-time or deserialize-time error
/// rather than a silently-ignored map entry (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Temperature,
    Humidity,
    SoilMoisture,
    Ph,
    Ec,
    Lux,
    Co2,
    Voc,
    Pressure,
    AirQuality,
}

/// A single sensor's reading, possibly carrying more than one metric in
/// the same sample (a combined temperature+humidity probe, for instance).
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub unit_id: u64,
    pub sensor_id: String,
    pub values: HashMap<Metric, f64>,
    pub timestamp: UnixTimestamp,
}

impl SensorReading {
    pub fn new(unit_id: u64, sensor_id: String, timestamp: i64) -> Self {
        Self {
            unit_id,
            sensor_id,
            values: HashMap::new(),
            timestamp: UnixTimestamp(timestamp),
        }
    }

    /// Convenience constructor for the common single-metric case.
    pub fn single(unit_id: u64, sensor_id: String, metric: Metric, value: f64, timestamp: i64) -> Self {
        let mut values = HashMap::new();
        values.insert(metric, value);
        Self {
            unit_id,
            sensor_id,
            values,
            timestamp: UnixTimestamp(timestamp),
        }
    }

    pub fn with_metric(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

/// Plausible range for each metric. Readings outside this band are
/// rejected rather than stored, mirroring the teacher's calibration-margin
/// check in `db.rs` ahead of a raw-to-physical conversion.
fn plausible_range(metric: Metric) -> (f64, f64) {
    match metric {
        Metric::Temperature => (-20.0, 60.0),
        Metric::Humidity => (0.0, 100.0),
        Metric::SoilMoisture => (0.0, 100.0),
        Metric::Ph => (0.0, 14.0),
        Metric::Ec => (0.0, 20.0),
        Metric::Lux => (0.0, 200_000.0),
        Metric::Co2 => (0.0, 10_000.0),
        Metric::Voc => (0.0, 60_000.0),
        Metric::Pressure => (800.0, 1_200.0),
        Metric::AirQuality => (0.0, 500.0),
    }
}

/// Reject a reading outside its metric's plausible band. Implausible
/// readings are dropped at ingestion rather than clamped, so downstream
/// control loops never see them (unlike the teacher's moisture conversion,
/// which clamps — here a bad enough reading likely means a failing
/// sensor, not a noisy-but-valid one).
pub fn is_plausible(metric: Metric, value: f64) -> bool {
    let (lo, hi) = plausible_range(metric);
    value.is_finite() && value >= lo && value <= hi
}

/// A reading is stale once it is older than `max_age_seconds` relative to
/// `now` (spec §4.7.1's `stale_reading_seconds` gate).
pub fn is_stale(reading_timestamp: UnixTimestamp, now: UnixTimestamp, max_age_seconds: i64) -> bool {
    now.seconds_since(reading_timestamp) > max_age_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_metric_reading_round_trips_value() {
        let reading = SensorReading::single(7, "probe-1".into(), Metric::SoilMoisture, 42.5, 1_000);
        assert_eq!(reading.get(Metric::SoilMoisture), Some(42.5));
        assert_eq!(reading.get(Metric::Temperature), None);
    }

    #[test]
    fn combined_probe_carries_multiple_metrics() {
        let reading = SensorReading::new(1, "combo-1".into(), 1_000)
            .with_metric(Metric::Temperature, 22.0)
            .with_metric(Metric::Humidity, 55.0);
        assert_eq!(reading.get(Metric::Temperature), Some(22.0));
        assert_eq!(reading.get(Metric::Humidity), Some(55.0));
    }

    #[test]
    fn implausible_readings_are_rejected() {
        assert!(!is_plausible(Metric::Humidity, 150.0));
        assert!(!is_plausible(Metric::Ph, -1.0));
        assert!(!is_plausible(Metric::Temperature, f64::NAN));
        assert!(is_plausible(Metric::Temperature, 21.5));
    }

    #[test]
    fn staleness_gate_respects_configured_tolerance() {
        let reading_ts = UnixTimestamp(0);
        assert!(!is_stale(reading_ts, UnixTimestamp(1_800), 1_800));
        assert!(is_stale(reading_ts, UnixTimestamp(1_801), 1_800));
    }
}
