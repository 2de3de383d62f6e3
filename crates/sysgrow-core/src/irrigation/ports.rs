//! Capability-set abstractions the irrigation workflow is wired against
//! (Design Notes §9): small interfaces passed in at construction rather
//! than late-bound setters on a god-service, resolving the cyclic
//! dependencies the Python source handles with `set_notifications_service`/
//! `set_plant_service`/`set_bayesian_adjuster` setter methods.

use crate::irrigation::model::PlantContext;

/// Resolves plant context for a sensor and applies threshold adjustments
/// back onto a plant (spec §4.4, §4.7.4). Grounded in
/// `irrigation_detection_service.py`'s injected `plant_service` and
/// `irrigation_feedback_service.py::_apply_soil_moisture_adjustment`.
pub trait PlantContextResolver: Send + Sync {
    fn resolve_by_sensor(&self, unit_id: u64, sensor_id: &str) -> Option<PlantContext>;
    fn resolve_by_plant_id(&self, plant_id: u64) -> Option<PlantContext>;
    /// Returns `true` if the plant's threshold was updated.
    fn update_soil_moisture_threshold(&self, plant_id: u64, unit_id: u64, new_threshold: f64) -> bool;
}

/// No plants wired; every irrigation is unit-scoped. A valid default per
/// spec §4.8's "a no-op predictor... is a valid implementation" precedent.
pub struct NoPlantResolver;

impl PlantContextResolver for NoPlantResolver {
    fn resolve_by_sensor(&self, _unit_id: u64, _sensor_id: &str) -> Option<PlantContext> {
        None
    }

    fn resolve_by_plant_id(&self, _plant_id: u64) -> Option<PlantContext> {
        None
    }

    fn update_soil_moisture_threshold(&self, _plant_id: u64, _unit_id: u64, _new_threshold: f64) -> bool {
        false
    }
}

/// Notification dispatch the workflow delegates to rather than rendering
/// itself (spec §1 Non-goal: "notification rendering"). Grounded in
/// `irrigation_detection_service.py::_send_approval_notification`/
/// `_maybe_notify_sensor_missing` and
/// `irrigation_feedback_service.py`'s feedback-submission hand-off.
pub trait NotificationSink: Send + Sync {
    /// Dispatch an approval request; returns a notification id to link
    /// back onto the request, if the sink assigns one.
    fn send_approval_request(
        &self,
        request_id: u64,
        user_id: u64,
        unit_id: u64,
        plant_name: Option<&str>,
        soil_moisture: f64,
        threshold: f64,
        scheduled_at_display: &str,
    ) -> Option<u64>;

    /// Throttled "sensor missing/stale" alert (spec §4.7.1, §7.2).
    fn send_sensor_missing_alert(&self, user_id: u64, unit_id: u64, sensor_id: Option<&str>, stale: bool);

    /// Schedule a feedback solicitation after a completed execution (spec
    /// §4.7.3 step 8). Returns a feedback id to link onto the request.
    fn send_feedback_solicitation(&self, request_id: u64, user_id: u64, unit_id: u64) -> Option<u64>;
}

/// Swallows every notification. Useful for unit tests and for deployments
/// that have not wired a notification surface (out of scope per spec §1).
#[derive(Default)]
pub struct NoOpNotificationSink;

impl NotificationSink for NoOpNotificationSink {
    fn send_approval_request(
        &self,
        _request_id: u64,
        _user_id: u64,
        _unit_id: u64,
        _plant_name: Option<&str>,
        _soil_moisture: f64,
        _threshold: f64,
        _scheduled_at_display: &str,
    ) -> Option<u64> {
        None
    }

    fn send_sensor_missing_alert(&self, _user_id: u64, _unit_id: u64, _sensor_id: Option<&str>, _stale: bool) {}

    fn send_feedback_solicitation(&self, _request_id: u64, _user_id: u64, _unit_id: u64) -> Option<u64> {
        None
    }
}

/// Fallback applied when a threshold adjustment has no plant to target
/// (spec §4.7.4: "or to the unit via the injected callback").
pub trait UnitThresholdCallback: Send + Sync {
    fn apply(&self, unit_id: u64, metric: &str, adjustment: f64);
}

impl<F: Fn(u64, &str, f64) + Send + Sync> UnitThresholdCallback for F {
    fn apply(&self, unit_id: u64, metric: &str, adjustment: f64) {
        self(unit_id, metric, adjustment)
    }
}
