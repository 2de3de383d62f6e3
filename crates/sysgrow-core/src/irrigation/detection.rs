//! Irrigation need detection: eligibility gates, request creation, and
//! approval notification dispatch (spec §4.7.1).
//!
//! Grounded in `irrigation_detection_service.py::detect_irrigation_need`,
//! keeping its exact gate order. The hysteresis gate itself
//! (`soil_moisture >= threshold` ⇒ no irrigation need) is evaluated by the
//! plant-sensor controller before this service is even called, matching
//! how the Python source's caller only invokes detection once a moisture
//! deficit is already established.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::{Clock, UnixTimestamp};
use crate::irrigation::model::{
    DetectionSnapshot, EligibilityDecision, EligibilityTrace, IrrigationRequest, RequestStatus, SkipReason,
    WorkflowConfig,
};
use crate::irrigation::ports::{NotificationSink, PlantContextResolver};
use crate::irrigation::store::{IrrigationStore, RequestScope};
use crate::sensor::{is_stale, SensorReading};

/// Everything [`DetectionService::detect`] needs about the current reading
/// and plant, mirroring the Python function's long keyword-argument list
/// collapsed into one struct (spec §3 data-model fields live here instead).
#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub unit_id: u64,
    pub user_id: u64,
    pub plant_id: Option<u64>,
    pub actuator_id: Option<String>,
    pub plant_pump_assigned: bool,
    pub plant_name: Option<String>,
    pub sensor_id: Option<String>,
    pub reading: Option<SensorReading>,
    pub soil_moisture: f64,
    pub threshold: f64,
    pub snapshot: DetectionSnapshot,
}

pub struct DetectionService {
    store: Arc<IrrigationStore>,
    notifications: Arc<dyn NotificationSink>,
    plants: Arc<dyn PlantContextResolver>,
    clock: Arc<dyn Clock>,
    stale_reading_seconds: i64,
    cooldown_minutes: i64,
    sensor_missing_alert_minutes: i64,
    last_sensor_missing_alert: tokio::sync::Mutex<HashMap<String, UnixTimestamp>>,
}

impl DetectionService {
    pub fn new(
        store: Arc<IrrigationStore>,
        notifications: Arc<dyn NotificationSink>,
        plants: Arc<dyn PlantContextResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifications,
            plants,
            clock,
            stale_reading_seconds: 1800,
            cooldown_minutes: 60,
            sensor_missing_alert_minutes: 60,
            last_sensor_missing_alert: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_thresholds(mut self, stale_reading_seconds: i64, cooldown_minutes: i64, sensor_missing_alert_minutes: i64) -> Self {
        self.stale_reading_seconds = stale_reading_seconds;
        self.cooldown_minutes = cooldown_minutes;
        self.sensor_missing_alert_minutes = sensor_missing_alert_minutes;
        self
    }

    /// Runs the full eligibility gate chain and, if every gate passes,
    /// creates a pending request and dispatches an approval notification.
    /// Returns the new request id, or `None` if a gate skipped it.
    pub async fn detect(&self, config: &WorkflowConfig, input: DetectionInput) -> Option<u64> {
        let now = self.clock.now();

        if !config.workflow_enabled {
            debug!(unit_id = input.unit_id, "workflow disabled, skipping detection");
            self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::Disabled)).await;
            return None;
        }

        if config.manual_mode_enabled {
            debug!(unit_id = input.unit_id, "manual mode enabled, skipping detection");
            self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::ManualModeNoAuto)).await;
            return None;
        }

        let Some(sensor_id) = input.sensor_id.clone() else {
            debug!(unit_id = input.unit_id, "no sensor id, skipping detection");
            self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::NoSensor)).await;
            self.maybe_notify_sensor_missing(&input, SkipReason::NoSensor).await;
            return None;
        };

        if self.stale_reading_seconds > 0 {
            let stale = match &input.reading {
                None => true,
                Some(reading) => is_stale(reading.timestamp, now, self.stale_reading_seconds),
            };
            if stale {
                debug!(unit_id = input.unit_id, "stale or missing reading, skipping detection");
                self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::StaleReading)).await;
                self.maybe_notify_sensor_missing(&input, SkipReason::StaleReading).await;
                return None;
            }
        }

        let scope = if input.plant_pump_assigned && (input.plant_id.is_some() || input.actuator_id.is_some()) {
            RequestScope::PlantOrActuator {
                unit_id: input.unit_id,
                plant_id: input.plant_id,
                actuator_id: input.actuator_id.as_ref().and_then(|a| a.parse().ok()),
            }
        } else {
            RequestScope::Unit(input.unit_id)
        };
        if self.store.has_active_request(scope).await {
            debug!(unit_id = input.unit_id, "active request already pending, skipping detection");
            self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::PendingRequest)).await;
            return None;
        }

        if self.cooldown_minutes > 0 {
            if let Some(executed_at) = self.store.last_completed_irrigation(input.unit_id).await {
                if now.seconds_since(executed_at) < self.cooldown_minutes * 60 {
                    debug!(unit_id = input.unit_id, "cooldown active, skipping detection");
                    self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::CooldownActive)).await;
                    return None;
                }
            }
        }

        let scheduled_at = calculate_scheduled_time(now, &config.default_scheduled_time);
        let expires_at = now.saturating_add_secs(i64::from(config.expiration_hours) * 3600);
        let hours_since_last = self
            .store
            .last_completed_irrigation(input.unit_id)
            .await
            .map(|executed_at| now.seconds_since(executed_at) as f64 / 3600.0);

        let mut snapshot = input.snapshot.clone();
        snapshot.hours_since_last_irrigation = hours_since_last;

        let request = IrrigationRequest {
            request_id: 0,
            unit_id: input.unit_id,
            user_id: input.user_id,
            plant_id: input.plant_id,
            actuator_id: input.actuator_id.clone(),
            sensor_id,
            status: RequestStatus::Pending,
            soil_moisture_detected: input.soil_moisture,
            threshold: input.threshold,
            detected_at: now,
            scheduled_at,
            expires_at,
            delayed_until: None,
            user_response: None,
            feedback_id: None,
            snapshot: snapshot.clone(),
            plant_type: snapshot.plant_type.clone(),
            growth_stage: snapshot.growth_stage.clone(),
        };

        let request_id = self.store.create_request(request).await;
        if request_id == 0 {
            self.trace(&input, now, EligibilityDecision::Skip, Some(SkipReason::RequestCreateFailed)).await;
            return None;
        }

        info!(
            request_id,
            unit_id = input.unit_id,
            moisture = input.soil_moisture,
            threshold = input.threshold,
            "created pending irrigation request"
        );
        self.trace(&input, now, EligibilityDecision::Notify, None).await;

        if config.require_approval {
            let display_name = if input.plant_pump_assigned { input.plant_name.as_deref() } else { None };
            let scheduled_display = format_hhmm(scheduled_at);
            if let Some(notification_id) =
                self.notifications
                    .send_approval_request(request_id, input.user_id, input.unit_id, display_name, input.soil_moisture, input.threshold, &scheduled_display)
            {
                self.store
                    .update_request(request_id, |r| r.feedback_id = Some(notification_id))
                    .await;
            }
        }

        Some(request_id)
    }

    async fn trace(&self, input: &DetectionInput, now: UnixTimestamp, decision: EligibilityDecision, skip_reason: Option<SkipReason>) {
        self.store
            .record_eligibility_trace(EligibilityTrace {
                unit_id: input.unit_id,
                plant_id: input.plant_id,
                sensor_id: input.sensor_id.clone(),
                moisture: Some(input.soil_moisture),
                threshold: Some(input.threshold),
                decision,
                skip_reason,
                evaluated_at: now,
            })
            .await;
    }

    async fn maybe_notify_sensor_missing(&self, input: &DetectionInput, reason: SkipReason) {
        if input.user_id == 0 {
            return;
        }
        let throttle_minutes = self.sensor_missing_alert_minutes.max(1);
        let key = format!(
            "{}:{}:{}:{:?}",
            input.unit_id,
            input.sensor_id.as_deref().unwrap_or("none"),
            input.plant_id.map(|p| p.to_string()).unwrap_or_else(|| "none".into()),
            reason
        );
        let now = self.clock.now();
        let mut last_sent = self.last_sensor_missing_alert.lock().await;
        if let Some(sent_at) = last_sent.get(&key) {
            if now.seconds_since(*sent_at) < throttle_minutes * 60 {
                return;
            }
        }
        self.notifications
            .send_sensor_missing_alert(input.user_id, input.unit_id, input.sensor_id.as_deref(), reason == SkipReason::StaleReading);
        last_sent.insert(key, now);
    }
}

/// Rolls `"HH:MM"` forward to the next occurrence at or after `now`,
/// matching `_calculate_scheduled_time`'s "today, else tomorrow" rule.
/// `now` is treated as UTC seconds-of-day (DESIGN.md Q7).
fn calculate_scheduled_time(now: UnixTimestamp, time_str: &str) -> UnixTimestamp {
    const SECONDS_PER_DAY: i64 = 86_400;
    let (hour, minute) = parse_hhmm(time_str).unwrap_or((21, 0));
    let day_start = now.0 - now.0.rem_euclid(SECONDS_PER_DAY);
    let candidate = UnixTimestamp(day_start + hour * 3600 + minute * 60);
    if candidate.0 <= now.0 {
        candidate.saturating_add_secs(SECONDS_PER_DAY)
    } else {
        candidate
    }
}

fn parse_hhmm(s: &str) -> Option<(i64, i64)> {
    let (h, m) = s.split_once(':')?;
    Some((h.trim().parse().ok()?, m.trim().parse().ok()?))
}

fn format_hhmm(ts: UnixTimestamp) -> String {
    const SECONDS_PER_DAY: i64 = 86_400;
    let seconds_of_day = ts.0.rem_euclid(SECONDS_PER_DAY);
    format!("{:02}:{:02}", seconds_of_day / 3600, (seconds_of_day % 3600) / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::irrigation::ports::{NoOpNotificationSink, NoPlantResolver};

    fn detection_input(unit_id: u64) -> DetectionInput {
        DetectionInput {
            unit_id,
            user_id: 1,
            plant_id: None,
            actuator_id: None,
            plant_pump_assigned: false,
            plant_name: None,
            sensor_id: Some("soil-1".into()),
            reading: None,
            soil_moisture: 32.0,
            threshold: 45.0,
            snapshot: DetectionSnapshot::default(),
        }
    }

    fn service(now: i64) -> (DetectionService, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(UnixTimestamp(now)));
        let store = Arc::new(IrrigationStore::new());
        let svc = DetectionService::new(
            store,
            Arc::new(NoOpNotificationSink),
            Arc::new(NoPlantResolver),
            clock.clone(),
        );
        (svc, clock)
    }

    #[tokio::test]
    async fn disabled_workflow_skips_without_creating_a_request() {
        let (svc, _clock) = service(0);
        let config = WorkflowConfig { workflow_enabled: false, ..WorkflowConfig::default() };
        let result = svc.detect(&config, detection_input(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn manual_mode_skips_detection() {
        let (svc, _clock) = service(0);
        let config = WorkflowConfig { manual_mode_enabled: true, ..WorkflowConfig::default() };
        assert!(svc.detect(&config, detection_input(1)).await.is_none());
    }

    #[tokio::test]
    async fn missing_sensor_id_skips_detection() {
        let (svc, _clock) = service(0);
        let config = WorkflowConfig::default();
        let mut input = detection_input(1);
        input.sensor_id = None;
        assert!(svc.detect(&config, input).await.is_none());
    }

    #[tokio::test]
    async fn no_reading_is_treated_as_stale_and_skips() {
        let (svc, _clock) = service(0);
        let config = WorkflowConfig::default();
        assert!(svc.detect(&config, detection_input(1)).await.is_none());
    }

    #[tokio::test]
    async fn fresh_reading_creates_a_pending_request() {
        let (svc, clock) = service(1_000);
        let config = WorkflowConfig::default();
        let mut input = detection_input(1);
        input.reading = Some(SensorReading {
            unit_id: 1,
            sensor_id: "soil-1".into(),
            values: HashMap::new(),
            timestamp: clock.now(),
        });
        let id = svc.detect(&config, input).await;
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn duplicate_active_request_skips_the_second_detection() {
        let (svc, clock) = service(1_000);
        let config = WorkflowConfig::default();
        let mut first = detection_input(1);
        first.reading = Some(SensorReading {
            unit_id: 1,
            sensor_id: "soil-1".into(),
            values: HashMap::new(),
            timestamp: clock.now(),
        });
        assert!(svc.detect(&config, first.clone()).await.is_some());
        assert!(svc.detect(&config, first).await.is_none());
    }

    #[test]
    fn scheduled_time_rolls_to_tomorrow_when_already_past() {
        // 1970-01-01T22:00:00Z
        let now = UnixTimestamp(22 * 3600);
        let scheduled = calculate_scheduled_time(now, "21:00");
        assert_eq!(scheduled.0, 22 * 3600 + (21 * 3600 + 86_400 - 22 * 3600));
        assert_eq!(format_hhmm(scheduled), "21:00");
    }

    #[test]
    fn scheduled_time_stays_today_when_still_ahead() {
        let now = UnixTimestamp(10 * 3600);
        let scheduled = calculate_scheduled_time(now, "21:00");
        assert_eq!(format_hhmm(scheduled), "21:00");
        assert_eq!(scheduled.0 / 86_400, now.0 / 86_400);
    }
}
