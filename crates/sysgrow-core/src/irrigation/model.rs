//! Irrigation workflow data model (spec §3, §4.7.5).
//!
//! Grounded in `irrigation_workflow_service.py`'s `RequestStatus`/
//! `UserResponse` constants and `WorkflowConfig` dataclass, and in
//! `app.enums`'s `IrrigationEligibilityDecision`/`IrrigationSkipReason`
//! (variant names taken verbatim from their usage sites in the retrieved
//! source, since the enum definition modules themselves were not part of
//! the retrieved pack). Status, skip reason, and feedback are tagged enums
//! throughout rather than the Python source's strings, per Design Notes §9.

use std::collections::HashMap;

use crate::clock::UnixTimestamp;

/// §4.7.5's state machine. Terminal states are sticky (T1): no method on
/// [`IrrigationRequest`] offers a transition out of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Approved,
    Delayed,
    Executing,
    Executed,
    Expired,
    Cancelled,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Expired | Self::Cancelled | Self::Failed)
    }

    /// User responses are only accepted from these two states (spec §4.7.2).
    pub fn accepts_user_response(self) -> bool {
        matches!(self, Self::Pending | Self::Delayed)
    }
}

/// Why a detection pass ended in SKIP rather than NOTIFY (spec §4.7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ManualModeNoAuto,
    NoSensor,
    StaleReading,
    PendingRequest,
    CooldownActive,
    HysteresisNotMet,
    RequestCreateFailed,
}

/// Outcome of one pass through the detection gate (spec §4.4/§4.7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityDecision {
    Notify,
    Skip,
}

/// Append-only diagnostic record of one detection pass (spec §3
/// `EligibilityTrace`).
#[derive(Debug, Clone)]
pub struct EligibilityTrace {
    pub unit_id: u64,
    pub plant_id: Option<u64>,
    pub sensor_id: Option<String>,
    pub moisture: Option<f64>,
    pub threshold: Option<f64>,
    pub decision: EligibilityDecision,
    pub skip_reason: Option<SkipReason>,
    pub evaluated_at: UnixTimestamp,
}

/// How the user responded to a pending request (spec §4.7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResponseKind {
    Approve,
    Delay,
    Cancel,
}

/// Categorical feedback on a completed irrigation (spec §4.7.4). Covers
/// both the volume feedbacks (`too_little`/`just_right`/`too_much`) and the
/// timing feedbacks (`triggered_too_early`/`triggered_too_late`), plus
/// `skipped` for a feedback prompt the user declined to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrrigationFeedback {
    TooLittle,
    JustRight,
    TooMuch,
    TriggeredTooEarly,
    TriggeredTooLate,
    Skipped,
}

impl IrrigationFeedback {
    pub fn is_volume(self) -> bool {
        matches!(self, Self::TooLittle | Self::JustRight | Self::TooMuch)
    }

    pub fn is_timing(self) -> bool {
        matches!(self, Self::TriggeredTooEarly | Self::TriggeredTooLate)
    }
}

/// Environment snapshot captured at detection time, persisted on the
/// request for ML context (spec §4.7.1).
#[derive(Debug, Clone, Default)]
pub struct DetectionSnapshot {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub vpd: Option<f64>,
    pub lux: Option<f64>,
    pub plant_type: Option<String>,
    pub growth_stage: Option<String>,
    pub hours_since_last_irrigation: Option<f64>,
}

/// One irrigation request (spec §3 `IrrigationRequest`).
#[derive(Debug, Clone)]
pub struct IrrigationRequest {
    pub request_id: u64,
    pub unit_id: u64,
    pub user_id: u64,
    pub plant_id: Option<u64>,
    pub actuator_id: Option<String>,
    pub sensor_id: String,
    pub status: RequestStatus,
    pub soil_moisture_detected: f64,
    pub threshold: f64,
    pub detected_at: UnixTimestamp,
    pub scheduled_at: UnixTimestamp,
    pub expires_at: UnixTimestamp,
    pub delayed_until: Option<UnixTimestamp>,
    pub user_response: Option<UserResponseKind>,
    pub feedback_id: Option<u64>,
    pub snapshot: DetectionSnapshot,
    pub plant_type: Option<String>,
    pub growth_stage: Option<String>,
}

impl IrrigationRequest {
    /// Whether `now` has passed this request's expiry, regardless of
    /// current status (the caller is responsible for only expiring
    /// non-terminal requests per §4.7.5).
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        now >= self.expires_at
    }
}

/// One execution attempt, including manual triggers (spec §3
/// `ExecutionLog`).
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    pub log_id: u64,
    pub request_id: Option<u64>,
    pub unit_id: u64,
    pub actuator_id: String,
    pub triggered_at: UnixTimestamp,
    pub planned_duration_s: u32,
    pub actual_duration_s: Option<u32>,
    pub estimated_volume_ml: f64,
    pub pre_moisture: f64,
    pub post_moisture: Option<f64>,
    pub threshold_at_trigger: f64,
    pub post_delay_s: u32,
    pub recommendation: Option<PostCaptureRecommendation>,
}

/// Derived from post-capture delta moisture (spec §4.7.3 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostCaptureRecommendation {
    AdjustThreshold,
    ReduceDuration,
    Maintain,
}

/// Per-unit irrigation policy (spec §6 `WorkflowConfig`), grounded in
/// `irrigation_workflow_service.py::WorkflowConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub workflow_enabled: bool,
    pub auto_irrigation_enabled: bool,
    pub manual_mode_enabled: bool,
    pub require_approval: bool,
    pub default_scheduled_time: String,
    pub delay_increment_minutes: u32,
    pub max_delay_hours: u32,
    pub expiration_hours: u32,
    pub send_reminder_before_execution: bool,
    pub reminder_minutes_before: u32,
    pub request_feedback_enabled: bool,
    pub feedback_delay_minutes: u32,
    pub ml_learning_enabled: bool,
    pub ml_threshold_adjustment_enabled: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_enabled: true,
            auto_irrigation_enabled: false,
            manual_mode_enabled: false,
            require_approval: true,
            default_scheduled_time: "21:00".to_string(),
            delay_increment_minutes: 60,
            max_delay_hours: 24,
            expiration_hours: 48,
            send_reminder_before_execution: true,
            reminder_minutes_before: 30,
            request_feedback_enabled: true,
            feedback_delay_minutes: 30,
            ml_learning_enabled: true,
            ml_threshold_adjustment_enabled: false,
        }
    }
}

impl WorkflowConfig {
    /// Round-trip through a flat string map (spec §6/R1).
    pub fn to_dict(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("workflow_enabled".into(), self.workflow_enabled.to_string());
        map.insert("auto_irrigation_enabled".into(), self.auto_irrigation_enabled.to_string());
        map.insert("manual_mode_enabled".into(), self.manual_mode_enabled.to_string());
        map.insert("require_approval".into(), self.require_approval.to_string());
        map.insert("default_scheduled_time".into(), self.default_scheduled_time.clone());
        map.insert("delay_increment_minutes".into(), self.delay_increment_minutes.to_string());
        map.insert("max_delay_hours".into(), self.max_delay_hours.to_string());
        map.insert("expiration_hours".into(), self.expiration_hours.to_string());
        map.insert(
            "send_reminder_before_execution".into(),
            self.send_reminder_before_execution.to_string(),
        );
        map.insert("reminder_minutes_before".into(), self.reminder_minutes_before.to_string());
        map.insert("request_feedback_enabled".into(), self.request_feedback_enabled.to_string());
        map.insert("feedback_delay_minutes".into(), self.feedback_delay_minutes.to_string());
        map.insert("ml_learning_enabled".into(), self.ml_learning_enabled.to_string());
        map.insert(
            "ml_threshold_adjustment_enabled".into(),
            self.ml_threshold_adjustment_enabled.to_string(),
        );
        map
    }

    pub fn from_dict(map: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get_bool = |key: &str, default: bool| -> bool {
            map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let get_u32 = |key: &str, default: u32| -> u32 { map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default) };
        Self {
            workflow_enabled: get_bool("workflow_enabled", defaults.workflow_enabled),
            auto_irrigation_enabled: get_bool("auto_irrigation_enabled", defaults.auto_irrigation_enabled),
            manual_mode_enabled: get_bool("manual_mode_enabled", defaults.manual_mode_enabled),
            require_approval: get_bool("require_approval", defaults.require_approval),
            default_scheduled_time: map
                .get("default_scheduled_time")
                .cloned()
                .unwrap_or(defaults.default_scheduled_time),
            delay_increment_minutes: get_u32("delay_increment_minutes", defaults.delay_increment_minutes),
            max_delay_hours: get_u32("max_delay_hours", defaults.max_delay_hours),
            expiration_hours: get_u32("expiration_hours", defaults.expiration_hours),
            send_reminder_before_execution: get_bool(
                "send_reminder_before_execution",
                defaults.send_reminder_before_execution,
            ),
            reminder_minutes_before: get_u32("reminder_minutes_before", defaults.reminder_minutes_before),
            request_feedback_enabled: get_bool("request_feedback_enabled", defaults.request_feedback_enabled),
            feedback_delay_minutes: get_u32("feedback_delay_minutes", defaults.feedback_delay_minutes),
            ml_learning_enabled: get_bool("ml_learning_enabled", defaults.ml_learning_enabled),
            ml_threshold_adjustment_enabled: get_bool(
                "ml_threshold_adjustment_enabled",
                defaults.ml_threshold_adjustment_enabled,
            ),
        }
    }
}

/// Resolved plant context for one detection pass (spec §3 `PlantContext`),
/// supplied by an injected resolver per Design Notes §9's capability-set
/// pattern rather than a direct repository dependency.
#[derive(Debug, Clone)]
pub struct PlantContext {
    pub plant_id: u64,
    pub unit_id: u64,
    pub user_id: u64,
    pub plant_type: String,
    pub growth_stage: String,
    pub variety: Option<String>,
    pub strain_variety: Option<String>,
    pub pot_size_l: Option<f64>,
    pub assigned_pump: Option<String>,
    pub assigned_valve: Option<String>,
    pub target_moisture: f64,
}

impl PlantContext {
    /// Exactly one of pump/valve may be plant-assigned (spec §3 invariant);
    /// valve takes priority when both are somehow set (spec §4.7.3 step 3).
    pub fn preferred_actuator(&self) -> Option<&str> {
        self.assigned_valve.as_deref().or(self.assigned_pump.as_deref())
    }
}

/// A response `{ok, ...}` shape matching spec §7's "each user-response and
/// feedback call returns `{ok: bool, message|error, ...}`".
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub ok: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl WorkflowOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_config_dict_round_trip_is_the_identity() {
        let config = WorkflowConfig {
            require_approval: false,
            max_delay_hours: 6,
            default_scheduled_time: "06:30".into(),
            ..WorkflowConfig::default()
        };
        let restored = WorkflowConfig::from_dict(&config.to_dict());
        assert_eq!(restored, config);
    }

    #[test]
    fn terminal_statuses_are_correctly_classified() {
        assert!(RequestStatus::Executed.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Executing.is_terminal());
    }

    #[test]
    fn only_pending_and_delayed_accept_user_response() {
        assert!(RequestStatus::Pending.accepts_user_response());
        assert!(RequestStatus::Delayed.accepts_user_response());
        assert!(!RequestStatus::Approved.accepts_user_response());
        assert!(!RequestStatus::Executing.accepts_user_response());
    }

    #[test]
    fn valve_is_preferred_over_pump_when_both_assigned() {
        let ctx = PlantContext {
            plant_id: 1,
            unit_id: 1,
            user_id: 1,
            plant_type: "tomato".into(),
            growth_stage: "vegetative".into(),
            variety: None,
            strain_variety: None,
            pot_size_l: None,
            assigned_pump: Some("pump-1".into()),
            assigned_valve: Some("valve-1".into()),
            target_moisture: 45.0,
        };
        assert_eq!(ctx.preferred_actuator(), Some("valve-1"));
    }
}
