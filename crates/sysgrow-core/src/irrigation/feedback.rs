//! User response handling, irrigation feedback, and Bayesian threshold
//! learning (spec §4.7.2, §4.7.4).
//!
//! Grounded in `irrigation_feedback_service.py`'s `handle_user_response`/
//! `handle_feedback`, including the volume→threshold-feedback resolution
//! and the Bayesian-adjuster-with-fixed-fallback adjustment path.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bayesian::{BayesianThresholdAdjuster, Direction, ThresholdFeedback};
use crate::bus::{Event, EventBus};
use crate::clock::Clock;
use crate::irrigation::model::{
    ExecutionLog, IrrigationFeedback, PostCaptureRecommendation, RequestStatus, UserResponseKind, WorkflowConfig,
    WorkflowOutcome,
};
use crate::irrigation::ports::{NotificationSink, PlantContextResolver, UnitThresholdCallback};
use crate::irrigation::store::IrrigationStore;

pub struct FeedbackService {
    store: Arc<IrrigationStore>,
    notifications: Arc<dyn NotificationSink>,
    plants: Arc<dyn PlantContextResolver>,
    threshold_callback: Option<Arc<dyn UnitThresholdCallback>>,
    bayesian: Option<Arc<Mutex<BayesianThresholdAdjuster>>>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    hysteresis_margin: f64,
}

impl FeedbackService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<IrrigationStore>,
        notifications: Arc<dyn NotificationSink>,
        plants: Arc<dyn PlantContextResolver>,
        threshold_callback: Option<Arc<dyn UnitThresholdCallback>>,
        bayesian: Option<Arc<Mutex<BayesianThresholdAdjuster>>>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        hysteresis_margin: f64,
    ) -> Self {
        Self {
            store,
            notifications,
            plants,
            threshold_callback,
            bayesian,
            bus,
            clock,
            hysteresis_margin,
        }
    }

    /// Spec §4.7.2: approve/delay/cancel, only from {PENDING, DELAYED}.
    pub async fn handle_user_response(
        &self,
        config: &WorkflowConfig,
        request_id: u64,
        response: UserResponseKind,
        user_id: u64,
        delay_minutes: Option<u32>,
    ) -> WorkflowOutcome {
        let Some(request) = self.store.get_request(request_id).await else {
            return WorkflowOutcome::err("request not found");
        };
        if !request.status.accepts_user_response() {
            return WorkflowOutcome::err(format!("request cannot be modified (status: {:?})", request.status));
        }

        let now = self.clock.now();
        match response {
            UserResponseKind::Approve => {
                self.store
                    .update_request(request_id, |r| {
                        r.status = RequestStatus::Approved;
                        r.user_response = Some(UserResponseKind::Approve);
                    })
                    .await;
                if config.ml_learning_enabled {
                    self.store.record_user_response(user_id, request.unit_id, 1.0, UserResponseKind::Approve).await;
                }
                info!(request_id, user_id, "irrigation request approved");
                self.bus.publish(Event::IrrigationRequestApproved { unit_id: request.unit_id, request_id }).await;
                WorkflowOutcome::ok("Irrigation approved. Will execute at scheduled time.")
            }
            UserResponseKind::Delay => {
                let delay_minutes = delay_minutes.unwrap_or(config.delay_increment_minutes);
                let max_delay_time = request.detected_at.saturating_add_secs(i64::from(config.max_delay_hours) * 3600);
                let new_time = now.saturating_add_secs(i64::from(delay_minutes) * 60);
                if new_time > max_delay_time {
                    return WorkflowOutcome::err(format!("cannot delay beyond {} hours from detection", config.max_delay_hours));
                }
                self.store
                    .update_request(request_id, |r| {
                        r.status = RequestStatus::Delayed;
                        r.user_response = Some(UserResponseKind::Delay);
                        r.delayed_until = Some(new_time);
                    })
                    .await;
                if config.ml_learning_enabled {
                    self.store.record_user_response(user_id, request.unit_id, 0.5, UserResponseKind::Delay).await;
                }
                info!(request_id, user_id, delay_minutes, "irrigation request delayed");
                self.bus.publish(Event::IrrigationRequestDelayed { unit_id: request.unit_id, request_id }).await;
                WorkflowOutcome::ok(format!("Irrigation delayed by {delay_minutes} minutes."))
            }
            UserResponseKind::Cancel => {
                self.store
                    .update_request(request_id, |r| {
                        r.status = RequestStatus::Cancelled;
                        r.user_response = Some(UserResponseKind::Cancel);
                    })
                    .await;
                if config.ml_learning_enabled {
                    self.store.record_user_response(user_id, request.unit_id, -1.0, UserResponseKind::Cancel).await;
                }
                info!(request_id, user_id, "irrigation request cancelled");
                self.bus.publish(Event::IrrigationRequestCancelled { unit_id: request.unit_id, request_id }).await;
                WorkflowOutcome::ok("Irrigation cancelled.")
            }
        }
    }

    /// Spec §4.7.4: volume/timing feedback, threshold-feedback derivation,
    /// and the Bayesian-or-fixed threshold adjustment.
    pub async fn handle_feedback(
        &self,
        config: &WorkflowConfig,
        request_id: u64,
        feedback: IrrigationFeedback,
        user_id: u64,
    ) -> WorkflowOutcome {
        let Some(request) = self.store.get_request(request_id).await else {
            return WorkflowOutcome::err("request not found");
        };

        if config.ml_learning_enabled {
            if let Some(tf) = to_threshold_feedback(feedback) {
                self.store.record_volume_feedback(user_id, tf).await;
            }
        }

        let execution_log = self.store.latest_execution_log_for_request(request_id).await;
        let prior_recommendation = execution_log.as_ref().and_then(|l| l.recommendation);

        let threshold_feedback = self.resolve_threshold_feedback(feedback, execution_log.as_ref(), prior_recommendation);

        let mut adjustment_applied = false;
        if let Some(threshold_feedback) = threshold_feedback {
            if config.ml_threshold_adjustment_enabled {
                adjustment_applied = self.apply_threshold_feedback(&request, threshold_feedback, user_id).await;
            }
        }

        info!(request_id, user_id, ?feedback, adjustment_applied, "received irrigation feedback");
        WorkflowOutcome::ok("Thank you for your feedback!")
    }

    /// Looks a request up by its outstanding feedback-solicitation id
    /// before delegating to [`Self::handle_feedback`] (spec §4.7.4).
    pub async fn handle_feedback_for_feedback_id(
        &self,
        config: &WorkflowConfig,
        feedback_id: u64,
        feedback: IrrigationFeedback,
        user_id: u64,
    ) -> WorkflowOutcome {
        let Some(request) = self.store.get_request_by_feedback_id(feedback_id).await else {
            return WorkflowOutcome::err("no request found for feedback id");
        };
        self.handle_feedback(config, request.request_id, feedback, user_id).await
    }

    fn resolve_threshold_feedback(
        &self,
        feedback: IrrigationFeedback,
        execution_log: Option<&ExecutionLog>,
        prior_recommendation: Option<PostCaptureRecommendation>,
    ) -> Option<IrrigationFeedback> {
        if feedback.is_timing() {
            return Some(if feedback == IrrigationFeedback::TriggeredTooEarly {
                IrrigationFeedback::TooMuch
            } else {
                IrrigationFeedback::TooLittle
            });
        }
        if feedback.is_volume() {
            if let Some(resolved) = self.resolve_threshold_feedback_from_volume(feedback, execution_log) {
                return Some(resolved);
            }
        }
        match (prior_recommendation, feedback) {
            (Some(PostCaptureRecommendation::AdjustThreshold), IrrigationFeedback::TooMuch) => Some(IrrigationFeedback::TooMuch),
            (Some(PostCaptureRecommendation::AdjustThreshold), IrrigationFeedback::TooLittle) => Some(IrrigationFeedback::TooLittle),
            _ => None,
        }
    }

    /// Mirrors `_resolve_threshold_feedback_from_volume`: only confirms the
    /// volume feedback as a threshold signal when the post-moisture reading
    /// is consistent with it.
    fn resolve_threshold_feedback_from_volume(
        &self,
        feedback: IrrigationFeedback,
        execution_log: Option<&ExecutionLog>,
    ) -> Option<IrrigationFeedback> {
        let log = execution_log?;
        let post = log.post_moisture?;
        const EPSILON: f64 = 0.01;
        let target_high = log.threshold_at_trigger + self.hysteresis_margin;
        match feedback {
            IrrigationFeedback::TooMuch if post <= target_high + EPSILON => Some(IrrigationFeedback::TooMuch),
            IrrigationFeedback::TooLittle if post >= log.threshold_at_trigger - EPSILON => Some(IrrigationFeedback::TooLittle),
            _ => None,
        }
    }

    async fn apply_threshold_feedback(
        &self,
        request: &crate::irrigation::model::IrrigationRequest,
        threshold_feedback: IrrigationFeedback,
        user_id: u64,
    ) -> bool {
        let current_threshold = request.threshold;
        let plant_context = match request.plant_id {
            Some(plant_id) => self.plants.resolve_by_plant_id(plant_id),
            None => None,
        };
        let plant_type = request
            .plant_type
            .clone()
            .or_else(|| plant_context.as_ref().map(|p| p.plant_type.clone()))
            .unwrap_or_else(|| "default".to_string());
        let growth_stage = request
            .growth_stage
            .clone()
            .or_else(|| plant_context.as_ref().map(|p| p.growth_stage.clone()))
            .unwrap_or_else(|| "vegetative".to_string());

        let mut adjustment = None;

        if let Some(bayesian) = &self.bayesian {
            let Some(tf) = to_threshold_feedback(threshold_feedback) else {
                return false;
            };
            let counts = self.store.feedback_counts(user_id).await;
            let consistency = BayesianThresholdAdjuster::calculate_user_consistency(counts);
            let now = self.clock.now();

            let result = {
                let mut guard = bayesian.lock().await;
                guard.update_from_feedback(
                    request.unit_id,
                    user_id,
                    tf,
                    current_threshold,
                    &plant_type,
                    &growth_stage,
                    plant_context.as_ref().and_then(|p| p.variety.as_deref()),
                    plant_context.as_ref().and_then(|p| p.strain_variety.as_deref()),
                    plant_context.as_ref().and_then(|p| p.pot_size_l),
                    consistency,
                    None,
                    now.0,
                )
            };

            if result.direction != Direction::Maintain && result.adjustment_amount >= 1.0 {
                let signed = match result.direction {
                    Direction::Increase => result.adjustment_amount,
                    Direction::Decrease => -result.adjustment_amount,
                    Direction::Maintain => 0.0,
                };
                adjustment = Some(signed);
                info!(
                    unit_id = request.unit_id,
                    adjustment = signed,
                    confidence = result.confidence,
                    "applied bayesian threshold adjustment"
                );
            }
        } else {
            adjustment = match threshold_feedback {
                IrrigationFeedback::TooLittle => Some(5.0),
                IrrigationFeedback::TooMuch => Some(-5.0),
                _ => None,
            };
            if let Some(amount) = adjustment {
                info!(unit_id = request.unit_id, adjustment = amount, "applied fixed threshold adjustment");
            }
        }

        let Some(adjustment) = adjustment else {
            return false;
        };
        self.apply_soil_moisture_adjustment(request.unit_id, request.plant_id, current_threshold, adjustment).await;
        true
    }

    async fn apply_soil_moisture_adjustment(&self, unit_id: u64, plant_id: Option<u64>, current_threshold: f64, adjustment: f64) {
        let new_threshold = (current_threshold + adjustment).clamp(0.0, 100.0);
        if let Some(plant_id) = plant_id {
            if self.plants.update_soil_moisture_threshold(plant_id, unit_id, new_threshold) {
                return;
            }
            error!(plant_id, unit_id, "failed to update soil moisture threshold for plant");
            return;
        }
        if let Some(callback) = &self.threshold_callback {
            callback.apply(unit_id, "soil_moisture", adjustment);
            return;
        }
        warn!(unit_id, "no threshold adjustment handler available");
    }
}

fn to_threshold_feedback(feedback: IrrigationFeedback) -> Option<ThresholdFeedback> {
    match feedback {
        IrrigationFeedback::TooLittle => Some(ThresholdFeedback::TooLittle),
        IrrigationFeedback::JustRight => Some(ThresholdFeedback::JustRight),
        IrrigationFeedback::TooMuch => Some(ThresholdFeedback::TooMuch),
        IrrigationFeedback::TriggeredTooEarly | IrrigationFeedback::TriggeredTooLate | IrrigationFeedback::Skipped => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{FakeClock, UnixTimestamp};
    use crate::irrigation::model::DetectionSnapshot;
    use crate::irrigation::ports::{NoOpNotificationSink, NoPlantResolver};
    use crate::irrigation::model::IrrigationRequest;

    fn pending_request() -> IrrigationRequest {
        IrrigationRequest {
            request_id: 0,
            unit_id: 1,
            user_id: 7,
            plant_id: None,
            actuator_id: None,
            sensor_id: "s1".into(),
            status: RequestStatus::Pending,
            soil_moisture_detected: 35.0,
            threshold: 40.0,
            detected_at: UnixTimestamp(0),
            scheduled_at: UnixTimestamp(0),
            expires_at: UnixTimestamp(1_000_000),
            delayed_until: None,
            user_response: None,
            feedback_id: None,
            snapshot: DetectionSnapshot::default(),
            plant_type: None,
            growth_stage: None,
        }
    }

    async fn service(now: i64) -> (FeedbackService, Arc<IrrigationStore>) {
        let store = Arc::new(IrrigationStore::new());
        let svc = FeedbackService::new(
            store.clone(),
            Arc::new(NoOpNotificationSink),
            Arc::new(NoPlantResolver),
            None,
            None,
            Arc::new(EventBus::default()),
            Arc::new(FakeClock::new(UnixTimestamp(now))),
            5.0,
        );
        (svc, store)
    }

    #[tokio::test]
    async fn approve_transitions_to_approved_and_records_a_positive_preference() {
        let (svc, store) = service(0).await;
        let id = store.create_request(pending_request()).await;
        let config = WorkflowConfig::default();

        let outcome = svc.handle_user_response(&config, id, UserResponseKind::Approve, 7, None).await;
        assert!(outcome.ok);
        let request = store.get_request(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Approved);
        let counters = store.preference_counters(7, 1).await;
        assert_eq!(counters.preference_score, 1.0);
    }

    #[tokio::test]
    async fn delay_beyond_max_delay_hours_is_rejected() {
        let (svc, store) = service(0).await;
        let mut request = pending_request();
        request.detected_at = UnixTimestamp(0);
        let id = store.create_request(request).await;
        let config = WorkflowConfig { max_delay_hours: 1, ..WorkflowConfig::default() };

        let outcome = svc.handle_user_response(&config, id, UserResponseKind::Delay, 7, Some(120)).await;
        assert!(!outcome.ok);
        let request = store.get_request(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_a_request_is_terminal() {
        let (svc, store) = service(0).await;
        let id = store.create_request(pending_request()).await;
        let config = WorkflowConfig::default();
        svc.handle_user_response(&config, id, UserResponseKind::Cancel, 7, None).await;

        let outcome = svc.handle_user_response(&config, id, UserResponseKind::Approve, 7, None).await;
        assert!(!outcome.ok);
    }

    #[tokio::test]
    async fn too_little_feedback_applies_fixed_positive_adjustment_without_a_bayesian_learner() {
        let (svc, store) = service(0).await;
        let mut request = pending_request();
        request.status = RequestStatus::Executed;
        let id = store.create_request(request).await;
        let config = WorkflowConfig { ml_threshold_adjustment_enabled: true, ..WorkflowConfig::default() };

        let outcome = svc.handle_feedback(&config, id, IrrigationFeedback::TooLittle, 7).await;
        assert!(outcome.ok);
    }
}
