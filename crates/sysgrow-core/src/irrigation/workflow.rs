//! Thin facade over detection, execution, and feedback (spec §4.7),
//! grounded in `irrigation_workflow_service.py::IrrigationWorkflowService`
//! — "the original 2,193-line god service... split into three focused
//! sub-services" behind one public surface so callers never see the seam.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::actuator::ActuatorRegistry;
use crate::bayesian::BayesianThresholdAdjuster;
use crate::bus::EventBus;
use crate::clock::Clock;
use crate::irrigation::detection::{DetectionInput, DetectionService};
use crate::irrigation::execution::{ExecutionConfig, ExecutionService};
use crate::irrigation::feedback::FeedbackService;
use crate::irrigation::model::{IrrigationFeedback, PostCaptureRecommendation, UserResponseKind, WorkflowConfig, WorkflowOutcome};
use crate::irrigation::ports::{NotificationSink, PlantContextResolver, UnitThresholdCallback};
use crate::irrigation::store::IrrigationStore;

/// Everything the facade needs to build its three sub-services, mirroring
/// the Python constructor's collaborator list minus the pieces explicitly
/// out of scope (scheduler/scheduling-service registration is the harness
/// binary's job, not the library's — spec §1 Non-goal on an HTTP/worker
/// façade).
pub struct IrrigationWorkflowDeps {
    pub store: Arc<IrrigationStore>,
    pub actuators: Arc<ActuatorRegistry>,
    pub notifications: Arc<dyn NotificationSink>,
    pub plants: Arc<dyn PlantContextResolver>,
    pub predictor: Arc<dyn crate::irrigation::predictor::IrrigationPredictor>,
    pub threshold_callback: Option<Arc<dyn UnitThresholdCallback>>,
    pub bayesian: Option<Arc<Mutex<BayesianThresholdAdjuster>>>,
    pub bus: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
    pub execution_config: ExecutionConfig,
}

/// Public API surface: every caller — the harness binary's scheduler loop
/// and any future front-end — talks to this, never to the sub-services
/// directly (spec §4.7's "no callers need to change" guarantee).
pub struct IrrigationWorkflow {
    store: Arc<IrrigationStore>,
    detection: DetectionService,
    execution: ExecutionService,
    feedback: FeedbackService,
    configs: RwLock<HashMap<u64, WorkflowConfig>>,
}

impl IrrigationWorkflow {
    pub fn new(deps: IrrigationWorkflowDeps) -> Self {
        let detection = DetectionService::new(
            deps.store.clone(),
            deps.notifications.clone(),
            deps.plants.clone(),
            deps.clock.clone(),
        );
        let execution = ExecutionService::new(
            deps.store.clone(),
            deps.actuators,
            deps.plants.clone(),
            deps.predictor,
            deps.bus.clone(),
            deps.clock.clone(),
            deps.execution_config,
        );
        let hysteresis_margin = deps.execution_config.hysteresis_margin;
        let feedback = FeedbackService::new(
            deps.store.clone(),
            deps.notifications,
            deps.plants,
            deps.threshold_callback,
            deps.bayesian,
            deps.bus,
            deps.clock,
            hysteresis_margin,
        );
        info!("irrigation workflow initialized");
        Self {
            store: deps.store,
            detection,
            execution,
            feedback,
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_config(&self, unit_id: u64) -> WorkflowConfig {
        self.configs.read().await.get(&unit_id).cloned().unwrap_or_default()
    }

    pub async fn save_config(&self, unit_id: u64, config: WorkflowConfig) {
        self.configs.write().await.insert(unit_id, config);
    }

    pub async fn update_config(&self, unit_id: u64, f: impl FnOnce(&mut WorkflowConfig)) {
        let mut configs = self.configs.write().await;
        let entry = configs.entry(unit_id).or_insert_with(WorkflowConfig::default);
        f(entry);
    }

    /// Delegates to [`DetectionService::detect`] using this unit's cached
    /// config (spec §4.7.1).
    pub async fn detect_irrigation_need(&self, input: DetectionInput) -> Option<u64> {
        let config = self.get_config(input.unit_id).await;
        self.detection.detect(&config, input).await
    }

    /// Delegates to [`ExecutionService::run_claims`] (spec §4.7.3 steps 1-5).
    pub async fn execute_due_requests(&self) -> usize {
        self.execution.run_claims().await
    }

    /// Delegates to [`ExecutionService::run_completions`] (spec §4.7.3 step 6).
    pub async fn complete_due_executions(&self) -> usize {
        self.execution.run_completions().await
    }

    /// Polls the store for execution logs whose post-capture delay has
    /// elapsed, applies `read_moisture` to each, and records the resulting
    /// recommendation (spec §4.7.3 step 7). `read_moisture` is the
    /// caller's live sensor read, since this service owns no sensor
    /// capability of its own (Design Notes §9).
    pub async fn capture_due_post_moisture<F>(&self, now: crate::clock::UnixTimestamp, mut read_moisture: F) -> Vec<(u64, PostCaptureRecommendation)>
    where
        F: FnMut(u64) -> Option<f64>,
    {
        let due = self.store.due_for_post_capture(now).await;
        let mut results = Vec::new();
        for (log_id, log) in due {
            let Some(moisture) = read_moisture(log.unit_id) else {
                continue;
            };
            if let Some(recommendation) = self.execution.capture_post_moisture(log_id, moisture).await {
                results.push((log_id, recommendation));
            }
        }
        results
    }

    /// Delegates to [`FeedbackService::handle_user_response`] (spec §4.7.2).
    pub async fn handle_user_response(
        &self,
        request_id: u64,
        response: UserResponseKind,
        user_id: u64,
        delay_minutes: Option<u32>,
    ) -> WorkflowOutcome {
        let request = self.store.get_request(request_id).await;
        let unit_id = request.map(|r| r.unit_id).unwrap_or_default();
        let config = self.get_config(unit_id).await;
        self.feedback.handle_user_response(&config, request_id, response, user_id, delay_minutes).await
    }

    /// Delegates to [`FeedbackService::handle_feedback`] (spec §4.7.4).
    pub async fn handle_feedback(&self, request_id: u64, feedback: IrrigationFeedback, user_id: u64) -> WorkflowOutcome {
        let request = self.store.get_request(request_id).await;
        let unit_id = request.map(|r| r.unit_id).unwrap_or_default();
        let config = self.get_config(unit_id).await;
        self.feedback.handle_feedback(&config, request_id, feedback, user_id).await
    }

    pub async fn handle_feedback_for_feedback_id(&self, feedback_id: u64, feedback: IrrigationFeedback, user_id: u64) -> WorkflowOutcome {
        let Some(request) = self.store.get_request_by_feedback_id(feedback_id).await else {
            return WorkflowOutcome::err("no request found for feedback id");
        };
        let config = self.get_config(request.unit_id).await;
        self.feedback.handle_feedback_for_feedback_id(&config, feedback_id, feedback, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::test_support::MockDriver;
    use crate::actuator::ActuatorKind;
    use crate::clock::{FakeClock, UnixTimestamp};
    use crate::irrigation::model::DetectionSnapshot;
    use crate::irrigation::ports::{NoOpNotificationSink, NoPlantResolver};
    use crate::irrigation::predictor::NoOpPredictor;
    use crate::sensor::SensorReading;

    async fn workflow(now: i64) -> (IrrigationWorkflow, Arc<FakeClock>, Arc<MockDriver>) {
        let clock = Arc::new(FakeClock::new(UnixTimestamp(now)));
        let store = Arc::new(IrrigationStore::new());
        let actuators = Arc::new(ActuatorRegistry::new());
        let driver = Arc::new(MockDriver::default());
        actuators.register("valve-1", ActuatorKind::Valve, driver.clone(), Some(0)).await;
        let deps = IrrigationWorkflowDeps {
            store,
            actuators,
            notifications: Arc::new(NoOpNotificationSink),
            plants: Arc::new(NoPlantResolver),
            predictor: Arc::new(NoOpPredictor),
            threshold_callback: None,
            bayesian: None,
            bus: Arc::new(EventBus::default()),
            clock: clock.clone(),
            execution_config: ExecutionConfig::default(),
        };
        (IrrigationWorkflow::new(deps), clock, driver)
    }

    #[tokio::test]
    async fn detection_through_execution_runs_end_to_end_without_approval() {
        let (workflow, clock, driver) = workflow(1_000).await;
        workflow
            .update_config(1, |c| {
                c.require_approval = false;
            })
            .await;

        let input = DetectionInput {
            unit_id: 1,
            user_id: 7,
            plant_id: None,
            actuator_id: Some("valve-1".into()),
            plant_pump_assigned: false,
            plant_name: None,
            sensor_id: Some("soil-1".into()),
            reading: Some(SensorReading::new(1, "soil-1".into(), clock.now().0)),
            soil_moisture: 30.0,
            threshold: 45.0,
            snapshot: DetectionSnapshot::default(),
        };
        let request_id = workflow.detect_irrigation_need(input).await;
        assert!(request_id.is_some());

        let request_id = request_id.unwrap();
        let outcome = workflow.handle_user_response(request_id, UserResponseKind::Approve, 7, None).await;
        assert!(outcome.ok);

        assert_eq!(workflow.execute_due_requests().await, 1);
        assert_eq!(driver.on_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        clock.advance(45);
        assert_eq!(workflow.complete_due_executions().await, 1);
        assert_eq!(driver.off_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_request_id_returns_an_error_outcome() {
        let (workflow, _clock, _driver) = workflow(0).await;
        let outcome = workflow.handle_user_response(999, UserResponseKind::Approve, 1, None).await;
        assert!(!outcome.ok);
    }
}
