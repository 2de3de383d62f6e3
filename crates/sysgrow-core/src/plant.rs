//! Plant-Sensor Controller (spec §4.4): subscribes to plant-specific
//! events (soil moisture, pH, EC), resolves per-sensor plant context,
//! evaluates the hysteresis gate, and delegates eligible readings to
//! irrigation detection. Also routes plant metrics through throttled
//! persistence under the `PlantReadings` target rather than the
//! environment `SensorReading` target (spec §4.4's closing paragraph).
//!
//! Grounded in the teacher's zone/sensor lookup maps in `main.rs` (a
//! `HashMap<String, ZoneConfig>` consulted on every MQTT reading before
//! `db.rs::compute_moisture` runs) and `irrigation_detection_service.py`'s
//! injected `plant_service.get_context_for_sensor` call ahead of its own
//! detection gate chain — the hysteresis check (§4.4 step 2) happens here,
//! one layer above `DetectionService::detect`, matching how the Python
//! source's caller only invokes detection once a moisture deficit is
//! already established (see `detection.rs`'s module doc).

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::irrigation::model::{DetectionSnapshot, EligibilityDecision, EligibilityTrace, SkipReason};
use crate::irrigation::ports::PlantContextResolver;
use crate::irrigation::store::IrrigationStore;
use crate::irrigation::workflow::IrrigationWorkflow;
use crate::irrigation::DetectionInput;
use crate::sensor::{Metric, SensorReading};
use crate::throttle::{ThrottleConfig, ThrottleState};

/// One plant-scoped metric write, handed to the caller's persistence sink
/// under the `PlantReadings` target (spec §6) rather than `SensorReadings`.
#[derive(Debug, Clone)]
pub struct PlantMetricSample {
    pub unit_id: u64,
    pub plant_id: Option<u64>,
    pub sensor_id: String,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: crate::clock::UnixTimestamp,
}

/// Evaluates plant readings for irrigation eligibility and throttled
/// persistence (spec §4.4). One instance per unit, owning that unit's
/// throttle state, matching the ownership rule in spec §3 ("each unit
/// exclusively owns... its throttle state").
pub struct PlantSensorController {
    unit_id: u64,
    store: Arc<IrrigationStore>,
    plants: Arc<dyn PlantContextResolver>,
    clock: Arc<dyn Clock>,
    throttle_config: ThrottleConfig,
    throttle_state: ThrottleState,
}

impl PlantSensorController {
    pub fn new(unit_id: u64, store: Arc<IrrigationStore>, plants: Arc<dyn PlantContextResolver>, clock: Arc<dyn Clock>, throttle_config: ThrottleConfig) -> Self {
        Self {
            unit_id,
            store,
            plants,
            clock,
            throttle_config,
            throttle_state: ThrottleState::new(),
        }
    }

    /// Handles one soil-moisture reading for this unit's sensor (spec §4.4
    /// steps 1-3). Resolves plant context, checks the hysteresis gate, and
    /// either records a SKIP trace or delegates to
    /// [`IrrigationWorkflow::detect_irrigation_need`]. Returns the new
    /// request id, if detection created one.
    pub async fn handle_soil_moisture(&self, workflow: &IrrigationWorkflow, reading: &SensorReading, user_id: u64) -> Option<u64> {
        let Some(soil_moisture) = reading.get(Metric::SoilMoisture) else {
            return None;
        };
        let now = self.clock.now();
        let context = self.plants.resolve_by_sensor(self.unit_id, &reading.sensor_id);

        let (threshold, plant_id, actuator_id, plant_pump_assigned, plant_name, plant_type, growth_stage) = match &context {
            Some(ctx) => (
                ctx.target_moisture,
                Some(ctx.plant_id),
                ctx.preferred_actuator().map(str::to_string),
                ctx.assigned_pump.is_some() || ctx.assigned_valve.is_some(),
                None,
                Some(ctx.plant_type.clone()),
                Some(ctx.growth_stage.clone()),
            ),
            None => (45.0, None, None, false, None, None, None),
        };

        if soil_moisture >= threshold {
            debug!(unit_id = self.unit_id, sensor_id = %reading.sensor_id, soil_moisture, threshold, "moisture above target, skipping irrigation detection");
            self.store
                .record_eligibility_trace(EligibilityTrace {
                    unit_id: self.unit_id,
                    plant_id,
                    sensor_id: Some(reading.sensor_id.clone()),
                    moisture: Some(soil_moisture),
                    threshold: Some(threshold),
                    decision: EligibilityDecision::Skip,
                    skip_reason: Some(SkipReason::HysteresisNotMet),
                    evaluated_at: now,
                })
                .await;
            return None;
        }

        let snapshot = DetectionSnapshot {
            plant_type,
            growth_stage,
            ..DetectionSnapshot::default()
        };

        let input = DetectionInput {
            unit_id: self.unit_id,
            user_id,
            plant_id,
            actuator_id,
            plant_pump_assigned,
            plant_name,
            sensor_id: Some(reading.sensor_id.clone()),
            reading: Some(reading.clone()),
            soil_moisture,
            threshold,
            snapshot,
        };
        workflow.detect_irrigation_need(input).await
    }

    /// Throttled-persistence decision for a plant metric (pH, EC, or soil
    /// moisture), writing through the `PlantReadings` target rather than
    /// `SensorReadings` (spec §4.4's closing paragraph). Returns the sample
    /// to persist, if the throttle accepted it; the caller owns the actual
    /// write since persistence backends are out of scope here (spec §1).
    pub fn throttled_plant_sample(&mut self, plant_id: Option<u64>, sensor_id: &str, metric: Metric, value: f64) -> Option<PlantMetricSample> {
        let now = self.clock.now();
        if !self.throttle_state.should_store(&self.throttle_config, metric, value, now) {
            return None;
        }
        self.throttle_state.record_stored(metric, value, now);
        Some(PlantMetricSample {
            unit_id: self.unit_id,
            plant_id,
            sensor_id: sensor_id.to_string(),
            metric,
            value,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorRegistry;
    use crate::bus::EventBus;
    use crate::clock::{FakeClock, UnixTimestamp};
    use crate::irrigation::model::{PlantContext, WorkflowConfig};
    use crate::irrigation::ports::{NoOpNotificationSink, NoPlantResolver};
    use crate::irrigation::predictor::NoOpPredictor;
    use crate::irrigation::{ExecutionConfig, IrrigationWorkflow, IrrigationWorkflowDeps};

    struct FixedPlantResolver(PlantContext);

    impl PlantContextResolver for FixedPlantResolver {
        fn resolve_by_sensor(&self, _unit_id: u64, _sensor_id: &str) -> Option<PlantContext> {
            Some(self.0.clone())
        }
        fn resolve_by_plant_id(&self, _plant_id: u64) -> Option<PlantContext> {
            Some(self.0.clone())
        }
        fn update_soil_moisture_threshold(&self, _plant_id: u64, _unit_id: u64, _new_threshold: f64) -> bool {
            false
        }
    }

    async fn workflow_with(plants: Arc<dyn PlantContextResolver>, now: i64) -> (IrrigationWorkflow, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(UnixTimestamp(now)));
        let deps = IrrigationWorkflowDeps {
            store: Arc::new(IrrigationStore::new()),
            actuators: Arc::new(ActuatorRegistry::new()),
            notifications: Arc::new(NoOpNotificationSink),
            plants,
            predictor: Arc::new(NoOpPredictor),
            threshold_callback: None,
            bayesian: None,
            bus: Arc::new(EventBus::default()),
            clock: clock.clone(),
            execution_config: ExecutionConfig::default(),
        };
        (IrrigationWorkflow::new(deps), clock)
    }

    #[tokio::test]
    async fn moisture_above_target_skips_without_calling_detection() {
        let store = Arc::new(IrrigationStore::new());
        let plants: Arc<dyn PlantContextResolver> = Arc::new(NoPlantResolver);
        let (workflow, clock) = workflow_with(plants.clone(), 1_000).await;
        workflow.update_config(1, |c: &mut WorkflowConfig| c.require_approval = false).await;

        let controller = PlantSensorController::new(1, store.clone(), plants, clock.clone(), ThrottleConfig::default());
        let reading = SensorReading::single(1, "soil-1".into(), Metric::SoilMoisture, 50.0, clock.now().0);

        let request_id = controller.handle_soil_moisture(&workflow, &reading, 7).await;
        assert!(request_id.is_none());
        assert_eq!(store.eligibility_trace_count().await, 1);
    }

    #[tokio::test]
    async fn moisture_below_plant_target_delegates_to_detection() {
        let ctx = PlantContext {
            plant_id: 9,
            unit_id: 1,
            user_id: 7,
            plant_type: "tomato".into(),
            growth_stage: "vegetative".into(),
            variety: None,
            strain_variety: None,
            pot_size_l: Some(10.0),
            assigned_pump: None,
            assigned_valve: Some("valve-1".into()),
            target_moisture: 45.0,
        };
        let store = Arc::new(IrrigationStore::new());
        let plants: Arc<dyn PlantContextResolver> = Arc::new(FixedPlantResolver(ctx));
        let (workflow, clock) = workflow_with(plants.clone(), 1_000).await;
        workflow.update_config(1, |c: &mut WorkflowConfig| c.require_approval = false).await;

        let controller = PlantSensorController::new(1, store.clone(), plants, clock.clone(), ThrottleConfig::default());
        let reading = SensorReading::single(1, "soil-1".into(), Metric::SoilMoisture, 30.0, clock.now().0);

        let request_id = controller.handle_soil_moisture(&workflow, &reading, 7).await;
        assert!(request_id.is_some());
    }

    #[test]
    fn plant_metric_throttling_follows_the_same_hybrid_rule_as_env_metrics() {
        let store = Arc::new(IrrigationStore::new());
        let clock = Arc::new(FakeClock::new(UnixTimestamp(0)));
        let mut controller = PlantSensorController::new(1, store, Arc::new(NoPlantResolver), clock.clone(), ThrottleConfig::default());

        assert!(controller.throttled_plant_sample(None, "ph-1", Metric::Ph, 6.0).is_some());
        clock.advance(1);
        assert!(controller.throttled_plant_sample(None, "ph-1", Metric::Ph, 6.01).is_none());
        clock.advance(1);
        assert!(controller.throttled_plant_sample(None, "ph-1", Metric::Ph, 6.5).is_some());
    }
}
