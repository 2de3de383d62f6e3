//! Irrigation execution: claim → run → complete → post-capture (spec
//! §4.7.3). No direct Python source survived distillation for this piece;
//! it is implemented from the spec's literal algorithm and grounded
//! structurally in the teacher's `scheduler.rs` tick loop — one pass per
//! tick over in-flight work, a local "claimed this tick" count to avoid
//! double-starting within one round-trip window, suspension points kept to
//! the actuator command itself.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::actuator::{ActuatorCommand, ActuatorRegistry};
use crate::bus::{Event, EventBus};
use crate::clock::{Clock, UnixTimestamp};
use crate::irrigation::model::{ExecutionLog, PostCaptureRecommendation, RequestStatus};
use crate::irrigation::ports::PlantContextResolver;
use crate::irrigation::predictor::IrrigationPredictor;
use crate::irrigation::store::{IrrigationStore, UnitLockTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionConfig {
    pub default_duration_seconds: u32,
    pub max_duration_seconds: u32,
    pub assumed_flow_ml_s: f64,
    pub post_moisture_delay_s: u32,
    pub hysteresis_margin: f64,
    pub unit_lock_ttl_seconds: i64,
    pub max_claims_per_tick: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_duration_seconds: 45,
            max_duration_seconds: 300,
            assumed_flow_ml_s: 10.0,
            post_moisture_delay_s: 900,
            hysteresis_margin: 2.0,
            unit_lock_ttl_seconds: 600,
            max_claims_per_tick: 10,
        }
    }
}

pub struct ExecutionService {
    store: Arc<IrrigationStore>,
    actuators: Arc<ActuatorRegistry>,
    plants: Arc<dyn PlantContextResolver>,
    predictor: Arc<dyn IrrigationPredictor>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: UnitLockTable,
    config: ExecutionConfig,
}

impl ExecutionService {
    pub fn new(
        store: Arc<IrrigationStore>,
        actuators: Arc<ActuatorRegistry>,
        plants: Arc<dyn PlantContextResolver>,
        predictor: Arc<dyn IrrigationPredictor>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            store,
            actuators,
            plants,
            predictor,
            bus,
            clock,
            locks: UnitLockTable::new(),
            config,
        }
    }

    /// Steps 1-5: claim due requests, acquire the unit lock, resolve the
    /// actuator, plan a duration, and issue the on-command.
    pub async fn run_claims(&self) -> usize {
        let now = self.clock.now();
        let claimed = self.store.claim_due(now, self.config.max_claims_per_tick).await;
        let mut started = 0;
        for request in claimed {
            if !self.locks.try_acquire(request.unit_id, now, self.config.unit_lock_ttl_seconds).await {
                // Lock busy: requeue unchanged (spec §4.7.3 step 2). The
                // original PENDING/DELAYED distinction is not preserved,
                // but Approved is re-claimable on the next tick regardless
                // since `scheduled_at` is already in the past.
                self.store.set_status(request.request_id, RequestStatus::Approved).await;
                continue;
            }

            let actuator_id = request
                .actuator_id
                .clone()
                .or_else(|| {
                    request
                        .plant_id
                        .and_then(|plant_id| self.plants.resolve_by_plant_id(plant_id))
                        .and_then(|plant| plant.preferred_actuator().map(str::to_string))
                });

            let Some(actuator_id) = actuator_id else {
                error!(request_id = request.request_id, unit_id = request.unit_id, "no actuator resolved for irrigation request");
                self.store.set_status(request.request_id, RequestStatus::Failed).await;
                self.locks.release(request.unit_id).await;
                continue;
            };

            let planned = self
                .predictor
                .predict_duration(request.unit_id, self.config.default_duration_seconds)
                .recommended_seconds
                .clamp(30, self.config.max_duration_seconds);

            match self.actuators.command(&actuator_id, ActuatorCommand::TurnOn, now).await {
                Ok(Some(_reading)) => {
                    let log = ExecutionLog {
                        log_id: 0,
                        request_id: Some(request.request_id),
                        unit_id: request.unit_id,
                        actuator_id,
                        triggered_at: now,
                        planned_duration_s: planned,
                        actual_duration_s: None,
                        estimated_volume_ml: f64::from(planned) * self.config.assumed_flow_ml_s,
                        pre_moisture: request.soil_moisture_detected,
                        post_moisture: None,
                        threshold_at_trigger: request.threshold,
                        post_delay_s: self.config.post_moisture_delay_s,
                        recommendation: None,
                    };
                    self.store.create_execution_log(log).await;
                    info!(request_id = request.request_id, unit_id = request.unit_id, planned, "irrigation started");
                    started += 1;
                }
                Ok(None) => {
                    warn!(request_id = request.request_id, unit_id = request.unit_id, "actuator suppressed by cycle-time discipline, failing request");
                    self.store.set_status(request.request_id, RequestStatus::Failed).await;
                    self.locks.release(request.unit_id).await;
                }
                Err(err) => {
                    error!(request_id = request.request_id, unit_id = request.unit_id, error = %err, "on-command failed");
                    self.store.set_status(request.request_id, RequestStatus::Failed).await;
                    self.locks.release(request.unit_id).await;
                }
            }
        }
        started
    }

    /// Step 6: complete any execution whose planned duration has elapsed.
    pub async fn run_completions(&self) -> usize {
        let now = self.clock.now();
        let due = self.store.due_for_completion(now).await;
        let mut completed = 0;
        for (log_id, log) in due {
            match self.actuators.command(&log.actuator_id, ActuatorCommand::TurnOff, now).await {
                Ok(None) => {
                    // Suppressed by cycle-time discipline; retry next tick
                    // rather than declaring completion on an unconfirmed
                    // off-command.
                    warn!(log_id, unit_id = log.unit_id, "off-command suppressed by cycle-time, will retry");
                }
                Ok(Some(_reading)) => {
                    let actual = u32::try_from(now.seconds_since(log.triggered_at)).unwrap_or(log.planned_duration_s);
                    self.store
                        .update_execution_log(log_id, |l| l.actual_duration_s = Some(actual))
                        .await;
                    if let Some(request_id) = log.request_id {
                        self.store.set_status(request_id, RequestStatus::Executed).await;
                    }
                    self.locks.release(log.unit_id).await;
                    self.store.mark_last_completed(log.unit_id, now).await;
                    if let Some(request_id) = log.request_id {
                        self.bus
                            .publish(Event::IrrigationRequestExecuted { unit_id: log.unit_id, request_id })
                            .await;
                    }
                    completed += 1;
                }
                Err(err) => {
                    // Per spec §4.7.3: off-command failure marks FAILED and
                    // fires a safety-off retry. We leave the log pending
                    // completion so the next tick retries the off-command;
                    // the request is marked FAILED immediately so it is not
                    // mistaken for a still-healthy in-flight execution.
                    error!(log_id, unit_id = log.unit_id, error = %err, "off-command failed, will retry");
                    if let Some(request_id) = log.request_id {
                        self.store.set_status(request_id, RequestStatus::Failed).await;
                    }
                }
            }
        }
        completed
    }

    /// Step 7: apply an externally-measured post-moisture reading to a
    /// completed execution log and derive a recommendation. Callers (the
    /// plant-sensor controller) are responsible for only calling this once
    /// `post_delay_s` has elapsed since completion; `due_for_post_capture`
    /// on the store reports which logs are ready.
    pub async fn capture_post_moisture(&self, log_id: u64, post_moisture: f64) -> Option<PostCaptureRecommendation> {
        let hysteresis = self.config.hysteresis_margin;
        let mut recommendation = None;
        self.store
            .update_execution_log(log_id, |log| {
                let delta = post_moisture - log.pre_moisture;
                let derived = if delta < hysteresis {
                    PostCaptureRecommendation::AdjustThreshold
                } else if delta > 2.0 * hysteresis {
                    PostCaptureRecommendation::ReduceDuration
                } else {
                    PostCaptureRecommendation::Maintain
                };
                log.post_moisture = Some(post_moisture);
                log.recommendation = Some(derived);
                recommendation = Some(derived);
            })
            .await;
        recommendation
    }
}
