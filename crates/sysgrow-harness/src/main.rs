//! Demo harness: wires the control core into one runnable grow unit,
//! standing in for the MQTT/HTTP/database front ends spec §1 puts out of
//! scope.
//!
//! Grounded in the teacher's hub `main.rs` wiring order (structured
//! logging, env config, then construct-and-run) and its named interval
//! tasks (`WATCHDOG_INTERVAL_SEC`, `PRUNE_INTERVAL_SEC`, ...), here
//! expressed through [`sysgrow_core::clock::IntervalScheduler`] instead of
//! one spawned `tokio::time::interval` per concern.
//!
//! What this binary does:
//! - Registers one [`driver::LoggingDriver`] per actuator kind and, on
//!   every sampling tick, drives them through
//!   [`sysgrow_core::climate::ClimateController`]'s four PID loops.
//! - Runs [`sysgrow_core::plant::PlantSensorController`] against simulated
//!   soil-moisture readings, feeding eligible deficits into the irrigation
//!   workflow.
//! - Polls the irrigation workflow's claim/complete/post-capture/expire
//!   operations on their own intervals, same as the core library expects
//!   any caller to.
//! - Feeds closed-loop actuator state back into the simulator, so the PID
//!   loops and the irrigation detector see the effect of their own
//!   actions on the next sample.

mod driver;
mod plants;
mod sim;

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use sysgrow_core::actuator::{ActuatorDriver, ActuatorKind, ActuatorRegistry};
use sysgrow_core::clock::{Clock, IntervalScheduler, IntervalTask, SystemClock};
use sysgrow_core::climate::{ClimateController, PidGains, Strategy};
use sysgrow_core::irrigation::{
    ExecutionConfig, IrrigationStore, IrrigationWorkflow, IrrigationWorkflowDeps, NoOpNotificationSink, NoOpPredictor, PlantContext,
};
use sysgrow_core::plant::PlantSensorController;
use sysgrow_core::sensor::{Metric, SensorReading};
use sysgrow_core::throttle::ThrottleConfig;

use driver::LoggingDriver;
use plants::DemoPlantDirectory;
use sim::{GrowUnitSim, Scenario};

const UNIT_ID: u64 = 1;
const DEMO_USER_ID: u64 = 1;
const DEMO_PLANT_ID: u64 = 1;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn pid(setpoint: f64, kp: f64, ki: f64, kd: f64, deadband: f64, integral_limit: f64) -> PidGains {
    PidGains {
        kp,
        ki,
        kd,
        setpoint,
        deadband,
        integral_limit,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_else(|_| "stable".into()));
    let sample_every_s = env_u64("SAMPLE_EVERY_S", 5);
    let execution_every_s = env_u64("EXECUTION_EVERY_S", 2);
    let completion_every_s = env_u64("COMPLETION_EVERY_S", 2);
    let post_capture_every_s = env_u64("POST_CAPTURE_EVERY_S", 30);
    let expiry_every_s = env_u64("EXPIRY_EVERY_S", 60);
    let soil_moisture_threshold = env_f64("SOIL_MOISTURE_THRESHOLD", 45.0);

    info!(unit_id = UNIT_ID, %scenario, "sysgrow harness starting");

    // ── Actuators ─────────────────────────────────────────────────────
    let actuators = Arc::new(ActuatorRegistry::new());
    let registrations: [(&str, ActuatorKind); 7] = [
        ("heater-1", ActuatorKind::Heater),
        ("fan-1", ActuatorKind::Fan),
        ("humidifier-1", ActuatorKind::Humidifier),
        ("dehumidifier-1", ActuatorKind::Dehumidifier),
        ("co2-injector-1", ActuatorKind::Co2Injector),
        ("light-dimmer-1", ActuatorKind::LightDimmer),
        ("valve-1", ActuatorKind::Valve),
    ];
    let mut drivers: HashMap<&str, Arc<LoggingDriver>> = HashMap::new();
    for (id, kind) in registrations {
        let driver = Arc::new(LoggingDriver::new(id));
        drivers.insert(id, driver.clone());
        // The valve's on/off window is governed by the irrigation workflow's
        // own planned-duration bookkeeping (min 30s), not the 60s equipment
        // cycle-time gate the climate actuators rely on — Some(0) disables
        // the gate for it so a short irrigation run isn't held open.
        let min_cycle_time = if kind == ActuatorKind::Valve { Some(0) } else { None };
        actuators.register(id, kind, driver as Arc<dyn ActuatorDriver>, min_cycle_time).await;
    }

    // ── Climate control ───────────────────────────────────────────────
    let mut gains = HashMap::new();
    gains.insert(Strategy::Temperature, pid(24.0, 2.0, 0.1, 0.05, 0.5, 50.0));
    gains.insert(Strategy::Humidity, pid(55.0, 1.5, 0.08, 0.02, 2.0, 50.0));
    gains.insert(Strategy::Co2, pid(800.0, 1.0, 0.05, 0.0, 50.0, 500.0));
    gains.insert(Strategy::Lux, pid(60.0, 1.0, 0.05, 0.0, 2.0, 100.0));
    let mut climate = ClimateController::new(gains, 5);
    climate.register_actuators(Strategy::Temperature, "heater-1", Some("fan-1".into()));
    climate.register_actuators(Strategy::Humidity, "humidifier-1", Some("dehumidifier-1".into()));
    climate.register_actuators(Strategy::Co2, "co2-injector-1", None);
    climate.register_actuators(Strategy::Lux, "light-dimmer-1", None);
    let climate = AsyncMutex::new(climate);

    // ── Plants and irrigation ───────────────────────────────────────────
    let plants = Arc::new(DemoPlantDirectory::new());
    plants.register(
        "soil-1",
        PlantContext {
            plant_id: DEMO_PLANT_ID,
            unit_id: UNIT_ID,
            user_id: DEMO_USER_ID,
            plant_type: "tomato".into(),
            growth_stage: "vegetative".into(),
            variety: None,
            strain_variety: None,
            pot_size_l: Some(10.0),
            assigned_pump: None,
            assigned_valve: Some("valve-1".into()),
            target_moisture: soil_moisture_threshold,
        },
    );

    let store = Arc::new(IrrigationStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = IrrigationWorkflowDeps {
        store: store.clone(),
        actuators: actuators.clone(),
        notifications: Arc::new(NoOpNotificationSink),
        plants: plants.clone(),
        predictor: Arc::new(NoOpPredictor),
        threshold_callback: None,
        bayesian: None,
        bus: Arc::new(sysgrow_core::bus::EventBus::default()),
        clock: clock.clone(),
        execution_config: ExecutionConfig::default(),
    };
    let workflow = IrrigationWorkflow::new(deps);
    workflow
        .update_config(UNIT_ID, |c| {
            c.require_approval = false;
        })
        .await;

    let plant_controller = AsyncMutex::new(PlantSensorController::new(
        UNIT_ID,
        store.clone(),
        plants,
        clock.clone(),
        ThrottleConfig::default(),
    ));

    // ── Simulation ──────────────────────────────────────────────────────
    let sim = AsyncMutex::new(GrowUnitSim::new(scenario));

    // ── Scheduler ───────────────────────────────────────────────────────
    let mut scheduler = IntervalScheduler::new(clock.clone());
    scheduler.register(IntervalTask {
        name: "sample",
        period: Duration::from_secs(sample_every_s),
    });
    scheduler.register(IntervalTask {
        name: "execute",
        period: Duration::from_secs(execution_every_s),
    });
    scheduler.register(IntervalTask {
        name: "complete",
        period: Duration::from_secs(completion_every_s),
    });
    scheduler.register(IntervalTask {
        name: "post_capture",
        period: Duration::from_secs(post_capture_every_s),
    });
    scheduler.register(IntervalTask {
        name: "expire",
        period: Duration::from_secs(expiry_every_s),
    });

    let tick_period = Duration::from_secs(1);
    loop {
        tokio::time::sleep(tick_period).await;
        let now = clock.now();

        for task in scheduler.due() {
            match task {
                "sample" => {
                    let watering = drivers.get("valve-1").map(|d| d.is_on()).unwrap_or(false);
                    let sample = {
                        let mut sim = sim.lock().await;
                        sim.set_watering(watering);
                        sim.tick()
                    };

                    info!(
                        unit_id = UNIT_ID,
                        temperature = sample.temperature,
                        humidity = sample.humidity,
                        co2 = sample.co2,
                        lux = sample.lux,
                        soil_moisture = sample.soil_moisture,
                        "environment sample"
                    );

                    {
                        let mut climate = climate.lock().await;
                        let _ = climate.control_temperature(&actuators, sample.temperature, now).await;
                        let _ = climate.control_humidity(&actuators, sample.humidity, now).await;
                        let _ = climate.control_co2(&actuators, sample.co2, now).await;
                        let _ = climate.control_lux(&actuators, sample.lux, now).await;
                    }

                    {
                        let mut sim = sim.lock().await;
                        sim.apply_heater(drivers.get("heater-1").map(|d| d.is_on()).unwrap_or(false));
                        sim.apply_fan(drivers.get("fan-1").map(|d| d.is_on()).unwrap_or(false));
                        sim.apply_humidifier(drivers.get("humidifier-1").map(|d| d.is_on()).unwrap_or(false));
                        sim.apply_dehumidifier(drivers.get("dehumidifier-1").map(|d| d.is_on()).unwrap_or(false));
                        sim.apply_co2_injector(drivers.get("co2-injector-1").map(|d| d.is_on()).unwrap_or(false));
                        sim.apply_light_level(drivers.get("light-dimmer-1").map(|d| d.level()).unwrap_or(0));
                    }

                    let reading = SensorReading::single(UNIT_ID, "soil-1".into(), Metric::SoilMoisture, sample.soil_moisture, now.0);
                    let request_id = {
                        let controller = plant_controller.lock().await;
                        controller.handle_soil_moisture(&workflow, &reading, DEMO_USER_ID).await
                    };
                    if let Some(request_id) = request_id {
                        info!(unit_id = UNIT_ID, request_id, "irrigation request created");
                    }
                }
                "execute" => {
                    let claimed = workflow.execute_due_requests().await;
                    if claimed > 0 {
                        info!(unit_id = UNIT_ID, claimed, "irrigation requests claimed and executed");
                    }
                }
                "complete" => {
                    let completed = workflow.complete_due_executions().await;
                    if completed > 0 {
                        info!(unit_id = UNIT_ID, completed, "irrigation executions completed");
                    }
                }
                "post_capture" => {
                    let recommendations = workflow
                        .capture_due_post_moisture(now, |unit_id| {
                            if unit_id == UNIT_ID {
                                Some(soil_moisture_threshold)
                            } else {
                                None
                            }
                        })
                        .await;
                    for (log_id, recommendation) in recommendations {
                        info!(unit_id = UNIT_ID, log_id, ?recommendation, "post-irrigation moisture captured");
                    }
                }
                "expire" => {
                    let expired = store.expire_due(now).await;
                    if !expired.is_empty() {
                        info!(unit_id = UNIT_ID, count = expired.len(), "irrigation requests expired");
                    }
                }
                _ => {}
            }
        }
    }
}
