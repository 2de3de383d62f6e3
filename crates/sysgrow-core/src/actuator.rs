//! Actuator registry and the uniform driver interface (spec §2 item 3, §6).
//!
//! Grounded in the teacher's `valve.rs` (one trait, a real GPIO driver and
//! a mock behind a feature flag) and the adapter split in
//! `original_source/app/hardware/adapters/` — only the interface those
//! adapters satisfy is in scope here (concrete MQTT/Modbus/Zigbee drivers
//! are an explicit Non-goal). `actuator_type` becomes a tagged enum per
//! Design Notes §9 rather than the Python source's string field.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock::UnixTimestamp;
use crate::error::{CoreError, CoreResult};

/// Logical actuator kinds named in spec §2 item 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorKind {
    Heater,
    Fan,
    Humidifier,
    Dehumidifier,
    Co2Injector,
    LightDimmer,
    Pump,
    Valve,
}

/// Command issued to a driver (spec §3 `ActuatorCommand`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    TurnOn,
    TurnOff,
    SetLevel(u8),
}

/// State reported back by a driver after every command (spec §3
/// `ActuatorReading`).
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorState {
    On,
    Off,
    Unknown,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorReading {
    pub state: ActuatorState,
    pub level: Option<u8>,
    pub runtime_s: Option<u64>,
    pub error: Option<String>,
}

impl ActuatorReading {
    pub fn on() -> Self {
        Self {
            state: ActuatorState::On,
            level: None,
            runtime_s: None,
            error: None,
        }
    }

    pub fn off() -> Self {
        Self {
            state: ActuatorState::Off,
            level: None,
            runtime_s: None,
            error: None,
        }
    }

    pub fn level(level: u8) -> Self {
        Self {
            state: if level > 0 { ActuatorState::On } else { ActuatorState::Off },
            level: Some(level),
            runtime_s: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: ActuatorState::Error,
            level: None,
            runtime_s: None,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.state == ActuatorState::Error
    }
}

/// The uniform driver interface every adapter satisfies (spec §6). Only
/// `turn_on`/`turn_off` are required; `set_level`/`get_state`/
/// `is_available` fall back to sensible defaults, matching spec's "callers
/// fall back to on/off with level>0 ⇒ on".
#[async_trait::async_trait]
pub trait ActuatorDriver: Send + Sync {
    async fn turn_on(&self) -> CoreResult<ActuatorReading>;
    async fn turn_off(&self) -> CoreResult<ActuatorReading>;

    async fn set_level(&self, level: u8) -> CoreResult<ActuatorReading> {
        if level > 0 {
            self.turn_on().await
        } else {
            self.turn_off().await
        }
    }

    async fn get_state(&self) -> CoreResult<ActuatorState> {
        Ok(ActuatorState::Unknown)
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn cleanup(&self) {}
}

struct RegisteredActuator {
    kind: ActuatorKind,
    driver: Arc<dyn ActuatorDriver>,
    min_cycle_time: Option<u64>,
    last_action_time: Option<UnixTimestamp>,
}

/// Maps logical actuator ids to driver handles. Mutations (register /
/// unregister) take the registry-wide write lock; reads are read-mostly
/// (spec §5).
#[derive(Default)]
pub struct ActuatorRegistry {
    actuators: RwLock<HashMap<String, RegisteredActuator>>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        actuator_id: impl Into<String>,
        kind: ActuatorKind,
        driver: Arc<dyn ActuatorDriver>,
        min_cycle_time: Option<u64>,
    ) {
        self.actuators.write().await.insert(
            actuator_id.into(),
            RegisteredActuator {
                kind,
                driver,
                min_cycle_time,
                last_action_time: None,
            },
        );
    }

    pub async fn unregister(&self, actuator_id: &str) {
        if let Some(actuator) = self.actuators.write().await.remove(actuator_id) {
            actuator.driver.cleanup().await;
        }
    }

    pub async fn kind_of(&self, actuator_id: &str) -> Option<ActuatorKind> {
        self.actuators.read().await.get(actuator_id).map(|a| a.kind)
    }

    /// Cycle-time gate (spec §4.3): a command is suppressed if
    /// `now - last_action_time < min_cycle_time`. Default 60s, per
    /// DESIGN.md Q1: `None` means "use the 60s default", `Some(0)` means
    /// "no gating" and is honored literally.
    async fn cycle_time_elapsed(&self, actuator_id: &str, now: UnixTimestamp) -> bool {
        let actuators = self.actuators.read().await;
        let Some(actuator) = actuators.get(actuator_id) else {
            return true;
        };
        let min_cycle = actuator.min_cycle_time.unwrap_or(60);
        match actuator.last_action_time {
            None => true,
            Some(last) => now.seconds_since(last) as u64 >= min_cycle,
        }
    }

    /// Issue a command, honoring cycle-time gating. Returns `Ok(None)` if
    /// the command was suppressed by cycle-time discipline (not an error —
    /// spec §4.3/T3).
    pub async fn command(
        &self,
        actuator_id: &str,
        command: ActuatorCommand,
        now: UnixTimestamp,
    ) -> CoreResult<Option<ActuatorReading>> {
        if !self.cycle_time_elapsed(actuator_id, now).await {
            return Ok(None);
        }

        let driver = {
            let actuators = self.actuators.read().await;
            let actuator = actuators
                .get(actuator_id)
                .ok_or_else(|| CoreError::InvalidInput(format!("unknown actuator {actuator_id}")))?;
            actuator.driver.clone()
        };

        let reading = match command {
            ActuatorCommand::TurnOn => driver.turn_on().await?,
            ActuatorCommand::TurnOff => driver.turn_off().await?,
            ActuatorCommand::SetLevel(level) => driver.set_level(level).await?,
        };

        let mut actuators = self.actuators.write().await;
        if let Some(actuator) = actuators.get_mut(actuator_id) {
            actuator.last_action_time = Some(now);
        }

        Ok(Some(reading))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// An in-memory driver for tests: records command counts and can be
    /// made to fail on demand, mirroring the teacher's mock `ValveBoard`.
    #[derive(Default)]
    pub struct MockDriver {
        pub on_calls: AtomicU32,
        pub off_calls: AtomicU32,
        pub should_error: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ActuatorDriver for MockDriver {
        async fn turn_on(&self) -> CoreResult<ActuatorReading> {
            self.on_calls.fetch_add(1, Ordering::SeqCst);
            if self.should_error.load(Ordering::SeqCst) {
                return Ok(ActuatorReading::error("mock failure"));
            }
            Ok(ActuatorReading::on())
        }

        async fn turn_off(&self) -> CoreResult<ActuatorReading> {
            self.off_calls.fetch_add(1, Ordering::SeqCst);
            if self.should_error.load(Ordering::SeqCst) {
                return Ok(ActuatorReading::error("mock failure"));
            }
            Ok(ActuatorReading::off())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockDriver;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn cycle_time_suppresses_rapid_repeat_commands() {
        let registry = ActuatorRegistry::new();
        let driver = Arc::new(MockDriver::default());
        registry
            .register("heater-1", ActuatorKind::Heater, driver.clone(), Some(60))
            .await;

        let t0 = UnixTimestamp(0);
        let first = registry
            .command("heater-1", ActuatorCommand::TurnOn, t0)
            .await
            .unwrap();
        assert!(first.is_some());

        let t_soon = UnixTimestamp(30);
        let suppressed = registry
            .command("heater-1", ActuatorCommand::TurnOn, t_soon)
            .await
            .unwrap();
        assert!(suppressed.is_none());
        assert_eq!(driver.on_calls.load(Ordering::SeqCst), 1);

        let t_later = UnixTimestamp(61);
        let allowed = registry
            .command("heater-1", ActuatorCommand::TurnOn, t_later)
            .await
            .unwrap();
        assert!(allowed.is_some());
        assert_eq!(driver.on_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn explicit_zero_cycle_time_disables_gating() {
        let registry = ActuatorRegistry::new();
        let driver = Arc::new(MockDriver::default());
        registry
            .register("fan-1", ActuatorKind::Fan, driver.clone(), Some(0))
            .await;

        for t in [0, 1, 2] {
            registry
                .command("fan-1", ActuatorCommand::TurnOn, UnixTimestamp(t))
                .await
                .unwrap()
                .expect("zero cycle time must never suppress");
        }
        assert_eq!(driver.on_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn set_level_falls_back_to_on_off() {
        let registry = ActuatorRegistry::new();
        let driver = Arc::new(MockDriver::default());
        registry
            .register("dimmer-1", ActuatorKind::LightDimmer, driver.clone(), None)
            .await;

        let reading = registry
            .command("dimmer-1", ActuatorCommand::SetLevel(0), UnixTimestamp(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.state, ActuatorState::Off);
        assert_eq!(driver.off_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_actuator_is_invalid_input() {
        let registry = ActuatorRegistry::new();
        let err = registry
            .command("ghost", ActuatorCommand::TurnOn, UnixTimestamp(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
