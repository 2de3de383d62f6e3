//! Logging actuator driver: no real hardware, state changes go to
//! `tracing` instead of stderr.
//!
//! Grounded in the teacher's mock `ValveBoard` (`valve.rs`, `#[cfg(not(feature
//! = "gpio"))]` branch) — same shape (an in-memory on/off flag, every
//! transition logged), generalized from "valve zone" to any
//! [`sysgrow_core::actuator::ActuatorKind`] since this harness drives all
//! eight logical actuator kinds, not just valves.

use std::sync::atomic::{AtomicU8, Ordering};

use sysgrow_core::actuator::{ActuatorDriver, ActuatorReading, ActuatorState};
use sysgrow_core::error::CoreResult;
use tracing::info;

const STATE_OFF: u8 = 0;
const STATE_ON: u8 = 1;

/// A driver that "actuates" by logging. Tracks on/off state and an
/// optional dimmer level so [`LoggingDriver::is_on`] reflects reality for
/// callers that want to inspect it (tests, demo printouts).
pub struct LoggingDriver {
    label: String,
    state: AtomicU8,
    level: AtomicU8,
}

impl LoggingDriver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: AtomicU8::new(STATE_OFF),
            level: AtomicU8::new(0),
        }
    }

    pub fn is_on(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_ON
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ActuatorDriver for LoggingDriver {
    async fn turn_on(&self) -> CoreResult<ActuatorReading> {
        self.state.store(STATE_ON, Ordering::SeqCst);
        info!(actuator = %self.label, "ON");
        Ok(ActuatorReading::on())
    }

    async fn turn_off(&self) -> CoreResult<ActuatorReading> {
        self.state.store(STATE_OFF, Ordering::SeqCst);
        info!(actuator = %self.label, "OFF");
        Ok(ActuatorReading::off())
    }

    async fn set_level(&self, level: u8) -> CoreResult<ActuatorReading> {
        self.level.store(level, Ordering::SeqCst);
        self.state.store(if level > 0 { STATE_ON } else { STATE_OFF }, Ordering::SeqCst);
        info!(actuator = %self.label, level, "SET_LEVEL");
        Ok(ActuatorReading::level(level))
    }

    async fn get_state(&self) -> CoreResult<ActuatorState> {
        Ok(if self.is_on() { ActuatorState::On } else { ActuatorState::Off })
    }
}
