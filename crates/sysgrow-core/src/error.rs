//! Error taxonomy for the control core (spec §7).
//!
//! Workflow-policy "skips" (manual mode, cooldown, pending request) are
//! deliberately *not* represented here — per §7.3 they are not errors,
//! they are recorded as [`crate::irrigation::model::SkipReason`] traces.

/// A structured error kind. Callers match on this rather than strings.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Driver/hardware failure: timeout, protocol failure, unavailable device.
    #[error("actuator {actuator_id} driver error: {message}")]
    Driver {
        actuator_id: String,
        message: String,
    },

    /// Sensor reading missing or stale beyond its configured tolerance.
    #[error("sensor error for unit {unit_id}: {reason}")]
    Sensor { unit_id: u64, reason: String },

    /// Persistence write failed. Per §7.4 this is logged and the sample is
    /// dropped; it is never retried inline.
    #[error("persistence write failed: {0}")]
    Persistence(String),

    /// Unit-lock could not be acquired or a claim race lost. Per §7.6 the
    /// request is left in its current state for the next tick.
    #[error("lock contention: {0}")]
    LockContention(String),

    /// Malformed input: bad time string, out-of-range duration, unknown
    /// actuator kind. The affected call returns this; state is unchanged.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No actuator could be resolved for an irrigation request.
    #[error("no actuator available for unit {unit_id}")]
    NoActuator { unit_id: u64 },
}

/// Result alias used throughout the core library.
pub type CoreResult<T> = Result<T, CoreError>;
