//! In-memory persistence for irrigation requests, execution logs, and
//! eligibility traces (spec §6 "Persisted state (contract, not schema)").
//!
//! A relational schema and its migrations are an explicit Non-goal (spec
//! §1); this struct is the contract's only implementation in scope, and
//! doubles as the backing store the harness binary and the test suite run
//! against. Grounded structurally in the teacher's `db.rs` (one struct
//! owning every table, synchronous methods returning plain values) with
//! `Vec`/`HashMap` standing in for SQLite tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::bayesian::{FeedbackCounts, ThresholdFeedback};
use crate::clock::UnixTimestamp;
use crate::irrigation::model::{EligibilityTrace, ExecutionLog, IrrigationRequest, RequestStatus};

/// Approve/delay/cancel counters for one (user, unit) pair (spec §4.7.2's
/// `preference_score`).
#[derive(Debug, Clone, Copy, Default)]
pub struct UserPreferenceCounters {
    pub approve_count: u32,
    pub delay_count: u32,
    pub cancel_count: u32,
    pub preference_score: f64,
}

/// Per-unit single-flight lock with a TTL, so a crashed execution cannot
/// wedge a unit forever (spec §5 T2, "Unit lock").
#[derive(Default)]
pub struct UnitLockTable {
    expiries: RwLock<HashMap<u64, UnixTimestamp>>,
}

impl UnitLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for `unit_id` if it is free or its prior holder's
    /// TTL has elapsed. Returns `false` if still held.
    pub async fn try_acquire(&self, unit_id: u64, now: UnixTimestamp, ttl_seconds: i64) -> bool {
        let mut expiries = self.expiries.write().await;
        if let Some(expires_at) = expiries.get(&unit_id) {
            if *expires_at > now {
                return false;
            }
        }
        expiries.insert(unit_id, now.saturating_add_secs(ttl_seconds));
        true
    }

    pub async fn release(&self, unit_id: u64) {
        self.expiries.write().await.remove(&unit_id);
    }

    pub async fn is_locked(&self, unit_id: u64, now: UnixTimestamp) -> bool {
        self.expiries
            .read()
            .await
            .get(&unit_id)
            .map(|expires_at| *expires_at > now)
            .unwrap_or(false)
    }
}

/// Scope a duplicate-request check is narrowed to (spec §4.7.1 step 5):
/// the whole unit, or a specific plant/actuator pair when a plant-assigned
/// pump exists.
#[derive(Debug, Clone, Copy)]
pub enum RequestScope {
    Unit(u64),
    PlantOrActuator {
        unit_id: u64,
        plant_id: Option<u64>,
        actuator_id: Option<u64>,
    },
}

#[derive(Default)]
pub struct IrrigationStore {
    requests: RwLock<HashMap<u64, IrrigationRequest>>,
    next_request_id: AtomicU64,
    execution_logs: RwLock<HashMap<u64, ExecutionLog>>,
    next_log_id: AtomicU64,
    eligibility_traces: RwLock<Vec<EligibilityTrace>>,
    last_completed: RwLock<HashMap<u64, UnixTimestamp>>,
    feedback_links: RwLock<HashMap<u64, u64>>,
    preferences: RwLock<HashMap<(u64, u64), UserPreferenceCounters>>,
    volume_feedback: RwLock<HashMap<u64, FeedbackCounts>>,
}

impl IrrigationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_active_request(&self, scope: RequestScope) -> bool {
        let requests = self.requests.read().await;
        requests.values().any(|r| {
            if r.status.is_terminal() {
                return false;
            }
            match scope {
                RequestScope::Unit(unit_id) => r.unit_id == unit_id,
                RequestScope::PlantOrActuator {
                    unit_id,
                    plant_id,
                    actuator_id,
                } => {
                    r.unit_id == unit_id
                        && (plant_id.is_some() && r.plant_id == plant_id
                            || actuator_id.is_some() && r.actuator_id == actuator_id.map(|a| a.to_string()))
                }
            }
        })
    }

    pub async fn create_request(&self, mut request: IrrigationRequest) -> u64 {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        request.request_id = id;
        self.requests.write().await.insert(id, request);
        id
    }

    pub async fn get_request(&self, request_id: u64) -> Option<IrrigationRequest> {
        self.requests.read().await.get(&request_id).cloned()
    }

    pub async fn get_request_by_feedback_id(&self, feedback_id: u64) -> Option<IrrigationRequest> {
        let requests = self.requests.read().await;
        requests.values().find(|r| r.feedback_id == Some(feedback_id)).cloned()
    }

    /// Mutate a request in place; `false` if it does not exist.
    pub async fn update_request<F>(&self, request_id: u64, f: F) -> bool
    where
        F: FnOnce(&mut IrrigationRequest),
    {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&request_id) {
            Some(r) => {
                f(r);
                true
            }
            None => false,
        }
    }

    /// Atomically claim every request whose status is Approved/Delayed and
    /// due, flipping it to Executing in the same write-lock critical
    /// section so no two ticks can both claim it (spec §4.7.3 step 1).
    pub async fn claim_due(&self, now: UnixTimestamp, limit: usize) -> Vec<IrrigationRequest> {
        let mut requests = self.requests.write().await;
        let mut claimed = Vec::new();
        for request in requests.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            let due = match request.status {
                RequestStatus::Approved => request.scheduled_at <= now,
                RequestStatus::Delayed => request.delayed_until.map(|d| d <= now).unwrap_or(false),
                _ => false,
            };
            if due {
                request.status = RequestStatus::Executing;
                claimed.push(request.clone());
            }
        }
        claimed
    }

    /// Expire every non-terminal request past its `expires_at` (spec
    /// §4.7.5's expire edge from PENDING/DELAYED/APPROVED).
    pub async fn expire_due(&self, now: UnixTimestamp) -> Vec<u64> {
        let mut requests = self.requests.write().await;
        let mut expired = Vec::new();
        for request in requests.values_mut() {
            let eligible = matches!(
                request.status,
                RequestStatus::Pending | RequestStatus::Delayed | RequestStatus::Approved
            );
            if eligible && request.is_expired(now) {
                request.status = RequestStatus::Expired;
                expired.push(request.request_id);
            }
        }
        expired
    }

    /// Force a request's status, bypassing the normal transition helpers.
    /// Used to requeue a claimed request that lost the unit-lock race
    /// (spec §4.7.3 step 2: "requeue the request unchanged").
    pub async fn set_status(&self, request_id: u64, status: RequestStatus) -> bool {
        self.update_request(request_id, |r| r.status = status).await
    }

    pub async fn record_user_response(&self, user_id: u64, unit_id: u64, delta: f64, response_kind: crate::irrigation::model::UserResponseKind) {
        use crate::irrigation::model::UserResponseKind::*;
        let mut preferences = self.preferences.write().await;
        let counters = preferences.entry((user_id, unit_id)).or_default();
        counters.preference_score += delta;
        match response_kind {
            Approve => counters.approve_count += 1,
            Delay => counters.delay_count += 1,
            Cancel => counters.cancel_count += 1,
        }
    }

    pub async fn preference_counters(&self, user_id: u64, unit_id: u64) -> UserPreferenceCounters {
        self.preferences.read().await.get(&(user_id, unit_id)).copied().unwrap_or_default()
    }

    /// Record one volume-feedback observation (spec §4.7.4's "update
    /// volume-feedback counters") used to derive the Bayesian learner's
    /// user-consistency input.
    pub async fn record_volume_feedback(&self, user_id: u64, feedback: ThresholdFeedback) {
        let mut counts = self.volume_feedback.write().await;
        let entry = counts.entry(user_id).or_default();
        entry.total += 1;
        match feedback {
            ThresholdFeedback::TooLittle => entry.too_little += 1,
            ThresholdFeedback::JustRight => entry.just_right += 1,
            ThresholdFeedback::TooMuch => entry.too_much += 1,
        }
    }

    pub async fn feedback_counts(&self, user_id: u64) -> FeedbackCounts {
        self.volume_feedback.read().await.get(&user_id).copied().unwrap_or_default()
    }

    pub async fn mark_last_completed(&self, unit_id: u64, executed_at: UnixTimestamp) {
        self.last_completed.write().await.insert(unit_id, executed_at);
    }

    pub async fn last_completed_irrigation(&self, unit_id: u64) -> Option<UnixTimestamp> {
        self.last_completed.read().await.get(&unit_id).copied()
    }

    pub async fn record_eligibility_trace(&self, trace: EligibilityTrace) {
        self.eligibility_traces.write().await.push(trace);
    }

    pub async fn eligibility_trace_count(&self) -> usize {
        self.eligibility_traces.read().await.len()
    }

    pub async fn create_execution_log(&self, mut log: ExecutionLog) -> u64 {
        let id = self.next_log_id.fetch_add(1, Ordering::SeqCst) + 1;
        log.log_id = id;
        if let Some(request_id) = log.request_id {
            self.feedback_links.write().await.entry(request_id).or_insert(id);
        }
        self.execution_logs.write().await.insert(id, log);
        id
    }

    pub async fn update_execution_log<F>(&self, log_id: u64, f: F) -> bool
    where
        F: FnOnce(&mut ExecutionLog),
    {
        let mut logs = self.execution_logs.write().await;
        match logs.get_mut(&log_id) {
            Some(log) => {
                f(log);
                true
            }
            None => false,
        }
    }

    pub async fn latest_execution_log_for_request(&self, request_id: u64) -> Option<ExecutionLog> {
        let logs = self.execution_logs.read().await;
        logs.values()
            .filter(|l| l.request_id == Some(request_id))
            .max_by_key(|l| l.triggered_at)
            .cloned()
    }

    /// Executing requests whose planned duration has elapsed and have not
    /// yet been marked complete (spec §4.7.3 step 6).
    pub async fn due_for_completion(&self, now: UnixTimestamp) -> Vec<(u64, ExecutionLog)> {
        let logs = self.execution_logs.read().await;
        logs.iter()
            .filter(|(_, l)| {
                l.actual_duration_s.is_none()
                    && now.seconds_since(l.triggered_at) >= i64::from(l.planned_duration_s)
            })
            .map(|(id, l)| (*id, l.clone()))
            .collect()
    }

    /// Execution logs whose post-capture delay has elapsed but whose
    /// post-moisture has not yet been recorded (spec §4.7.3 step 7).
    pub async fn due_for_post_capture(&self, now: UnixTimestamp) -> Vec<(u64, ExecutionLog)> {
        let logs = self.execution_logs.read().await;
        logs.iter()
            .filter(|(_, l)| {
                l.actual_duration_s.is_some()
                    && l.post_moisture.is_none()
                    && now.seconds_since(l.triggered_at)
                        >= i64::from(l.planned_duration_s) + i64::from(l.post_delay_s)
            })
            .map(|(id, l)| (*id, l.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irrigation::model::DetectionSnapshot;

    fn sample_request(unit_id: u64, status: RequestStatus) -> IrrigationRequest {
        IrrigationRequest {
            request_id: 0,
            unit_id,
            user_id: 1,
            plant_id: None,
            actuator_id: None,
            sensor_id: "s1".into(),
            status,
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

    #[tokio::test]
    async fn claim_due_atomically_flips_approved_requests_to_executing() {
        let store = IrrigationStore::new();
        let id = store.create_request(sample_request(1, RequestStatus::Approved)).await;

        let claimed = store.claim_due(UnixTimestamp(100), 10).await;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].request_id, id);

        let request = store.get_request(id).await.unwrap();
        assert_eq!(request.status, RequestStatus::Executing);

        // Second claim sees nothing left to take.
        assert!(store.claim_due(UnixTimestamp(200), 10).await.is_empty());
    }

    #[tokio::test]
    async fn delayed_request_only_claimed_after_delayed_until() {
        let store = IrrigationStore::new();
        let mut request = sample_request(1, RequestStatus::Delayed);
        request.delayed_until = Some(UnixTimestamp(500));
        store.create_request(request).await;

        assert!(store.claim_due(UnixTimestamp(100), 10).await.is_empty());
        assert_eq!(store.claim_due(UnixTimestamp(500), 10).await.len(), 1);
    }

    #[tokio::test]
    async fn expire_due_only_touches_non_terminal_requests_past_expiry() {
        let store = IrrigationStore::new();
        let mut expiring = sample_request(1, RequestStatus::Pending);
        expiring.expires_at = UnixTimestamp(100);
        let expiring_id = store.create_request(expiring).await;

        let mut already_done = sample_request(1, RequestStatus::Executed);
        already_done.expires_at = UnixTimestamp(100);
        store.create_request(already_done).await;

        let expired = store.expire_due(UnixTimestamp(200)).await;
        assert_eq!(expired, vec![expiring_id]);
    }

    #[tokio::test]
    async fn unit_lock_blocks_reacquisition_until_ttl_elapses() {
        let locks = UnitLockTable::new();
        assert!(locks.try_acquire(1, UnixTimestamp(0), 60).await);
        assert!(!locks.try_acquire(1, UnixTimestamp(30), 60).await);
        assert!(locks.try_acquire(1, UnixTimestamp(61), 60).await);
    }

    #[tokio::test]
    async fn releasing_a_unit_lock_makes_it_immediately_available() {
        let locks = UnitLockTable::new();
        assert!(locks.try_acquire(1, UnixTimestamp(0), 600).await);
        locks.release(1).await;
        assert!(!locks.is_locked(1, UnixTimestamp(1)).await);
        assert!(locks.try_acquire(1, UnixTimestamp(1), 600).await);
    }

    #[tokio::test]
    async fn preference_counters_accumulate_across_responses() {
        use crate::irrigation::model::UserResponseKind;

        let store = IrrigationStore::new();
        store.record_user_response(7, 1, 1.0, UserResponseKind::Approve).await;
        store.record_user_response(7, 1, -1.0, UserResponseKind::Cancel).await;
        let counters = store.preference_counters(7, 1).await;
        assert_eq!(counters.approve_count, 1);
        assert_eq!(counters.cancel_count, 1);
        assert_eq!(counters.preference_score, 0.0);
    }

    #[tokio::test]
    async fn has_active_request_ignores_terminal_requests() {
        let store = IrrigationStore::new();
        store.create_request(sample_request(1, RequestStatus::Cancelled)).await;
        assert!(!store.has_active_request(RequestScope::Unit(1)).await);

        store.create_request(sample_request(1, RequestStatus::Pending)).await;
        assert!(store.has_active_request(RequestScope::Unit(1)).await);
    }
}
