//! In-process typed pub/sub event bus (spec §4.1).
//!
//! The teacher has no direct analog — its "bus" is MQTT round-trips to the
//! broker. This module is modeled fresh around the one hard requirement
//! spec §4.1/§5 both state: publishers never block on subscribers. Each
//! subscriber owns a bounded queue; on overflow the oldest queued event is
//! dropped and counted, never the publish call blocked or rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::actuator::{ActuatorKind, ActuatorReading};
use crate::sensor::SensorReading;

/// Closed topic set (spec §4.1). A tagged enum, not a string, per the
/// redesign note on dynamic dispatch over string fields (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    SensorEnvUpdate,
    SensorPlantUpdate,
    ActuatorStateChanged,
    IrrigationRequestCreated,
    IrrigationRequestApproved,
    IrrigationRequestDelayed,
    IrrigationRequestCancelled,
    IrrigationRequestExecuted,
    IrrigationRequestExpired,
    SystemHealthChanged,
}

/// A system health change, published whenever a subscriber queue overflows
/// or another operationally-relevant condition fires.
#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub unit_id: u64,
    pub message: String,
}

/// Every event carries `unit_id` so controllers can filter before reacting
/// (spec §4.1: "controllers MUST filter on it").
#[derive(Debug, Clone)]
pub enum Event {
    SensorEnvUpdate(SensorReading),
    SensorPlantUpdate(SensorReading),
    ActuatorStateChanged {
        unit_id: u64,
        actuator_id: String,
        kind: ActuatorKind,
        reading: ActuatorReading,
    },
    IrrigationRequestCreated { unit_id: u64, request_id: u64 },
    IrrigationRequestApproved { unit_id: u64, request_id: u64 },
    IrrigationRequestDelayed { unit_id: u64, request_id: u64 },
    IrrigationRequestCancelled { unit_id: u64, request_id: u64 },
    IrrigationRequestExecuted { unit_id: u64, request_id: u64 },
    IrrigationRequestExpired { unit_id: u64, request_id: u64 },
    SystemHealthChanged(HealthEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::SensorEnvUpdate(_) => Topic::SensorEnvUpdate,
            Event::SensorPlantUpdate(_) => Topic::SensorPlantUpdate,
            Event::ActuatorStateChanged { .. } => Topic::ActuatorStateChanged,
            Event::IrrigationRequestCreated { .. } => Topic::IrrigationRequestCreated,
            Event::IrrigationRequestApproved { .. } => Topic::IrrigationRequestApproved,
            Event::IrrigationRequestDelayed { .. } => Topic::IrrigationRequestDelayed,
            Event::IrrigationRequestCancelled { .. } => Topic::IrrigationRequestCancelled,
            Event::IrrigationRequestExecuted { .. } => Topic::IrrigationRequestExecuted,
            Event::IrrigationRequestExpired { .. } => Topic::IrrigationRequestExpired,
            Event::SystemHealthChanged(_) => Topic::SystemHealthChanged,
        }
    }
}

/// Opaque handle returned by [`EventBus::subscribe`]; pass to
/// [`EventBus::unsubscribe`] to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct SubscriberQueue {
    capacity: usize,
    items: std::sync::Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event, dropping the oldest queued one if full. Never blocks.
    fn push(&self, event: Event) {
        let mut items = self.items.lock().expect("subscriber queue poisoned");
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(event);
        drop(items);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Event> {
        self.items.lock().expect("subscriber queue poisoned").pop_front()
    }
}

/// A live subscription: call [`Subscription::recv`] to await the next
/// event on this topic.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    pub token: SubscriptionToken,
}

impl Subscription {
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.queue.try_pop() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking poll; `None` if nothing is queued.
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.try_pop()
    }

    /// Number of events dropped from this subscriber's queue due to
    /// overflow since subscription began.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// The process-wide event bus. A single instance is constructed at
/// startup and shared via `Arc` (Design Notes §9: global mutable state is
/// limited to this and the actuator registry, and both are explicit
/// objects with init, never hidden module statics).
pub struct EventBus {
    subscribers: RwLock<HashMap<Topic, Vec<(SubscriptionToken, Arc<SubscriberQueue>)>>>,
    next_token: AtomicU64,
    queue_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a handler for `topic`. Returns a [`Subscription`] the
    /// caller polls independently; the bus itself never invokes callbacks.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        self.subscribers
            .write()
            .await
            .entry(topic)
            .or_default()
            .push((token, queue.clone()));
        Subscription { queue, token }
    }

    /// Idempotent: removing an unknown or already-removed token is a no-op.
    /// Pending deliveries already queued for the subscriber may still be
    /// observed if the caller keeps polling its `Subscription` (spec §4.1).
    pub async fn unsubscribe(&self, topic: Topic, token: SubscriptionToken) {
        if let Some(subs) = self.subscribers.write().await.get_mut(&topic) {
            subs.retain(|(t, _)| *t != token);
        }
    }

    /// Non-blocking fan-out: enqueues `event` for every current subscriber
    /// of its topic and returns. Never awaits subscriber processing.
    pub async fn publish(&self, event: Event) {
        let topic = event.topic();
        let subs = self.subscribers.read().await;
        if let Some(targets) = subs.get(&topic) {
            for (_, queue) in targets {
                queue.push(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Metric, SensorReading};

    fn reading(unit_id: u64) -> SensorReading {
        SensorReading::single(unit_id, "s1".into(), Metric::Temperature, 22.0, 1_000)
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let sub = bus.subscribe(Topic::SensorEnvUpdate).await;
        bus.publish(Event::SensorEnvUpdate(reading(1))).await;

        let event = sub.recv().await;
        match event {
            Event::SensorEnvUpdate(r) => assert_eq!(r.unit_id, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = EventBus::default();
        let sub = bus.subscribe(Topic::SystemHealthChanged).await;
        bus.unsubscribe(Topic::SystemHealthChanged, sub.token).await;
        bus.unsubscribe(Topic::SystemHealthChanged, sub.token).await; // idempotent

        bus.publish(Event::SystemHealthChanged(HealthEvent {
            unit_id: 1,
            message: "test".into(),
        }))
        .await;

        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts_it() {
        let bus = EventBus::new(2);
        let sub = bus.subscribe(Topic::SensorEnvUpdate).await;

        for i in 0..5u64 {
            bus.publish(Event::SensorEnvUpdate(reading(i))).await;
        }

        assert_eq!(sub.dropped_count(), 3);
        // The two newest survive.
        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        match (first, second) {
            (Event::SensorEnvUpdate(a), Event::SensorEnvUpdate(b)) => {
                assert_eq!(a.unit_id, 3);
                assert_eq!(b.unit_id, 4);
            }
            _ => panic!("unexpected event shapes"),
        }
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_does_not_block_when_no_subscribers() {
        let bus = EventBus::default();
        bus.publish(Event::SensorEnvUpdate(reading(1))).await;
    }
}
