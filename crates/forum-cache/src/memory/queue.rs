//! In-process event queue with explicit acknowledgement.
//!
//! Unacknowledged deliveries stay in flight until [`EventQueue::recover`]
//! puts them back, mirroring the Redis processing list.

use async_trait::async_trait;
use forum_core::{
    Delivery, DeliveryTag, DomainError, EventClass, EventConsumer, EventQueue, PendingEvent,
    RepoResult,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Lane {
    pending: VecDeque<PendingEvent>,
    in_flight: BTreeMap<DeliveryTag, PendingEvent>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct Shared {
    lanes: Mutex<HashMap<EventClass, Lane>>,
    next_tag: AtomicU64,
    unavailable: AtomicBool,
    poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct InMemoryEventQueue {
    shared: Arc<Shared>,
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::with_poll_timeout(Duration::from_millis(50))
    }
}

impl InMemoryEventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                lanes: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(0),
                unavailable: AtomicBool::new(false),
                poll_timeout,
            }),
        }
    }

    /// Make publish and consume fail as if the broker were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> RepoResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::QueueError("event queue unavailable".into()));
        }
        Ok(())
    }

    pub fn pending_len(&self, class: EventClass) -> usize {
        self.shared
            .lanes
            .lock()
            .get(&class)
            .map_or(0, |lane| lane.pending.len())
    }

    pub fn in_flight_len(&self, class: EventClass) -> usize {
        self.shared
            .lanes
            .lock()
            .get(&class)
            .map_or(0, |lane| lane.in_flight.len())
    }

    /// Put every unacknowledged delivery back at the head of its lane
    fn requeue_in_flight(&self, class: EventClass) -> usize {
        let mut lanes = self.shared.lanes.lock();
        let Some(lane) = lanes.get_mut(&class) else {
            return 0;
        };
        let stranded = std::mem::take(&mut lane.in_flight);
        let moved = stranded.len();
        for event in stranded.into_values().rev() {
            lane.pending.push_front(event);
        }
        if moved > 0 {
            lane.notify.notify_one();
        }
        moved
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn publish(&self, event: &PendingEvent) -> RepoResult<()> {
        self.check()?;
        let mut lanes = self.shared.lanes.lock();
        let lane = lanes.entry(event.class).or_default();
        lane.pending.push_back(event.clone());
        lane.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, class: EventClass) -> RepoResult<Box<dyn EventConsumer>> {
        self.check()?;
        let notify = self
            .shared
            .lanes
            .lock()
            .entry(class)
            .or_default()
            .notify
            .clone();
        Ok(Box::new(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            class,
            notify,
        }))
    }

    async fn recover(&self, class: EventClass) -> RepoResult<usize> {
        self.check()?;
        Ok(self.requeue_in_flight(class))
    }
}

struct InMemoryConsumer {
    shared: Arc<Shared>,
    class: EventClass,
    notify: Arc<Notify>,
}

impl InMemoryConsumer {
    fn try_take(&self) -> Option<Delivery> {
        let mut lanes = self.shared.lanes.lock();
        let lane = lanes.get_mut(&self.class)?;
        let event = lane.pending.pop_front()?;
        let tag = DeliveryTag(self.shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1);
        lane.in_flight.insert(tag, event.clone());
        Some(Delivery { tag, event })
    }
}

#[async_trait]
impl EventConsumer for InMemoryConsumer {
    async fn next(&mut self) -> RepoResult<Option<Delivery>> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::QueueError("event queue unavailable".into()));
        }
        if let Some(delivery) = self.try_take() {
            return Ok(Some(delivery));
        }
        if tokio::time::timeout(self.shared.poll_timeout, self.notify.notified())
            .await
            .is_err()
        {
            return Ok(None);
        }
        Ok(self.try_take())
    }

    async fn ack(&mut self, tags: &[DeliveryTag]) -> RepoResult<()> {
        let mut lanes = self.shared.lanes.lock();
        if let Some(lane) = lanes.get_mut(&self.class) {
            for tag in tags {
                lane.in_flight.remove(tag);
            }
        }
        Ok(())
    }
}
