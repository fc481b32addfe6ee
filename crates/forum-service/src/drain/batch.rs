//! Coalescing of queued deliveries into one flushable batch

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use forum_core::{ActionRecord, ActionWrite, EventClass, PendingEvent, Snowflake};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickCount {
    pub post_id: Snowflake,
    pub clicks: i64,
}

/// Events of one class reduced to their final effect.
///
/// Action events keep only the last event per (actor, target); clicks are
/// summed per post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedBatch {
    pub class: EventClass,
    pub actions: Vec<PendingEvent>,
    pub clicks: Vec<ClickCount>,
    /// Events received before coalescing
    pub received: usize,
}

impl CoalescedBatch {
    pub fn empty(class: EventClass) -> Self {
        Self {
            class,
            actions: Vec::new(),
            clicks: Vec::new(),
            received: 0,
        }
    }

    /// Events are taken in arrival order; events of another class or with a
    /// state their class does not admit are dropped.
    pub fn coalesce(class: EventClass, events: impl IntoIterator<Item = PendingEvent>) -> Self {
        let mut batch = Self::empty(class);
        let mut positions: HashMap<(Snowflake, Snowflake), usize> = HashMap::new();
        let mut clicks: BTreeMap<Snowflake, i64> = BTreeMap::new();

        for event in events {
            batch.received += 1;
            if event.class != class {
                tracing::warn!(
                    event_id = %event.event_id,
                    expected = %class,
                    found = %event.class,
                    "Dropping event delivered to the wrong drain"
                );
                continue;
            }

            if class == EventClass::Click {
                *clicks.entry(event.target_id).or_insert(0) += 1;
                continue;
            }

            let Some(record) = event.record() else {
                continue;
            };
            if let Err(e) = ActionRecord::new(record.actor_id, record.target_id, record.class, record.state) {
                tracing::warn!(event_id = %event.event_id, error = %e, "Dropping malformed event");
                continue;
            }

            match positions.get(&record.pair()) {
                Some(&index) => batch.actions[index] = event,
                None => {
                    positions.insert(record.pair(), batch.actions.len());
                    batch.actions.push(event);
                }
            }
        }

        batch.clicks = clicks
            .into_iter()
            .map(|(post_id, clicks)| ClickCount { post_id, clicks })
            .collect();
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.clicks.is_empty()
    }

    /// Entries left after coalescing
    pub fn len(&self) -> usize {
        self.actions.len() + self.clicks.len()
    }

    /// Every distinct target in the batch
    pub fn targets(&self) -> Vec<Snowflake> {
        let mut seen = HashSet::new();
        self.actions
            .iter()
            .map(|e| e.target_id)
            .chain(self.clicks.iter().map(|c| c.post_id))
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Drop entries whose target is not in `live`; returns how many were dropped
    pub fn retain_targets(&mut self, live: &HashSet<Snowflake>) -> usize {
        let before = self.len();
        self.actions.retain(|e| live.contains(&e.target_id));
        self.clicks.retain(|c| live.contains(&c.post_id));
        before - self.len()
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.actions.iter().filter_map(PendingEvent::record).collect()
    }

    /// Relational writes, each carrying its event id as the row id for inserts
    pub fn writes(&self) -> Vec<ActionWrite> {
        self.actions
            .iter()
            .filter_map(|e| e.record().map(|r| ActionWrite::new(e.event_id, r)))
            .collect()
    }

    pub fn click_counts(&self) -> Vec<(Snowflake, i64)> {
        self.clicks.iter().map(|c| (c.post_id, c.clicks)).collect()
    }
}
