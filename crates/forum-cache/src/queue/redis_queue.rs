//! Redis list queue with a per-class processing list.
//!
//! `next` moves a payload from the pending list into the processing list
//! (BRPOPLPUSH); `ack` removes it from there (LREM). Whatever is left in a
//! processing list after a crash is pushed back by [`EventQueue::recover`].

use async_trait::async_trait;
use forum_core::{
    Delivery, DeliveryTag, DomainError, EventClass, EventConsumer, EventQueue, PendingEvent,
    RepoResult, StoreKind,
};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use crate::keys::KeySpace;
use crate::pool::{RedisPool, RedisPoolError};

fn queue_err(err: impl Into<RedisPoolError>) -> DomainError {
    err.into().into_domain(StoreKind::Queue)
}

#[derive(Clone, Debug)]
pub struct RedisEventQueue {
    pool: RedisPool,
    keys: KeySpace,
    poll_timeout: Duration,
}

impl RedisEventQueue {
    #[must_use]
    pub fn new(pool: RedisPool, keys: KeySpace) -> Self {
        Self {
            pool,
            keys,
            poll_timeout: Duration::from_secs(1),
        }
    }

    /// How long a consumer blocks before `next` returns `None`.
    /// Redis only blocks in whole seconds, so anything shorter rounds up to one.
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Number of events waiting in the pending list
    pub async fn pending_len(&self, class: EventClass) -> RepoResult<usize> {
        let mut conn = self.pool.get().await.map_err(queue_err)?;
        let len: usize = conn
            .llen(self.keys.queue(class.as_str()))
            .await
            .map_err(queue_err)?;
        Ok(len)
    }
}

#[async_trait]
impl EventQueue for RedisEventQueue {
    async fn publish(&self, event: &PendingEvent) -> RepoResult<()> {
        let payload = event
            .to_json()
            .map_err(|e| queue_err(RedisPoolError::Serialization(e)))?;
        let mut conn = self.pool.get().await.map_err(queue_err)?;
        conn.lpush::<_, _, ()>(self.keys.queue(event.class.as_str()), payload)
            .await
            .map_err(queue_err)?;

        tracing::debug!(
            event_id = %event.event_id,
            class = %event.class,
            "Published pending event"
        );
        Ok(())
    }

    async fn consume(&self, class: EventClass) -> RepoResult<Box<dyn EventConsumer>> {
        Ok(Box::new(RedisEventConsumer {
            pool: self.pool.clone(),
            class,
            pending: self.keys.queue(class.as_str()),
            processing: self.keys.processing(class.as_str()),
            block_secs: self.poll_timeout.as_secs().max(1),
            next_tag: 0,
            in_flight: HashMap::new(),
        }))
    }

    async fn recover(&self, class: EventClass) -> RepoResult<usize> {
        let pending = self.keys.queue(class.as_str());
        let processing = self.keys.processing(class.as_str());
        let mut conn = self.pool.get().await.map_err(queue_err)?;

        // The processing list holds the newest delivery on its left. Moving from
        // there onto the right of pending leaves the oldest delivery rightmost,
        // so it is consumed first.
        let mut moved = 0;
        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&pending)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(queue_err)?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            tracing::warn!(class = %class, moved, "Recovered unacknowledged deliveries");
        }
        Ok(moved)
    }
}

/// Pull consumer for one event class
pub struct RedisEventConsumer {
    pool: RedisPool,
    class: EventClass,
    pending: String,
    processing: String,
    block_secs: u64,
    next_tag: u64,
    /// Raw payloads by tag, needed for LREM on ack
    in_flight: HashMap<DeliveryTag, String>,
}

#[async_trait]
impl EventConsumer for RedisEventConsumer {
    async fn next(&mut self) -> RepoResult<Option<Delivery>> {
        let mut conn = self.pool.get().await.map_err(queue_err)?;
        let payload: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.pending)
            .arg(&self.processing)
            .arg(self.block_secs)
            .query_async(&mut conn)
            .await
            .map_err(queue_err)?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match PendingEvent::from_json(&payload) {
            Ok(event) => {
                self.next_tag += 1;
                let tag = DeliveryTag(self.next_tag);
                self.in_flight.insert(tag, payload);
                Ok(Some(Delivery { tag, event }))
            }
            Err(e) => {
                // An undecodable payload can never succeed; drop it from processing
                tracing::error!(
                    class = %self.class,
                    payload = %payload,
                    error = %e,
                    "Discarding malformed queue payload"
                );
                conn.lrem::<_, _, ()>(&self.processing, 1, &payload)
                    .await
                    .map_err(queue_err)?;
                Ok(None)
            }
        }
    }

    async fn ack(&mut self, tags: &[DeliveryTag]) -> RepoResult<()> {
        let payloads: Vec<String> = tags
            .iter()
            .filter_map(|tag| self.in_flight.remove(tag))
            .collect();
        if payloads.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for payload in &payloads {
            pipe.lrem(&self.processing, 1, payload).ignore();
        }

        let mut conn = self.pool.get().await.map_err(queue_err)?;
        pipe.query_async::<()>(&mut conn).await.map_err(queue_err)?;

        tracing::trace!(class = %self.class, acked = payloads.len(), "Acknowledged deliveries");
        Ok(())
    }
}
