//! Event queue port. Deliveries stay pending until explicitly acknowledged.

use async_trait::async_trait;

use super::authoritative::RepoResult;
use crate::events::{EventClass, PendingEvent};

/// Consumer-local handle used to acknowledge a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub event: PendingEvent,
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn publish(&self, event: &PendingEvent) -> RepoResult<()>;

    /// Open a pull consumer for one event class
    async fn consume(&self, class: EventClass) -> RepoResult<Box<dyn EventConsumer>>;

    /// Return deliveries a previous consumer never acknowledged to the pending list
    async fn recover(&self, class: EventClass) -> RepoResult<usize>;
}

#[async_trait]
pub trait EventConsumer: Send {
    /// Next delivery, or `None` when nothing arrived within the consumer's poll window
    async fn next(&mut self) -> RepoResult<Option<Delivery>>;

    /// Acknowledge deliveries once their batch is settled
    async fn ack(&mut self, tags: &[DeliveryTag]) -> RepoResult<()>;
}
